//! Analog front end initialisation sequences

use crate::codec::DacCodePair;
use crate::config::ExperimentParameters;
use crate::instructions::{Command, Sequence};
use crate::registers::{AfeControl, LpTiaRtia};
use crate::registers::consts::*;

// LPDACCON0: powered, 12-bit output on the reference electrode
const LPDAC_ENABLE: u32 = 0x1;
// LPTIACON0 fields
const TIA_GAIN_SHIFT: u32 = 5;
const TIA_LOAD_SHIFT: u32 = 10;
const TIA_LOAD_10R: u32 = 0;
const TIA_LOAD_3K6: u32 = 6;
// ADCCON fields
const ADC_MUXP_SHIFT: u32 = 0;
const ADC_MUXN_SHIFT: u32 = 8;
const ADC_PGA_SHIFT: u32 = 16;
const MUXP_LPTIA0_P: u32 = 0x21;
const MUXN_LPTIA0_N: u32 = 0x02;
const MUXP_VRE0: u32 = 0x19;
const MUXN_VZERO0: u32 = 0x0a;
// ADCFILTERCON fields
const SINC2_OSR_SHIFT: u32 = 8;
const SINC3_OSR_SHIFT: u32 = 12;
const LPF_BYPASS: u32 = 1 << 4;


/// What the ADC looks at during a run
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurand {
    /// Output of the transimpedance amplifier, for current
    Current,
    /// Reference electrode against the working electrode, for potential
    Potential,
}

/// Build the one-off initialisation sequence of a run.
///
/// It powers the low power DAC and TIA, configures the ADC mux, gain and
/// filters, parks the DAC at `initial` and halts.
pub fn init_sequence(params: &ExperimentParameters, measurand: Measurand, initial: &DacCodePair) -> Sequence {
    let (rtia, load, muxp, muxn) = match measurand {
        Measurand::Current => (params.rtia, TIA_LOAD_10R, MUXP_LPTIA0_P, MUXN_LPTIA0_N),
        Measurand::Potential => (LpTiaRtia::R8K, TIA_LOAD_3K6, MUXP_VRE0, MUXN_VZERO0),
    };

    let tia = ((rtia as u32) << TIA_GAIN_SHIFT) | (load << TIA_LOAD_SHIFT);
    let adc = (muxp << ADC_MUXP_SHIFT) | (muxn << ADC_MUXN_SHIFT)
        | ((params.pga as u32) << ADC_PGA_SHIFT);

    let mut filter = ((params.sinc2_osr as u32) << SINC2_OSR_SHIFT)
        | ((params.sinc3_osr as u32) << SINC3_OSR_SHIFT);
    if !params.mains_filter {
        filter |= LPF_BYPASS;
    }

    let mut ctrl = AfeControl::BASE;
    if !params.mains_filter {
        ctrl.remove(AfeControl::SINC2NOTCH);
    }

    let mut seq = Sequence::new();
    seq.push(Command::Write { reg: LPDACCON0, data: LPDAC_ENABLE })
       .push(Command::dac(initial))
       .push(Command::Write { reg: LPTIACON0, data: tia })
       .push(Command::Write { reg: ADCCON, data: adc })
       .push(Command::Write { reg: ADCFILTERCON, data: filter })
       .push(Command::afe(ctrl))
       .push(Command::Stop);

    seq
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::registers::PgaGain;

    #[test]
    fn init_sequence_ends_with_stop() {
        let params = ExperimentParameters::default();
        let seq = init_sequence(&params, Measurand::Current, &DacCodePair::default());
        let last = *seq.view().last().unwrap();
        assert_eq!(Command::decode(last), Some(Command::Stop));
    }

    #[test]
    fn init_sequence_selects_gain_and_rtia() {
        let mut params = ExperimentParameters::default();
        params.pga = PgaGain::Gain4;
        let seq = init_sequence(&params, Measurand::Current, &DacCodePair::default());

        let cmds: Vec<Command> = seq.view().iter().filter_map(|w| Command::decode(*w)).collect();
        assert!(cmds.contains(&Command::Write {
            reg: ADCCON,
            data: MUXP_LPTIA0_P | (MUXN_LPTIA0_N << 8) | (3 << 16) }));
        assert!(cmds.contains(&Command::Write { reg: LPTIACON0, data: 11 << 5 }));
    }

    #[test]
    fn potential_measurement_uses_fixed_tia() {
        let params = ExperimentParameters::default();
        let seq = init_sequence(&params, Measurand::Potential, &DacCodePair::default());
        let cmds: Vec<Command> = seq.view().iter().filter_map(|w| Command::decode(*w)).collect();
        assert!(cmds.contains(&Command::Write { reg: LPTIACON0, data: (7 << 5) | (6 << 10) }));
    }
}
