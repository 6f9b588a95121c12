//! Register addresses, bit fields and identifiers of the AFE

use bitflags::bitflags;
use num_derive::FromPrimitive;

pub mod consts {
    //! AFE register addresses used by the method engine.
    //!
    //! Only registers written by the generated sequences or touched while
    //! arming a run are listed here; everything between 0x2000 and 0x21FC is
    //! reachable from a sequencer write command.

    pub const AFECON: u16 = 0x2000;
    pub const SEQCON: u16 = 0x2004;
    pub const FIFOCON: u16 = 0x2008;
    pub const ADCFILTERCON: u16 = 0x2044;
    pub const AFEGENINTSTA: u16 = 0x209C;
    pub const LPTIACON0: u16 = 0x20EC;
    pub const LPDACDAT0: u16 = 0x2120;
    pub const LPDACCON0: u16 = 0x2128;
    pub const ADCCON: u16 = 0x21A8;
    pub const SEQ0INFO: u16 = 0x21CC;
    pub const SEQ1INFO: u16 = 0x21D4;
    pub const SEQ2INFO: u16 = 0x21DC;
    pub const SEQ3INFO: u16 = 0x21E4;
    pub const DATAFIFOTHRES: u16 = 0x21E0;
    pub const FIFOCNTSTA: u16 = 0x2200;
    pub const TRIGSEQ: u16 = 0x2430;
    pub const INTCSEL0: u16 = 0x3008;

    /// Lowest register reachable from a sequencer write
    pub const SEQ_REG_BASE: u16 = 0x2000;
    /// Highest register reachable from a sequencer write
    pub const SEQ_REG_TOP: u16 = 0x21FC;

    /// Bit position of the block address in a SEQxINFO register
    pub const SEQINFO_ADDR: u32 = 0;
    /// Bit position of the block length in a SEQxINFO register
    pub const SEQINFO_LEN: u32 = 16;
    /// Bit position of the data FIFO word count in FIFOCNTSTA
    pub const FIFOCNT_SHIFT: u32 = 16;
    pub const FIFOCNT_MASK: u32 = 0x7ff;

    /// Bit position of the 6-bit zero code in LPDACDAT0
    pub const LPDAC_ZERO_SHIFT: u32 = 12;
}

bitflags! {
    /// Interrupt sources of the AFE interrupt controller
    pub struct IntSource: u32 {
        const ADCRDY = 1 << 0;
        const DFTRDY = 1 << 1;
        const SINC2RDY = 1 << 2;
        const CUSTOMINT0 = 1 << 9;
        /// Raised by the step blocks; one per acquisition window
        const CUSTOMINT1 = 1 << 10;
        const CUSTOMINT2 = 1 << 11;
        const CUSTOMINT3 = 1 << 12;
        const WAKEUP = 1 << 14;
        /// The sequencer executed a stop command
        const ENDSEQ = 1 << 15;
        const CMDFIFOOF = 1 << 21;
        const DATAFIFOFULL = 1 << 23;
        /// Data FIFO word count reached the configured threshold
        const DATAFIFOTHRESH = 1 << 25;
        const DATAFIFOOF = 1 << 26;
        const GPT1INT_TRYBRK = 1 << 31;

        /// Everything the method engine reacts to
        const ENGINE = Self::CUSTOMINT1.bits | Self::DATAFIFOTHRESH.bits
            | Self::ENDSEQ.bits | Self::GPT1INT_TRYBRK.bits | Self::CMDFIFOOF.bits;
    }
}

bitflags! {
    /// Analog front-end control bits (AFECON)
    pub struct AfeControl: u32 {
        const HPREFDIS = 1 << 5;
        const ALDOILIMITEN = 1 << 19;
        /// ADC power
        const ADCPWR = 1 << 7;
        /// ADC conversion
        const ADCCNV = 1 << 8;
        const WG = 1 << 14;
        const DFT = 1 << 15;
        const SINC2NOTCH = 1 << 16;

        /// Baseline written by every step block, ADC off
        const BASE = Self::ALDOILIMITEN.bits | Self::SINC2NOTCH.bits;
    }
}

impl AfeControl {
    /// Control word with the ADC powered and optionally converting
    pub fn adc(convert: bool) -> AfeControl {
        if convert {
            AfeControl::BASE | AfeControl::ADCPWR | AfeControl::ADCCNV
        } else {
            AfeControl::BASE | AfeControl::ADCPWR
        }
    }
}

/// Sequencer slots of the AFE. Each one has its own SEQxINFO register
/// holding the start address and length of the sequence it runs.
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SeqId {
    Seq0 = 0,
    Seq1 = 1,
    Seq2 = 2,
    Seq3 = 3,
}

impl SeqId {

    /// The SEQxINFO register of this sequence
    pub fn info_register(&self) -> u16 {
        match self {
            SeqId::Seq0 => consts::SEQ0INFO,
            SeqId::Seq1 => consts::SEQ1INFO,
            SeqId::Seq2 => consts::SEQ2INFO,
            SeqId::Seq3 => consts::SEQ3INFO,
        }
    }

    /// Pack a start address and length into a SEQxINFO value
    pub fn info_value(addr: u32, len: u32) -> u32 {
        (addr << consts::SEQINFO_ADDR) | (len << consts::SEQINFO_LEN)
    }

    /// Unpack a SEQxINFO value into `(address, length)`
    pub fn unpack_info(value: u32) -> (u32, u32) {
        ((value >> consts::SEQINFO_ADDR) & 0x7ff, (value >> consts::SEQINFO_LEN) & 0x7ff)
    }
}

/// ADC programmable gain amplifier setting
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq)]
#[repr(u8)]
pub enum PgaGain {
    Gain1 = 0,
    Gain1p5 = 1,
    Gain2 = 2,
    Gain4 = 3,
    Gain9 = 4,
}

impl PgaGain {
    pub fn factor(&self) -> f32 {
        match self {
            PgaGain::Gain1 => 1.0,
            PgaGain::Gain1p5 => 1.5,
            PgaGain::Gain2 => 2.0,
            PgaGain::Gain4 => 4.0,
            PgaGain::Gain9 => 9.0,
        }
    }
}

/// Low power transimpedance amplifier feedback resistor. `Open`
/// disconnects the internal resistor so an external one is used.
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq)]
#[repr(u8)]
pub enum LpTiaRtia {
    Open = 0,
    R200 = 1,
    R1K = 2,
    R2K = 3,
    R3K = 4,
    R4K = 5,
    R6K = 6,
    R8K = 7,
    R10K = 8,
    R12K = 9,
    R16K = 10,
    R20K = 11,
    R24K = 12,
    R30K = 13,
    R32K = 14,
    R40K = 15,
    R48K = 16,
    R64K = 17,
    R85K = 18,
    R96K = 19,
    R100K = 20,
    R120K = 21,
    R128K = 22,
    R160K = 23,
    R196K = 24,
    R256K = 25,
    R512K = 26,
}

impl LpTiaRtia {

    /// Nominal magnitude in Ohm; `None` for [`LpTiaRtia::Open`]
    pub fn nominal(&self) -> Option<f32> {
        let ohm = match self {
            LpTiaRtia::Open => return None,
            LpTiaRtia::R200 => 200.0,
            LpTiaRtia::R1K => 1_000.0,
            LpTiaRtia::R2K => 2_000.0,
            LpTiaRtia::R3K => 3_000.0,
            LpTiaRtia::R4K => 4_000.0,
            LpTiaRtia::R6K => 6_000.0,
            LpTiaRtia::R8K => 8_000.0,
            LpTiaRtia::R10K => 10_000.0,
            LpTiaRtia::R12K => 12_000.0,
            LpTiaRtia::R16K => 16_000.0,
            LpTiaRtia::R20K => 20_000.0,
            LpTiaRtia::R24K => 24_000.0,
            LpTiaRtia::R30K => 30_000.0,
            LpTiaRtia::R32K => 32_000.0,
            LpTiaRtia::R40K => 40_000.0,
            LpTiaRtia::R48K => 48_000.0,
            LpTiaRtia::R64K => 64_000.0,
            LpTiaRtia::R85K => 85_000.0,
            LpTiaRtia::R96K => 96_000.0,
            LpTiaRtia::R100K => 100_000.0,
            LpTiaRtia::R120K => 120_000.0,
            LpTiaRtia::R128K => 128_000.0,
            LpTiaRtia::R160K => 160_000.0,
            LpTiaRtia::R196K => 196_000.0,
            LpTiaRtia::R256K => 256_000.0,
            LpTiaRtia::R512K => 512_000.0,
        };

        Some(ohm)
    }
}

/// Sinc3 filter oversampling ratio
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq)]
#[repr(u8)]
pub enum Sinc3Osr {
    Osr5 = 0,
    Osr4 = 1,
    Osr2 = 2,
}

/// Sinc2 filter oversampling ratio
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq)]
#[repr(u8)]
pub enum Sinc2Osr {
    Osr22 = 0,
    Osr44 = 1,
    Osr89 = 2,
    Osr178 = 3,
    Osr267 = 4,
    Osr533 = 5,
    Osr640 = 6,
    Osr667 = 7,
    Osr800 = 8,
    Osr889 = 9,
    Osr1067 = 10,
    Osr1333 = 11,
}


#[cfg(test)]
mod tests {

    use super::{SeqId, LpTiaRtia, IntSource};
    use num_traits::FromPrimitive;

    #[test]
    fn seqinfo_roundtrip() {
        let value = SeqId::info_value(0x1a5, 7);
        assert_eq!(value, 0x0007_01a5);
        assert_eq!(SeqId::unpack_info(value), (0x1a5, 7));
    }

    #[test]
    fn rtia_codes() {
        assert_eq!(LpTiaRtia::from_u8(11), Some(LpTiaRtia::R20K));
        assert_eq!(LpTiaRtia::R20K.nominal(), Some(20_000.0));
        assert_eq!(LpTiaRtia::Open.nominal(), None);
        assert_eq!(LpTiaRtia::from_u8(27), None);
    }

    #[test]
    fn engine_mask() {
        assert!(IntSource::ENGINE.contains(IntSource::CUSTOMINT1));
        assert!(IntSource::ENGINE.contains(IntSource::ENDSEQ));
        assert!(!IntSource::ENGINE.contains(IntSource::ADCRDY));
    }
}
