//! Conversion between millivolts and the low power DAC code pair
//!
//! The low power DAC of the AFE synthesises the cell potential as the
//! difference of two outputs: a coarse 6-bit output driving the working
//! electrode ("zero") and a fine 12-bit output driving the reference
//! electrode ("bias"). Both span [`MIN_OUTPUT`] to [`MAX_OUTPUT`].

use crate::registers::consts::LPDAC_ZERO_SHIFT;
use crate::registers::PgaGain;

/// Highest DAC output in mV
pub const MAX_OUTPUT: f32 = 2400.0;
/// Lowest DAC output in mV
pub const MIN_OUTPUT: f32 = 200.0;
/// Resolution of the 6-bit output in mV
pub const LSB6: f32 = (MAX_OUTPUT - MIN_OUTPUT) / 64.0;
/// Resolution of the 12-bit output in mV
pub const LSB12: f32 = (MAX_OUTPUT - MIN_OUTPUT) / 4095.0;
/// Largest 6-bit code
pub const ZERO_MAX: u32 = 64;
/// Largest 12-bit code
pub const BIAS_MAX: u32 = 4095;
/// Headroom kept between the working electrode and the requested vertex, in mV
pub const WE_MARGIN: f32 = 50.0;

/// Mid-scale of the 16-bit ADC
const ADC_MIDSCALE: f32 = 32768.0;
/// Internal reference correction of the ADC transfer function
const ADC_KFACTOR: f32 = 1.835 / 1.82;


/// A pair of codes driving both low power DAC outputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DacCodePair {
    /// 6-bit working electrode code, 0 to 64
    pub zero: u32,
    /// 12-bit reference electrode code, 0 to 4095
    pub bias: u32,
}

impl DacCodePair {

    /// Value for the LPDACDAT0 register
    pub fn register(&self) -> u32 {
        (self.zero << LPDAC_ZERO_SHIFT) | self.bias
    }

    /// Decode an LPDACDAT0 value
    pub fn from_register(value: u32) -> DacCodePair {
        DacCodePair {
            zero: (value >> LPDAC_ZERO_SHIFT) & 0x3f,
            bias: value & 0xfff,
        }
    }
}


/// Working electrode potentials used to select the 6-bit code
///
/// Positive cell potentials derive the zero code from `high`, everything
/// else from `low`. When the working electrode is held fixed both are the
/// same.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoltageCodec {
    pub high: f32,
    pub low: f32,
}

impl VoltageCodec {

    /// Codec for a working electrode that follows the sweep: the zero
    /// output sits above `upper` for positive potentials and at the bottom
    /// of the DAC range otherwise.
    pub fn variable(upper: f32) -> VoltageCodec {
        VoltageCodec {
            high: upper + WE_MARGIN + MIN_OUTPUT,
            low: MIN_OUTPUT,
        }
    }

    /// Codec for a working electrode held at a single potential. The
    /// potential is clamped so the bias output keeps its full range below
    /// it.
    pub fn fixed(upper: f32) -> VoltageCodec {
        let we = (upper + WE_MARGIN + MIN_OUTPUT)
            .max(WE_MARGIN + 2.0 * MIN_OUTPUT)
            .min(MAX_OUTPUT);
        VoltageCodec { high: we, low: we }
    }

    /// Convert a cell potential in mV into a DAC code pair.
    ///
    /// Out of range requests are clipped silently. The bias code is kept
    /// strictly below `zero*64` so the net bias never collapses to exactly
    /// zero at a sign change.
    pub fn to_code(&self, voltage: f32) -> DacCodePair {
        let we = if voltage > 0.0 { self.high } else { self.low };
        let zero = dac_code!(we - MIN_OUTPUT, LSB6, ZERO_MAX);

        let full = (zero * 64) as i64;
        let mut bias = full - (voltage / LSB12).round() as i64;
        if bias <= full {
            bias -= 1;
        }

        let bias = match bias {
            b if b < 0 => 0u32,
            b if b > BIAS_MAX as i64 => BIAS_MAX,
            b => b as u32
        };

        DacCodePair { zero, bias }
    }

    /// Cell potential in mV produced by a code pair
    pub fn to_voltage(pair: &DacCodePair) -> f32 {
        pair.zero as f32 * LSB6 - pair.bias as f32 * LSB12
    }
}


/// Convert a 16-bit ADC code into mV for a reference voltage given in mV
pub fn adc_code_to_voltage(code: u32, gain: PgaGain, vref: f32) -> f32 {
    let offset = code as f32 - ADC_MIDSCALE;
    offset * vref / ADC_MIDSCALE * (ADC_KFACTOR / gain.factor())
}

/// Current in µA flowing through a transimpedance resistor of `rtia` Ohm
/// that develops `voltage` mV
pub fn current_from_voltage(voltage: f32, rtia: f32) -> f32 {
    1000.0 * voltage / rtia
}
