//! Experiment parameters and engine configuration

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::ValidationError;
use crate::memory::SEQ_MEM_WORDS;
use crate::registers::{LpTiaRtia, PgaGain, Sinc2Osr, Sinc3Osr};


/// Electrochemical methods, tagged with their telegram codes
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    Undefined = 0,
    Sequence = 1,
    /// Open circuit potential
    OCP = 2,
    /// Chronoamperometry
    CA = 3,
    /// Linear sweep voltammetry
    LSV = 4,
    /// Cyclic voltammetry
    CV = 5,
    /// Normal pulse voltammetry
    NPV = 6,
    /// Differential pulse voltammetry
    DPV = 7,
    /// Square wave voltammetry
    SWV = 8,
    /// Impedance spectroscopy
    EIS = 9,
}

impl Method {

    /// Look up a method by its telegram code
    pub fn from_code(code: u8) -> Option<Method> {
        Method::from_u8(code)
    }

    /// Bit of this method in a [`MethodSet`]
    pub fn flag(&self) -> MethodSet {
        match self {
            Method::OCP => MethodSet::OCP,
            Method::CA => MethodSet::CA,
            Method::LSV => MethodSet::LSV,
            Method::CV => MethodSet::CV,
            Method::NPV => MethodSet::NPV,
            Method::DPV => MethodSet::DPV,
            Method::SWV => MethodSet::SWV,
            _ => MethodSet::empty(),
        }
    }
}

bitflags! {
    /// Methods the engine is allowed to run
    pub struct MethodSet: u16 {
        const OCP = 1 << 2;
        const CA = 1 << 3;
        const LSV = 1 << 4;
        const CV = 1 << 5;
        const NPV = 1 << 6;
        const DPV = 1 << 7;
        const SWV = 1 << 8;

        /// Everything but the open circuit measurement
        const DEFAULT = Self::CA.bits | Self::LSV.bits | Self::CV.bits
            | Self::NPV.bits | Self::DPV.bits | Self::SWV.bits;
    }
}


/// Lifecycle of the whole device
#[derive(Clone, Copy, FromPrimitive, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemStatus {
    Booting = 0,
    Waiting = 1,
    TypeReceived = 2,
    ParametersReceived = 3,
    Started = 4,
    Running = 5,
    Completed = 6,
    Cancelled = 7,
}

impl SystemStatus {

    /// Look up a status by the code reported to the host
    pub fn from_code(code: u8) -> Option<SystemStatus> {
        SystemStatus::from_u8(code)
    }

    /// Whether a run may be started from this status
    pub fn can_start(&self) -> bool {
        match self {
            SystemStatus::Started | SystemStatus::ParametersReceived => true,
            _ => false
        }
    }
}


/// Parameters of one experiment
///
/// Potentials are in mV, durations in ms and scan rates in mV/s. Not
/// every method uses every field:
///
/// * CV uses `start`, `lower`, `upper`, `step_size`, `scan_rate`, `cycles`.
/// * LSV uses `start`, `stop`, `step_size`, `scan_rate`.
/// * CA uses `potential_steps`, `pulse_durations`, `sampling_interval`,
///   `cycles`.
/// * DPV, NPV and SWV use `start`, `stop`, `potential_steps` (staircase
///   step and pulse amplitude), `pulse_durations` (base and pulse phase),
///   `sampling_duration` and, for NPV, `base_potential`.
/// * OCP uses `measurement_length`, `sampling_interval`, `cycles`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentParameters {
    pub start: f32,
    pub stop: f32,
    pub lower: f32,
    pub upper: f32,
    pub step_size: f32,
    pub scan_rate: f32,
    pub cycles: u32,
    pub potential_steps: Vec<f32>,
    pub pulse_durations: Vec<f32>,
    pub sampling_interval: f32,
    pub sampling_duration: f32,
    pub measurement_length: f32,
    pub base_potential: f32,
    /// Hold the working electrode at a single potential
    pub fixed_we: bool,
    pub rtia: LpTiaRtia,
    pub pga: PgaGain,
    pub mains_filter: bool,
    pub sinc2_osr: Sinc2Osr,
    pub sinc3_osr: Sinc3Osr,
}

impl Default for ExperimentParameters {
    fn default() -> Self {
        ExperimentParameters {
            start: 500.0,
            stop: 1050.0,
            lower: -620.0,
            upper: 1050.0,
            step_size: 2.0,
            scan_rate: 200.0,
            cycles: 1,
            potential_steps: vec![800.0, -400.0, -300.0],
            pulse_durations: vec![4000.0, 3000.0, 3000.0],
            sampling_interval: 100.0,
            sampling_duration: 10.0,
            measurement_length: 10_000.0,
            base_potential: 0.0,
            fixed_we: true,
            rtia: LpTiaRtia::R20K,
            pga: PgaGain::Gain1p5,
            mains_filter: true,
            sinc2_osr: Sinc2Osr::Osr667,
            sinc3_osr: Sinc3Osr::Osr4,
        }
    }
}

impl ExperimentParameters {

    /// Defaults suited to the pulse voltammetry methods: 50 mV staircase
    /// and pulse amplitude, 100 ms base and 50 ms pulse phase.
    pub fn pulse_defaults() -> Self {
        ExperimentParameters {
            potential_steps: vec![50.0, 50.0],
            pulse_durations: vec![100.0, 50.0],
            ..Default::default()
        }
    }
}


/// Engine wide configuration
///
/// Holds everything that does not change between experiments. It is
/// owned by the [`Instrument`][`crate::Instrument`] and lent to the
/// method controller for the duration of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneralConfig {
    /// Methods that may be run
    pub enabled: MethodSet,
    /// Capacity of the transmit ring
    pub transmit_buffer: usize,
    /// Words read from the data FIFO in one go
    pub sample_buffer: usize,
    /// Data FIFO level that raises the threshold interrupt
    pub fifo_threshold: usize,
    /// Cap for every chip wake-up probe
    pub wake_attempts: u32,
    /// Sequencer SRAM words available to the method sequences
    pub sequence_memory: u32,
    /// ADC reference voltage in mV
    pub adc_reference: f32,
    /// Magnitude of the external transimpedance resistor in Ohm
    pub external_rtia: f32,
    /// Calibrated low frequency oscillator frequency in Hz, measured at
    /// boot if `None`
    pub lfosc: Option<f32>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            enabled: MethodSet::DEFAULT,
            transmit_buffer: 10,
            sample_buffer: 250,
            fifo_threshold: 240,
            wake_attempts: 10,
            sequence_memory: SEQ_MEM_WORDS,
            adc_reference: 1820.0,
            external_rtia: 10_000.0,
            lfosc: None,
        }
    }
}

impl GeneralConfig {

    /// Check the buffer sizes
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sample_buffer == 0 || self.sample_buffer < self.fifo_threshold {
            return Err(ValidationError::SampleBufferTooSmall {
                size: self.sample_buffer,
                required: self.fifo_threshold.max(1)
            });
        }

        if self.transmit_buffer < 2 {
            return Err(ValidationError::SampleBufferTooSmall {
                size: self.transmit_buffer,
                required: 2
            });
        }

        Ok(())
    }

    /// Whether `method` may be run
    pub fn is_enabled(&self, method: Method) -> bool {
        let flag = method.flag();
        !flag.is_empty() && self.enabled.contains(flag)
    }
}
