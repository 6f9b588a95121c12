//! Error types of the method engine

use thiserror::Error;
use crate::memory::SequenceError;

/// Base of the errors reported before a run starts
pub const EC_SETUP: u32 = 21000;
/// Base of the errors reported while a run executes
pub const EC_EXECUTE: u32 = 22000;


/// Parameter problems found before any chip state is touched
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    /// The requested span exceeds what the DAC pair can produce
    #[error("Turning potentials out of range: span of {0} mV")]
    TurningPotentialOutOfRange(f32),
    /// The host side sample or transmit buffers are too small
    #[error("Sample buffer too small: {size} words, at least {required} required")]
    SampleBufferTooSmall { size: usize, required: usize },
    /// The method tag is unknown or the method is not enabled
    #[error("Method {0} disabled or unknown")]
    MethodDisabledOrUnknown(u8),
    /// A parameter is outside its domain
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

impl ValidationError {
    /// Numeric firmware error code
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SampleBufferTooSmall { .. } => EC_SETUP + 2,
            ValidationError::TurningPotentialOutOfRange(_) => EC_SETUP + 10,
            ValidationError::MethodDisabledOrUnknown(_) => EC_SETUP + 100,
            ValidationError::InvalidParameter(_) => EC_SETUP + 999,
        }
    }
}


/// Top level error of an experiment run
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Parameter validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Sequencer memory or measurement buffer exhausted
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
    /// The chip did not answer a bounded wake-up probe
    #[error("AFE did not wake up after {attempts} attempts")]
    WakeupFailed { attempts: u32, running: bool },
    /// The transport refused a record
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// A run is active
    #[error("Operation not permitted while an experiment is running")]
    Busy,
}

impl ExperimentError {

    /// Numeric firmware error code
    pub fn code(&self) -> u32 {
        match self {
            ExperimentError::Validation(err) => err.code(),
            ExperimentError::Sequence(SequenceError::SequenceBufferOverflow { .. }) => EC_SETUP + 3,
            ExperimentError::Sequence(SequenceError::BlockTooLong { .. }) => EC_SETUP + 3,
            ExperimentError::Sequence(SequenceError::RingOverrun(_)) => EC_EXECUTE + 2,
            ExperimentError::Sequence(SequenceError::NotPrimed) => EC_EXECUTE + 999,
            ExperimentError::WakeupFailed { running: false, .. } => EC_SETUP + 1,
            ExperimentError::WakeupFailed { running: true, .. } => EC_EXECUTE + 1,
            ExperimentError::Transport(_) => EC_EXECUTE + 3,
            ExperimentError::Busy => EC_SETUP + 999,
        }
    }
}
