//! Per-method state machines
//!
//! Every method reduces to the same skeleton: a fixed initialisation
//! sequence, an optional ADC control sequence, two ping-pong step blocks
//! and a wake-up timer schedule. A [`MethodProgram`] describes that
//! skeleton for one method and decides, at every acquisition event, what
//! the next step block must do.

pub mod sweep;
pub mod pulse;
pub mod ocp;

use crate::codec::DacCodePair;
use crate::config::{ExperimentParameters, Method};
use crate::error::ValidationError;
use crate::frontend::Measurand;
use crate::instructions::{BlockLayout, Sequence};
use crate::programmer::NextAction;
use crate::registers::SeqId;
use crate::timer::Schedule;

pub use sweep::{SweepMachine, SweepState};
pub use pulse::{PulseMachine, PulseKind};
pub use ocp::OcpMachine;


/// Sequencer layout of a method
#[derive(Clone, Debug)]
pub struct ProgramPlan {
    /// Sequence running the one-off initialisation
    pub init: SeqId,
    /// Repeating helper sequence, if the method needs one
    pub adc: Option<(SeqId, &'static Sequence)>,
    /// Step block shape and the sequences of the two slots. `None` for
    /// methods that never move the DAC.
    pub blocks: Option<(BlockLayout, [SeqId; 2])>,
    pub schedule: Schedule,
    pub measurand: Measurand,
    /// DAC codes set by the initialisation sequence
    pub initial: DacCodePair,
}


/// Behaviour shared by all method state machines
pub trait MethodProgram {

    /// Check `params` and build the state machine for `method`. Nothing
    /// is written to the chip before this succeeds.
    fn validate(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError>
        where Self: Sized;

    /// Sequencer layout and timing of the method
    fn program_blocks(&self) -> ProgramPlan;

    /// Decide the next step. Called once to fill the first slot and then
    /// once per acquisition event.
    fn next_state(&mut self) -> NextAction;
}


/// The closed set of runnable methods
#[derive(Clone, Debug)]
pub enum MethodMachine {
    Sweep(SweepMachine),
    Pulse(PulseMachine),
    Ocp(OcpMachine),
}

impl MethodMachine {

    /// Validate `params` for `method` and build its state machine
    pub fn new(method: Method, params: &ExperimentParameters) -> Result<MethodMachine, ValidationError> {
        MethodMachine::validate(method, params)
    }
}

impl MethodProgram for MethodMachine {

    fn validate(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError> {
        let machine = match method {
            Method::CV | Method::LSV =>
                MethodMachine::Sweep(SweepMachine::validate(method, params)?),
            Method::CA | Method::DPV | Method::NPV | Method::SWV =>
                MethodMachine::Pulse(PulseMachine::validate(method, params)?),
            Method::OCP => MethodMachine::Ocp(OcpMachine::validate(method, params)?),
            other => return Err(ValidationError::MethodDisabledOrUnknown(other as u8)),
        };

        Ok(machine)
    }

    fn program_blocks(&self) -> ProgramPlan {
        match self {
            MethodMachine::Sweep(m) => m.program_blocks(),
            MethodMachine::Pulse(m) => m.program_blocks(),
            MethodMachine::Ocp(m) => m.program_blocks(),
        }
    }

    fn next_state(&mut self) -> NextAction {
        match self {
            MethodMachine::Sweep(m) => m.next_state(),
            MethodMachine::Pulse(m) => m.next_state(),
            MethodMachine::Ocp(m) => m.next_state(),
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn unknown_methods_are_rejected() {
        let params = ExperimentParameters::default();
        assert_matches!(MethodMachine::new(Method::EIS, &params),
            Err(ValidationError::MethodDisabledOrUnknown(9)));
        assert_matches!(MethodMachine::new(Method::Undefined, &params),
            Err(ValidationError::MethodDisabledOrUnknown(0)));
    }

    #[test]
    fn families() {
        let params = ExperimentParameters::default();
        assert_matches!(MethodMachine::new(Method::CV, &params), Ok(MethodMachine::Sweep(_)));
        assert_matches!(MethodMachine::new(Method::CA, &params), Ok(MethodMachine::Pulse(_)));

        let params = ExperimentParameters::pulse_defaults();
        assert_matches!(MethodMachine::new(Method::DPV, &params), Ok(MethodMachine::Pulse(_)));
        assert_matches!(MethodMachine::new(Method::OCP, &params), Ok(MethodMachine::Ocp(_)));
    }
}
