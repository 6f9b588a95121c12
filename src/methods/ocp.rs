//! Open circuit potential
//!
//! The DAC is never moved. A single repeating sequence closes the ADC
//! window, reports it and opens the next one; each report becomes one
//! record carrying the measured potential.

use log::debug;

use crate::codec::DacCodePair;
use crate::config::{ExperimentParameters, Method};
use crate::error::ValidationError;
use crate::frontend::Measurand;
use crate::instructions::OCP_SAMPLE;
use crate::programmer::{NextAction, PlannedStep, SampleRole};
use crate::registers::SeqId;
use crate::timer::Schedule;
use super::{MethodProgram, ProgramPlan};


#[derive(Clone, Debug)]
pub struct OcpMachine {
    per_cycle: usize,
    total: usize,
    taken: usize,
    interval: f32,
}

impl OcpMachine {

    pub fn new(params: &ExperimentParameters) -> Result<OcpMachine, ValidationError> {
        if !(params.measurement_length > 0.0) {
            return Err(ValidationError::InvalidParameter("measurement length must be positive"));
        }
        if !(params.sampling_interval > 0.0) {
            return Err(ValidationError::InvalidParameter("sampling interval must be positive"));
        }
        if params.cycles == 0 {
            return Err(ValidationError::InvalidParameter("at least one cycle is required"));
        }

        let per_cycle = ((params.measurement_length / params.sampling_interval).round() as usize).max(1);
        let total = per_cycle * params.cycles as usize;

        debug!("OCP: {} samples every {} ms", total, params.sampling_interval);

        Ok(OcpMachine { per_cycle, total, taken: 0, interval: params.sampling_interval / 1000.0 })
    }

    /// Samples the run takes
    pub fn total(&self) -> usize {
        self.total
    }
}

impl MethodProgram for OcpMachine {

    fn validate(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError> {
        match method {
            Method::OCP => OcpMachine::new(params),
            other => Err(ValidationError::MethodDisabledOrUnknown(other as u8)),
        }
    }

    fn program_blocks(&self) -> ProgramPlan {
        ProgramPlan {
            init: SeqId::Seq1,
            adc: Some((SeqId::Seq2, &*OCP_SAMPLE)),
            blocks: None,
            schedule: Schedule::new(&[SeqId::Seq2]).dwell(SeqId::Seq2, self.interval),
            measurand: Measurand::Potential,
            initial: DacCodePair::default(),
        }
    }

    fn next_state(&mut self) -> NextAction {
        if self.taken >= self.total {
            return NextAction::Stop;
        }

        let step = PlannedStep {
            code: DacCodePair::default(),
            voltage: 0.0,
            cycle: 1 + (self.taken / self.per_cycle) as u32,
            opens: true,
            role: SampleRole::Record,
        };
        self.taken += 1;

        NextAction::Step(step)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn sample_count() {
        let params = ExperimentParameters {
            measurement_length: 1000.0,
            sampling_interval: 100.0,
            cycles: 2,
            ..Default::default()
        };
        let mut machine = OcpMachine::new(&params).unwrap();
        assert_eq!(machine.total(), 20);

        let mut cycles = Vec::new();
        while let NextAction::Step(step) = machine.next_state() {
            cycles.push(step.cycle);
        }
        assert_eq!(cycles.len(), 20);
        assert_eq!(cycles[9], 1);
        assert_eq!(cycles[10], 2);
        assert_eq!(machine.next_state(), NextAction::Stop);
    }

    #[test]
    fn rejects_zero_interval() {
        let params = ExperimentParameters { sampling_interval: 0.0, ..Default::default() };
        assert_matches!(OcpMachine::new(&params), Err(ValidationError::InvalidParameter(_)));
    }

    #[test]
    fn measures_potential() {
        let machine = OcpMachine::new(&ExperimentParameters::default()).unwrap();
        let plan = machine.program_blocks();
        assert_eq!(plan.measurand, Measurand::Potential);
        assert!(plan.blocks.is_none());
    }
}
