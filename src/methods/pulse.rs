//! Chronoamperometry and the pulse voltammetry methods
//!
//! All four run through a list of phases, each holding the DAC at one
//! target for a number of acquisition events. Chronoamperometry samples
//! continuously and counts its phases down by the sampling interval; the
//! voltammetric methods take one short sample per phase and count down by
//! one event.

use log::debug;

use crate::codec::{DacCodePair, VoltageCodec, MAX_OUTPUT, MIN_OUTPUT};
use crate::config::{ExperimentParameters, Method};
use crate::error::ValidationError;
use crate::frontend::Measurand;
use crate::instructions::{BlockLayout, TICKS_PER_US};
use crate::programmer::{NextAction, PlannedStep, SampleRole};
use crate::registers::SeqId;
use crate::timer::Schedule;
use super::{MethodProgram, ProgramPlan};


/// The members of the pulse family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseKind {
    /// Chronoamperometry
    Chrono,
    /// Differential pulse: base then base plus amplitude, current is
    /// pulse minus base
    Differential,
    /// Normal pulse: return to a fixed base between growing pulses, only
    /// the pulse is recorded
    Normal,
    /// Square wave: forward and reverse pulse around the staircase,
    /// current is forward minus reverse
    SquareWave,
}

impl PulseKind {
    fn from_method(method: Method) -> Option<PulseKind> {
        match method {
            Method::CA => Some(PulseKind::Chrono),
            Method::DPV => Some(PulseKind::Differential),
            Method::NPV => Some(PulseKind::Normal),
            Method::SWV => Some(PulseKind::SquareWave),
            _ => None
        }
    }
}


/// One DAC target held for `duration` countdown units
#[derive(Clone, Copy, Debug, PartialEq)]
struct Phase {
    applied: f32,
    code: DacCodePair,
    duration: f32,
    opens: bool,
    role: SampleRole,
}

impl Phase {
    fn new(applied: f32, duration: f32, opens: bool, role: SampleRole) -> Phase {
        Phase { applied, code: DacCodePair::default(), duration, opens, role }
    }
}


/// State machine of the pulse family
#[derive(Clone, Debug)]
pub struct PulseMachine {
    kind: PulseKind,
    phases: Vec<Phase>,
    codec: VoltageCodec,
    decrement: f32,
    layout: BlockLayout,
    // Dwell of the two slots in seconds
    dwell: [f32; 2],
    cycles: u32,
    cycle: u32,
    index: Option<usize>,
    remaining: f32,
}

impl PulseMachine {

    pub fn new(kind: PulseKind, params: &ExperimentParameters) -> Result<PulseMachine, ValidationError> {
        if params.cycles == 0 {
            return Err(ValidationError::InvalidParameter("at least one cycle is required"));
        }

        let machine = match kind {
            PulseKind::Chrono => PulseMachine::chrono(params)?,
            _ => PulseMachine::voltammetry(kind, params)?,
        };

        debug!("{:?}: {} phases, {} cycles, layout {:?}",
               kind, machine.phases.len(), machine.cycles, machine.layout);

        Ok(machine)
    }

    fn chrono(params: &ExperimentParameters) -> Result<PulseMachine, ValidationError> {
        if params.potential_steps.is_empty() {
            return Err(ValidationError::InvalidParameter("no potential steps"));
        }
        if params.potential_steps.len() != params.pulse_durations.len() {
            return Err(ValidationError::InvalidParameter("potential steps and pulse durations differ in length"));
        }
        if !(params.sampling_interval > 0.0) {
            return Err(ValidationError::InvalidParameter("sampling interval must be positive"));
        }
        if params.pulse_durations.iter().any(|d| !(*d > 0.0)) {
            return Err(ValidationError::InvalidParameter("pulse durations must be positive"));
        }

        let phases = params.potential_steps.iter()
            .zip(params.pulse_durations.iter())
            .map(|(v, d)| Phase::new(*v, *d, true, SampleRole::Record))
            .collect();

        let interval = params.sampling_interval / 1000.0;

        PulseMachine::assemble(PulseKind::Chrono, phases, params.sampling_interval,
            BlockLayout::Chrono, [interval, interval], params.cycles)
    }

    fn voltammetry(kind: PulseKind, params: &ExperimentParameters) -> Result<PulseMachine, ValidationError> {
        if params.potential_steps.len() < 2 || params.pulse_durations.len() < 2 {
            return Err(ValidationError::InvalidParameter("staircase step, pulse amplitude and both phase durations are required"));
        }

        let step = params.potential_steps[0].abs();
        let amplitude = params.potential_steps[1];
        let (base_time, pulse_time) = (params.pulse_durations[0], params.pulse_durations[1]);

        if !(step > 0.0) {
            return Err(ValidationError::InvalidParameter("staircase step must be non-zero"));
        }
        if !(base_time > 0.0) || !(pulse_time > 0.0) {
            return Err(ValidationError::InvalidParameter("pulse durations must be positive"));
        }
        if !(params.sampling_duration > 0.0) || params.sampling_duration >= base_time.min(pulse_time) {
            return Err(ValidationError::InvalidParameter("sampling duration must be shorter than both phases"));
        }

        // staircase from start to stop, both included
        let direction = if params.stop < params.start { -1.0 } else { 1.0 };
        let levels = ((params.stop - params.start).abs() / step).round() as usize;

        let mut phases = Vec::with_capacity(2 * (levels + 1));
        for k in 0..=levels {
            let level = params.start + direction * step * k as f32;

            let (first, second) = match kind {
                PulseKind::Differential => (
                    Phase::new(level, 1.0, true, SampleRole::Reference),
                    Phase::new(level + amplitude, 1.0, false, SampleRole::Difference { invert: false }),
                ),
                PulseKind::Normal => (
                    Phase::new(params.base_potential, 1.0, false, SampleRole::Discard),
                    Phase::new(level, 1.0, true, SampleRole::Record),
                ),
                PulseKind::SquareWave => (
                    Phase::new(level + amplitude, 1.0, true, SampleRole::Reference),
                    Phase::new(level - amplitude, 1.0, false, SampleRole::Difference { invert: true }),
                ),
                PulseKind::Chrono =>
                    return Err(ValidationError::InvalidParameter("chronoamperometry has no staircase")),
            };

            phases.push(first);
            phases.push(second);
        }

        let sample_ticks = (params.sampling_duration * 1000.0 * TICKS_PER_US as f32).round() as u32;

        PulseMachine::assemble(kind, phases, 1.0, BlockLayout::Pulse { sample_ticks },
            [base_time / 1000.0, pulse_time / 1000.0], params.cycles)
    }

    fn assemble(kind: PulseKind, mut phases: Vec<Phase>, decrement: f32, layout: BlockLayout,
                dwell: [f32; 2], cycles: u32) -> Result<PulseMachine, ValidationError> {

        let highest = phases.iter().map(|p| p.applied).fold(f32::MIN, f32::max);
        let lowest = phases.iter().map(|p| p.applied).fold(f32::MAX, f32::min);

        let span = highest - lowest;
        if span >= MAX_OUTPUT - MIN_OUTPUT {
            return Err(ValidationError::TurningPotentialOutOfRange(span));
        }

        // pulse methods always hold the working electrode
        let codec = VoltageCodec::fixed(highest);
        for phase in phases.iter_mut() {
            phase.code = codec.to_code(phase.applied);
        }

        Ok(PulseMachine {
            kind,
            phases,
            codec,
            decrement,
            layout,
            dwell,
            cycles,
            cycle: 1,
            index: None,
            remaining: 0.0,
        })
    }

    pub fn kind(&self) -> PulseKind {
        self.kind
    }

    /// Number of phases in one cycle
    pub fn phases(&self) -> usize {
        self.phases.len()
    }

    /// Cycle of the last emitted step
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn codec(&self) -> &VoltageCodec {
        &self.codec
    }

    fn emit(&self, index: usize) -> NextAction {
        let phase = &self.phases[index];
        NextAction::Step(PlannedStep {
            code: phase.code,
            voltage: VoltageCodec::to_voltage(&phase.code),
            cycle: self.cycle,
            opens: phase.opens,
            role: phase.role,
        })
    }
}

impl MethodProgram for PulseMachine {

    fn validate(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError> {
        match PulseKind::from_method(method) {
            Some(kind) => PulseMachine::new(kind, params),
            None => Err(ValidationError::MethodDisabledOrUnknown(method as u8)),
        }
    }

    fn program_blocks(&self) -> ProgramPlan {
        let schedule = Schedule::new(&[SeqId::Seq1, SeqId::Seq2])
            .dwell(SeqId::Seq1, self.dwell[0])
            .dwell(SeqId::Seq2, self.dwell[1]);

        ProgramPlan {
            init: SeqId::Seq0,
            adc: None,
            blocks: Some((self.layout, [SeqId::Seq1, SeqId::Seq2])),
            schedule,
            measurand: Measurand::Current,
            initial: self.phases.first().map(|p| p.code).unwrap_or_default(),
        }
    }

    fn next_state(&mut self) -> NextAction {
        let index = match self.index {
            None => {
                self.cycle = 1;
                self.remaining = self.phases.first().map(|p| p.duration).unwrap_or(0.0);
                0
            },
            Some(index) => {
                self.remaining -= self.decrement;
                if self.remaining > 0.0 {
                    index
                } else {
                    let mut next = index + 1;
                    if next >= self.phases.len() {
                        next = 0;
                        self.cycle += 1;
                    }
                    if self.cycle > self.cycles {
                        debug!("{:?} finished after {} cycles", self.kind, self.cycles);
                        return NextAction::Stop;
                    }
                    self.remaining = self.phases[next].duration;
                    next
                }
            }
        };

        if index >= self.phases.len() {
            return NextAction::Stop;
        }

        self.index = Some(index);
        self.emit(index)
    }
}
