//! Cyclic and linear sweep voltammetry
//!
//! The potential moves by a fixed number of 12-bit DAC codes per step.
//! A cyclic sweep runs from the start potential to the first vertex, back
//! through the start to the second vertex and returns to the start, once
//! per cycle. A linear sweep is the one-vertex case: it runs from the
//! start to the stop potential, once per cycle.

use log::debug;

use crate::codec::{VoltageCodec, LSB12, MAX_OUTPUT, MIN_OUTPUT};
use crate::config::{ExperimentParameters, Method};
use crate::error::ValidationError;
use crate::frontend::Measurand;
use crate::instructions::{BlockLayout, ADC_CONTROL};
use crate::programmer::{NextAction, PlannedStep, SampleRole};
use crate::registers::SeqId;
use crate::timer::Schedule;
use super::{MethodProgram, ProgramPlan};

/// Timer ticks spent outside the step blocks in every step: the sleep
/// phase after the step block plus the ADC control sequence.
const ADC_SEQUENCE_TICKS: u32 = 3;


/// States of a sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    /// Direction not chosen yet
    Init,
    ToFirstVertex,
    FromFirstVertex,
    ToSecondVertex,
    FromSecondVertex,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Shape {
    Cyclic,
    Linear,
}


/// State machine of the sweep methods
#[derive(Clone, Debug)]
pub struct SweepMachine {
    shape: Shape,
    codec: VoltageCodec,
    state: SweepState,
    // Direction towards the first vertex
    initial_rising: bool,
    rising: bool,
    // Potential of the next step in 12-bit LSBs
    code: i64,
    // Start potential in 12-bit LSBs, where every cycle begins
    origin: i64,
    increment: i64,
    steps_to_first: usize,
    steps_to_second: usize,
    steps_per_cycle: usize,
    cycles: u32,
    step: usize,
    // Seconds per step
    step_time: f32,
}

impl SweepMachine {

    /// Cyclic voltammetry between `lower` and `upper`, starting at `start`
    pub fn cyclic(params: &ExperimentParameters) -> Result<SweepMachine, ValidationError> {
        let span = (params.upper - params.lower).abs();
        check_span(span, params.fixed_we)?;

        let (low, high) = if params.lower < params.upper {
            (params.lower, params.upper)
        } else {
            (params.upper, params.lower)
        };

        if params.start < low || params.start > high {
            return Err(ValidationError::InvalidParameter("start potential outside the vertices"));
        }

        let increment = check_rates(params)?;
        let unit = increment as f32 * LSB12;

        let span_steps = (span / unit) as usize;
        if span_steps == 0 {
            return Err(ValidationError::InvalidParameter("step size larger than the sweep span"));
        }

        // `upper` is the first vertex whichever way round the vertices
        // are given, unless the sweep already starts on it
        let first = if params.start == params.upper { params.lower } else { params.upper };
        let rising = first > params.start;
        let steps_to_first = (((first - params.start).abs() / unit).round() as usize).min(span_steps);

        let machine = SweepMachine {
            shape: Shape::Cyclic,
            codec: codec_for(params.upper.max(params.lower), params.fixed_we),
            state: SweepState::Init,
            initial_rising: rising,
            rising,
            code: (params.start / LSB12).round() as i64,
            origin: (params.start / LSB12).round() as i64,
            increment,
            steps_to_first,
            steps_to_second: span_steps - steps_to_first,
            steps_per_cycle: 2 * span_steps,
            cycles: params.cycles,
            step: 0,
            step_time: unit / params.scan_rate,
        };

        debug!("CV: {} steps per cycle, {} to the first vertex, {} LSB per step",
               machine.steps_per_cycle, machine.steps_to_first, increment);

        Ok(machine)
    }

    /// Linear sweep from `start` to `stop`
    pub fn linear(params: &ExperimentParameters) -> Result<SweepMachine, ValidationError> {
        let span = (params.stop - params.start).abs();
        check_span(span, params.fixed_we)?;

        let increment = check_rates(params)?;
        let unit = increment as f32 * LSB12;

        let span_steps = (span / unit) as usize;
        if span_steps == 0 {
            return Err(ValidationError::InvalidParameter("step size larger than the sweep span"));
        }

        let machine = SweepMachine {
            shape: Shape::Linear,
            codec: codec_for(params.start.max(params.stop), params.fixed_we),
            state: SweepState::Init,
            initial_rising: params.start < params.stop,
            rising: params.start < params.stop,
            code: (params.start / LSB12).round() as i64,
            origin: (params.start / LSB12).round() as i64,
            increment,
            steps_to_first: span_steps,
            steps_to_second: 0,
            // both end points are visited
            steps_per_cycle: span_steps + 1,
            cycles: params.cycles,
            step: 0,
            step_time: unit / params.scan_rate,
        };

        debug!("LSV: {} steps per cycle, {} cycles, {} LSB per step",
               machine.steps_per_cycle, machine.cycles, increment);

        Ok(machine)
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Steps in one full cycle
    pub fn steps_per_cycle(&self) -> usize {
        self.steps_per_cycle
    }

    pub fn steps_to_first_vertex(&self) -> usize {
        self.steps_to_first
    }

    pub fn steps_to_second_vertex(&self) -> usize {
        self.steps_to_second
    }

    /// Steps emitted so far
    pub fn step(&self) -> usize {
        self.step
    }

    // The state `self.state` moves to at cycle position `pos`
    fn transition(&self, pos: usize) -> SweepState {
        let first = self.steps_to_first;
        let second = self.steps_to_second;

        match (self.shape, self.state) {
            (_, SweepState::Init) => SweepState::ToFirstVertex,
            (Shape::Linear, s) => s,
            (Shape::Cyclic, SweepState::ToFirstVertex) if pos >= first =>
                SweepState::FromFirstVertex,
            (Shape::Cyclic, SweepState::FromFirstVertex) if pos >= 2 * first && second > 0 =>
                SweepState::ToSecondVertex,
            (Shape::Cyclic, SweepState::ToSecondVertex) if pos >= 2 * first + second =>
                SweepState::FromSecondVertex,
            (Shape::Cyclic, SweepState::FromSecondVertex) if pos == 0 =>
                SweepState::ToFirstVertex,
            (Shape::Cyclic, SweepState::FromFirstVertex) if pos == 0 && second == 0 =>
                SweepState::ToFirstVertex,
            (_, s) => s,
        }
    }

    fn enter(&mut self, state: SweepState) {
        match state {
            SweepState::ToFirstVertex => self.rising = self.initial_rising,
            SweepState::FromFirstVertex | SweepState::FromSecondVertex => self.rising = !self.rising,
            _ => {}
        }
        self.state = state;
    }
}

fn check_span(span: f32, fixed_we: bool) -> Result<(), ValidationError> {
    // a fixed working electrode leaves only the bias output to sweep
    let range = if fixed_we {
        MAX_OUTPUT - MIN_OUTPUT
    } else {
        (MAX_OUTPUT - MIN_OUTPUT) * 2.0
    };

    if span >= range {
        return Err(ValidationError::TurningPotentialOutOfRange(span));
    }

    Ok(())
}

fn check_rates(params: &ExperimentParameters) -> Result<i64, ValidationError> {
    if !(params.step_size > 0.0) {
        return Err(ValidationError::InvalidParameter("step size must be positive"));
    }
    if !(params.scan_rate > 0.0) {
        return Err(ValidationError::InvalidParameter("scan rate must be positive"));
    }
    if params.cycles == 0 {
        return Err(ValidationError::InvalidParameter("at least one cycle is required"));
    }

    Ok(((params.step_size / LSB12).round() as i64).max(1))
}

fn codec_for(upper: f32, fixed_we: bool) -> VoltageCodec {
    if fixed_we {
        VoltageCodec::fixed(upper)
    } else {
        VoltageCodec::variable(upper)
    }
}

impl MethodProgram for SweepMachine {

    fn validate(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError> {
        match method {
            Method::CV => SweepMachine::cyclic(params),
            Method::LSV => SweepMachine::linear(params),
            other => Err(ValidationError::MethodDisabledOrUnknown(other as u8)),
        }
    }

    fn program_blocks(&self) -> ProgramPlan {
        let schedule = Schedule::new(&[SeqId::Seq0, SeqId::Seq2, SeqId::Seq1, SeqId::Seq2])
            .dwell(SeqId::Seq0, self.step_time)
            .dwell(SeqId::Seq1, self.step_time)
            .overhead(SeqId::Seq0, ADC_SEQUENCE_TICKS)
            .overhead(SeqId::Seq1, ADC_SEQUENCE_TICKS);

        ProgramPlan {
            init: SeqId::Seq3,
            adc: Some((SeqId::Seq2, &*ADC_CONTROL)),
            blocks: Some((BlockLayout::Sweep, [SeqId::Seq0, SeqId::Seq1])),
            schedule,
            measurand: Measurand::Current,
            initial: self.codec.to_code(self.code as f32 * LSB12),
        }
    }

    fn next_state(&mut self) -> NextAction {
        if self.state == SweepState::Stopped {
            return NextAction::Stop;
        }

        if self.step >= self.steps_per_cycle * self.cycles as usize {
            debug!("Sweep finished after {} steps", self.step);
            self.state = SweepState::Stopped;
            return NextAction::Stop;
        }

        // zero length segments are passed through within the same step
        let pos = self.step % self.steps_per_cycle;
        if pos == 0 {
            self.code = self.origin;
        }
        for _ in 0..6 {
            let next = self.transition(pos);
            if next == self.state {
                break;
            }
            self.enter(next);
        }

        let code = self.codec.to_code(self.code as f32 * LSB12);
        let step = PlannedStep {
            code,
            voltage: VoltageCodec::to_voltage(&code),
            cycle: 1 + (self.step / self.steps_per_cycle) as u32,
            opens: true,
            role: SampleRole::Record,
        };

        if self.rising {
            self.code += self.increment;
        } else {
            self.code -= self.increment;
        }
        self.step += 1;

        NextAction::Step(step)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    fn cv(start: f32, lower: f32, upper: f32, step: f32, cycles: u32) -> ExperimentParameters {
        ExperimentParameters {
            start, lower, upper,
            step_size: step,
            scan_rate: 100.0,
            cycles,
            ..Default::default()
        }
    }

    fn run(machine: &mut SweepMachine) -> (Vec<SweepState>, Vec<PlannedStep>) {
        let mut states = vec![machine.state()];
        let mut steps = Vec::new();

        while let NextAction::Step(step) = machine.next_state() {
            if *states.last().unwrap() != machine.state() {
                states.push(machine.state());
            }
            steps.push(step);
            assert!(steps.len() < 100_000);
        }
        states.push(machine.state());

        (states, steps)
    }

    #[test]
    fn cv_visits_every_state_once() {
        let params = cv(0.0, -500.0, 500.0, 10.0, 1);
        let mut machine = SweepMachine::cyclic(&params).unwrap();

        let increment = (10.0f32 / LSB12).round();
        let span_steps = (1000.0 / (increment * LSB12)) as usize;
        assert!(span_steps > 95 && span_steps <= 100);
        assert_eq!(machine.steps_per_cycle(), 2 * span_steps);

        let (states, steps) = run(&mut machine);
        assert_eq!(states, vec![SweepState::Init, SweepState::ToFirstVertex,
            SweepState::FromFirstVertex, SweepState::ToSecondVertex,
            SweepState::FromSecondVertex, SweepState::Stopped]);
        assert_eq!(steps.len(), 2 * span_steps);
    }

    #[test]
    fn cv_reaches_both_vertices() {
        let params = cv(0.0, -500.0, 500.0, 10.0, 1);
        let mut machine = SweepMachine::cyclic(&params).unwrap();
        let (_, steps) = run(&mut machine);

        let max = steps.iter().map(|s| s.voltage).fold(f32::MIN, f32::max);
        let min = steps.iter().map(|s| s.voltage).fold(f32::MAX, f32::min);

        // within one step of the vertices
        assert!((max - 500.0).abs() < 11.0, "max {}", max);
        assert!((min + 500.0).abs() < 11.0, "min {}", min);

        // first step sits at the start potential
        assert!(steps[0].voltage.abs() < 2.0);
        // the sweep starts upwards
        assert!(steps[1].voltage > steps[0].voltage);
    }

    #[test]
    fn cv_downward_start() {
        let params = cv(1000.0, -200.0, 1000.0, 5.0, 1);
        let mut machine = SweepMachine::cyclic(&params).unwrap();
        assert_eq!(machine.steps_to_second_vertex(), 0);

        let (_, steps) = run(&mut machine);
        assert!(steps[1].voltage < steps[0].voltage);
        assert_eq!(steps.len(), machine.steps_per_cycle());
    }

    #[test]
    fn cv_swapped_vertices() {
        // `upper` is still the first vertex, here below the start
        let params = cv(200.0, 500.0, -500.0, 10.0, 1);
        let mut machine = SweepMachine::cyclic(&params).unwrap();
        let (states, steps) = run(&mut machine);

        assert_eq!(states, vec![SweepState::Init, SweepState::ToFirstVertex,
            SweepState::FromFirstVertex, SweepState::ToSecondVertex,
            SweepState::FromSecondVertex, SweepState::Stopped]);
        assert!(steps[1].voltage < steps[0].voltage);

        let max = steps.iter().map(|s| s.voltage).fold(f32::MIN, f32::max);
        let min = steps.iter().map(|s| s.voltage).fold(f32::MAX, f32::min);
        assert!((min + 500.0).abs() < 11.0, "min {}", min);
        assert!((max - 500.0).abs() < 11.0, "max {}", max);

        // the lower vertex comes first
        let lowest = steps.iter().position(|s| s.voltage == min).unwrap();
        let highest = steps.iter().position(|s| s.voltage == max).unwrap();
        assert!(lowest < highest);
        assert_eq!(steps.len(), machine.steps_per_cycle());
    }

    #[test]
    fn cv_starting_on_upper_vertex_heads_to_lower() {
        let params = cv(-100.0, 100.0, -100.0, 10.0, 1);
        let mut machine = SweepMachine::cyclic(&params).unwrap();
        assert_eq!(machine.steps_to_second_vertex(), 0);

        let (_, steps) = run(&mut machine);
        assert!(steps[1].voltage > steps[0].voltage);
        let max = steps.iter().map(|s| s.voltage).fold(f32::MIN, f32::max);
        assert!((max - 100.0).abs() < 11.0);
    }

    #[test]
    fn cv_cycles() {
        let params = cv(0.0, -100.0, 100.0, 10.0, 3);
        let mut machine = SweepMachine::cyclic(&params).unwrap();
        let per_cycle = machine.steps_per_cycle();
        let (_, steps) = run(&mut machine);

        assert_eq!(steps.len(), 3 * per_cycle);
        assert_eq!(steps[0].cycle, 1);
        assert_eq!(steps[per_cycle].cycle, 2);
        assert_eq!(steps.last().unwrap().cycle, 3);

        // every cycle starts from the same potential
        assert_eq!(steps[0].code, steps[per_cycle].code);
        assert_eq!(steps[0].code, steps[2 * per_cycle].code);
    }

    #[test]
    fn lsv_is_monotonic() {
        let params = ExperimentParameters {
            start: -200.0,
            stop: 300.0,
            step_size: 5.0,
            ..Default::default()
        };
        let mut machine = SweepMachine::linear(&params).unwrap();
        let (states, steps) = run(&mut machine);

        assert_eq!(states, vec![SweepState::Init, SweepState::ToFirstVertex, SweepState::Stopped]);
        assert!(steps.windows(2).all(|w| w[1].voltage > w[0].voltage));
        assert!((steps.last().unwrap().voltage - 300.0).abs() < 6.0);
    }

    #[test]
    fn lsv_repeats_every_cycle() {
        let params = ExperimentParameters {
            start: -100.0,
            stop: 100.0,
            step_size: 5.0,
            cycles: 3,
            ..Default::default()
        };
        let mut machine = SweepMachine::linear(&params).unwrap();
        let per_cycle = machine.steps_per_cycle();
        let (_, steps) = run(&mut machine);

        assert_eq!(steps.len(), 3 * per_cycle);
        for (k, sweep) in steps.chunks(per_cycle).enumerate() {
            assert!(sweep.iter().all(|s| s.cycle == k as u32 + 1));
            assert!(sweep.windows(2).all(|w| w[1].voltage > w[0].voltage));
            assert_eq!(sweep[0].code, steps[0].code);
        }
    }

    #[test]
    fn rejects_wide_span() {
        let params = cv(0.0, -1200.0, 1200.0, 10.0, 1);
        assert_matches!(SweepMachine::cyclic(&params),
            Err(ValidationError::TurningPotentialOutOfRange(_)));

        // the same span is fine when the working electrode follows
        let params = ExperimentParameters { fixed_we: false, ..params };
        assert_matches!(SweepMachine::cyclic(&params), Ok(_));
    }

    #[test]
    fn rejects_bad_rates() {
        let params = ExperimentParameters { scan_rate: 0.0, ..cv(0.0, -100.0, 100.0, 1.0, 1) };
        assert_matches!(SweepMachine::cyclic(&params), Err(ValidationError::InvalidParameter(_)));

        let params = cv(500.0, -100.0, 100.0, 1.0, 1);
        assert_matches!(SweepMachine::cyclic(&params), Err(ValidationError::InvalidParameter(_)));
    }

    #[test]
    fn increment_is_at_least_one_lsb() {
        let params = cv(0.0, -10.0, 10.0, 0.01, 1);
        let machine = SweepMachine::cyclic(&params).unwrap();
        assert_eq!(machine.increment, 1);
    }

    #[test]
    fn sweep_timer_schedule() {
        let params = cv(0.0, -100.0, 100.0, 10.0, 1);
        let machine = SweepMachine::cyclic(&params).unwrap();
        let plan = machine.program_blocks();
        assert_eq!(plan.schedule.order, vec![SeqId::Seq0, SeqId::Seq2, SeqId::Seq1, SeqId::Seq2]);
        assert_eq!(plan.schedule.overhead[0], ADC_SEQUENCE_TICKS);
        assert!((plan.schedule.dwell[0] - machine.step_time).abs() < 1e-6);
    }
}
