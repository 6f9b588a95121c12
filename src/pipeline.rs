//! Interrupt driven acquisition
//!
//! Every event on the host interrupt line is serviced by
//! [`AcquisitionPipeline::dispatch`]. The pipeline drains the data FIFO,
//! reduces the samples of the window that just closed, attributes them to
//! the step that was applied while they were taken and rewrites the idle
//! step block with whatever the method decides next.
//!
//! Acquisition lags the DAC by one step: when a step block reports, the
//! samples in the FIFO belong to the *previous* step. Records are therefore
//! opened with their potential when their step starts executing and
//! completed with their current one event later.

use std::time::Instant;

use log::{debug, trace, warn};

use crate::codec::{adc_code_to_voltage, current_from_voltage};
use crate::config::{ExperimentParameters, GeneralConfig, Method};
use crate::driver::{ChipDriver, Transport};
use crate::error::ExperimentError;
use crate::frontend::Measurand;
use crate::methods::MethodProgram;
use crate::programmer::{NextAction, PlannedStep, SampleRole, SequenceProgrammer};
use crate::registers::{IntSource, PgaGain};
use crate::registers::consts::{FIFOCNTSTA, FIFOCNT_SHIFT, FIFOCNT_MASK};
use crate::ring::{MeasurementRecord, MeasurementRing, RawSampleAccumulator};
use crate::timer::WakeupTimerController;


/// State of one run's acquisition
#[derive(Debug)]
pub struct AcquisitionPipeline {
    accumulator: RawSampleAccumulator,
    ring: MeasurementRing,
    scratch: Vec<u32>,
    programmer: SequenceProgrammer,
    timer: WakeupTimerController,
    measurand: Measurand,
    gain: PgaGain,
    vref: f32,
    rtia: f32,
    wake_attempts: u32,
    // Step whose samples arrive with the next event, with its record
    applied: Option<(PlannedStep, Option<usize>)>,
    // Reference window of a differential measurement, in mV
    reference: Option<f32>,
    last_opened: Option<usize>,
    started: Instant,
    stop_written: bool,
    powered_down: bool,
    finished: bool,
    events: usize,
}

impl AcquisitionPipeline {

    /// Pipeline for a run whose sequences were committed through
    /// `programmer` and whose timer is driven by `timer`. Currents are
    /// computed against a transimpedance of `rtia` Ohm.
    pub fn new(config: &GeneralConfig, params: &ExperimentParameters, measurand: Measurand,
               rtia: f32, programmer: SequenceProgrammer, timer: WakeupTimerController) -> Self {

        AcquisitionPipeline {
            accumulator: RawSampleAccumulator::new(),
            ring: MeasurementRing::new(config.transmit_buffer),
            scratch: vec![0u32; config.sample_buffer.max(1)],
            programmer,
            timer,
            measurand,
            gain: params.pga,
            vref: config.adc_reference,
            rtia,
            wake_attempts: config.wake_attempts,
            applied: None,
            reference: None,
            last_opened: None,
            started: Instant::now(),
            stop_written: false,
            powered_down: false,
            finished: false,
            events: 0,
        }
    }

    /// Whether the chip reported the end of the run
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Acquisition events serviced so far
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn ring(&self) -> &MeasurementRing {
        &self.ring
    }

    pub fn programmer(&self) -> &SequenceProgrammer {
        &self.programmer
    }

    /// Service every pending engine interrupt.
    ///
    /// The chip is woken up and its sleep key locked for the whole
    /// dispatch. Any error powers the front end down before it is
    /// returned.
    pub fn dispatch<D, M>(&mut self, driver: &mut D, machine: &mut M) -> Result<(), ExperimentError>
        where D: ChipDriver + ?Sized, M: MethodProgram + ?Sized {

        if !driver.wake(self.wake_attempts) {
            warn!("AFE did not wake up during acquisition, shutting down");
            self.power_down(driver);
            return Err(ExperimentError::WakeupFailed { attempts: self.wake_attempts, running: true });
        }

        driver.lock_sleep(true);
        let result = self.service(driver, machine);
        driver.lock_sleep(false);

        if result.is_err() {
            self.power_down(driver);
        }

        result
    }

    fn service<D, M>(&mut self, driver: &mut D, machine: &mut M) -> Result<(), ExperimentError>
        where D: ChipDriver + ?Sized, M: MethodProgram + ?Sized {

        loop {
            let flags = driver.interrupt_flags() & IntSource::ENGINE;
            if flags.is_empty() {
                break;
            }

            // clear before handling so nothing raised meanwhile is lost
            driver.clear_interrupt_flags(flags);
            trace!("Dispatching {:?}", flags);

            if flags.contains(IntSource::DATAFIFOTHRESH) {
                self.drain(driver);
            }

            if flags.intersects(IntSource::GPT1INT_TRYBRK | IntSource::CMDFIFOOF) {
                driver.clear_indicator();
            }

            if flags.contains(IntSource::CUSTOMINT1) {
                self.events += 1;
                match self.measurand {
                    Measurand::Current => self.on_step(driver, machine)?,
                    Measurand::Potential => self.on_sample(driver, machine)?,
                }
            }

            if flags.contains(IntSource::ENDSEQ) {
                self.on_end(driver);
            }
        }

        Ok(())
    }

    // Move everything the FIFO holds into the accumulator
    fn drain<D: ChipDriver + ?Sized>(&mut self, driver: &mut D) {
        let count = (driver.read_register(FIFOCNTSTA) >> FIFOCNT_SHIFT) & FIFOCNT_MASK;
        let mut left = count as usize;

        while left > 0 {
            let n = left.min(self.scratch.len());
            driver.read_fifo(&mut self.scratch[..n]);
            self.accumulator.extend(&self.scratch[..n]);
            left -= n;
        }

        if count > 0 {
            trace!("Drained {} words from the data FIFO", count);
        }
    }

    fn timestamp(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // A step block reported: it is now executing and the window of the
    // previous step just closed
    fn on_step<D, M>(&mut self, driver: &mut D, machine: &mut M) -> Result<(), ExperimentError>
        where D: ChipDriver + ?Sized, M: MethodProgram + ?Sized {

        self.drain(driver);
        let value = self.accumulator.reduce();

        let current = self.programmer.active().copied();
        let mut record = self.last_opened;

        if let Some(step) = current {
            if step.opens {
                let idx = self.ring.push(MeasurementRecord {
                    cycle: step.cycle,
                    pair: self.ring.opened() as u32 + 1,
                    voltage: step.voltage,
                    current: 0.0,
                    timestamp: self.timestamp(),
                })?;
                self.last_opened = Some(idx);
                record = Some(idx);
            }
        }

        match value {
            Some(value) => self.attribute(value),
            None => trace!("No samples in window {}", self.events),
        }

        self.applied = current.map(|s| (s, record));

        if !self.stop_written {
            let action = machine.next_state();
            self.programmer.advance(driver, &action)?;
            if action == NextAction::Stop {
                debug!("Stop block written after {} events", self.events);
                self.stop_written = true;
            }
        }

        Ok(())
    }

    // Open circuit: every report is a finished sample of the potential
    fn on_sample<D, M>(&mut self, driver: &mut D, machine: &mut M) -> Result<(), ExperimentError>
        where D: ChipDriver + ?Sized, M: MethodProgram + ?Sized {

        self.drain(driver);
        let value = match self.accumulator.reduce() {
            Some(value) => value,
            None => return Ok(()),
        };

        match machine.next_state() {
            NextAction::Step(step) => {
                let idx = self.ring.push(MeasurementRecord {
                    cycle: step.cycle,
                    pair: self.ring.opened() as u32 + 1,
                    voltage: adc_code_to_voltage(value, self.gain, self.vref),
                    current: 0.0,
                    timestamp: self.timestamp(),
                })?;
                self.ring.complete(idx, 0.0);
            },
            NextAction::Stop => {
                debug!("Open circuit measurement complete");
                self.power_down(driver);
                self.finished = true;
            }
        }

        Ok(())
    }

    fn on_end<D: ChipDriver + ?Sized>(&mut self, driver: &mut D) {
        self.drain(driver);
        if let Some(value) = self.accumulator.reduce() {
            if self.measurand == Measurand::Current {
                self.attribute(value);
            }
        }

        debug!("End of sequence after {} events", self.events);
        self.power_down(driver);
        self.finished = true;
    }

    // Hand a reduced window to the step it was taken under
    fn attribute(&mut self, value: u32) {
        let (step, record) = match self.applied {
            Some(applied) => applied,
            None => {
                trace!("Discarding the settling window");
                return;
            }
        };

        let voltage = adc_code_to_voltage(value, self.gain, self.vref);

        match step.role {
            SampleRole::Record => self.complete(record, voltage),
            SampleRole::Reference => self.reference = Some(voltage),
            SampleRole::Difference { invert } => match self.reference.take() {
                Some(reference) => {
                    let diff = if invert { reference - voltage } else { voltage - reference };
                    self.complete(record, diff);
                },
                None => warn!("Difference window without a reference"),
            },
            SampleRole::Discard => {}
        }
    }

    fn complete(&mut self, record: Option<usize>, voltage: f32) {
        if let Some(n) = record {
            let current = current_from_voltage(voltage, self.rtia);
            if !self.ring.complete(n, current) {
                warn!("Record {} is no longer in the ring", n);
            }
        }
    }

    /// Send every completed record, oldest first
    pub fn transmit<T: Transport + ?Sized>(&mut self, transport: &mut T, method: Method)
        -> Result<usize, ExperimentError> {

        let mut sent = 0;
        while let Some(record) = self.ring.pop() {
            transport.send_record(&record, method)?;
            sent += 1;
        }

        Ok(sent)
    }

    /// Send what is complete and drop records that never received their
    /// current
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T, method: Method)
        -> Result<usize, ExperimentError> {

        let mut sent = self.transmit(transport, method)?;

        while self.ring.sent() < self.ring.opened() {
            if let Some(record) = self.ring.discard() {
                warn!("Dropping incomplete record {} (cycle {})", record.pair, record.cycle);
            }
            sent += self.transmit(transport, method)?;
        }

        Ok(sent)
    }

    /// Stop the timer and power the front end down. Only the first call
    /// has an effect.
    pub fn power_down<D: ChipDriver + ?Sized>(&mut self, driver: &mut D) {
        if self.powered_down {
            return;
        }

        self.timer.stop(driver);
        driver.shutdown();
        self.powered_down = true;

        debug!("AFE powered down");
    }

    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::codec::DacCodePair;
    use crate::instructions::BlockLayout;
    use crate::registers::SeqId;
    use crate::sim::SimChip;
    use assert_matches::assert_matches;

    // Emits a fixed list of steps
    struct Script {
        steps: Vec<PlannedStep>,
        at: usize,
    }

    impl MethodProgram for Script {
        fn validate(_: Method, _: &ExperimentParameters) -> Result<Self, crate::error::ValidationError> {
            Ok(Script { steps: Vec::new(), at: 0 })
        }

        fn program_blocks(&self) -> crate::methods::ProgramPlan {
            unimplemented!()
        }

        fn next_state(&mut self) -> NextAction {
            let action = match self.steps.get(self.at) {
                Some(step) => NextAction::Step(*step),
                None => NextAction::Stop,
            };
            self.at += 1;
            action
        }
    }

    fn step(bias: u32, opens: bool, role: SampleRole) -> PlannedStep {
        PlannedStep {
            code: DacCodePair { zero: 32, bias },
            voltage: bias as f32,
            cycle: 1,
            opens,
            role,
        }
    }

    fn pipeline(chip: &mut SimChip, first: PlannedStep) -> AcquisitionPipeline {
        let config = GeneralConfig::default();
        let params = ExperimentParameters::default();
        let mut programmer = SequenceProgrammer::new();
        programmer.prime(chip, BlockLayout::Chrono, [SeqId::Seq1, SeqId::Seq2], first).unwrap();

        AcquisitionPipeline::new(&config, &params, Measurand::Current, 20_000.0,
            programmer, WakeupTimerController::new(32_000.0, 10))
    }

    fn current(code: u32) -> f32 {
        current_from_voltage(adc_code_to_voltage(code, PgaGain::Gain1p5, 1820.0), 20_000.0)
    }

    #[test]
    fn records_lag_one_event() {
        let mut chip = SimChip::new();
        let mut script = Script {
            steps: vec![step(1, true, SampleRole::Record), step(2, true, SampleRole::Record)],
            at: 0,
        };
        let mut pipe = pipeline(&mut chip, step(0, true, SampleRole::Record));

        // first block starts, nothing sampled yet
        chip.raise(IntSource::CUSTOMINT1);
        pipe.dispatch(&mut chip, &mut script).unwrap();
        assert_eq!(pipe.ring().opened(), 1);
        assert!(!pipe.ring().is_complete(0));

        // second block starts, the first window closed
        chip.inject_samples(&[1000, 1000]);
        chip.raise(IntSource::CUSTOMINT1);
        pipe.dispatch(&mut chip, &mut script).unwrap();
        assert_eq!(pipe.ring().opened(), 2);
        assert!(pipe.ring().is_complete(0));
        assert!(!pipe.ring().is_complete(1));
        assert!((pipe.ring().peek(0).unwrap().current - current(1000)).abs() < 1e-4);
        assert_eq!(pipe.ring().peek(1).map(|r| r.pair), Some(2));
    }

    #[test]
    fn differential_pairs_share_a_record() {
        let mut chip = SimChip::new();
        let mut script = Script {
            steps: vec![step(20, false, SampleRole::Difference { invert: false })],
            at: 0,
        };
        let mut pipe = pipeline(&mut chip, step(10, true, SampleRole::Reference));

        chip.raise(IntSource::CUSTOMINT1);
        pipe.dispatch(&mut chip, &mut script).unwrap();

        // base window
        chip.inject_samples(&[30000]);
        chip.raise(IntSource::CUSTOMINT1);
        pipe.dispatch(&mut chip, &mut script).unwrap();
        assert_eq!(pipe.ring().opened(), 1);
        assert!(!pipe.ring().is_complete(0));

        // pulse window completes the record with the difference
        chip.inject_samples(&[31000]);
        chip.raise(IntSource::ENDSEQ);
        pipe.dispatch(&mut chip, &mut script).unwrap();

        let diff = current(31000) - current(30000);
        assert!((pipe.ring().peek(0).unwrap().current - diff).abs() < 1e-3);
        assert!(pipe.is_finished());
        assert_eq!(chip.shutdowns(), 1);
    }

    #[test]
    fn failed_wakeup_is_fatal() {
        let mut chip = SimChip::new();
        let mut script = Script { steps: Vec::new(), at: 0 };
        let mut pipe = pipeline(&mut chip, step(0, true, SampleRole::Record));

        chip.fail_wake_after(0);
        chip.raise(IntSource::CUSTOMINT1);
        assert_matches!(pipe.dispatch(&mut chip, &mut script),
            Err(ExperimentError::WakeupFailed { running: true, .. }));
        assert!(pipe.is_powered_down());
        assert_eq!(chip.shutdowns(), 1);
    }

    #[test]
    fn indicator_interrupts_are_acknowledged() {
        let mut chip = SimChip::new();
        let mut script = Script { steps: Vec::new(), at: 0 };
        let mut pipe = pipeline(&mut chip, step(0, true, SampleRole::Record));

        chip.raise(IntSource::GPT1INT_TRYBRK | IntSource::CMDFIFOOF);
        pipe.dispatch(&mut chip, &mut script).unwrap();
        assert_eq!(chip.indicator_clears(), 1);
        assert!(chip.interrupt_flags().is_empty());
        assert!(!chip.sleep_locked());
    }
}
