//! Run lifecycle of a method
//!
//! A run goes through `Validating → Programming → Running → Draining`
//! and ends `Completed`, `Cancelled` or `Failed`. Nothing is written to
//! the chip before validation succeeds and every exit from `Running`
//! stops the wake-up timer and powers the front end down exactly once.

use log::{debug, error, info, warn};

use crate::config::{ExperimentParameters, GeneralConfig, Method, SystemStatus};
use crate::driver::{ChipDriver, InterruptLine, TelegramParser, Transport};
use crate::error::{ExperimentError, ValidationError};
use crate::frontend::init_sequence;
use crate::memory::SeqMem;
use crate::methods::{MethodMachine, MethodProgram};
use crate::pipeline::AcquisitionPipeline;
use crate::programmer::{NextAction, SequenceProgrammer};
use crate::registers::IntSource;
use crate::registers::consts::*;
use crate::timer::WakeupTimerController;

// FIFOCON: data FIFO enabled, fed from the sinc3 filter
const FIFOCON_DATA: u32 = (1 << 11) | (2 << 13);
// DATAFIFOTHRES: threshold field
const FIFO_THRESHOLD_SHIFT: u32 = 16;
const SEQCON_ENABLE: u32 = 0x1;


/// Lifecycle phases of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// No run has been attempted yet
    Idle,
    Validating,
    Programming,
    Running,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

/// How a run that did not fail ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The method ran to its end; `records` were sent
    Completed { records: usize },
    /// The run was stopped from the host after `records` were sent
    Cancelled { records: usize },
}

impl Outcome {
    pub fn records(&self) -> usize {
        match self {
            Outcome::Completed { records } | Outcome::Cancelled { records } => *records,
        }
    }
}


/// Everything a run borrows from its owner
pub struct RunContext<'a> {
    pub driver: &'a mut dyn ChipDriver,
    pub transport: &'a mut dyn Transport,
    pub parser: &'a mut dyn TelegramParser,
    pub config: &'a GeneralConfig,
    pub status: &'a mut SystemStatus,
    pub line: &'a InterruptLine,
}


/// Runs one method from validation to completion
///
/// The controller is generic over the method state machine; the
/// programming, acquisition and shutdown logic is shared by every method.
pub struct MethodController<M: MethodProgram> {
    method: Method,
    params: ExperimentParameters,
    machine: M,
    phase: RunPhase,
}

impl<M: MethodProgram> MethodController<M> {

    /// Validate `params` for `method`. Nothing is touched on failure.
    pub fn new(method: Method, params: &ExperimentParameters) -> Result<Self, ValidationError> {
        debug!("Validating {:?}", method);
        let machine = M::validate(method, params)?;

        Ok(MethodController {
            method,
            params: params.clone(),
            machine,
            phase: RunPhase::Validating,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Program the chip and run the method to its end
    pub fn run(&mut self, ctx: &mut RunContext) -> Result<Outcome, ExperimentError> {
        let mut pipeline = match self.program(ctx) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                error!("Setting up {:?} failed: {}", self.method, err);
                self.phase = RunPhase::Failed;
                *ctx.status = SystemStatus::Waiting;
                return Err(err);
            }
        };

        self.phase = RunPhase::Running;
        *ctx.status = SystemStatus::Running;
        info!("{:?} running", self.method);

        match self.execute(ctx, &mut pipeline) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!("{:?} failed while running: {}", self.method, err);
                pipeline.power_down(&mut *ctx.driver);
                self.phase = RunPhase::Failed;
                *ctx.status = SystemStatus::Waiting;
                Err(err)
            }
        }
    }

    fn program(&mut self, ctx: &mut RunContext) -> Result<AcquisitionPipeline, ExperimentError> {
        ctx.config.validate()?;
        self.phase = RunPhase::Programming;

        let attempts = ctx.config.wake_attempts;
        if !ctx.driver.wake(attempts) {
            return Err(ExperimentError::WakeupFailed { attempts, running: false });
        }

        let lfosc = match ctx.config.lfosc {
            Some(freq) => freq,
            None => ctx.driver.measure_lfosc(),
        };

        let rtia = match self.params.rtia.nominal() {
            None => ctx.config.external_rtia,
            Some(_) => ctx.driver.calibrate_rtia(self.params.rtia),
        };

        debug!("Programming {:?}: LFOSC {} Hz, Rtia {} Ohm", self.method, lfosc, rtia);

        let mut programmer = SequenceProgrammer::with_memory(SeqMem::with_limit(ctx.config.sequence_memory));
        let mut timer = WakeupTimerController::new(lfosc, attempts);

        match self.commit(ctx, &mut programmer, &mut timer) {
            Ok(()) => {},
            Err(err) => {
                timer.stop(&mut *ctx.driver);
                ctx.driver.shutdown();
                return Err(err);
            }
        }

        let plan = self.machine.program_blocks();
        Ok(AcquisitionPipeline::new(ctx.config, &self.params, plan.measurand, rtia, programmer, timer))
    }

    // Write the sequences, prime the slots and arm the timer
    fn commit(&mut self, ctx: &mut RunContext, programmer: &mut SequenceProgrammer,
              timer: &mut WakeupTimerController) -> Result<(), ExperimentError> {

        let plan = self.machine.program_blocks();
        let driver = &mut *ctx.driver;

        driver.write_register(FIFOCON, FIFOCON_DATA);
        driver.write_register(DATAFIFOTHRES, (ctx.config.fifo_threshold as u32) << FIFO_THRESHOLD_SHIFT);
        driver.write_register(INTCSEL0, IntSource::ENGINE.bits());

        // initialise the front end and wait for it to halt
        let init = init_sequence(&self.params, plan.measurand, &plan.initial);
        programmer.program_sequence(driver, plan.init, &init)?;
        driver.write_register(SEQCON, SEQCON_ENABLE);
        driver.write_register(TRIGSEQ, 1 << (plan.init as u32));
        driver.clear_interrupt_flags(IntSource::all());
        ctx.line.take();
        driver.write_register(SEQCON, SEQCON_ENABLE);

        if let Some((id, seq)) = plan.adc {
            programmer.program_sequence(driver, id, seq)?;
        }

        if let Some((layout, ids)) = plan.blocks {
            match self.machine.next_state() {
                NextAction::Step(first) => programmer.prime(driver, layout, ids, first)?,
                NextAction::Stop =>
                    return Err(ValidationError::InvalidParameter("method produced no steps").into()),
            }
        }

        timer.start(driver, &plan.schedule)?;

        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext, pipeline: &mut AcquisitionPipeline)
        -> Result<Outcome, ExperimentError> {

        let mut records = 0;

        loop {
            if pipeline.is_finished() {
                return self.complete(ctx, pipeline, records);
            }

            if *ctx.status != SystemStatus::Running {
                return self.cancel(ctx, pipeline, records);
            }

            if ctx.line.take() {
                pipeline.dispatch(&mut *ctx.driver, &mut self.machine)?;
            }

            records += pipeline.transmit(&mut *ctx.transport, self.method)?;

            if ctx.transport.data_available() {
                let telegram = ctx.transport.read_inbound_telegram();
                match ctx.parser.parse(&telegram) {
                    Some(SystemStatus::Started) | Some(SystemStatus::Running) | None => {},
                    Some(status) => {
                        info!("Host requested {:?} while running", status);
                        *ctx.status = status;
                    }
                }
            } else if !ctx.line.is_pending() && !pipeline.is_finished() {
                ctx.driver.wait_for_interrupt();
            }
        }
    }

    fn complete(&mut self, ctx: &mut RunContext, pipeline: &mut AcquisitionPipeline, records: usize)
        -> Result<Outcome, ExperimentError> {

        self.phase = RunPhase::Draining;
        let records = records + pipeline.flush(&mut *ctx.transport, self.method)?;

        self.phase = RunPhase::Completed;
        *ctx.status = SystemStatus::Completed;
        info!("{:?} completed, {} records sent", self.method, records);

        Ok(Outcome::Completed { records })
    }

    fn cancel(&mut self, ctx: &mut RunContext, pipeline: &mut AcquisitionPipeline, records: usize)
        -> Result<Outcome, ExperimentError> {

        warn!("{:?} cancelled", self.method);
        pipeline.power_down(&mut *ctx.driver);

        self.phase = RunPhase::Draining;
        let records = records + pipeline.flush(&mut *ctx.transport, self.method)?;

        self.phase = RunPhase::Cancelled;
        *ctx.status = SystemStatus::Cancelled;

        Ok(Outcome::Cancelled { records })
    }
}


/// Selects the controller for a requested method
#[derive(Clone, Copy, Debug, Default)]
pub struct ExperimentDispatcher;

impl ExperimentDispatcher {

    /// Run `method` if it is enabled
    pub fn dispatch(&self, method: Method, params: &ExperimentParameters, ctx: &mut RunContext)
        -> Result<Outcome, ExperimentError> {

        if !ctx.config.is_enabled(method) {
            warn!("{:?} is disabled or unknown", method);
            *ctx.status = SystemStatus::Waiting;
            return Err(ValidationError::MethodDisabledOrUnknown(method as u8).into());
        }

        let mut controller = match MethodController::<MethodMachine>::new(method, params) {
            Ok(controller) => controller,
            Err(err) => {
                *ctx.status = SystemStatus::Waiting;
                return Err(err.into());
            }
        };

        controller.run(ctx)
    }
}
