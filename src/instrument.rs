use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::{ExperimentParameters, GeneralConfig, Method, SystemStatus};
use crate::controller::{ExperimentDispatcher, Outcome, RunContext, RunPhase};
use crate::driver::{ChipDriver, ControlTelegram, InterruptLine, TelegramParser, Transport};
use crate::error::{ExperimentError, ValidationError};


/// A potentiostat front end and the link to its host
///
/// `Instrument` owns the chip driver, the transport and the engine
/// configuration and walks the device through its
/// [`SystemStatus`] lifecycle: a method is selected with
/// [`Instrument::set_method`], parameterised with
/// [`Instrument::set_parameters`], started with [`Instrument::start`]
/// and executed with [`Instrument::run`]. Parameters fall back to their
/// defaults after every run.
///
/// ```no_run
/// use libpstat::{Instrument, Method, ExperimentParameters};
/// use libpstat::sim::{SimChip, Loopback};
///
/// let chip = SimChip::new();
/// let line = chip.line();
/// let mut instr = Instrument::new(chip, Loopback::new(), line);
///
/// instr.boot().unwrap()
///      .set_method(Method::CV).unwrap()
///      .set_parameters(&ExperimentParameters::default()).unwrap()
///      .start().unwrap();
///
/// let outcome = instr.run().unwrap();
/// println!("{} records", outcome.records());
/// ```
pub struct Instrument<D: ChipDriver, T: Transport> {
    driver: D,
    transport: T,
    line: Arc<InterruptLine>,
    parser: ControlTelegram,
    config: GeneralConfig,
    status: SystemStatus,
    method: Method,
    params: ExperimentParameters,
    phase: RunPhase,
    last_error: Option<u32>,
}

impl<D: ChipDriver, T: Transport> std::fmt::Debug for Instrument<D, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("line", &self.line)
            .field("parser", &self.parser)
            .field("config", &self.config)
            .field("status", &self.status)
            .field("method", &self.method)
            .field("params", &self.params)
            .field("phase", &self.phase)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<D: ChipDriver, T: Transport> Instrument<D, T> {

    /// Create a new instrument. `line` is the flag the interrupt handler
    /// of `driver` raises.
    pub fn new(driver: D, transport: T, line: Arc<InterruptLine>) -> Self {
        Instrument {
            driver,
            transport,
            line,
            parser: ControlTelegram,
            config: GeneralConfig::default(),
            status: SystemStatus::Booting,
            method: Method::Undefined,
            params: ExperimentParameters::default(),
            phase: RunPhase::Idle,
            last_error: None,
        }
    }

    /// Wake the chip, calibrate the low frequency oscillator and wait for
    /// instructions.
    pub fn boot(&mut self) -> Result<&mut Self, ExperimentError> {
        let attempts = self.config.wake_attempts;
        if !self.driver.wake(attempts) {
            return Err(self.fail(ExperimentError::WakeupFailed { attempts, running: false }));
        }

        if self.config.lfosc.is_none() {
            let freq = self.driver.measure_lfosc();
            debug!("LFOSC calibrated at {} Hz", freq);
            self.config.lfosc = Some(freq);
        }

        self.status = SystemStatus::Waiting;
        info!("Instrument ready");

        Ok(self)
    }

    fn ensure_idle(&self) -> Result<(), ExperimentError> {
        match self.status {
            SystemStatus::Running => Err(ExperimentError::Busy),
            _ => Ok(())
        }
    }

    fn fail(&mut self, err: ExperimentError) -> ExperimentError {
        self.last_error = Some(err.code());
        err
    }

    /// Select the method of the next run
    pub fn set_method(&mut self, method: Method) -> Result<&mut Self, ExperimentError> {
        self.ensure_idle()?;

        if !self.config.is_enabled(method) {
            let err = ValidationError::MethodDisabledOrUnknown(method as u8).into();
            return Err(self.fail(err));
        }

        self.method = method;
        self.status = SystemStatus::TypeReceived;
        debug!("Method set to {:?}", method);

        Ok(self)
    }

    /// Set the parameters of the next run
    pub fn set_parameters(&mut self, params: &ExperimentParameters) -> Result<&mut Self, ExperimentError> {
        self.ensure_idle()?;

        self.params = params.clone();
        self.status = SystemStatus::ParametersReceived;

        Ok(self)
    }

    /// Request the start of the configured run
    pub fn start(&mut self) -> Result<&mut Self, ExperimentError> {
        self.ensure_idle()?;
        self.status = SystemStatus::Started;
        Ok(self)
    }

    /// Apply a control telegram received outside a run
    pub fn handle_telegram(&mut self, telegram: &[u8]) -> Result<&mut Self, ExperimentError> {
        self.ensure_idle()?;

        if let Some(status) = self.parser.parse(telegram) {
            debug!("Telegram requests {:?}", status);
            self.status = status;
        }

        Ok(self)
    }

    /// Execute the configured method. Blocks until it completes, is
    /// cancelled from the host or fails.
    pub fn run(&mut self) -> Result<Outcome, ExperimentError> {
        self.ensure_idle()?;

        if !self.status.can_start() || self.method == Method::Undefined {
            warn!("Run requested in status {:?}", self.status);
            let err = ValidationError::InvalidParameter("no experiment has been set up").into();
            return Err(self.fail(err));
        }

        let params = std::mem::take(&mut self.params);
        let mut ctx = RunContext {
            driver: &mut self.driver,
            transport: &mut self.transport,
            parser: &mut self.parser,
            config: &self.config,
            status: &mut self.status,
            line: &self.line,
        };

        let result = ExperimentDispatcher.dispatch(self.method, &params, &mut ctx);

        match result {
            Ok(outcome) => {
                self.phase = match outcome {
                    Outcome::Completed { .. } => RunPhase::Completed,
                    Outcome::Cancelled { .. } => RunPhase::Cancelled,
                };
                self.last_error = None;
                Ok(outcome)
            },
            Err(err) => {
                self.phase = RunPhase::Failed;
                Err(self.fail(err))
            },
        }
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn parameters(&self) -> &ExperimentParameters {
        &self.params
    }

    /// Phase the last run ended in
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Numeric code of the last error, cleared by a successful run
    pub fn last_error(&self) -> Option<u32> {
        self.last_error
    }

    pub fn config(&self) -> &GeneralConfig {
        &self.config
    }

    /// Change the engine configuration
    pub fn config_mut(&mut self) -> Result<&mut GeneralConfig, ExperimentError> {
        self.ensure_idle()?;
        Ok(&mut self.config)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
