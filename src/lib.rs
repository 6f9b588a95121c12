//! Method execution engine for AD594x potentiostat front ends
//!
//! `libpstat` runs electrochemical methods (open circuit potential,
//! chronoamperometry, linear and cyclic sweep voltammetry and the pulse
//! voltammetries) on an analog front end with an on-chip micro-sequencer.
//! The engine writes the sequencer programme ahead of the chip, keeps two
//! step blocks alternating while the chip executes them, turns the ADC
//! samples of every step into measurement records and streams them to a
//! host.
//!
//! Bus access and the host link are abstracted by the [`ChipDriver`] and
//! [`Transport`] traits. The `sim` module (Cargo feature `sim`, on by
//! default) provides a software chip and an in-memory transport that run
//! the engine without hardware.
//!
//! ```no_run
//! use libpstat::{Instrument, Method, ExperimentParameters};
//! use libpstat::sim::{SimChip, Loopback};
//!
//! let chip = SimChip::new();
//! let line = chip.line();
//! let mut instr = Instrument::new(chip, Loopback::new(), line);
//!
//! let params = ExperimentParameters {
//!     lower: -500.0,
//!     upper: 500.0,
//!     start: 0.0,
//!     ..Default::default()
//! };
//!
//! instr.boot().unwrap()
//!      .set_method(Method::CV).unwrap()
//!      .set_parameters(&params).unwrap()
//!      .start().unwrap();
//!
//! instr.run().unwrap();
//!
//! for (record, _) in instr.transport().sent() {
//!     println!("{} mV: {} uA", record.voltage, record.current);
//! }
//! ```

#[macro_use] extern crate lazy_static;
#[macro_use] mod macros;

pub mod registers;
pub mod instructions;
pub mod memory;
pub mod codec;
pub mod config;
pub mod error;
pub mod driver;
pub mod frontend;
pub mod ring;
pub mod timer;
pub mod programmer;
pub mod methods;
pub mod pipeline;
pub mod controller;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod instrument;

pub use instrument::Instrument;
pub use config::{ExperimentParameters, GeneralConfig, Method, MethodSet, SystemStatus};
pub use controller::{ExperimentDispatcher, MethodController, Outcome, RunContext, RunPhase};
pub use driver::{ChipDriver, ControlTelegram, InterruptLine, TelegramParser, Transport};
pub use error::{ExperimentError, ValidationError};
pub use memory::SequenceError;
pub use ring::MeasurementRecord;
