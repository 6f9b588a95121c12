//! Contracts of the collaborators the engine drives
//!
//! The engine does not talk to a bus itself. It relies on a
//! [`ChipDriver`] for register, FIFO and sequencer memory access, on a
//! [`Transport`] to move records off the device and on a
//! [`TelegramParser`] to interpret inbound control telegrams.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Method, SystemStatus};
use crate::registers::{IntSource, LpTiaRtia, SeqId};
use crate::ring::MeasurementRecord;


/// Wake-up timer programme
///
/// The timer fires the sequences in `order` round robin. After firing a
/// sequence it waits its `sleep` ticks followed by its `wake` ticks
/// (both in LFOSC periods) before firing the next entry.
#[derive(Clone, Debug, PartialEq)]
pub struct WakeupTimerConfig {
    pub enabled: bool,
    pub order: Vec<SeqId>,
    pub sleep: [u32; 4],
    pub wake: [u32; 4],
}

impl WakeupTimerConfig {

    /// A programme that stops the timer
    pub fn disabled() -> Self {
        WakeupTimerConfig {
            enabled: false,
            order: Vec::new(),
            sleep: [0; 4],
            wake: [0; 4],
        }
    }

    /// Ticks between firing `id` and firing the next entry
    pub fn period(&self, id: SeqId) -> u32 {
        self.sleep[id as usize] + self.wake[id as usize]
    }
}


/// Hardware access to the AFE
///
/// Methods are infallible apart from [`ChipDriver::wake`]; a driver
/// that loses the bus is expected to report it through a failed wake-up
/// probe, which the engine checks before every burst of register access.
pub trait ChipDriver {

    /// Try to bring the AFE out of hibernation, at most `max_attempts`
    /// times. Returns `true` once the chip answers.
    fn wake(&mut self, max_attempts: u32) -> bool;

    fn read_register(&mut self, addr: u16) -> u32;

    fn write_register(&mut self, addr: u16, value: u32);

    /// Fill `words` from the data FIFO. The caller never asks for more
    /// words than the FIFO count register reports.
    fn read_fifo(&mut self, words: &mut [u32]);

    /// Copy a block of sequencer words to SRAM starting at `addr`
    fn write_sequence_memory(&mut self, addr: u32, words: &[u32]);

    fn configure_wakeup_timer(&mut self, cfg: &WakeupTimerConfig);

    /// Pending interrupt sources
    fn interrupt_flags(&mut self) -> IntSource;

    fn clear_interrupt_flags(&mut self, mask: IntSource);

    /// Lock or unlock the AFE sleep key. While locked the chip cannot
    /// drop into hibernation between register accesses.
    fn lock_sleep(&mut self, locked: bool);

    /// Measure the low frequency oscillator in Hz
    fn measure_lfosc(&mut self) -> f32;

    /// Measure the magnitude of an internal transimpedance resistor in Ohm
    fn calibrate_rtia(&mut self, rtia: LpTiaRtia) -> f32;

    /// Power down the analog front end
    fn shutdown(&mut self);

    /// Turn a general purpose status indicator off
    fn clear_indicator(&mut self) {}

    /// Block until the host interrupt line might have been raised. The
    /// default returns straight away and leaves the engine to spin.
    fn wait_for_interrupt(&mut self) {}
}


/// Link that carries records off the device
pub trait Transport {

    /// Whether an inbound telegram is waiting
    fn data_available(&mut self) -> bool;

    /// Take the waiting inbound telegram
    fn read_inbound_telegram(&mut self) -> Vec<u8>;

    /// Frame and send one record
    fn send_record(&mut self, record: &MeasurementRecord, method: Method) -> io::Result<()>;
}


/// Interprets inbound telegrams received while a run is active
pub trait TelegramParser {

    /// Status the telegram asks for, if any
    fn parse(&mut self, telegram: &[u8]) -> Option<SystemStatus>;
}

/// Recognises the experiment control telegram (`"ExC"`) and maps its
/// command to a status; everything else is ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControlTelegram;

impl TelegramParser for ControlTelegram {
    fn parse(&mut self, telegram: &[u8]) -> Option<SystemStatus> {
        let text = std::str::from_utf8(telegram).ok()?;

        if !text.contains("\"ExC\"") {
            return None;
        }

        if text.contains("\"Stop\"") || text.contains("\"Waiting\"") {
            Some(SystemStatus::Waiting)
        } else if text.contains("\"Start\"") {
            Some(SystemStatus::Started)
        } else {
            None
        }
    }
}


/// The host interrupt line
///
/// A single producer (the interrupt handler) raises it, a single consumer
/// (the controller loop) takes it. Raising is the only thing allowed in
/// interrupt context.
#[derive(Debug, Default)]
pub struct InterruptLine {
    pending: AtomicBool,
}

impl InterruptLine {

    pub fn new() -> Self {
        InterruptLine { pending: AtomicBool::new(false) }
    }

    /// Mark the line as pending
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consume a pending event. Returns `true` at most once per raise.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn interrupt_line_takes_once() {
        let line = InterruptLine::new();
        assert!(!line.take());

        line.raise();
        line.raise();
        assert!(line.is_pending());
        assert!(line.take());
        assert!(!line.take());
    }

    #[test]
    fn control_telegrams() {
        let mut parser = ControlTelegram;
        assert_eq!(parser.parse(br#"{"ExC":"Stop"}"#), Some(SystemStatus::Waiting));
        assert_eq!(parser.parse(br#"{"ExC":"Start"}"#), Some(SystemStatus::Started));
        assert_eq!(parser.parse(br#"{"ExT":"CV"}"#), None);
        assert_eq!(parser.parse(&[0xff, 0xfe]), None);
    }

    #[test]
    fn timer_period() {
        let cfg = WakeupTimerConfig {
            enabled: true,
            order: vec![SeqId::Seq1, SeqId::Seq2],
            sleep: [1, 1, 1, 1],
            wake: [0, 320, 160, 0],
        };
        assert_eq!(cfg.period(SeqId::Seq1), 321);
        assert_eq!(cfg.period(SeqId::Seq2), 161);
    }
}
