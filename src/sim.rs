//! A software model of the AFE
//!
//! [`SimChip`] implements [`ChipDriver`] by executing the encoded
//! sequencer words it is given. It models just enough of the chip to run
//! every method end to end: the register file, the sequencer SRAM, the
//! wake-up timer firing order, ADC windows feeding the data FIFO and the
//! interrupt controller raising the host line. Time is not modelled; each
//! call to [`ChipDriver::wait_for_interrupt`] fires the next timer entry.
//!
//! [`Loopback`] is an in-memory [`Transport`] that keeps everything sent
//! through it.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use log::trace;

use crate::codec::DacCodePair;
use crate::config::Method;
use crate::driver::{ChipDriver, InterruptLine, Transport, WakeupTimerConfig};
use crate::instructions::Command;
use crate::memory::SEQ_MEM_WORDS;
use crate::registers::{AfeControl, IntSource, LpTiaRtia, SeqId};
use crate::registers::consts::*;
use crate::ring::MeasurementRecord;

/// Calls to `wait_for_interrupt` without any interrupt before the model
/// gives up
const STALL_LIMIT: usize = 10_000;
// Channel id and ECC bits above the ADC code in a FIFO word
const FIFO_TAG: u32 = 0x0012_0000;


/// Software AFE
pub struct SimChip {
    regs: HashMap<u16, u32>,
    sram: Vec<u32>,
    fifo: VecDeque<u32>,
    flags: IntSource,
    line: Arc<InterruptLine>,
    timer: WakeupTimerConfig,
    position: usize,
    sequencer: bool,
    converting: bool,
    dac: DacCodePair,
    dac_history: Vec<DacCodePair>,
    model: Box<dyn FnMut(&DacCodePair) -> u32>,
    samples_per_window: usize,
    last_block: Option<(u32, u32)>,
    fired: Vec<SeqId>,
    collisions: usize,
    wakes: u32,
    fail_wake_after: Option<u32>,
    shutdowns: usize,
    indicator_clears: usize,
    sleep_locked: bool,
    writes: usize,
    idle: usize,
    lfosc: f32,
}

impl SimChip {

    /// A chip whose ADC always reads code 1000
    pub fn new() -> Self {
        SimChip {
            regs: HashMap::new(),
            sram: vec![0u32; SEQ_MEM_WORDS as usize],
            fifo: VecDeque::new(),
            flags: IntSource::empty(),
            line: Arc::new(InterruptLine::new()),
            timer: WakeupTimerConfig::disabled(),
            position: 0,
            sequencer: false,
            converting: false,
            dac: DacCodePair::default(),
            dac_history: Vec::new(),
            model: Box::new(|_| 1000),
            samples_per_window: 4,
            last_block: None,
            fired: Vec::new(),
            collisions: 0,
            wakes: 0,
            fail_wake_after: None,
            shutdowns: 0,
            indicator_clears: 0,
            sleep_locked: false,
            writes: 0,
            idle: 0,
            lfosc: 32_000.0,
        }
    }

    /// Make the ADC read `model(dac)` while the DAC holds `dac`
    pub fn with_model<F: FnMut(&DacCodePair) -> u32 + 'static>(mut self, model: F) -> Self {
        self.model = Box::new(model);
        self
    }

    /// Words pushed to the FIFO per ADC window
    pub fn with_samples_per_window(mut self, n: usize) -> Self {
        self.samples_per_window = n;
        self
    }

    pub fn with_lfosc(mut self, lfosc: f32) -> Self {
        self.lfosc = lfosc;
        self
    }

    /// The host interrupt line driven by this chip
    pub fn line(&self) -> Arc<InterruptLine> {
        self.line.clone()
    }

    /// Let the first `n` wake-up probes succeed and fail every later one
    pub fn fail_wake_after(&mut self, n: u32) {
        self.fail_wake_after = Some(n + self.wakes);
    }

    /// Put raw words into the data FIFO
    pub fn inject_samples(&mut self, words: &[u32]) {
        self.fifo.extend(words.iter().copied());
    }

    /// Set interrupt flags and raise the host line regardless of the
    /// interrupt selection
    pub fn raise(&mut self, flags: IntSource) {
        self.flags |= flags;
        self.line.raise();
    }

    /// Every DAC code pair the sequencer wrote, in order
    pub fn dac_history(&self) -> &[DacCodePair] {
        &self.dac_history
    }

    /// Sequences fired by the wake-up timer, in order
    pub fn fired(&self) -> &[SeqId] {
        &self.fired
    }

    /// Sequencer memory writes that hit the block the chip was executing
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns
    }

    pub fn indicator_clears(&self) -> usize {
        self.indicator_clears
    }

    pub fn sleep_locked(&self) -> bool {
        self.sleep_locked
    }

    /// Register and SRAM writes issued through the driver interface
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn timer_enabled(&self) -> bool {
        self.timer.enabled
    }

    pub fn register(&self, addr: u16) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn signal(&mut self, flags: IntSource) {
        self.flags |= flags;
        let enabled = IntSource::from_bits_truncate(self.register(INTCSEL0));
        if enabled.intersects(flags) {
            self.line.raise();
        }
    }

    // A register write, from the host or from the sequencer
    fn apply(&mut self, addr: u16, value: u32) {
        self.regs.insert(addr, value);

        match addr {
            AFECON => {
                let ctrl = AfeControl::from_bits_truncate(value);
                let converting = ctrl.contains(AfeControl::ADCPWR | AfeControl::ADCCNV);
                if self.converting && !converting {
                    self.close_window();
                }
                self.converting = converting;
            },
            LPDACDAT0 => {
                self.dac = DacCodePair::from_register(value);
                self.dac_history.push(self.dac);
            },
            AFEGENINTSTA => {
                if value & (1 << 1) != 0 {
                    self.signal(IntSource::CUSTOMINT1);
                }
            },
            SEQCON => self.sequencer = value & 0x1 != 0,
            TRIGSEQ => {
                for id in [SeqId::Seq0, SeqId::Seq1, SeqId::Seq2, SeqId::Seq3].iter() {
                    if value & (1 << (*id as u32)) != 0 {
                        self.run_sequence(*id);
                    }
                }
            },
            _ => {}
        }
    }

    // Conversion stopped: the window's samples land in the FIFO
    fn close_window(&mut self) {
        let code = (self.model)(&self.dac) & 0xffff;
        for _ in 0..self.samples_per_window {
            self.fifo.push_back(FIFO_TAG | code);
        }

        let threshold = ((self.register(DATAFIFOTHRES) >> 16) & 0x7ff) as usize;
        if threshold > 0 && self.fifo.len() >= threshold {
            self.signal(IntSource::DATAFIFOTHRESH);
        }
    }

    fn run_sequence(&mut self, id: SeqId) {
        if !self.sequencer {
            return;
        }

        let (addr, len) = SeqId::unpack_info(self.register(id.info_register()));
        trace!("SIM: running {:?} at 0x{:04x}, {} words", id, addr, len);

        for i in addr..(addr + len) {
            let word = match self.sram.get(i as usize) {
                Some(word) => *word,
                None => break,
            };

            match Command::decode(word) {
                Some(Command::Write { reg, data }) => {
                    if reg == AFEGENINTSTA {
                        self.last_block = Some((addr, len));
                    }
                    self.apply(reg, data);
                },
                Some(Command::Stop) => {
                    self.sequencer = false;
                    self.signal(IntSource::ENDSEQ);
                    break;
                },
                Some(Command::Wait(_)) | None => {}
            }
        }
    }
}

impl Default for SimChip {
    fn default() -> Self {
        SimChip::new()
    }
}

impl ChipDriver for SimChip {

    fn wake(&mut self, _max_attempts: u32) -> bool {
        self.wakes += 1;
        match self.fail_wake_after {
            Some(n) => self.wakes <= n,
            None => true,
        }
    }

    fn read_register(&mut self, addr: u16) -> u32 {
        match addr {
            FIFOCNTSTA => ((self.fifo.len() as u32) & FIFOCNT_MASK) << FIFOCNT_SHIFT,
            _ => self.register(addr),
        }
    }

    fn write_register(&mut self, addr: u16, value: u32) {
        self.writes += 1;
        self.apply(addr, value);
    }

    fn read_fifo(&mut self, words: &mut [u32]) {
        for w in words.iter_mut() {
            *w = self.fifo.pop_front().unwrap_or(0);
        }
    }

    fn write_sequence_memory(&mut self, addr: u32, words: &[u32]) {
        self.writes += 1;

        if self.timer.enabled {
            if let Some((start, len)) = self.last_block {
                let end = addr + words.len() as u32;
                if addr < start + len && start < end {
                    self.collisions += 1;
                }
            }
        }

        for (i, w) in words.iter().enumerate() {
            if let Some(slot) = self.sram.get_mut(addr as usize + i) {
                *slot = *w;
            }
        }
    }

    fn configure_wakeup_timer(&mut self, cfg: &WakeupTimerConfig) {
        self.writes += 1;
        self.timer = cfg.clone();
        self.position = 0;
    }

    fn interrupt_flags(&mut self) -> IntSource {
        self.flags
    }

    fn clear_interrupt_flags(&mut self, mask: IntSource) {
        self.flags.remove(mask);
    }

    fn lock_sleep(&mut self, locked: bool) {
        self.sleep_locked = locked;
    }

    fn measure_lfosc(&mut self) -> f32 {
        self.lfosc
    }

    fn calibrate_rtia(&mut self, rtia: LpTiaRtia) -> f32 {
        rtia.nominal().unwrap_or(0.0)
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
        self.converting = false;
        self.sequencer = false;
    }

    fn clear_indicator(&mut self) {
        self.indicator_clears += 1;
    }

    /// Fire the next timer entry.
    ///
    /// # Panics
    ///
    /// Panics once the model went [`STALL_LIMIT`] calls without raising
    /// the host line, which means the engine waits for an event that
    /// will never come.
    fn wait_for_interrupt(&mut self) {
        if self.timer.enabled && !self.timer.order.is_empty() {
            let id = self.timer.order[self.position % self.timer.order.len()];
            self.position += 1;
            self.fired.push(id);
            self.run_sequence(id);
        }

        if self.line.is_pending() {
            self.idle = 0;
        } else {
            self.idle += 1;
            if self.idle > STALL_LIMIT {
                panic!("SIM: no interrupt after {} timer events", STALL_LIMIT);
            }
        }
    }
}


/// In-memory transport
#[derive(Debug, Default)]
pub struct Loopback {
    sent: Vec<(MeasurementRecord, Method)>,
    inbound: VecDeque<Vec<u8>>,
    stop_after: Option<usize>,
    fail_after: Option<usize>,
}

impl Loopback {

    pub fn new() -> Self {
        Loopback::default()
    }

    /// Queue a stop telegram once `n` records went out
    pub fn stop_after(mut self, n: usize) -> Self {
        self.stop_after = Some(n);
        self
    }

    /// Refuse every record after the first `n`
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Queue an inbound telegram
    pub fn push_inbound(&mut self, telegram: &[u8]) {
        self.inbound.push_back(telegram.to_vec());
    }

    pub fn sent(&self) -> &[(MeasurementRecord, Method)] {
        &self.sent
    }

    pub fn records(&self) -> Vec<MeasurementRecord> {
        self.sent.iter().map(|(r, _)| *r).collect()
    }
}

impl Transport for Loopback {

    fn data_available(&mut self) -> bool {
        !self.inbound.is_empty()
    }

    fn read_inbound_telegram(&mut self) -> Vec<u8> {
        self.inbound.pop_front().unwrap_or_default()
    }

    fn send_record(&mut self, record: &MeasurementRecord, method: Method) -> io::Result<()> {
        if let Some(n) = self.fail_after {
            if self.sent.len() >= n {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
            }
        }

        self.sent.push((*record, method));

        if self.stop_after == Some(self.sent.len()) {
            self.push_inbound(br#"{"ExC":"Stop"}"#);
        }

        Ok(())
    }
}
