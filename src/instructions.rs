//! Commands understood by the AFE sequencer
//!
//! The sequencer executes 32-bit command words from its own SRAM. Three
//! kinds are used by the method engine:
//!
//! ```text
//!  Write:  | 1 | reg[8:2] (7 bits) |        data (24 bits)        |
//!  Wait:   | 0 | 0 |              ticks (30 bits)                  |
//!  Stop:   | 0 | 1 | 0 0 0 1 0 0 |            0                    |
//!         31  30  29             23                               0
//! ```
//!
//! A wait of zero ticks doubles as a no-op. Writes can only reach the
//! register window between
//! [`SEQ_REG_BASE`][`crate::registers::consts::SEQ_REG_BASE`] and
//! [`SEQ_REG_TOP`][`crate::registers::consts::SEQ_REG_TOP`].

use crate::codec::DacCodePair;
use crate::registers::{AfeControl, SeqId};
use crate::registers::consts::*;

const WRITE_FLAG: u32 = 0x8000_0000;
const CONTROL_FLAG: u32 = 0x4000_0000;
const STOP_WORD: u32 = 0x4400_0000;
const DATA_MASK: u32 = 0x00ff_ffff;
const WAIT_MASK: u32 = 0x3fff_ffff;

/// Sequencer clock ticks per microsecond (16 MHz system clock)
pub const TICKS_PER_US: u32 = 16;
/// Settling wait after a DAC update
pub const DAC_SETTLE_TICKS: u32 = 10;
/// ADC power-up settling time
pub const ADC_SETTLE_TICKS: u32 = TICKS_PER_US * 250;

macro_rules! make_block_impl {
    ($t:ident, $f:ident) => {

        #[doc(hidden)]
        type S = Self;

        fn create() -> $t {
            $t { $f: Vec::with_capacity(Self::LENGTH) }
        }

        fn len(&self) -> usize {
            self.$f.len()
        }

        fn push_u32s(&mut self, words: &[u32]) {
            self.$f.extend_from_slice(&words);
        }

        fn view(&self) -> &[u32] {
            &self.$f
        }
    }
}


/// A single sequencer command
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Write the low 24 bits of `data` to register `reg`
    Write { reg: u16, data: u32 },
    /// Stall for a number of system clock ticks
    Wait(u32),
    /// Halt the sequencer and raise the end-of-sequence interrupt
    Stop,
}

impl Command {

    /// A wait of zero ticks
    pub const NOP: Command = Command::Wait(0);

    /// Raise custom interrupt 1 on the host interrupt line
    pub fn int1() -> Command {
        Command::Write { reg: AFEGENINTSTA, data: 1 << 1 }
    }

    /// Drive both low power DAC outputs
    pub fn dac(pair: &DacCodePair) -> Command {
        Command::Write { reg: LPDACDAT0, data: pair.register() }
    }

    /// Switch the analog front end blocks
    pub fn afe(ctrl: AfeControl) -> Command {
        Command::Write { reg: AFECON, data: ctrl.bits() }
    }

    /// Point sequence `id` at a block of `len` words at `addr`
    pub fn chain(id: SeqId, addr: u32, len: u32) -> Command {
        Command::Write { reg: id.info_register(), data: SeqId::info_value(addr, len) }
    }

    /// Encode into a sequencer word
    pub fn encode(&self) -> u32 {
        match *self {
            Command::Write { reg, data } => {
                let field = ((reg.wrapping_sub(SEQ_REG_BASE) as u32) >> 2) & 0x7f;
                WRITE_FLAG | (field << 24) | (data & DATA_MASK)
            },
            Command::Wait(ticks) => ticks & WAIT_MASK,
            Command::Stop => STOP_WORD,
        }
    }

    /// Decode a sequencer word. Unknown control words yield `None`.
    pub fn decode(word: u32) -> Option<Command> {
        if word & WRITE_FLAG != 0 {
            let field = (word >> 24) & 0x7f;
            Some(Command::Write {
                reg: SEQ_REG_BASE + (field << 2) as u16,
                data: word & DATA_MASK
            })
        } else if word & CONTROL_FLAG == 0 {
            Some(Command::Wait(word & WAIT_MASK))
        } else if word == STOP_WORD {
            Some(Command::Stop)
        } else {
            None
        }
    }
}


/// Common behaviour of the fixed-size step blocks.
///
/// Step blocks are rewritten in place for the whole run so their length
/// never changes. Implementors provide `create`, `push_u32s`, `len` and
/// `view`; padding and termination are derived from these.
pub trait Block {

    #[doc(hidden)]
    const LENGTH: usize;

    /// Type of the block. For most cases this should be `Self`.
    type S: Block;

    /// Create a new empty block
    fn create() -> Self::S;

    /// Add raw words to the block
    fn push_u32s(&mut self, words: &[u32]);

    /// Number of words used
    fn len(&self) -> usize;

    /// Get a u32 view of the block
    fn view(&self) -> &[u32];

    /// Add a command to the block
    fn push_command(&mut self, cmd: Command) {
        self.push_u32s(&[cmd.encode()]);
    }

    /// Pad the block with no-ops and close it with `last`, which is either
    /// a chaining write or [`Command::Stop`].
    fn terminate(&mut self, last: Command) -> &mut Self {
        while self.len() + 1 < Self::LENGTH {
            self.push_command(Command::NOP);
        }

        self.push_command(last);

        self
    }

    #[doc(hidden)]
    /// Create a new block from a bunch of commands
    fn from_commands(cmds: &[Command]) -> Self::S {

        let mut block = Self::create();

        for cmd in cmds {
            block.push_u32s(&[cmd.encode()]);
        }

        block
    }
}


/// Step block of the sweep methods
///
/// Conversion was started by the ADC control sequence that runs between
/// two step blocks; the block ends it, reports the finished window and
/// moves the DAC.
///
/// ## Block layout
///
/// ```text
/// +----------------+------+------------+------+-------+
/// | AFECON ADC off | INT1 | LPDACDAT0  | WAIT | chain |
/// +----------------+------+------------+------+-------+
/// ```
pub struct SweepStep {
    words: Vec<u32>
}

impl SweepStep {
    pub fn new(pair: &DacCodePair, chain: Command) -> Self {
        let mut block = Self::from_commands(&[
            Command::afe(AfeControl::BASE),
            Command::int1(),
            Command::dac(pair),
            Command::Wait(DAC_SETTLE_TICKS)]);
        block.terminate(chain);
        block
    }

    pub fn stop() -> Self {
        let mut block = Self::from_commands(&[Command::afe(AfeControl::BASE)]);
        block.terminate(Command::Stop);
        block
    }
}

impl Block for SweepStep { const LENGTH: usize = 5; make_block_impl!(SweepStep, words); }


/// Step block of chronoamperometry
///
/// The ADC stays powered for the whole run; each block closes the
/// current window, restarts conversion and moves the DAC.
///
/// ## Block layout
///
/// ```text
/// +---------+------+--------+-----------+------+-------+
/// | CNV off | INT1 | CNV on | LPDACDAT0 | WAIT | chain |
/// +---------+------+--------+-----------+------+-------+
/// ```
pub struct ChronoStep {
    words: Vec<u32>
}

impl ChronoStep {
    pub fn new(pair: &DacCodePair, chain: Command) -> Self {
        let mut block = Self::from_commands(&[
            Command::afe(AfeControl::adc(false)),
            Command::int1(),
            Command::afe(AfeControl::adc(true)),
            Command::dac(pair),
            Command::Wait(DAC_SETTLE_TICKS)]);
        block.terminate(chain);
        block
    }

    pub fn stop() -> Self {
        let mut block = Self::from_commands(&[Command::afe(AfeControl::adc(false))]);
        block.terminate(Command::Stop);
        block
    }
}

impl Block for ChronoStep { const LENGTH: usize = 6; make_block_impl!(ChronoStep, words); }


/// Step block of the pulse voltammetry methods
///
/// Samples are only taken during a short window at the end of each
/// phase, right before the DAC moves to the next phase.
///
/// ## Block layout
///
/// ```text
/// +--------+-----------+---------+------+-----------+------+-------+
/// | CNV on | WAIT (sa) | CNV off | INT1 | LPDACDAT0 | WAIT | chain |
/// +--------+-----------+---------+------+-----------+------+-------+
/// ```
pub struct PulseStep {
    words: Vec<u32>
}

impl PulseStep {
    pub fn new(pair: &DacCodePair, sample_ticks: u32, chain: Command) -> Self {
        let mut block = Self::from_commands(&[
            Command::afe(AfeControl::adc(true)),
            Command::Wait(sample_ticks),
            Command::afe(AfeControl::adc(false)),
            Command::int1(),
            Command::dac(pair),
            Command::Wait(DAC_SETTLE_TICKS)]);
        block.terminate(chain);
        block
    }

    /// Sample the last phase and halt
    pub fn stop(sample_ticks: u32) -> Self {
        let mut block = Self::from_commands(&[
            Command::afe(AfeControl::adc(true)),
            Command::Wait(sample_ticks),
            Command::afe(AfeControl::adc(false))]);
        block.terminate(Command::Stop);
        block
    }
}

impl Block for PulseStep { const LENGTH: usize = 7; make_block_impl!(PulseStep, words); }


/// Shape of the step blocks a method writes into its ping-pong slots
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlockLayout {
    Sweep,
    Chrono,
    /// Pulse methods sample for `sample_ticks` at the end of each phase
    Pulse { sample_ticks: u32 },
}

impl BlockLayout {

    /// Words per block
    pub fn length(&self) -> usize {
        match self {
            BlockLayout::Sweep => SweepStep::LENGTH,
            BlockLayout::Chrono => ChronoStep::LENGTH,
            BlockLayout::Pulse { .. } => PulseStep::LENGTH,
        }
    }

    /// A block driving the DAC to `pair` and closing with `chain`
    pub fn step(&self, pair: &DacCodePair, chain: Command) -> Vec<u32> {
        match *self {
            BlockLayout::Sweep => SweepStep::new(pair, chain).view().to_vec(),
            BlockLayout::Chrono => ChronoStep::new(pair, chain).view().to_vec(),
            BlockLayout::Pulse { sample_ticks } =>
                PulseStep::new(pair, sample_ticks, chain).view().to_vec(),
        }
    }

    /// A block that ends the acquisition and halts the sequencer
    pub fn stop(&self) -> Vec<u32> {
        match *self {
            BlockLayout::Sweep => SweepStep::stop().view().to_vec(),
            BlockLayout::Chrono => ChronoStep::stop().view().to_vec(),
            BlockLayout::Pulse { sample_ticks } => PulseStep::stop(sample_ticks).view().to_vec(),
        }
    }
}


/// A free-length command list, used for the initialisation and ADC
/// control sequences that are written once per run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequence {
    words: Vec<u32>
}

impl Sequence {

    pub fn new() -> Self {
        Sequence { words: Vec::new() }
    }

    pub fn push(&mut self, cmd: Command) -> &mut Self {
        self.words.push(cmd.encode());
        self
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn view(&self) -> &[u32] {
        &self.words
    }
}

impl std::iter::FromIterator<Command> for Sequence {
    fn from_iter<I: IntoIterator<Item=Command>>(iter: I) -> Self {
        Sequence { words: iter.into_iter().map(|c| c.encode()).collect() }
    }
}

lazy_static! {
    /// Powers the ADC, lets it settle and starts converting. Runs between
    /// two sweep step blocks.
    pub static ref ADC_CONTROL: Sequence = [
        Command::afe(AfeControl::adc(false)),
        Command::Wait(ADC_SETTLE_TICKS),
        Command::afe(AfeControl::adc(true)),
    ].iter().cloned().collect();

    /// The only repeating sequence of an open circuit measurement: close
    /// the previous window, report it and open the next one.
    pub static ref OCP_SAMPLE: Sequence = [
        Command::afe(AfeControl::BASE),
        Command::int1(),
        Command::afe(AfeControl::adc(false)),
        Command::Wait(ADC_SETTLE_TICKS),
        Command::afe(AfeControl::adc(true)),
    ].iter().cloned().collect();
}
