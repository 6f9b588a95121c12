//! Sequencer memory programming and ping-pong block management

use log::trace;

use crate::codec::DacCodePair;
use crate::driver::ChipDriver;
use crate::instructions::{BlockLayout, Command, Sequence};
use crate::memory::{Region, SeqMem, SequenceError};
use crate::registers::SeqId;


/// What the samples of a step's acquisition window are used for
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleRole {
    /// They give the current of the step's record
    Record,
    /// They are kept as the reference of a differential measurement
    Reference,
    /// Current is this window minus the reference (or the reverse if
    /// `invert` is set)
    Difference { invert: bool },
    /// They are thrown away
    Discard,
}

/// One DAC update decided by a method state machine
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedStep {
    /// Codes driven by the step
    pub code: DacCodePair,
    /// Potential reported for the record the step opens, in mV
    pub voltage: f32,
    /// Cycle the step belongs to, starting from 1
    pub cycle: u32,
    /// Whether the step opens a new measurement record
    pub opens: bool,
    pub role: SampleRole,
}

/// Outcome of a state machine evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NextAction {
    Step(PlannedStep),
    Stop,
}


#[derive(Debug)]
struct Slot {
    id: SeqId,
    region: Region,
    plan: Option<PlannedStep>,
}

/// Builds blocks and commits them to sequencer SRAM
///
/// Two step blocks ("slots") are used for the whole run, each bound to
/// its own sequence. The wake-up timer order fires the two sequences in
/// turn; that order is what makes the chip alternate. Every step block
/// ends by rewriting the other slot's SEQxINFO with that slot's block,
/// which restores the register should anything have moved it. The slot
/// the chip currently runs is the *active* one; [`advance`] always writes
/// the idle slot and then makes it active, so the engine never touches
/// the block under execution.
///
/// [`advance`]: SequenceProgrammer::advance
#[derive(Debug)]
pub struct SequenceProgrammer {
    mem: SeqMem,
    layout: Option<BlockLayout>,
    slots: Vec<Slot>,
    active: usize,
}

impl SequenceProgrammer {

    /// Programmer for the full sequencer SRAM
    pub fn new() -> Self {
        SequenceProgrammer::with_memory(SeqMem::new())
    }

    /// Programmer over a specific memory tracker
    pub fn with_memory(mem: SeqMem) -> Self {
        SequenceProgrammer { mem, layout: None, slots: Vec::with_capacity(2), active: 0 }
    }

    /// Shape of the step blocks, once primed
    pub fn layout(&self) -> Option<BlockLayout> {
        self.layout
    }

    /// Commit `words` to `region`
    pub fn write_block<D: ChipDriver + ?Sized>(&self, driver: &mut D, region: &Region, words: &[u32])
        -> Result<(), SequenceError> {

        if words.len() > region.len() as usize {
            return Err(SequenceError::BlockTooLong { len: words.len(), capacity: region.len() });
        }

        seqdbg!(region.addr(), words);
        driver.write_sequence_memory(region.addr(), words);

        Ok(())
    }

    /// Reserve `count` regions of `size_each` words
    pub fn allocate_blocks(&mut self, count: u32, size_each: u32) -> Result<Vec<Region>, SequenceError> {
        self.mem.allocate_blocks(count, size_each)
    }

    /// Write a one-off sequence and point `id` at it
    pub fn program_sequence<D: ChipDriver + ?Sized>(&mut self, driver: &mut D, id: SeqId, seq: &Sequence)
        -> Result<Region, SequenceError> {

        let region = self.mem.reserve(seq.len() as u32)?;
        self.write_block(driver, &region, seq.view())?;
        driver.write_register(id.info_register(), SeqId::info_value(region.addr(), region.len()));

        trace!("{:?} programmed at {:?}", id, region);

        Ok(region)
    }

    /// Set up two slots of `layout` blocks on sequences `ids`. The first
    /// slot receives `first`; the second is primed with a stop block so the
    /// chip halts cleanly if it ever reaches it before being rewritten.
    pub fn prime<D: ChipDriver + ?Sized>(&mut self, driver: &mut D, layout: BlockLayout,
        ids: [SeqId; 2], first: PlannedStep) -> Result<(), SequenceError> {

        let len = layout.length() as u32;
        let regions = self.allocate_blocks(2, len)?;
        self.layout = Some(layout);

        self.slots.clear();
        for (id, region) in ids.iter().zip(regions.into_iter()) {
            self.slots.push(Slot { id: *id, region, plan: None });
        }

        let chain = Command::chain(self.slots[1].id, self.slots[1].region.addr(), len);
        let words = layout.step(&first.code, chain);
        self.write_block(driver, &self.slots[0].region, &words)?;
        self.slots[0].plan = Some(first);

        let words = layout.stop();
        self.write_block(driver, &self.slots[1].region, &words)?;

        for slot in self.slots.iter() {
            driver.write_register(slot.id.info_register(),
                SeqId::info_value(slot.region.addr(), len));
        }

        self.active = 0;

        Ok(())
    }

    /// The step of the block the chip currently runs
    pub fn active(&self) -> Option<&PlannedStep> {
        self.slots.get(self.active).and_then(|s| s.plan.as_ref())
    }

    /// Region of the block the chip currently runs
    pub fn active_region(&self) -> Option<Region> {
        self.slots.get(self.active).map(|s| s.region)
    }

    /// Write `action` into the idle slot and make it the active one.
    /// Returns the region that was written.
    pub fn advance<D: ChipDriver + ?Sized>(&mut self, driver: &mut D, action: &NextAction)
        -> Result<Region, SequenceError> {

        let layout = match self.layout {
            Some(layout) if self.slots.len() == 2 => layout,
            _ => return Err(SequenceError::NotPrimed),
        };

        let len = layout.length() as u32;
        let idle = 1 - self.active;
        let other = &self.slots[self.active];

        let (words, plan) = match action {
            NextAction::Step(step) => {
                let chain = Command::chain(other.id, other.region.addr(), len);
                (layout.step(&step.code, chain), Some(*step))
            },
            NextAction::Stop => (layout.stop(), None),
        };

        let region = self.slots[idle].region;
        self.write_block(driver, &region, &words)?;

        self.slots[idle].plan = plan;
        self.active = idle;

        Ok(region)
    }

    /// Forget every slot and release the sequencer memory
    pub fn reset(&mut self) {
        self.layout = None;
        self.slots.clear();
        self.active = 0;
        self.mem.reset();
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::memory::{SEQ_START_ADDR, SequenceError};
    use crate::registers::consts::{SEQCON, TRIGSEQ};
    use crate::sim::SimChip;
    use assert_matches::assert_matches;

    fn step(bias: u32) -> PlannedStep {
        PlannedStep {
            code: DacCodePair { zero: 32, bias },
            voltage: 0.0,
            cycle: 1,
            opens: true,
            role: SampleRole::Record,
        }
    }

    #[test]
    fn advance_never_writes_active_slot() {
        let mut chip = SimChip::new();
        let mut prog = SequenceProgrammer::new();

        prog.prime(&mut chip, BlockLayout::Sweep, [SeqId::Seq0, SeqId::Seq1], step(0)).unwrap();
        assert_eq!(prog.active().map(|s| s.code.bias), Some(0));

        for i in 1..50u32 {
            let active = prog.active_region().unwrap();
            let written = prog.advance(&mut chip, &NextAction::Step(step(i))).unwrap();
            assert_ne!(written.addr(), active.addr());
            assert_eq!(prog.active_region(), Some(written));
            assert_eq!(prog.active().map(|s| s.code.bias), Some(i));
        }

        let written = prog.advance(&mut chip, &NextAction::Stop).unwrap();
        assert_eq!(prog.active(), None);
        assert_eq!(prog.active_region(), Some(written));
    }

    #[test]
    fn step_blocks_restore_the_other_slot() {
        let mut chip = SimChip::new();
        let mut prog = SequenceProgrammer::new();

        prog.prime(&mut chip, BlockLayout::Sweep, [SeqId::Seq0, SeqId::Seq1], step(3)).unwrap();
        let info = chip.read_register(SeqId::Seq1.info_register());

        chip.write_register(SeqId::Seq1.info_register(), 0);
        chip.write_register(SEQCON, 1);
        chip.write_register(TRIGSEQ, 1 << (SeqId::Seq0 as u32));

        assert_eq!(chip.read_register(SeqId::Seq1.info_register()), info);
        assert_eq!(chip.dac_history(), &[DacCodePair { zero: 32, bias: 3 }]);
    }

    #[test]
    fn one_off_sequences_precede_slots() {
        let mut chip = SimChip::new();
        let mut prog = SequenceProgrammer::new();

        let mut seq = Sequence::new();
        seq.push(Command::NOP).push(Command::Stop);
        let region = prog.program_sequence(&mut chip, SeqId::Seq0, &seq).unwrap();
        assert_eq!(region.addr(), SEQ_START_ADDR);

        prog.prime(&mut chip, BlockLayout::Chrono, [SeqId::Seq1, SeqId::Seq2], step(7)).unwrap();
        assert_eq!(prog.active_region().map(|r| r.addr()), Some(SEQ_START_ADDR + 2));

        let info = chip.read_register(SeqId::Seq2.info_register());
        assert_eq!(SeqId::unpack_info(info), (SEQ_START_ADDR + 8, 6));
    }

    #[test]
    fn overflowing_memory_is_reported() {
        let mut chip = SimChip::new();
        let mem = SeqMem::with_limit(SEQ_START_ADDR + 12);
        let mut prog = SequenceProgrammer::with_memory(mem);
        let layout = BlockLayout::Pulse { sample_ticks: 16 };

        assert_matches!(prog.prime(&mut chip, layout, [SeqId::Seq1, SeqId::Seq2], step(1)),
            Err(SequenceError::SequenceBufferOverflow { requested: 14, available: 12 }));
    }

    #[test]
    fn advance_requires_priming() {
        let mut chip = SimChip::new();
        let mut prog = SequenceProgrammer::new();
        assert_eq!(prog.layout(), None);
        assert_matches!(prog.advance(&mut chip, &NextAction::Stop), Err(SequenceError::NotPrimed));
    }
}
