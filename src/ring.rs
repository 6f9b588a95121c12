//! Sample reduction and the transmit ring

use crate::memory::SequenceError;


/// Running sum of the ADC words drained from the data FIFO during one
/// acquisition window. It is reduced exactly once per acquisition event
/// and starts over afterwards.
#[derive(Debug, Default)]
pub struct RawSampleAccumulator {
    sum: u64,
    count: u32,
}

impl RawSampleAccumulator {

    pub fn new() -> Self {
        RawSampleAccumulator { sum: 0, count: 0 }
    }

    /// Add a burst of FIFO words. Only the low 16 bits carry the ADC code;
    /// the upper half holds the channel id and ECC bits.
    pub fn extend(&mut self, words: &[u32]) {
        for w in words {
            self.sum += (w & 0xffff) as u64;
        }
        self.count += words.len() as u32;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Average code rounded half up, or `None` if no words were gathered.
    /// The accumulator is cleared in both cases.
    pub fn reduce(&mut self) -> Option<u32> {
        let result = match self.count {
            0 => None,
            n => Some(((self.sum as f64 / n as f64) + 0.5) as u32)
        };

        self.sum = 0;
        self.count = 0;

        result
    }
}


/// One transmitted data point
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MeasurementRecord {
    /// Cycle, starting from 1
    pub cycle: u32,
    /// Measurement pair within the run, starting from 1
    pub pair: u32,
    /// Cell potential in mV
    pub voltage: f32,
    /// Cell current in µA
    pub current: f32,
    /// Milliseconds since the run was started
    pub timestamp: u64,
}


#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    record: MeasurementRecord,
    complete: bool,
}

/// Fixed capacity ring of measurement records keyed by step index
///
/// Records are opened with their potential first and completed with the
/// current once the samples of their acquisition window arrive, which is
/// at least one event later. Records leave the ring in order through
/// [`MeasurementRing::pop`] and only a completed record can be popped. A
/// position is reused only once the record occupying it was popped.
#[derive(Debug)]
pub struct MeasurementRing {
    slots: Vec<Slot>,
    // Records opened so far
    head: usize,
    // Records handed to the transport so far
    sent: usize,
}

impl MeasurementRing {

    pub fn new(capacity: usize) -> Self {
        MeasurementRing {
            slots: vec![Slot::default(); capacity.max(1)],
            head: 0,
            sent: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ring position of the record with step index `n`
    pub fn position(&self, n: usize) -> usize {
        n % self.slots.len()
    }

    /// Number of records opened so far
    pub fn opened(&self) -> usize {
        self.head
    }

    /// Number of records popped so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Open the next record and return its step index. Fails if the
    /// position it maps to still holds an unsent record.
    pub fn push(&mut self, record: MeasurementRecord) -> Result<usize, SequenceError> {
        if self.head - self.sent >= self.slots.len() {
            return Err(SequenceError::RingOverrun(self.head));
        }

        let idx = self.head;
        let pos = self.position(idx);
        self.slots[pos] = Slot { record, complete: false };
        self.head += 1;

        Ok(idx)
    }

    /// Store the current of an opened record and mark it ready to send.
    /// Records that already left the ring or were never opened are
    /// ignored and `false` is returned.
    pub fn complete(&mut self, n: usize, current: f32) -> bool {
        if n < self.sent || n >= self.head {
            return false;
        }

        let pos = self.position(n);
        self.slots[pos].record.current = current;
        self.slots[pos].complete = true;

        true
    }

    /// Look at an opened record that has not been sent yet
    pub fn peek(&self, n: usize) -> Option<&MeasurementRecord> {
        if n < self.sent || n >= self.head {
            return None;
        }

        Some(&self.slots[self.position(n)].record)
    }

    /// Whether record `n` has its current
    pub fn is_complete(&self, n: usize) -> bool {
        self.peek(n).is_some() && self.slots[self.position(n)].complete
    }

    /// Take the oldest unsent record if it is complete
    pub fn pop(&mut self) -> Option<MeasurementRecord> {
        if self.sent < self.head && self.slots[self.position(self.sent)].complete {
            let record = self.slots[self.position(self.sent)].record;
            self.sent += 1;
            Some(record)
        } else {
            None
        }
    }

    /// Drop the oldest unsent record without sending it. Used while
    /// draining for records whose acquisition window never produced
    /// samples.
    pub fn discard(&mut self) -> Option<MeasurementRecord> {
        if self.sent < self.head {
            let record = self.slots[self.position(self.sent)].record;
            self.sent += 1;
            Some(record)
        } else {
            None
        }
    }

    /// Forget every record
    pub fn clear(&mut self) {
        self.head = 0;
        self.sent = 0;
        for slot in self.slots.iter_mut() {
            *slot = Slot::default();
        }
    }
}


#[cfg(test)]
mod tests {

    use assert_matches::assert_matches;
    use super::{RawSampleAccumulator, MeasurementRing, MeasurementRecord};
    use crate::memory::SequenceError;

    fn record(pair: u32) -> MeasurementRecord {
        MeasurementRecord { cycle: 1, pair, voltage: pair as f32, ..Default::default() }
    }

    #[test]
    fn accumulator_masks_and_rounds() {
        let mut acc = RawSampleAccumulator::new();
        assert_eq!(acc.reduce(), None);

        acc.extend(&[0x00aa_0001, 0x0001_0002]);
        assert_eq!(acc.count(), 2);
        // (1 + 2) / 2 = 1.5 rounds up
        assert_eq!(acc.reduce(), Some(2));
        assert_eq!(acc.count(), 0);

        acc.extend(&[1000, 1000, 1000, 1000]);
        assert_eq!(acc.reduce(), Some(1000));
    }

    #[test]
    fn ring_positions_wrap() {
        let ring = MeasurementRing::new(10);
        for n in 0..95 {
            assert_eq!(ring.position(n), n % 10);
            assert_eq!(ring.position(n), ring.position(n + ring.capacity()));
        }
    }

    #[test]
    fn ring_orders_records() {
        let mut ring = MeasurementRing::new(4);

        let a = ring.push(record(1)).unwrap();
        let b = ring.push(record(2)).unwrap();

        // nothing is ready until the current arrives
        assert_eq!(ring.pop(), None);

        // completing out of order does not let `b` skip ahead
        assert!(ring.complete(b, 2.0));
        assert_eq!(ring.pop(), None);

        assert!(ring.complete(a, 1.0));
        assert_matches!(ring.pop(), Some(MeasurementRecord { pair: 1, .. }));
        assert_matches!(ring.pop(), Some(MeasurementRecord { pair: 2, .. }));
        assert_eq!(ring.pop(), None);

        // sent records can no longer be touched
        assert!(!ring.complete(a, 5.0));
        assert_eq!(ring.peek(a), None);
    }

    #[test]
    fn ring_refuses_overrun() {
        let mut ring = MeasurementRing::new(3);
        for i in 0..3 {
            ring.push(record(i + 1)).unwrap();
        }

        assert_matches!(ring.push(record(4)), Err(SequenceError::RingOverrun(3)));

        ring.complete(0, 0.5);
        ring.pop().unwrap();

        let idx = ring.push(record(4)).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(ring.position(idx), 0);
        assert_eq!(ring.peek(idx).map(|r| r.pair), Some(4));
    }

    #[test]
    fn ring_discard() {
        let mut ring = MeasurementRing::new(2);
        ring.push(record(1)).unwrap();
        assert!(!ring.is_complete(0));
        assert_matches!(ring.discard(), Some(MeasurementRecord { pair: 1, .. }));
        assert_eq!(ring.sent(), 1);
        assert_eq!(ring.discard(), None);
    }
}
