use thiserror::Error;

/// Words of sequencer SRAM
pub const SEQ_MEM_WORDS: u32 = 1024;
/// First word available to user sequences
pub const SEQ_START_ADDR: u32 = 0x10;


/// Error type for sequencer memory and buffer bookkeeping
#[derive(Error, Debug, PartialEq)]
pub enum SequenceError {
    /// Not enough sequencer memory left for the requested blocks
    #[error("Sequence buffer overflow: {requested} words requested, {available} available")]
    SequenceBufferOverflow { requested: u32, available: u32 },
    /// A block does not fit the region reserved for it
    #[error("Block of {len} words does not fit region of {capacity} words")]
    BlockTooLong { len: usize, capacity: u32 },
    /// The measurement ring would overwrite a record that was not sent
    #[error("Measurement ring overrun at step {0}")]
    RingOverrun(usize),
    /// Step blocks were requested before the ping-pong slots were set up
    #[error("Ping-pong slots not primed")]
    NotPrimed,
}


/// A reserved region of sequencer SRAM
///
/// Regions are handed out by [`SeqMem`] and stay valid for the lifetime
/// of the run; blocks are rewritten in place but never moved.
#[derive(Clone, Copy, PartialEq)]
pub struct Region {
    addr: u32,
    len: u32,
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
         .field("addr", &format_args!("0x{:04x}", &self.addr))
         .field("len", &self.len)
         .finish()
    }
}

impl Region {

    /// First word of the region
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Size of the region in words
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether `addr` falls inside this region
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.addr && addr < self.addr + self.len
    }
}


/// Sequencer SRAM tracker
///
/// The AFE has no notion of memory management so the engine keeps track
/// of the sequencer SRAM itself. Allocation is a simple bump from
/// [`SEQ_START_ADDR`] upwards: the initialisation and ADC control
/// sequences are reserved first, the ping-pong step blocks take what is
/// left. Nothing is freed during a run; [`SeqMem::reset`] returns the
/// whole memory at the end of it.
#[derive(Debug)]
pub struct SeqMem {
    // Next free address
    top: u32,
    // One past the last usable address
    limit: u32,
}

impl SeqMem {

    /// Tracker for the full sequencer SRAM
    pub fn new() -> Self {
        SeqMem::with_limit(SEQ_MEM_WORDS)
    }

    /// Tracker for an SRAM of `limit` words
    pub fn with_limit(limit: u32) -> Self {
        SeqMem { top: SEQ_START_ADDR, limit }
    }

    /// Words still available
    pub fn available(&self) -> u32 {
        self.limit.saturating_sub(self.top)
    }

    /// Reserve a single region of `len` words
    pub fn reserve(&mut self, len: u32) -> Result<Region, SequenceError> {
        if len > self.available() {
            return Err(SequenceError::SequenceBufferOverflow {
                requested: len,
                available: self.available()
            });
        }

        let region = Region { addr: self.top, len };
        self.top += len;

        Ok(region)
    }

    /// Reserve `count` consecutive regions of `size_each` words. Either all
    /// of them are reserved or none.
    pub fn allocate_blocks(&mut self, count: u32, size_each: u32) -> Result<Vec<Region>, SequenceError> {
        let requested = count * size_each;
        if requested > self.available() {
            return Err(SequenceError::SequenceBufferOverflow {
                requested,
                available: self.available()
            });
        }

        let mut regions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            regions.push(self.reserve(size_each)?);
        }

        Ok(regions)
    }

    /// Release every region
    pub fn reset(&mut self) {
        self.top = SEQ_START_ADDR;
    }
}
