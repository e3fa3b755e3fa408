//! Per-direction accumulator of terminal bytes.
//!
//! Valid printable characters go to the text region, control bytes and
//! bytes that cannot form valid UTF-8 go to the binary region. Consecutive
//! bytes of one class form a run; a run's `<marker><length>` record is
//! committed to the shared metadata once the run is closed, but its space
//! is charged as soon as the run is opened or grows.

use tracing::{trace, warn};

use crate::cost::{CostModel, Record};
use crate::dispatcher::Dispatcher;
use crate::error::CodecResult;
use crate::packet::PacketPos;
use crate::region::Region;
use crate::trx::Transact;
use crate::utf8::Utf8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Text,
    Binary,
}

/// The run currently being extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    class: Class,
    len: u64,
}

enum Step {
    /// The byte was taken.
    Consumed,
    /// A held partial character was committed, the byte must be retried.
    Again,
    /// Out of space.
    Full,
}

/// One direction (input or output) of a chunk.
#[derive(Debug)]
pub struct Stream {
    cost: CostModel,
    txt_marker: u8,
    bin_marker: u8,
    txt: Region,
    bin: Region,
    run: Option<Run>,
    /// Partial character waiting for more bytes.
    pending: Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamImage {
    txt_len: usize,
    bin_len: usize,
    run: Option<Run>,
    pending: Utf8,
}

fn is_control(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

impl Stream {
    /// Create a stream whose regions can each hold `size` bytes.
    pub fn new(size: usize, txt_marker: u8, bin_marker: u8, cost: CostModel) -> CodecResult<Self> {
        Ok(Self {
            cost,
            txt_marker,
            bin_marker,
            txt: Region::new(size)?,
            bin: Region::new(size)?,
            run: None,
            pending: Utf8::default(),
        })
    }

    /// Committed text bytes.
    pub fn txt(&self) -> &[u8] {
        self.txt.as_slice()
    }

    /// Committed binary bytes.
    pub fn bin(&self) -> &[u8] {
        self.bin.as_slice()
    }

    /// Bytes of the held partial character.
    pub fn pending(&self) -> &[u8] {
        self.pending.as_bytes()
    }

    /// Budget charged for the held partial character.
    pub fn held(&self) -> usize {
        self.pending.len() * self.cost.char_width
    }

    /// Write `data` from `pos` up to `end`.
    ///
    /// Returns true if everything up to `end` was taken. Otherwise `pos`
    /// is advanced only past the bytes that were committed (or are held
    /// as a partial character) and nothing half-written stays behind.
    ///
    /// A held prefix that a new byte proves invalid is committed as binary
    /// before that byte is retried. If the byte then does not fit, `pos`
    /// stays put while the prefix has already moved to the binary region;
    /// callers that need the stream untouched on no progress must roll it
    /// back, as [`Chunk::write`](crate::chunk::Chunk::write) does.
    pub fn write<D: Dispatcher + ?Sized>(
        &mut self,
        dispatcher: &mut D,
        data: &[u8],
        pos: &mut PacketPos,
        end: PacketPos,
    ) -> bool {
        let end = end.offset().min(data.len());
        while pos.offset() < end {
            match self.step(dispatcher, data[pos.offset()]) {
                Step::Consumed => pos.advance(1),
                Step::Again => {}
                Step::Full => {
                    trace!(offset = pos.offset(), end, "stream out of space");
                    return false;
                }
            }
        }
        true
    }

    /// Commit a held partial character as binary and close the run.
    ///
    /// Returns false if the partial character does not fit; it then stays
    /// held for the next message.
    pub fn cut<D: Dispatcher + ?Sized>(&mut self, dispatcher: &mut D) -> bool {
        let mut complete = true;
        if self.pending.is_started() && !self.commit_pending(dispatcher) {
            warn!(
                len = self.pending.len(),
                "no room to cut pending character, keeping it for the next message"
            );
            complete = false;
        }
        self.flush(dispatcher);
        complete
    }

    /// Close the current run so the next write starts a new one.
    pub fn flush<D: Dispatcher + ?Sized>(&mut self, dispatcher: &mut D) {
        if let Some(run) = self.run.take() {
            let marker = match run.class {
                Class::Text => self.txt_marker,
                Class::Binary => self.bin_marker,
            };
            dispatcher.commit(Record::new(marker).number(run.len).as_bytes());
        }
    }

    /// Drop committed data and run state, keeping any partial character.
    pub fn empty(&mut self) {
        self.txt.clear();
        self.bin.clear();
        self.run = None;
    }

    pub fn is_empty(&self) -> bool {
        self.txt.is_empty() && self.bin.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_started()
    }

    pub fn is_valid(&self) -> bool {
        let run_valid = match self.run {
            None => true,
            Some(run) => {
                let region = match run.class {
                    Class::Text => &self.txt,
                    Class::Binary => &self.bin,
                };
                run.len > 0 && run.len as usize <= region.len()
            }
        };
        self.txt.is_valid()
            && self.bin.is_valid()
            && self.txt.capacity() == self.bin.capacity()
            && !self.pending.is_complete()
            && run_valid
    }

    fn step<D: Dispatcher + ?Sized>(&mut self, dispatcher: &mut D, b: u8) -> Step {
        let mut next = self.pending;
        if next.add(b) {
            if next.is_complete() {
                let bytes = next.as_bytes();
                let (class, cost) = if bytes.len() == 1 && is_control(b) {
                    (Class::Binary, self.cost.binary(1))
                } else {
                    (Class::Text, self.cost.text(bytes))
                };
                if !self.append(dispatcher, class, bytes, cost, self.held()) {
                    return Step::Full;
                }
            } else if !dispatcher.reserve(self.cost.char_width) {
                return Step::Full;
            }
            self.pending = next;
            if self.pending.is_complete() {
                self.pending.reset();
            }
            Step::Consumed
        } else if self.pending.is_started() {
            // The held prefix can never complete.
            if self.commit_pending(dispatcher) {
                Step::Again
            } else {
                Step::Full
            }
        } else if self.append(dispatcher, Class::Binary, &[b], self.cost.binary(1), 0) {
            Step::Consumed
        } else {
            Step::Full
        }
    }

    fn commit_pending<D: Dispatcher + ?Sized>(&mut self, dispatcher: &mut D) -> bool {
        let pending = self.pending;
        let bytes = pending.as_bytes();
        if !self.append(
            dispatcher,
            Class::Binary,
            bytes,
            self.cost.binary(bytes.len()),
            self.held(),
        ) {
            return false;
        }
        self.pending.reset();
        true
    }

    /// Append `bytes` of one class costing `cost`, of which `held` was
    /// already charged, extending or opening a run.
    fn append<D: Dispatcher + ?Sized>(
        &mut self,
        dispatcher: &mut D,
        class: Class,
        bytes: &[u8],
        cost: usize,
        held: usize,
    ) -> bool {
        let n = bytes.len() as u64;
        let extends = matches!(self.run, Some(run) if run.class == class);
        let header = match self.run {
            Some(run) if extends => self.cost.growth(run.len, run.len + n),
            _ => self.cost.header(n),
        };
        if self.region(class).remaining() < bytes.len() {
            return false;
        }
        let total = header + cost;
        if total >= held {
            if !dispatcher.reserve(total - held) {
                return false;
            }
        } else {
            dispatcher.release(held - total);
        }

        if extends {
            if let Some(run) = self.run.as_mut() {
                run.len += n;
            }
        } else {
            self.flush(dispatcher);
            self.run = Some(Run { class, len: n });
        }
        let appended = self.region_mut(class).append(bytes);
        debug_assert!(appended, "region capacity checked above");
        true
    }

    fn region(&self, class: Class) -> &Region {
        match class {
            Class::Text => &self.txt,
            Class::Binary => &self.bin,
        }
    }

    fn region_mut(&mut self, class: Class) -> &mut Region {
        match class {
            Class::Text => &mut self.txt,
            Class::Binary => &mut self.bin,
        }
    }
}

impl Transact for Stream {
    type Image = StreamImage;

    fn image(&self) -> StreamImage {
        StreamImage {
            txt_len: self.txt.len(),
            bin_len: self.bin.len(),
            run: self.run,
            pending: self.pending,
        }
    }

    fn restore(&mut self, image: StreamImage) {
        self.txt.truncate(image.txt_len);
        self.bin.truncate(image.bin_len);
        self.run = image.run;
        self.pending = image.pending;
    }
}
