//! One log message being assembled.
//!
//! A chunk pairs an input and an output [`Stream`] with a shared byte
//! budget and the timing metadata region. Every write runs inside a
//! transaction: a write that cannot place a single unit leaves the chunk
//! exactly as it was.
//!
//! Timing metadata records, in order of occurrence:
//!
//! ```text
//! <N  input text run       >N  output text run
//! [N  input binary run     ]N  output binary run
//! +MS delay since the previous packet
//! =WxH window size
//! ```

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::CodecConfig;
use crate::cost::{CostModel, Record};
use crate::dispatcher::{Budget, BudgetImage, Dispatcher};
use crate::error::{CodecError, CodecResult};
use crate::packet::{Packet, PacketPos, Payload};
use crate::stream::{Stream, StreamImage};
use crate::trx::{Transact, Trx};

/// Window size tracking of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No window packet was ever seen.
    Unknown,
    /// The window size is known.
    Known,
    /// Space for a window record is set aside in this message.
    Reserved,
    /// The window record of this message has been written.
    Written,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// A window packet arrived.
    Seen,
    /// A changed size claimed a record slot.
    Reserve,
    /// The slot was filled on flush.
    Write,
    /// The chunk was emptied.
    Empty,
}

impl WindowState {
    /// State after `event`, or `None` if the transition is not allowed.
    pub fn next(self, event: WindowEvent) -> Option<WindowState> {
        use WindowEvent::*;
        use WindowState::*;
        match (self, event) {
            (Unknown, Seen) => Some(Known),
            (Known | Reserved | Written, Seen) => Some(self),
            (Known, Reserve) => Some(Reserved),
            (Reserved, Write) => Some(Written),
            (Unknown, Empty) => Some(Unknown),
            (Known | Reserved | Written, Empty) => Some(Known),
            _ => None,
        }
    }
}

/// Metadata space set aside for a window record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowSlot {
    offset: usize,
    width: u16,
    height: u16,
    /// Budget taken for the record so far.
    reserved: usize,
    /// Bytes accepted by the chunk when the slot was claimed.
    mark: usize,
}

/// A message under construction.
#[derive(Debug)]
pub struct Chunk {
    size: usize,
    cost: CostModel,
    /// Below the minimum size, every write is refused.
    undersized: bool,
    budget: Budget,
    input: Stream,
    output: Stream,
    first_ts: Option<Duration>,
    last_ts: Option<Duration>,
    window_state: WindowState,
    width: u16,
    height: u16,
    /// Size recorded in the last written window record.
    logged: Option<(u16, u16)>,
    slot: Option<WindowSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkImage {
    budget: BudgetImage,
    input: StreamImage,
    output: StreamImage,
    first_ts: Option<Duration>,
    last_ts: Option<Duration>,
    window_state: WindowState,
    width: u16,
    height: u16,
    logged: Option<(u16, u16)>,
    slot: Option<WindowSlot>,
}

impl Chunk {
    /// Allocate a chunk of `size` bytes with the default cost model.
    pub fn new(size: usize) -> CodecResult<Self> {
        Self::with_cost(size, CostModel::default())
    }

    pub fn from_config(config: &CodecConfig) -> CodecResult<Self> {
        Self::with_cost(config.chunk_size, config.cost)
    }

    pub fn with_cost(size: usize, cost: CostModel) -> CodecResult<Self> {
        if !cost.is_valid() {
            return Err(CodecError::Config(format!("invalid cost model {cost:?}")));
        }
        let undersized = size < cost.min_chunk_size();
        if undersized {
            warn!(
                size,
                min = cost.min_chunk_size(),
                "chunk below minimum size, all writes will be refused"
            );
        }
        Ok(Self {
            size,
            cost,
            undersized,
            budget: Budget::new(size)?,
            input: Stream::new(size, b'<', b'[', cost)?,
            output: Stream::new(size, b'>', b']', cost)?,
            first_ts: None,
            last_ts: None,
            window_state: WindowState::Unknown,
            width: 0,
            height: 0,
            logged: None,
            slot: None,
        })
    }

    /// Write `pkt` from `pos` up to `end`.
    ///
    /// Returns true if the packet was written up to `end`. On false `pos`
    /// tells how far it got; the caller should flush, emit and empty the
    /// chunk, then call again with the same `pos`.
    pub fn write(&mut self, pkt: &Packet, pos: &mut PacketPos, end: PacketPos) -> bool {
        debug_assert!(self.is_valid());
        let end = end.min(pkt.end());
        if *pos >= end {
            return true;
        }
        if self.undersized {
            trace!(size = self.size, "write refused by undersized chunk");
            return false;
        }

        let start = *pos;
        let trx = Trx::begin(&*self);
        let complete = self.write_packet(pkt, pos, end);
        if *pos == start {
            trx.abort(self);
            trace!(offset = start.offset(), remaining = self.budget.remaining(), "write did not fit");
            debug_assert!(self.is_valid());
            return false;
        }

        self.first_ts.get_or_insert(pkt.timestamp);
        self.last_ts = Some(self.last_ts.map_or(pkt.timestamp, |ts| ts.max(pkt.timestamp)));
        trx.commit();
        trace!(
            offset = pos.offset(),
            complete,
            remaining = self.budget.remaining(),
            "packet written"
        );
        debug_assert!(self.is_valid());
        complete
    }

    /// Fill the reserved window slot and close both streams' runs.
    pub fn flush(&mut self) {
        debug_assert!(self.is_valid());
        if let Some(slot) = self.slot.take() {
            let mut record = Record::new(b'=');
            record
                .number(slot.width.into())
                .push(b'x')
                .number(slot.height.into());
            debug_assert!(record.as_bytes().len() <= slot.reserved);
            self.budget.commit_at(slot.offset, record.as_bytes());
            self.logged = Some((slot.width, slot.height));
            self.transition(WindowEvent::Write);
            debug!(width = slot.width, height = slot.height, "window record written");
        }
        self.input.flush(&mut self.budget);
        self.output.flush(&mut self.budget);
        debug_assert!(self.is_valid());
    }

    /// Commit pending partial characters of both streams as binary.
    ///
    /// Returns false if either did not fit; such characters stay pending.
    pub fn cut(&mut self) -> bool {
        debug_assert!(self.is_valid());
        let input = self.input.cut(&mut self.budget);
        let output = self.output.cut(&mut self.budget);
        debug_assert!(self.is_valid());
        input && output
    }

    /// Drop the message contents, keeping pending partial characters and
    /// the known window size.
    pub fn empty(&mut self) {
        debug_assert!(self.is_valid());
        self.input.empty();
        self.output.empty();
        self.budget.reset(self.input.held() + self.output.held());
        self.first_ts = None;
        self.last_ts = None;
        self.slot = None;
        self.transition(WindowEvent::Empty);
        trace!(remaining = self.budget.remaining(), "chunk emptied");
        debug_assert!(self.is_valid());
    }

    pub fn is_valid(&self) -> bool {
        self.budget.is_valid()
            && self.budget.size() == self.size
            && self.input.is_valid()
            && self.output.is_valid()
            && (self.window_state == WindowState::Reserved) == self.slot.is_some()
            && self.first_ts.is_some() == self.last_ts.is_some()
            && self
                .slot
                .map_or(true, |slot| slot.offset <= self.budget.meta().len())
    }

    /// True if either stream holds a partial character.
    pub fn is_pending(&self) -> bool {
        self.input.is_pending() || self.output.is_pending()
    }

    /// True if neither stream has committed data.
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.budget.remaining()
    }

    pub fn input(&self) -> &Stream {
        &self.input
    }

    pub fn output(&self) -> &Stream {
        &self.output
    }

    /// Committed timing metadata.
    pub fn timing(&self) -> &[u8] {
        self.budget.meta()
    }

    pub fn first_ts(&self) -> Option<Duration> {
        self.first_ts
    }

    pub fn last_ts(&self) -> Option<Duration> {
        self.last_ts
    }

    pub fn window_state(&self) -> WindowState {
        self.window_state
    }

    /// Last known window size.
    pub fn window(&self) -> Option<(u16, u16)> {
        match self.window_state {
            WindowState::Unknown => None,
            _ => Some((self.width, self.height)),
        }
    }

    fn write_packet(&mut self, pkt: &Packet, pos: &mut PacketPos, end: PacketPos) -> bool {
        if !self.advance(pkt.timestamp) {
            return false;
        }
        match &pkt.payload {
            Payload::Window { width, height } => self.write_window(*width, *height, pos),
            Payload::Input(data) => {
                self.reserve_window() && self.input.write(&mut self.budget, data, pos, end)
            }
            Payload::Output(data) => {
                self.reserve_window() && self.output.write(&mut self.budget, data, pos, end)
            }
        }
    }

    /// Record the delay since the previous packet, closing open runs
    /// first so the metadata stays in time order.
    fn advance(&mut self, ts: Duration) -> bool {
        let Some(last) = self.last_ts else {
            return true;
        };
        let delay = ts.as_millis().saturating_sub(last.as_millis());
        if delay == 0 {
            return true;
        }
        let delay = u64::try_from(delay).unwrap_or(u64::MAX);
        self.input.flush(&mut self.budget);
        self.output.flush(&mut self.budget);
        if !self.budget.reserve(self.cost.header(delay)) {
            return false;
        }
        self.budget.commit(Record::new(b'+').number(delay).as_bytes());
        true
    }

    fn write_window(&mut self, width: u16, height: u16, pos: &mut PacketPos) -> bool {
        let changed = self.window_state == WindowState::Unknown
            || (width, height) != (self.width, self.height);
        if changed {
            let accepted = self.accepted();
            let need = self.cost.window(width, height);
            match self.slot.as_mut() {
                // Nothing was written behind the slot yet, it can take the new size.
                Some(slot) if slot.mark == accepted => {
                    if need > slot.reserved {
                        if !self.budget.reserve(need - slot.reserved) {
                            return false;
                        }
                        slot.reserved = need;
                    }
                    slot.width = width;
                    slot.height = height;
                }
                Some(_) => return false,
                None if self.window_state == WindowState::Written => return false,
                None => {}
            }
            self.width = width;
            self.height = height;
            self.transition(WindowEvent::Seen);
            debug!(width, height, "window size changed");
        }
        if !self.reserve_window() {
            return false;
        }
        pos.advance(1);
        true
    }

    /// Set aside a window record slot if the size differs from the one
    /// last written, before any more message bytes are accepted.
    fn reserve_window(&mut self) -> bool {
        if self.window_state != WindowState::Known
            || self.logged == Some((self.width, self.height))
        {
            return true;
        }
        self.input.flush(&mut self.budget);
        self.output.flush(&mut self.budget);
        let need = self.cost.window(self.width, self.height);
        if !self.budget.reserve(need) {
            return false;
        }
        self.slot = Some(WindowSlot {
            offset: self.budget.meta().len(),
            width: self.width,
            height: self.height,
            reserved: need,
            mark: self.accepted(),
        });
        self.transition(WindowEvent::Reserve);
        debug!(width = self.width, height = self.height, "window record reserved");
        true
    }

    /// Bytes taken so far in this message, grows with every accepted unit.
    fn accepted(&self) -> usize {
        [&self.input, &self.output]
            .iter()
            .map(|s| s.txt().len() + s.bin().len() + s.pending().len())
            .sum::<usize>()
            + self.budget.meta().len()
    }

    fn transition(&mut self, event: WindowEvent) {
        match self.window_state.next(event) {
            Some(next) => self.window_state = next,
            None => debug_assert!(
                false,
                "invalid window transition {:?} on {event:?}",
                self.window_state
            ),
        }
    }
}

impl Transact for Chunk {
    type Image = ChunkImage;

    fn image(&self) -> ChunkImage {
        ChunkImage {
            budget: self.budget.image(),
            input: self.input.image(),
            output: self.output.image(),
            first_ts: self.first_ts,
            last_ts: self.last_ts,
            window_state: self.window_state,
            width: self.width,
            height: self.height,
            logged: self.logged,
            slot: self.slot,
        }
    }

    fn restore(&mut self, image: ChunkImage) {
        self.budget.restore(image.budget);
        self.input.restore(image.input);
        self.output.restore(image.output);
        self.first_ts = image.first_ts;
        self.last_ts = image.last_ts;
        self.window_state = image.window_state;
        self.width = image.width;
        self.height = image.height;
        self.logged = image.logged;
        self.slot = image.slot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn write_all(chunk: &mut Chunk, pkt: &Packet) -> (bool, usize) {
        let mut pos = PacketPos::VOID;
        let complete = chunk.write(pkt, &mut pos, pkt.end());
        (complete, pos.offset())
    }

    #[test]
    fn one_char() {
        let mut chunk = Chunk::new(64).unwrap();
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), "A")), (true, 1));
        assert_eq!(chunk.remaining(), 61);
        assert!(chunk.cut());
        assert_eq!(chunk.timing(), b"<1");
        assert_eq!(chunk.input().txt(), b"A");
        assert!(chunk.output().is_empty());
        assert_eq!(chunk.first_ts(), Some(ms(0)));
    }

    #[test]
    fn window_record_goes_first() {
        let mut chunk = Chunk::new(64).unwrap();
        assert_eq!(write_all(&mut chunk, &Packet::window(ms(0), 80, 24)), (true, 1));
        assert_eq!(chunk.window_state(), WindowState::Reserved);
        assert_eq!(chunk.remaining(), 58);

        assert_eq!(write_all(&mut chunk, &Packet::output(ms(0), "hi")), (true, 2));
        assert_eq!(chunk.remaining(), 55);
        chunk.flush();
        assert_eq!(chunk.window_state(), WindowState::Written);
        assert_eq!(chunk.timing(), b"=80x24>2");
        assert_eq!(chunk.remaining(), 55);

        chunk.empty();
        assert_eq!(chunk.window_state(), WindowState::Known);
        assert_eq!(chunk.window(), Some((80, 24)));
        assert_eq!(chunk.remaining(), 64);

        // unchanged size is not recorded again
        write_all(&mut chunk, &Packet::output(ms(5), "x"));
        chunk.flush();
        assert_eq!(chunk.timing(), b">1");
    }

    #[test]
    fn changed_window_in_next_message() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        chunk.flush();
        chunk.empty();

        assert_eq!(write_all(&mut chunk, &Packet::window(ms(10), 100, 40)), (true, 1));
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(10), "q")), (true, 1));
        chunk.flush();
        assert_eq!(chunk.timing(), b"=100x40<1");
    }

    #[test]
    fn unflushed_window_is_reserved_again() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        chunk.empty();
        assert_eq!(chunk.window_state(), WindowState::Known);

        // the size never made it into a message, so it is reserved before input
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(1), "a")), (true, 1));
        assert_eq!(chunk.window_state(), WindowState::Reserved);
        chunk.flush();
        assert_eq!(chunk.timing(), b"=80x24<1");
    }

    #[test]
    fn window_change_behind_data_needs_new_message() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        write_all(&mut chunk, &Packet::input(ms(0), "a"));
        let resize = Packet::window(ms(0), 100, 40);
        assert_eq!(write_all(&mut chunk, &resize), (false, 0));
        assert_eq!(chunk.window(), Some((80, 24)));

        chunk.flush();
        assert_eq!(chunk.timing(), b"=80x24<1");
        chunk.empty();
        assert_eq!(write_all(&mut chunk, &resize), (true, 1));
        chunk.flush();
        assert_eq!(chunk.timing(), b"=100x40");
    }

    #[test]
    fn window_change_before_data_updates_slot() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        assert_eq!(chunk.remaining(), 58);
        assert_eq!(write_all(&mut chunk, &Packet::window(ms(0), 132, 43)), (true, 1));
        assert_eq!(chunk.remaining(), 57);

        // a smaller size keeps what the slot already holds
        assert_eq!(write_all(&mut chunk, &Packet::window(ms(0), 9, 9)), (true, 1));
        assert_eq!(chunk.remaining(), 57);
        chunk.flush();
        assert_eq!(chunk.timing(), b"=9x9");
        assert_eq!(chunk.remaining(), 57);
    }

    #[test]
    fn flush_never_returns_budget() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        write_all(&mut chunk, &Packet::output(ms(0), "hi"));
        let before = chunk.remaining();
        chunk.flush();
        assert!(chunk.remaining() <= before);
        assert_eq!(chunk.size() - chunk.remaining(), 9);
        chunk.flush();
        assert_eq!(chunk.remaining(), before);
    }

    #[test]
    fn delay_records_between_packets() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::input(ms(0), "a"));
        write_all(&mut chunk, &Packet::output(ms(15), "b"));
        chunk.flush();
        assert_eq!(chunk.timing(), b"<1+15>1");
        assert_eq!(chunk.remaining(), 55);
        assert_eq!(chunk.first_ts(), Some(ms(0)));
        assert_eq!(chunk.last_ts(), Some(ms(15)));
    }

    #[test]
    fn same_millisecond_keeps_runs_open() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::input(Duration::from_micros(100), "a"));
        write_all(&mut chunk, &Packet::input(Duration::from_micros(900), "b"));
        chunk.flush();
        assert_eq!(chunk.timing(), b"<2");
    }

    #[test]
    fn time_going_back_writes_no_delay() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::input(ms(20), "a"));
        write_all(&mut chunk, &Packet::input(ms(10), "b"));
        chunk.flush();
        assert_eq!(chunk.timing(), b"<2");
        assert_eq!(chunk.last_ts(), Some(ms(20)));
    }

    #[test]
    fn rejected_write_rolls_everything_back() {
        let mut chunk = Chunk::new(26).unwrap();
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), "a".repeat(20))), (true, 20));
        assert_eq!(chunk.remaining(), 3);
        let before = chunk.image();

        // the delay record alone does not fit
        assert_eq!(write_all(&mut chunk, &Packet::output(ms(1000), "b")), (false, 0));
        assert_eq!(chunk.image(), before);
        assert!(chunk.timing().is_empty());
        assert_eq!(chunk.last_ts(), Some(ms(0)));
    }

    #[test]
    fn partial_write_resumes_in_next_message() {
        let mut chunk = Chunk::new(26).unwrap();
        let pkt = Packet::input(ms(0), "a".repeat(30));
        let mut pos = PacketPos::VOID;
        assert!(!chunk.write(&pkt, &mut pos, pkt.end()));
        assert_eq!(pos.offset(), 23);
        assert_eq!(chunk.remaining(), 0);
        assert_eq!(chunk.last_ts(), Some(ms(0)));

        chunk.flush();
        assert_eq!(chunk.timing(), b"<23");
        chunk.empty();
        assert!(chunk.write(&pkt, &mut pos, pkt.end()));
        assert_eq!(pos.offset(), 30);
        assert_eq!(chunk.input().txt().len(), 7);
        assert_eq!(chunk.remaining(), 17);
    }

    #[test]
    fn invalid_prefix_rolls_back_with_the_byte_after_it() {
        let mut chunk = Chunk::new(26).unwrap();
        write_all(&mut chunk, &Packet::input(ms(0), "a".repeat(16)));
        assert_eq!(chunk.remaining(), 7);
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), [0xe2])), (true, 1));
        let before = chunk.image();

        // the prefix would fit as binary, the 'A' after it would not
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), "A")), (false, 0));
        assert_eq!(chunk.image(), before);
        assert_eq!(chunk.input().pending(), &[0xe2]);
        assert!(chunk.input().bin().is_empty());
        assert!(chunk.timing().is_empty());
    }

    #[test]
    fn invalid_cost_model_is_rejected() {
        let cost = CostModel {
            window_width: 0,
            ..CostModel::default()
        };
        let err = Chunk::with_cost(64, cost).unwrap_err();
        assert!(matches!(err, CodecError::Config(_)));
    }

    #[test]
    fn undersized_chunk_refuses_writes() {
        let mut chunk = Chunk::new(10).unwrap();
        let before = chunk.image();
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), "abc")), (false, 0));
        assert_eq!(write_all(&mut chunk, &Packet::window(ms(0), 80, 24)), (false, 0));
        assert_eq!(chunk.image(), before);
        assert_eq!(chunk.remaining(), 10);
        assert_eq!(chunk.first_ts(), None);
        // nothing to write is still complete
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(0), "")), (true, 0));
    }

    #[test]
    fn allocation_failure_is_reported() {
        assert!(matches!(Chunk::new(usize::MAX), Err(CodecError::Alloc(_))));
    }

    #[test]
    fn pending_character_crosses_messages() {
        let euro = "€".as_bytes();
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::output(ms(0), &euro[..1]));
        chunk.flush();
        chunk.empty();
        assert!(chunk.is_pending());
        assert!(chunk.is_empty());
        assert_eq!(chunk.remaining(), 63);

        assert_eq!(write_all(&mut chunk, &Packet::output(ms(0), &euro[1..])), (true, 2));
        assert_eq!(chunk.output().txt(), euro);
        assert!(!chunk.is_pending());
    }

    #[test]
    fn empty_is_idempotent() {
        let mut chunk = Chunk::new(64).unwrap();
        write_all(&mut chunk, &Packet::window(ms(0), 80, 24));
        write_all(&mut chunk, &Packet::input(ms(3), "ls\r"));
        chunk.flush();
        chunk.empty();
        let once = chunk.image();
        chunk.empty();
        assert_eq!(chunk.image(), once);
        assert_eq!(chunk.remaining(), 64);
    }

    #[test]
    fn zero_length_write_is_complete() {
        let mut chunk = Chunk::new(64).unwrap();
        assert_eq!(write_all(&mut chunk, &Packet::input(ms(7), "")), (true, 0));
        assert_eq!(chunk.first_ts(), None);
    }

    #[test]
    fn window_transition_table() {
        use WindowEvent::*;
        use WindowState::*;
        assert_eq!(Unknown.next(Seen), Some(Known));
        assert_eq!(Unknown.next(Reserve), None);
        assert_eq!(Unknown.next(Empty), Some(Unknown));
        assert_eq!(Known.next(Reserve), Some(Reserved));
        assert_eq!(Known.next(Write), None);
        assert_eq!(Reserved.next(Write), Some(Written));
        assert_eq!(Reserved.next(Reserve), None);
        assert_eq!(Reserved.next(Empty), Some(Known));
        assert_eq!(Written.next(Write), None);
        assert_eq!(Written.next(Empty), Some(Known));
    }
}
