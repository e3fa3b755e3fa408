//! Message encoder: drives a chunk over a packet sequence and hands every
//! finished message to a sink.
//!
//! Rendering a message into its final text and shipping it is up to the
//! [`MessageSink`] implementation.

use std::time::Duration;

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::config::CodecConfig;
use crate::error::{CodecError, CodecResult};
use crate::packet::{Packet, PacketPos};

/// A finished message, borrowed from the chunk it was built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Sequence number, starting at 1.
    pub id: u64,
    pub first_ts: Option<Duration>,
    pub last_ts: Option<Duration>,
    pub timing: &'a [u8],
    pub in_txt: &'a [u8],
    pub in_bin: &'a [u8],
    pub out_txt: &'a [u8],
    pub out_bin: &'a [u8],
}

impl<'a> Message<'a> {
    fn from_chunk(id: u64, chunk: &'a Chunk) -> Self {
        Self {
            id,
            first_ts: chunk.first_ts(),
            last_ts: chunk.last_ts(),
            timing: chunk.timing(),
            in_txt: chunk.input().txt(),
            in_bin: chunk.input().bin(),
            out_txt: chunk.output().txt(),
            out_bin: chunk.output().bin(),
        }
    }

    pub fn to_owned_message(&self) -> OwnedMessage {
        OwnedMessage {
            id: self.id,
            first_ts: self.first_ts,
            last_ts: self.last_ts,
            timing: self.timing.to_vec(),
            in_txt: self.in_txt.to_vec(),
            in_bin: self.in_bin.to_vec(),
            out_txt: self.out_txt.to_vec(),
            out_bin: self.out_bin.to_vec(),
        }
    }
}

/// A message copied out of its chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedMessage {
    pub id: u64,
    pub first_ts: Option<Duration>,
    pub last_ts: Option<Duration>,
    pub timing: Vec<u8>,
    pub in_txt: Vec<u8>,
    pub in_bin: Vec<u8>,
    pub out_txt: Vec<u8>,
    pub out_bin: Vec<u8>,
}

/// Receiver of finished messages.
pub trait MessageSink {
    fn emit(&mut self, message: &Message<'_>) -> CodecResult<()>;
}

/// Collects copies of every message.
impl MessageSink for Vec<OwnedMessage> {
    fn emit(&mut self, message: &Message<'_>) -> CodecResult<()> {
        self.push(message.to_owned_message());
        Ok(())
    }
}

/// Splits a packet sequence into size-bounded messages.
#[derive(Debug)]
pub struct Encoder<S> {
    chunk: Chunk,
    sink: S,
    next_id: u64,
}

impl<S: MessageSink> Encoder<S> {
    pub fn new(config: &CodecConfig, sink: S) -> CodecResult<Self> {
        config.validate()?;
        Ok(Self::with_chunk(Chunk::from_config(config)?, sink))
    }

    pub fn with_chunk(chunk: Chunk, sink: S) -> Self {
        Self {
            chunk,
            sink,
            next_id: 1,
        }
    }

    /// Write a whole packet, emitting messages as chunks fill up.
    pub fn write(&mut self, pkt: &Packet) -> CodecResult<()> {
        let mut pos = PacketPos::VOID;
        let end = pkt.end();
        let mut fresh = false;
        loop {
            let before = pos;
            if self.chunk.write(pkt, &mut pos, end) {
                return Ok(());
            }
            if fresh && pos == before {
                return Err(CodecError::ChunkTooSmall(self.chunk.size()));
            }
            self.emit()?;
            fresh = true;
        }
    }

    /// End the current message, committing pending partial characters.
    pub fn cut(&mut self) -> CodecResult<()> {
        let mut fresh = false;
        while !self.chunk.cut() {
            if fresh && self.chunk.is_empty() {
                return Err(CodecError::ChunkTooSmall(self.chunk.size()));
            }
            self.emit()?;
            fresh = true;
        }
        self.emit()
    }

    /// End the current message, carrying pending partial characters over
    /// to the next one.
    pub fn flush(&mut self) -> CodecResult<()> {
        self.emit()
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        if self.chunk.is_pending() {
            warn!("encoder dropped with a pending partial character");
        }
        self.sink
    }

    fn emit(&mut self) -> CodecResult<()> {
        self.chunk.flush();
        if !self.chunk.is_empty() || !self.chunk.timing().is_empty() {
            let message = Message::from_chunk(self.next_id, &self.chunk);
            self.sink.emit(&message)?;
            debug!(
                id = self.next_id,
                timing_len = message.timing.len(),
                remaining = self.chunk.remaining(),
                "message emitted"
            );
            self.next_id += 1;
        }
        self.chunk.empty();
        Ok(())
    }
}
