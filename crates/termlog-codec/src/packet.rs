//! Timestamped terminal I/O events as delivered by the capture layer.
//!
//! A packet is only ever read by the codec. How much of it has been
//! written so far is tracked by a separate [`PacketPos`] owned by the
//! caller, so one packet can be spread over several messages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a packet carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// Bytes typed into the terminal.
    Input(Vec<u8>),
    /// Bytes the terminal displayed.
    Output(Vec<u8>),
    /// Terminal resize.
    Window { width: u16, height: u16 },
}

/// A single timestamped terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Time since an epoch chosen by the capture layer.
    pub timestamp: Duration,
    pub payload: Payload,
}

impl Packet {
    pub fn input(timestamp: Duration, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            payload: Payload::Input(data.into()),
        }
    }

    pub fn output(timestamp: Duration, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            payload: Payload::Output(data.into()),
        }
    }

    pub fn window(timestamp: Duration, width: u16, height: u16) -> Self {
        Self {
            timestamp,
            payload: Payload::Window { width, height },
        }
    }

    /// I/O bytes, empty for window packets.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Input(data) | Payload::Output(data) => data,
            Payload::Window { .. } => &[],
        }
    }

    /// Position just past the last unit of the packet.
    ///
    /// I/O packets are measured in bytes, a window packet is one unit.
    pub fn end(&self) -> PacketPos {
        match &self.payload {
            Payload::Input(data) | Payload::Output(data) => PacketPos(data.len()),
            Payload::Window { .. } => PacketPos(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end() == PacketPos::VOID
    }
}

/// Resumable write cursor into a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketPos(usize);

impl PacketPos {
    /// Start of any packet.
    pub const VOID: PacketPos = PacketPos(0);

    pub fn new(offset: usize) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> usize {
        self.0
    }

    pub fn is_end(self, pkt: &Packet) -> bool {
        self >= pkt.end()
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.0 += n;
    }
}
