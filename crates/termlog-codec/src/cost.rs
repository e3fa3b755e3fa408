//! Worst-case rendered widths charged against a chunk's byte budget.
//!
//! Every unit a stream or chunk commits has a fixed cost known before the
//! unit is accepted, so the rendered message can never outgrow the chunk
//! size regardless of how the renderer escapes or spells it.

use serde::{Deserialize, Serialize};

/// Longest UTF-8 encoded character.
pub const MAX_CHAR_LEN: usize = 4;

/// Longest window record, `=65535x65535`.
pub const MAX_WINDOW_RECORD_LEN: usize = 12;

/// Charging formula for rendered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostModel {
    /// Width of a run or record marker (`<`, `[`, `>`, `]`, `+`, `=`).
    #[serde(default = "default_marker_width")]
    pub marker_width: usize,
    /// Width of one text byte that needs no escaping.
    #[serde(default = "default_char_width")]
    pub char_width: usize,
    /// Width of an escaped text byte (`"` and `\`).
    #[serde(default = "default_escape_width")]
    pub escape_width: usize,
    /// Width of one binary byte, e.g. `255,` in a decimal array.
    #[serde(default = "default_binary_width")]
    pub binary_width: usize,
    /// Room for the largest window record, `=65535x65535`, when sizing
    /// the minimum chunk. Records are charged at their own width.
    #[serde(default = "default_window_width")]
    pub window_width: usize,
}

fn default_marker_width() -> usize {
    1
}
fn default_char_width() -> usize {
    1
}
fn default_escape_width() -> usize {
    2
}
fn default_binary_width() -> usize {
    4
}
fn default_window_width() -> usize {
    MAX_WINDOW_RECORD_LEN
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            marker_width: default_marker_width(),
            char_width: default_char_width(),
            escape_width: default_escape_width(),
            binary_width: default_binary_width(),
            window_width: default_window_width(),
        }
    }
}

impl CostModel {
    /// Cost of a complete, valid character.
    pub fn text(&self, bytes: &[u8]) -> usize {
        match bytes {
            [b'"'] | [b'\\'] => self.escape_width,
            _ => bytes.len() * self.char_width,
        }
    }

    /// Cost of `len` bytes stored in a binary region.
    pub fn binary(&self, len: usize) -> usize {
        len * self.binary_width
    }

    /// Header cost of a fresh run (or record) whose number is `n`.
    pub fn header(&self, n: u64) -> usize {
        self.marker_width + digits(n)
    }

    /// Extra header cost of growing a run from `from` to `to` bytes.
    pub fn growth(&self, from: u64, to: u64) -> usize {
        digits(to) - digits(from)
    }

    /// Cost of the `=WxH` record for a `width` by `height` window.
    pub fn window(&self, width: u16, height: u16) -> usize {
        self.marker_width + digits(width.into()) + 1 + digits(height.into())
    }

    /// Smallest usable chunk: the longest possible pending sequence cut
    /// as binary together with its run header, plus one window record.
    pub fn min_chunk_size(&self) -> usize {
        let pending = MAX_CHAR_LEN as u64 - 1;
        self.binary(pending as usize) + self.header(pending) + self.window_width
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.marker_width > 0
            && self.char_width > 0
            && self.escape_width >= self.char_width
            && self.binary_width > 0
            && self.window_width >= self.window(u16::MAX, u16::MAX)
    }
}

/// Number of decimal digits in `n`.
pub fn digits(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// A metadata record assembled on the stack.
///
/// Large enough for a marker followed by two `u64` numbers and a
/// separator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Record {
    buf: [u8; 48],
    len: usize,
}

impl Record {
    pub(crate) fn new(marker: u8) -> Self {
        let mut record = Self {
            buf: [0; 48],
            len: 0,
        };
        record.push(marker);
        record
    }

    pub(crate) fn push(&mut self, b: u8) -> &mut Self {
        self.buf[self.len] = b;
        self.len += 1;
        self
    }

    /// Append `n` in decimal.
    pub(crate) fn number(&mut self, n: u64) -> &mut Self {
        let width = digits(n);
        let mut rest = n;
        for slot in self.buf[self.len..self.len + width].iter_mut().rev() {
            *slot = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        self.len += width;
        self
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
