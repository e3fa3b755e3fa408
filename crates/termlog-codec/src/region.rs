//! Fixed-capacity byte region.
//!
//! Chunk and stream buffers are allocated once at construction and never
//! grow afterwards; appends that would cross the capacity are refused
//! instead of reallocating.

use crate::error::CodecResult;

/// A bounded byte buffer.
#[derive(Debug)]
pub struct Region {
    buf: Vec<u8>,
    capacity: usize,
}

impl Region {
    /// Allocate a region holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> CodecResult<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        Ok(Self { buf, capacity })
    }

    /// Append `data`, or leave the region untouched if it would not fit.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if data.len() > self.remaining() {
            return false;
        }
        self.buf.extend_from_slice(data);
        true
    }

    /// Insert `data` at `offset`, shifting the tail.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> bool {
        if offset > self.buf.len() || data.len() > self.remaining() {
            return false;
        }
        self.buf.splice(offset..offset, data.iter().copied());
        true
    }

    /// Drop everything past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn is_valid(&self) -> bool {
        self.buf.len() <= self.capacity
    }
}
