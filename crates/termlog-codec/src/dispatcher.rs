//! Shared byte budget seen from a stream.
//!
//! Streams never touch the chunk's remaining space directly. They ask a
//! [`Dispatcher`] for room first and only append to their own regions
//! once it has been granted.

use crate::error::CodecResult;
use crate::region::Region;
use crate::trx::Transact;

/// Budget capability handed to streams.
pub trait Dispatcher {
    /// Take `len` bytes from the budget. On false nothing was taken.
    fn reserve(&mut self, len: usize) -> bool;

    /// Append a metadata record into space reserved earlier.
    fn commit(&mut self, record: &[u8]);

    /// Return `len` reserved bytes to the budget.
    fn release(&mut self, len: usize);
}

/// Remaining-space counter plus the metadata region it pays for.
#[derive(Debug)]
pub struct Budget {
    size: usize,
    rem: usize,
    meta: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetImage {
    rem: usize,
    meta_len: usize,
}

impl Budget {
    pub fn new(size: usize) -> CodecResult<Self> {
        Ok(Self {
            size,
            rem: size,
            meta: Region::new(size)?,
        })
    }

    /// A budget of `size` with only `rem` bytes left.
    pub fn with_remaining(size: usize, rem: usize) -> CodecResult<Self> {
        let mut budget = Self::new(size)?;
        budget.rem = rem.min(size);
        Ok(budget)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.rem
    }

    /// Committed metadata records.
    pub fn meta(&self) -> &[u8] {
        self.meta.as_slice()
    }

    /// Place a record at `offset` into space reserved earlier.
    pub(crate) fn commit_at(&mut self, offset: usize, record: &[u8]) {
        let placed = self.meta.insert(offset, record);
        debug_assert!(placed, "reserved record does not fit the metadata region");
    }

    /// Start over with everything but `held` bytes available.
    pub(crate) fn reset(&mut self, held: usize) {
        self.rem = self.size.saturating_sub(held);
        self.meta.clear();
    }

    pub fn is_valid(&self) -> bool {
        self.meta.is_valid()
            && self.meta.capacity() == self.size
            && self.rem <= self.size
            && self.meta.len() + self.rem <= self.size
    }
}

impl Dispatcher for Budget {
    fn reserve(&mut self, len: usize) -> bool {
        if len > self.rem {
            return false;
        }
        self.rem -= len;
        true
    }

    fn commit(&mut self, record: &[u8]) {
        let placed = self.meta.append(record);
        debug_assert!(placed, "reserved record does not fit the metadata region");
    }

    fn release(&mut self, len: usize) {
        debug_assert!(self.rem + len <= self.size, "released more than reserved");
        self.rem = (self.rem + len).min(self.size);
    }
}

impl Transact for Budget {
    type Image = BudgetImage;

    fn image(&self) -> BudgetImage {
        BudgetImage {
            rem: self.rem,
            meta_len: self.meta.len(),
        }
    }

    fn restore(&mut self, image: BudgetImage) {
        self.rem = image.rem;
        self.meta.truncate(image.meta_len);
    }
}
