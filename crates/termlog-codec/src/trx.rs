//! Snapshot/restore transactions over a fixed field set.
//!
//! A type opts in by naming its mutable state as a before-image value.
//! Aborting copies the whole image back, so fields added to the image
//! are protected without touching any call site.

/// State that can be captured and restored wholesale.
pub trait Transact {
    /// Before-image of every field a transaction protects.
    type Image;

    fn image(&self) -> Self::Image;

    fn restore(&mut self, image: Self::Image);
}

/// An open transaction holding a before-image.
#[must_use = "a transaction must be committed or aborted"]
#[derive(Debug)]
pub struct Trx<I> {
    image: I,
}

impl<I> Trx<I> {
    pub fn begin<T: Transact<Image = I>>(target: &T) -> Self {
        Self {
            image: target.image(),
        }
    }

    /// Put `target` back into its state at `begin`.
    pub fn abort<T: Transact<Image = I>>(self, target: &mut T) {
        target.restore(self.image);
    }

    /// Keep all changes made since `begin`.
    pub fn commit(self) {}
}
