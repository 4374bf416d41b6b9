//! Frame slot and swapchain image indexing.
//!
//! Two different indices drive a frame:
//!
//! - [`FrameSlot`] cycles through `0..CONCURRENTLY_RENDERED_FRAMES` once per
//!   submitted frame. It selects synchronization primitives, command buffers
//!   and per-frame uniform memory.
//! - [`ImageIndex`] is whatever the swapchain hands back from acquire. It
//!   selects framebuffers and per-image attachments and may repeat or skip.
//!
//! [`PerFrame`] can only be indexed by a slot and [`PerImage`] only by an image
//! index, so the two cannot be swapped by accident.

use std::fmt;
use std::ops::{Index, IndexMut};

/// How many frames may be recorded and in flight on the GPU at once.
pub const CONCURRENTLY_RENDERED_FRAMES: usize = 2;

/// Index of an in-flight frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameSlot(usize);

impl FrameSlot {
    /// Slot used by the very first frame.
    pub const FIRST: FrameSlot = FrameSlot(0);

    /// Create a slot, wrapping into the valid range.
    pub fn new(index: usize) -> Self {
        Self(index % CONCURRENTLY_RENDERED_FRAMES)
    }

    /// The slot that follows this one.
    pub fn next(self) -> Self {
        Self::new(self.0 + 1)
    }

    pub fn index(self) -> usize {
        self.0
    }

    /// Iterate every slot in order.
    pub fn all() -> impl Iterator<Item = FrameSlot> {
        (0..CONCURRENTLY_RENDERED_FRAMES).map(FrameSlot)
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Index of an acquired swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(u32);

impl ImageIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw value for `vkQueuePresentKHR`.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {}", self.0)
    }
}

/// Monotonic frame counter that yields the current [`FrameSlot`].
#[derive(Debug, Default, Clone)]
pub struct FrameCounter {
    submitted: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of the frame currently being prepared.
    pub fn slot(&self) -> FrameSlot {
        FrameSlot::new((self.submitted % CONCURRENTLY_RENDERED_FRAMES as u64) as usize)
    }

    /// Number of frames submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Mark the current frame as submitted and move to the next slot.
    pub fn advance(&mut self) -> FrameSlot {
        self.submitted += 1;
        self.slot()
    }
}

/// One value per in-flight frame, indexed by [`FrameSlot`].
#[derive(Debug, Clone)]
pub struct PerFrame<T>([T; CONCURRENTLY_RENDERED_FRAMES]);

impl<T> PerFrame<T> {
    /// Build every slot's value from a constructor.
    pub fn from_fn(mut f: impl FnMut(FrameSlot) -> T) -> Self {
        Self(std::array::from_fn(|i| f(FrameSlot(i))))
    }

    /// Build every slot's value from a fallible constructor.
    pub fn try_from_fn<E>(mut f: impl FnMut(FrameSlot) -> Result<T, E>) -> Result<Self, E> {
        let mut values = Vec::with_capacity(CONCURRENTLY_RENDERED_FRAMES);
        for slot in FrameSlot::all() {
            values.push(f(slot)?);
        }
        match values.try_into() {
            Ok(array) => Ok(Self(array)),
            Err(_) => unreachable!("exactly one value per frame slot"),
        }
    }

    pub fn len(&self) -> usize {
        CONCURRENTLY_RENDERED_FRAMES
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}

impl<T> Index<FrameSlot> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.0[slot.0]
    }
}

impl<T> IndexMut<FrameSlot> for PerFrame<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        &mut self.0[slot.0]
    }
}

impl<T> IntoIterator for PerFrame<T> {
    type Item = T;
    type IntoIter = std::array::IntoIter<T, CONCURRENTLY_RENDERED_FRAMES>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One value per swapchain image, indexed by [`ImageIndex`].
#[derive(Debug, Clone)]
pub struct PerImage<T>(Vec<T>);

impl<T> PerImage<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, image: ImageIndex) -> Option<&T> {
        self.0.get(image.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// Iterate values together with their image index.
    pub fn enumerate(&self) -> impl Iterator<Item = (ImageIndex, &T)> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, v)| (ImageIndex(i as u32), v))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Take every value out, leaving the collection empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.0.drain(..)
    }
}

impl<T> Default for PerImage<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Index<ImageIndex> for PerImage<T> {
    type Output = T;

    fn index(&self, image: ImageIndex) -> &T {
        &self.0[image.index()]
    }
}

impl<T> IndexMut<ImageIndex> for PerImage<T> {
    fn index_mut(&mut self, image: ImageIndex) -> &mut T {
        &mut self.0[image.index()]
    }
}

impl<T> FromIterator<T> for PerImage<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counter_cycles_slots() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.slot(), FrameSlot::FIRST);

        let slots: Vec<usize> = (0..6).map(|_| counter.advance().index()).collect();
        assert_eq!(slots, vec![1, 0, 1, 0, 1, 0]);
        assert_eq!(counter.submitted(), 6);
    }

    #[test]
    fn test_slot_wraps() {
        assert_eq!(FrameSlot::new(CONCURRENTLY_RENDERED_FRAMES), FrameSlot::FIRST);
        assert_eq!(FrameSlot::FIRST.next().next(), FrameSlot::FIRST);
        assert_eq!(FrameSlot::all().count(), CONCURRENTLY_RENDERED_FRAMES);
    }

    #[test]
    fn test_per_frame_indexing() {
        let mut values = PerFrame::from_fn(|slot| slot.index() * 10);
        values[FrameSlot::new(1)] += 1;
        assert_eq!(values[FrameSlot::FIRST], 0);
        assert_eq!(values[FrameSlot::new(1)], 11);
        assert_eq!(values.len(), CONCURRENTLY_RENDERED_FRAMES);
    }

    #[test]
    fn test_per_frame_try_from_fn_propagates_error() {
        let result: Result<PerFrame<u32>, &str> = PerFrame::try_from_fn(|slot| {
            if slot.index() == 1 {
                Err("boom")
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[test]
    fn test_per_image_indexing() {
        let images: PerImage<&str> = ["a", "b", "c"].into_iter().collect();
        assert_eq!(images[ImageIndex::new(2)], "c");
        assert!(images.get(ImageIndex::new(3)).is_none());

        let indices: Vec<u32> = images.enumerate().map(|(i, _)| i.raw()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
