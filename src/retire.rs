//! Fence-gated retirement of GPU resources.
//!
//! The GPU runs up to [`CONCURRENTLY_RENDERED_FRAMES`] frames behind the CPU,
//! so a resource removed from a registry may still be referenced by a
//! submitted command buffer. Instead of destroying it on the spot, the owner
//! hands it to a [`RetirementQueue`] tagged with the slot of the most recently
//! submitted frame. When that slot's in-flight fence is next waited on, every
//! frame that could have used the resource has completed and the batch is
//! released.
//!
//! ```text
//!  submit(slot 0)  retire(R, slot 0)  submit(slot 1)  wait(slot 0) -> R released
//! ```
//!
//! [`CONCURRENTLY_RENDERED_FRAMES`]: crate::frame::CONCURRENTLY_RENDERED_FRAMES

use crate::frame::{FrameSlot, PerFrame};

/// Resources waiting for a frame fence before they can be destroyed.
#[derive(Debug)]
pub struct RetirementQueue<T> {
    pending: PerFrame<Vec<T>>,
}

impl<T> RetirementQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: PerFrame::from_fn(|_| Vec::new()),
        }
    }

    /// Queue `item` until the fence of `slot` signals again.
    pub fn retire(&mut self, slot: FrameSlot, item: T) {
        self.pending[slot].push(item);
    }

    /// Take everything that was waiting on `slot`.
    ///
    /// Call only after the in-flight fence of `slot` has been waited on.
    pub fn release(&mut self, slot: FrameSlot) -> Vec<T> {
        std::mem::take(&mut self.pending[slot])
    }

    /// Take everything regardless of slot. Only valid once the device is idle.
    pub fn drain(&mut self) -> Vec<T> {
        self.pending.iter_mut().flat_map(std::mem::take).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    pub fn pending_on(&self, slot: FrameSlot) -> usize {
        self.pending[slot].len()
    }
}

impl<T> Default for RetirementQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_only_touches_its_slot() {
        let mut queue = RetirementQueue::new();
        queue.retire(FrameSlot::FIRST, "pipeline");
        queue.retire(FrameSlot::new(1), "texture");

        assert_eq!(queue.release(FrameSlot::FIRST), vec!["pipeline"]);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.pending_on(FrameSlot::new(1)), 1);
        assert!(queue.release(FrameSlot::FIRST).is_empty());
    }

    #[test]
    fn test_drain_empties_every_slot() {
        let mut queue = RetirementQueue::new();
        for i in 0..5 {
            queue.retire(FrameSlot::new(i), i);
        }
        let mut drained = queue.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.pending_count(), 0);
    }
}
