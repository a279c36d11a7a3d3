//! Hazard tracking: the in-flight record set and the per-window stall
//! queues.
//!
//! The correctness contract of the whole core lives here: at most one
//! update may be in flight per (window, bucket) pair at any time. A
//! second update to a busy bucket would read the pre-writeback value
//! and silently lose the first, so it is diverted into the window's
//! stall queue and replayed once the bucket frees up. Queue order is
//! FIFO; accumulation commutes, so FIFO only bounds latency and
//! prevents starvation.

use std::collections::VecDeque;

use crate::{point::AffineAuxPoint, Error};

/// Handle into the in-flight record set, tagged onto a pipeline
/// occupant at issue and redeemed at writeback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot(usize);

impl Slot {
    #[cfg(test)]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }
}

/// Fixed-capacity associative set of the (window, bucket) updates
/// currently inside the pipeline. Capacity equals the pipeline depth,
/// which bounds the number of simultaneous occupants by construction.
#[derive(Debug)]
pub struct InFlight {
    slots: Vec<Option<(usize, u32)>>,
    live: usize,
}

impl InFlight {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            live: 0,
        }
    }

    /// An update targeting this bucket is inside the pipeline.
    pub fn conflicts(&self, window: usize, bucket: u32) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|&(w, b)| w == window && b == bucket)
    }

    /// Record an update at issue. The caller must have checked
    /// [`InFlight::conflicts`] first.
    pub fn reserve(&mut self, window: usize, bucket: u32) -> Slot {
        debug_assert!(!self.conflicts(window, bucket));
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| unreachable!());
        self.slots[index] = Some((window, bucket));
        self.live += 1;
        Slot(index)
    }

    /// Clear the record at writeback.
    pub fn release(&mut self, slot: Slot) {
        debug_assert!(self.slots[slot.0].is_some());
        self.slots[slot.0] = None;
        self.live -= 1;
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.live = 0;
    }
}

/// Entry deferred because its target bucket had an update in flight.
#[derive(Clone, Debug)]
pub struct Stalled {
    pub bucket: u32,
    pub point: AffineAuxPoint,
}

/// Bounded FIFO of deferred updates for one window.
#[derive(Debug)]
pub struct StallQueue {
    window: usize,
    depth: usize,
    entries: VecDeque<Stalled>,
}

impl StallQueue {
    /// `depth` must be at least the pipeline latency; enforced by
    /// configuration validation.
    pub fn new(window: usize, depth: usize) -> Self {
        Self {
            window,
            depth,
            entries: VecDeque::with_capacity(depth),
        }
    }

    /// Defer an update; a full queue is reported, never dropped from.
    pub fn push(&mut self, entry: Stalled) -> Result<(), Error> {
        if self.entries.len() == self.depth {
            return Err(Error::QueueOverflow {
                window: self.window,
            });
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Oldest deferred entry; only the head may be replayed.
    pub fn head(&self) -> Option<&Stalled> {
        self.entries.front()
    }

    pub fn pop(&mut self) -> Option<Stalled> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// All windows have empty stall queues; gates completion detection.
pub fn all_empty(queues: &[StallQueue]) -> bool {
    queues.iter().all(StallQueue::is_empty)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::point::ExtendedPoint;

    fn entry(bucket: u32) -> Stalled {
        let identity = ExtendedPoint::identity();
        Stalled {
            bucket,
            point: AffineAuxPoint {
                x: identity.x.clone(),
                y: identity.y.clone(),
                t: identity.t,
            },
        }
    }

    #[test]
    fn conflicts_track_reserve_and_release() {
        let mut inflight = InFlight::new(4);
        assert!(!inflight.conflicts(0, 3));
        let slot = inflight.reserve(0, 3);
        assert!(inflight.conflicts(0, 3));
        // same bucket index in another window is independent
        assert!(!inflight.conflicts(1, 3));
        inflight.release(slot);
        assert!(!inflight.conflicts(0, 3));
        assert!(inflight.is_empty());
    }

    #[test]
    fn slots_recycle_up_to_capacity() {
        let mut inflight = InFlight::new(2);
        let first = inflight.reserve(0, 1);
        let _second = inflight.reserve(0, 2);
        assert_eq!(inflight.len(), 2);
        inflight.release(first);
        let third = inflight.reserve(0, 3);
        assert_eq!(third, Slot::new(0));
    }

    #[test]
    fn queue_is_fifo_and_reports_overflow() {
        let mut queue = StallQueue::new(2, 3);
        for bucket in 1..=3 {
            queue.push(entry(bucket)).unwrap();
        }
        assert!(queue.is_full());
        assert!(matches!(
            queue.push(entry(4)),
            Err(Error::QueueOverflow { window: 2 })
        ));
        // nothing was dropped
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.head().unwrap().bucket, 1);
        assert_eq!(queue.pop().unwrap().bucket, 1);
        assert_eq!(queue.pop().unwrap().bucket, 2);
        assert_eq!(queue.pop().unwrap().bucket, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn aggregate_status() {
        let mut queues = vec![StallQueue::new(0, 4), StallQueue::new(1, 4)];
        assert!(all_empty(&queues));
        queues[1].push(entry(1)).unwrap();
        assert!(!all_empty(&queues));
    }
}
