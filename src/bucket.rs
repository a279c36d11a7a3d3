//! Per-window bucket memories.

use crate::point::ExtendedPoint;

/// One addressable memory holding the running sum of every bucket of
/// one window. Entries come into existence at the identity and are only
/// ever overwritten by pipeline writebacks (or a global clear).
///
/// The configured read latency is charged to the pipeline's stage
/// timing; reading at issue time is sound because the hazard tracker
/// guarantees no writeback targets the bucket between read and commit.
#[derive(Debug)]
pub struct BucketStore {
    entries: Vec<ExtendedPoint>,
}

impl BucketStore {
    /// `last_bucket` is the highest addressable index; index 0 exists
    /// but never materially accumulates.
    pub fn new(last_bucket: u32) -> Self {
        Self {
            entries: vec![ExtendedPoint::identity(); last_bucket as usize + 1],
        }
    }

    pub fn read(&self, bucket: u32) -> ExtendedPoint {
        self.entries[bucket as usize].clone()
    }

    pub fn write(&mut self, bucket: u32, point: ExtendedPoint) {
        self.entries[bucket as usize] = point;
    }

    pub fn clear(&mut self) {
        self.entries.fill(ExtendedPoint::identity());
    }
}
