//! Cycle-level model of a pipelined bucket-accumulation engine for
//! multi-scalar multiplication over the twisted-Edwards form of the
//! BLS12-377 G1 curve.
//!
//! Pippenger's method slices every scalar into fixed-width windows and
//! routes each point into one of the window's buckets. The part modelled
//! here is the streaming accumulator: a deep modular-arithmetic pipeline
//! performs read-modify-write addition into per-window bucket memories,
//! and a hazard tracker defers any update whose target bucket already
//! has one in flight into a per-window stall queue, replaying it once
//! the earlier writeback commits.
//!
//! Steps:
//! - preprocess points into the affine auxiliary form
//! - stream (scalar, point) pairs through the ingress boundary
//! - tick the engine; drain per-(window, bucket) sums on completion
//! - combine the drained sums host-side into the final MSM result
//!
//! Every output is validated against arkworks reference arithmetic in
//! the test harness; the engine itself never touches the reference path.

pub mod adder;
pub mod bucket;
pub mod config;
pub mod engine;
pub mod field;
pub mod hazard;
pub mod point;
pub mod testing;

pub use config::{Config, ConfigError};
pub use engine::{BucketResult, Engine, Stats};
pub use point::{AffineAuxPoint, ExtendedPoint};

/// Runtime faults of the engine. Configuration faults are
/// [`ConfigError`] values and surface before an engine exists.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A conflicting update had to be queued but the window's stall
    /// queue was full. Nothing is dropped; the candidate stays pending
    /// and the surrounding system is expected to back off.
    #[error("stall queue of window {window} overflowed")]
    QueueOverflow { window: usize },

    /// The blocking driver exceeded its cycle budget without reaching
    /// completion.
    #[error("engine made no progress by cycle {cycle}")]
    Stalled { cycle: u64 },

    #[error(transparent)]
    Stream(#[from] stream::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
