//! The accumulation engine: the controller, bucket stores and hazard
//! tracking wired around the point-addition pipeline, with the stream
//! boundary on both ends.
//!
//! Everything advances in lock-step under [`Engine::tick`]; there is no
//! other source of progress. Per cycle: the pipeline writeback commits
//! and releases its in-flight record, at most one ingress beat is
//! absorbed, and one controller round runs for the cursor window:
//! replaying that window's stall-queue head when its bucket is free,
//! otherwise dispatching the active pair's slice for that window.
//! Completion (input consumed, queues empty, pipeline drained) flips
//! the engine into the drain phase, which streams every (window,
//! bucket) sum out through the egress boundary, window-major with
//! buckets ascending from 1.

use std::collections::VecDeque;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use stream::{Beat, Handshake, Packer, Unpacker};

use crate::{
    adder::{PointAdder, Tag},
    bucket::BucketStore,
    config::{Config, ConfigError},
    field::Field,
    hazard::{self, InFlight, StallQueue, Stalled},
    point::{modulus, AffineAuxPoint, ExtendedPoint},
    Error,
};

/// Depth of the assembled-pair FIFO behind the ingress unpacker; while
/// it is full the ingress handshake withholds readiness.
const FRESH_DEPTH: usize = 4;

/// One drained accumulation result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BucketResult {
    pub window: usize,
    pub bucket: u32,
    pub point: ExtendedPoint,
}

/// Counters exposed for diagnosis; cleared by the global reset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub cycles: u64,
    pub pairs_accepted: u64,
    pub updates_issued: u64,
    pub replays: u64,
    pub conflicts_queued: u64,
    pub zero_slices: u64,
    pub stall_cycles: u64,
    pub peak_queue_depth: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Accumulate,
    Drain,
    Done,
}

/// A pair whose window slices are being dispatched; `slices[w]` is
/// taken once window w's update has been issued, queued or skipped.
#[derive(Debug)]
struct ActivePair {
    slices: Vec<Option<u32>>,
    point: AffineAuxPoint,
}

pub struct Engine {
    cfg: Config,
    field: Field,
    adder: PointAdder,
    buckets: Vec<BucketStore>,
    inflight: InFlight,
    queues: Vec<StallQueue>,

    ingress: Handshake<Beat>,
    unpacker: Unpacker,
    fresh: VecDeque<ActivePair>,
    active: Option<ActivePair>,
    ingress_done: bool,

    cursor: usize,
    phase: Phase,
    drain_next: (usize, u32),
    packer: Packer,
    egress_pending: VecDeque<Beat>,
    egress: Handshake<Beat>,

    stats: Stats,
}

impl Engine {
    pub fn new(cfg: Config) -> Result<Self, ConfigError> {
        let modulus = modulus();
        cfg.validate(modulus.bits() as usize)?;
        let field = Field::new(modulus, cfg.field_bits, cfg.log2_depth);
        let adder = PointAdder::new(&cfg);
        let windows = cfg.num_windows();
        Ok(Self {
            buckets: (0..windows)
                .map(|w| BucketStore::new(cfg.last_bucket(w)))
                .collect(),
            inflight: InFlight::new(cfg.latency()),
            queues: (0..windows)
                .map(|w| StallQueue::new(w, cfg.stall_queue_depth()))
                .collect(),
            ingress: Handshake::new(),
            unpacker: Unpacker::new(cfg.beat_bits, cfg.pair_bits()),
            fresh: VecDeque::with_capacity(FRESH_DEPTH),
            active: None,
            ingress_done: false,
            cursor: 0,
            phase: Phase::Accumulate,
            drain_next: (0, 1),
            packer: Packer::new(cfg.beat_bits),
            egress_pending: VecDeque::new(),
            egress: Handshake::new(),
            stats: Stats::default(),
            field,
            adder,
            cfg,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.cfg
    }

    pub const fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done && self.egress_pending.is_empty() && !self.egress.valid()
    }

    /// Producer side of the ingress boundary.
    pub fn ingress_mut(&mut self) -> &mut Handshake<Beat> {
        &mut self.ingress
    }

    /// Consumer side of the egress boundary.
    pub fn egress_mut(&mut self) -> &mut Handshake<Beat> {
        &mut self.egress
    }

    /// Advance one clock cycle.
    pub fn tick(&mut self) -> Result<(), Error> {
        self.stats.cycles += 1;

        // writeback commits before this cycle's issue, so a freed
        // bucket is immediately reusable
        if let Some((tag, point)) = self.adder.tick(&self.field) {
            self.buckets[tag.window].write(tag.bucket, point);
            self.inflight.release(tag.slot);
        }

        self.intake();

        match self.phase {
            Phase::Accumulate => {
                self.controller_round()?;
                self.check_complete();
            }
            Phase::Drain => self.drain_round()?,
            Phase::Done => {}
        }

        if self.egress.ready() {
            if let Some(beat) = self.egress_pending.pop_front() {
                let offered = self.egress.offer(beat);
                debug_assert!(offered.is_ok());
            }
        }
        Ok(())
    }

    /// Synchronous global reset: discards all in-flight, queued, stored
    /// and stream state. Idempotent.
    pub fn clear(&mut self) {
        self.adder.clear();
        self.buckets.iter_mut().for_each(BucketStore::clear);
        self.inflight.clear();
        self.queues.iter_mut().for_each(StallQueue::clear);
        self.ingress.clear();
        self.unpacker.clear();
        self.fresh.clear();
        self.active = None;
        self.ingress_done = false;
        self.cursor = 0;
        self.phase = Phase::Accumulate;
        self.drain_next = (0, 1);
        self.egress_pending.clear();
        self.egress.clear();
        self.stats = Stats::default();
    }

    /// Absorb at most one ingress beat; readiness is withheld while the
    /// assembled-pair FIFO is full, which backpressures the producer.
    fn intake(&mut self) {
        if self.fresh.len() >= FRESH_DEPTH {
            return;
        }
        if let Some(beat) = self.ingress.take() {
            let last = beat.last;
            if let Some(word) = self.unpacker.push(&beat) {
                let pair = self.split(word);
                self.fresh.push_back(pair);
                self.stats.pairs_accepted += 1;
            }
            if last {
                self.ingress_done = true;
            }
        }
    }

    /// Split a deserialized ingress word into window slices and the
    /// auxiliary point.
    fn split(&self, word: BigUint) -> ActivePair {
        let field_bits = self.cfg.field_bits;
        let field_mask = mask(field_bits);
        let scalar = &word & mask(self.cfg.scalar_bits);
        let coord = |index: usize| {
            (&word >> (self.cfg.scalar_bits + index * field_bits)) & &field_mask
        };
        let slices = (0..self.cfg.num_windows())
            .map(|w| {
                let slice = (&scalar >> (w * self.cfg.window_bits))
                    & mask(self.cfg.window_width(w));
                Some(slice.to_u32().unwrap_or_else(|| unreachable!()))
            })
            .collect();
        ActivePair {
            slices,
            point: AffineAuxPoint {
                x: coord(0),
                y: coord(1),
                t: coord(2),
            },
        }
    }

    /// One controller round for the cursor window: replay beats fresh.
    fn controller_round(&mut self) -> Result<(), Error> {
        let w = self.cursor;
        self.cursor = (self.cursor + 1) % self.cfg.num_windows();

        if let Some(head) = self.queues[w].head() {
            if !self.inflight.conflicts(w, head.bucket) {
                let entry = self.queues[w].pop().unwrap_or_else(|| unreachable!());
                self.issue(w, entry.bucket, entry.point);
                self.stats.replays += 1;
                return Ok(());
            }
        }

        if self.active.is_none() {
            self.active = self.fresh.pop_front();
        }
        let (slice, point) = match &self.active {
            None => return Ok(()),
            Some(pair) => match pair.slices[w] {
                None => return Ok(()),
                Some(slice) => (slice, pair.point.clone()),
            },
        };

        if slice == 0 {
            self.stats.zero_slices += 1;
            self.clear_slice(w);
            return Ok(());
        }
        if self.inflight.conflicts(w, slice) {
            if self.queues[w].is_full() {
                // hold the candidate; the fault is a sizing problem and
                // the backpressure response is to retry, not to drop
                self.stats.stall_cycles += 1;
                return Ok(());
            }
            self.queues[w].push(Stalled {
                bucket: slice,
                point,
            })?;
            self.stats.conflicts_queued += 1;
            self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(self.queues[w].len());
            self.clear_slice(w);
            return Ok(());
        }
        self.issue(w, slice, point);
        self.clear_slice(w);
        Ok(())
    }

    fn clear_slice(&mut self, w: usize) {
        if let Some(pair) = self.active.as_mut() {
            pair.slices[w] = None;
            if pair.slices.iter().all(Option::is_none) {
                self.active = None;
            }
        }
    }

    fn issue(&mut self, window: usize, bucket: u32, point: AffineAuxPoint) {
        let slot = self.inflight.reserve(window, bucket);
        let current = self.buckets[window].read(bucket);
        self.adder.issue(
            Tag {
                window,
                bucket,
                slot,
            },
            current,
            point,
        );
        self.stats.updates_issued += 1;
    }

    /// Global completion: all fresh input consumed, every stall queue
    /// empty and the pipeline drained. Only then may buckets be read
    /// out; an earlier drain could race an in-flight writeback.
    fn check_complete(&mut self) {
        if self.ingress_done
            && !self.unpacker.in_progress()
            && self.fresh.is_empty()
            && self.active.is_none()
            && hazard::all_empty(&self.queues)
            && self.inflight.is_empty()
            && self.adder.is_empty()
        {
            self.phase = Phase::Drain;
            self.drain_next = (0, 1);
        }
    }

    /// Emit one (window, bucket) result per round, held back while the
    /// egress boundary still carries the previous one.
    fn drain_round(&mut self) -> Result<(), Error> {
        if !self.egress_pending.is_empty() {
            return Ok(());
        }
        let (w, b) = self.drain_next;
        let point = self.buckets[w].read(b);
        let field_bits = self.cfg.field_bits;
        let word = &point.x
            | (&point.y << field_bits)
            | (&point.z << (2 * field_bits))
            | (&point.t << (3 * field_bits));
        let is_last = w + 1 == self.cfg.num_windows() && b == self.cfg.last_bucket(w);
        self.egress_pending
            .extend(self.packer.pack(&word, self.cfg.result_bits(), is_last)?);
        if is_last {
            self.phase = Phase::Done;
        } else if b == self.cfg.last_bucket(w) {
            self.drain_next = (w + 1, 1);
        } else {
            self.drain_next = (w, b + 1);
        }
        Ok(())
    }

    /// Stream a whole batch through ingress, tick to completion and
    /// reassemble the drained results. Host-side convenience over the
    /// cycle-accurate surface (`tick` plus the two handshakes); an
    /// empty batch drains nothing.
    pub fn accumulate(
        &mut self,
        pairs: &[(BigUint, AffineAuxPoint)],
    ) -> Result<Vec<BucketResult>, Error> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut feed = VecDeque::new();
        for (index, (scalar, point)) in pairs.iter().enumerate() {
            let field_bits = self.cfg.field_bits;
            let base = self.cfg.scalar_bits;
            let word = scalar
                | (&point.x << base)
                | (&point.y << (base + field_bits))
                | (&point.t << (base + 2 * field_bits));
            feed.extend(self.packer.pack(
                &word,
                self.cfg.pair_bits(),
                index + 1 == pairs.len(),
            )?);
        }

        let windows = self.cfg.num_windows();
        let latency = self.cfg.latency();
        let budget = 4 * (feed.len() as u64
            + pairs.len() as u64 * (windows + latency) as u64
            + self.cfg.num_results() as u64
                * (self.packer.beats(self.cfg.result_bits()) + 2) as u64
            + latency as u64
            + 64);

        let mut results = Vec::with_capacity(self.cfg.num_results());
        let mut unpacker = Unpacker::new(self.cfg.beat_bits, self.cfg.result_bits());
        let mut order = (0..windows)
            .flat_map(|w| (1..=self.cfg.last_bucket(w)).map(move |b| (w, b)))
            .collect::<VecDeque<_>>();

        for _ in 0..budget {
            if self.ingress.ready() {
                if let Some(beat) = feed.pop_front() {
                    let offered = self.ingress.offer(beat);
                    debug_assert!(offered.is_ok());
                }
            }
            self.tick()?;
            if let Some(beat) = self.egress.take() {
                if let Some(word) = unpacker.push(&beat) {
                    let (window, bucket) = order.pop_front().unwrap_or_else(|| unreachable!());
                    results.push(BucketResult {
                        window,
                        bucket,
                        point: unsplit(&self.cfg, word),
                    });
                }
            }
            if self.is_done() && results.len() == self.cfg.num_results() {
                return Ok(results);
            }
        }
        Err(Error::Stalled {
            cycle: self.stats.cycles,
        })
    }
}

fn mask(bits: usize) -> BigUint {
    (BigUint::from(1u8) << bits) - 1u8
}

fn unsplit(cfg: &Config, word: BigUint) -> ExtendedPoint {
    let field_mask = mask(cfg.field_bits);
    let coord = |index: usize| (&word >> (index * cfg.field_bits)) & &field_mask;
    ExtendedPoint {
        x: coord(0),
        y: coord(1),
        z: coord(2),
        t: coord(3),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{
        combine, count_window_updates, harness_pairs, reference_buckets, seeded_rng,
        random_te_points,
    };
    use ark_std::Zero as _;

    fn small_config(scalar_bits: usize) -> Config {
        Config {
            scalar_bits,
            window_bits: 3,
            ..Config::default()
        }
    }

    #[test]
    fn accumulates_a_batch_and_matches_the_reference() {
        let cfg = small_config(12);
        let mut engine = Engine::new(cfg.clone()).unwrap();
        let (pairs, expected) = harness_pairs(&cfg, 8, 0);
        let results = engine.accumulate(&pairs).unwrap();
        assert_eq!(results.len(), 28);

        // no stale reads: every bucket equals the order-independent
        // software accumulation
        let reference = reference_buckets(&cfg, &pairs);
        for (result, (window, bucket, point)) in results.iter().zip(reference.iter()) {
            assert_eq!(result.window, *window);
            assert_eq!(result.bucket, *bucket);
            assert_eq!(
                result.point.to_te(),
                *point,
                "window {} bucket {}",
                window,
                bucket
            );
        }

        // end-to-end: the combined result is the MSM of the batch
        assert_eq!(combine(&cfg, &results), expected);

        // conservation: one pipeline issue per nonzero window slice
        let stats = engine.stats();
        assert_eq!(stats.pairs_accepted, 8);
        assert_eq!(stats.updates_issued, count_window_updates(&cfg, &pairs));
    }

    #[test]
    fn consecutive_batches_with_clear_between() {
        let cfg = small_config(13);
        let mut engine = Engine::new(cfg.clone()).unwrap();
        for seed in 0..3 {
            let (pairs, expected) = harness_pairs(&cfg, 8, seed);
            let results = engine.accumulate(&pairs).unwrap();
            assert_eq!(results.len(), 36);
            assert_eq!(combine(&cfg, &results), expected, "batch seed {}", seed);
            engine.clear();
        }
    }

    #[test]
    fn unarbitrated_configuration_agrees() {
        let cfg = Config {
            arbitrated_mul: false,
            ram_latency: 1,
            ..small_config(12)
        };
        let mut engine = Engine::new(cfg.clone()).unwrap();
        let (pairs, expected) = harness_pairs(&cfg, 8, 11);
        let results = engine.accumulate(&pairs).unwrap();
        assert_eq!(combine(&cfg, &results), expected);
    }

    #[test]
    fn conflicting_updates_are_queued_and_replayed() {
        let cfg = small_config(12);
        let mut engine = Engine::new(cfg.clone()).unwrap();
        // every pair lands in the same buckets of every window
        let point = random_te_points(1, &mut seeded_rng(6)).pop().unwrap();
        let scalar = BigUint::from(0b101_101_101_101u16);
        let pairs: Vec<_> = (0..6)
            .map(|_| (scalar.clone(), AffineAuxPoint::from(&point)))
            .collect();
        let results = engine.accumulate(&pairs).unwrap();

        let stats = engine.stats();
        assert!(stats.conflicts_queued > 0, "no hazards were exercised");
        assert_eq!(stats.replays, stats.conflicts_queued);
        assert_eq!(stats.updates_issued, count_window_updates(&cfg, &pairs));
        assert_eq!(combine(&cfg, &results), reference_msm(&pairs));
    }

    fn reference_msm(
        pairs: &[(BigUint, AffineAuxPoint)],
    ) -> crate::point::TEProjective {
        let mut total = crate::point::TEProjective::zero();
        for (scalar, point) in pairs {
            total += point.to_te() * crate::point::uint_to_fr(scalar);
        }
        total
    }

    #[test]
    fn reset_is_idempotent_and_isolates_batches() {
        let cfg = small_config(12);
        let mut engine = Engine::new(cfg.clone()).unwrap();
        let (pairs, _) = harness_pairs(&cfg, 8, 3);

        // interrupt a batch mid-flight, then clear twice
        for (index, (scalar, point)) in pairs.iter().enumerate().take(4) {
            let base = cfg.scalar_bits;
            let word = scalar
                | (&point.x << base)
                | (&point.y << (base + cfg.field_bits))
                | (&point.t << (base + 2 * cfg.field_bits));
            for beat in engine.packer.pack(&word, cfg.pair_bits(), index == 3).unwrap() {
                while !engine.ingress.ready() {
                    engine.tick().unwrap();
                }
                engine.ingress_mut().offer(beat).unwrap_or_else(|_| unreachable!());
                engine.tick().unwrap();
            }
        }
        engine.clear();
        engine.clear();
        assert_eq!(engine.stats(), Stats::default());

        // the interrupted run leaves no residue in the next batch
        let (pairs, expected) = harness_pairs(&cfg, 8, 4);
        let results = engine.accumulate(&pairs).unwrap();
        assert_eq!(combine(&cfg, &results), expected);
    }

    #[test]
    fn egress_holds_results_under_backpressure() {
        let cfg = small_config(12);
        let mut engine = Engine::new(cfg.clone()).unwrap();
        let (pairs, _) = harness_pairs(&cfg, 2, 5);

        let mut feed = VecDeque::new();
        for (index, (scalar, point)) in pairs.iter().enumerate() {
            let base = cfg.scalar_bits;
            let word = scalar
                | (&point.x << base)
                | (&point.y << (base + cfg.field_bits))
                | (&point.t << (base + 2 * cfg.field_bits));
            feed.extend(
                engine
                    .packer
                    .pack(&word, cfg.pair_bits(), index + 1 == pairs.len())
                    .unwrap(),
            );
        }

        // never assert readiness on egress: the engine must park the
        // first beat and hold it unchanged
        for _ in 0..4096 {
            if engine.ingress.ready() {
                if let Some(beat) = feed.pop_front() {
                    engine.ingress_mut().offer(beat).unwrap_or_else(|_| unreachable!());
                }
            }
            engine.tick().unwrap();
        }
        let held = engine.egress.peek().cloned().unwrap();
        for _ in 0..64 {
            engine.tick().unwrap();
            assert_eq!(engine.egress.peek(), Some(&held));
        }
        assert!(!engine.is_done());
    }
}
