//! Generate test instances and reference results.
//!
//! Everything here is seed-deterministic and computed with arkworks
//! arithmetic, independent of the datapath model it validates.

use ark_ec::{CurveGroup as _, Group as _};
use ark_std::{UniformRand, Zero};
use num_bigint::{BigUint, RandBigInt};
use rand::prelude::StdRng;
use rand_core::SeedableRng;

use crate::{
    config::Config,
    engine::BucketResult,
    point::{preprocess_points, uint_to_fr, AffineAuxPoint, TEAffine, TEProjective},
};

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Random points on the twisted-Edwards curve.
pub fn random_te_points(size: usize, rng: &mut StdRng) -> Vec<TEAffine> {
    (0..size)
        .map(|_| TEProjective::rand(rng).into_affine())
        .collect()
}

/// Random scalars of the given width.
pub fn random_scalars(bits: usize, size: usize, rng: &mut StdRng) -> Vec<BigUint> {
    (0..size).map(|_| rng.gen_biguint(bits as u64)).collect()
}

/// A batch of preprocessed (scalar, point) pairs together with the
/// reference MSM value of the batch.
pub fn harness_pairs(
    cfg: &Config,
    size: usize,
    seed: u64,
) -> (Vec<(BigUint, AffineAuxPoint)>, TEProjective) {
    let mut rng = seeded_rng(seed);
    let points = random_te_points(size, &mut rng);
    let scalars = random_scalars(cfg.scalar_bits, size, &mut rng);

    let mut expected = TEProjective::zero();
    for (point, scalar) in points.iter().zip(&scalars) {
        expected += *point * uint_to_fr(scalar);
    }

    let pairs = scalars
        .iter()
        .cloned()
        .zip(preprocess_points(&points))
        .collect();
    (pairs, expected)
}

/// Window slice of a scalar, the bucket index it accumulates into.
pub fn window_slice(cfg: &Config, scalar: &BigUint, w: usize) -> u32 {
    use num_traits::ToPrimitive as _;
    let mask = (1u64 << cfg.window_width(w)) - 1;
    ((scalar >> (w * cfg.window_bits)) & BigUint::from(mask))
        .to_u32()
        .unwrap_or_else(|| unreachable!())
}

/// Order-independent software accumulation of every (window, bucket)
/// sum, listed in drain order.
pub fn reference_buckets(
    cfg: &Config,
    pairs: &[(BigUint, AffineAuxPoint)],
) -> Vec<(usize, u32, TEProjective)> {
    let mut sums: Vec<Vec<TEProjective>> = (0..cfg.num_windows())
        .map(|w| vec![TEProjective::zero(); cfg.last_bucket(w) as usize + 1])
        .collect();
    for (scalar, point) in pairs {
        let affine = point.to_te();
        for w in 0..cfg.num_windows() {
            let slice = window_slice(cfg, scalar, w);
            if slice != 0 {
                sums[w][slice as usize] += affine;
            }
        }
    }
    (0..cfg.num_windows())
        .flat_map(|w| (1..=cfg.last_bucket(w)).map(move |b| (w, b)))
        .map(|(w, b)| (w, b, sums[w][b as usize]))
        .collect()
}

/// Number of (window, bucket) target events a batch generates: one per
/// nonzero window slice. The engine must issue exactly this many
/// pipeline updates, none dropped, none duplicated.
pub fn count_window_updates(cfg: &Config, pairs: &[(BigUint, AffineAuxPoint)]) -> u64 {
    pairs
        .iter()
        .map(|(scalar, _)| {
            (0..cfg.num_windows())
                .filter(|&w| window_slice(cfg, scalar, w) != 0)
                .count() as u64
        })
        .sum()
}

fn shl_assign(point: &mut TEProjective, count: usize) {
    (0..count).for_each(|_| {
        point.double_in_place();
    })
}

/// Host-side cross-window reduction of the drained results: weighted
/// bucket sums per window via the descending running-sum trick, then
/// window combination by repeated doubling.
pub fn combine(cfg: &Config, results: &[BucketResult]) -> TEProjective {
    let mut windows: Vec<Vec<TEProjective>> = (0..cfg.num_windows())
        .map(|w| vec![TEProjective::zero(); cfg.last_bucket(w) as usize + 1])
        .collect();
    for result in results {
        windows[result.window][result.bucket as usize] = result.point.to_te();
    }

    let mut total = TEProjective::zero();
    for w in (0..cfg.num_windows()).rev() {
        if w + 1 != cfg.num_windows() {
            shl_assign(&mut total, cfg.window_bits);
        }
        // sum of b * bucket_b without multiplications
        let mut running = TEProjective::zero();
        let mut sum = TEProjective::zero();
        for b in (1..=cfg.last_bucket(w)).rev() {
            running += windows[w][b as usize];
            sum += running;
        }
        total += sum;
    }
    total
}
