//! The point-addition pipeline: twisted-Edwards mixed addition composed
//! from the arithmetic units as a fixed sequence of stages.
//!
//! Each stage is a deterministic function of the previous stage's output
//! with a latency taken from the stage table; an occupant issued at
//! cycle c exits at exactly c + latency, independent of the other
//! occupants. Validity travels in lock-step with the data, so a result
//! is only observable on its exit cycle.

use num_bigint::BigUint;

use crate::{
    config::Config,
    field::{Field, MulPool},
    hazard::Slot,
    point::{AffineAuxPoint, ExtendedPoint},
};

/// Identifies the bucket a pipeline occupant will write back to, and
/// the in-flight slot to release on writeback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tag {
    pub window: usize,
    pub bucket: u32,
    pub slot: Slot,
}

/// Values carried between stage boundaries for one occupant. The names
/// follow the mixed-addition formula: with D = z1 pipelined forward,
/// E = B−A, F = D−C, G = D+C, H = B+A and the sum is
/// (E·F, G·H, F·G, E·H) as (x3, y3, z3, t3).
#[derive(Clone, Debug)]
enum Data {
    Input {
        p: ExtendedPoint,
        q: AffineAuxPoint,
    },
    PreAdd {
        sum: BigUint,
        diff: BigUint,
        z: BigUint,
        t: BigUint,
        q: AffineAuxPoint,
    },
    MulCoarse {
        a: BigUint,
        b: BigUint,
        c: BigUint,
        d: BigUint,
    },
    CrossAdd {
        e: BigUint,
        f: BigUint,
        g: BigUint,
        h: BigUint,
    },
    FineReduce {
        e: BigUint,
        f: BigUint,
        g: BigUint,
        h: BigUint,
    },
    Done(ExtendedPoint),
}

#[derive(Clone, Debug)]
struct Job {
    tag: Tag,
    remaining: usize,
    next_stage: usize,
    data: Data,
}

/// The mixed-addition pipeline.
pub struct PointAdder {
    latency: usize,
    /// remaining-cycle mark at which each stage's transform fires
    boundaries: [usize; 5],
    arbitrated: bool,
    pool: MulPool,
    jobs: Vec<Job>,
}

impl PointAdder {
    pub fn new(cfg: &Config) -> Self {
        let latency = cfg.latency();
        let mut boundaries = [0usize; 5];
        // the bucket read delays entry into the first stage
        let mut elapsed = cfg.ram_latency;
        for (boundary, stage) in boundaries.iter_mut().zip(cfg.stages().iter()) {
            elapsed += stage.latency;
            *boundary = latency - elapsed;
        }
        Self {
            latency,
            boundaries,
            arbitrated: cfg.arbitrated_mul,
            pool: MulPool::new(),
            jobs: Vec::with_capacity(latency),
        }
    }

    /// Issue-to-writeback latency in cycles.
    pub const fn latency(&self) -> usize {
        self.latency
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn occupancy(&self) -> usize {
        self.jobs.len()
    }

    /// Accept one occupant. The hazard tracker guarantees the bucket
    /// value cannot change underneath it, so at most `latency` occupants
    /// are ever in flight.
    pub fn issue(&mut self, tag: Tag, p: ExtendedPoint, q: AffineAuxPoint) {
        debug_assert!(self.jobs.len() < self.latency);
        self.jobs.push(Job {
            tag,
            remaining: self.latency,
            next_stage: 0,
            data: Data::Input { p, q },
        });
    }

    /// Advance one cycle; returns the occupant exiting this cycle, if
    /// any. Exits are in issue order.
    pub fn tick(&mut self, field: &Field) -> Option<(Tag, ExtendedPoint)> {
        let mut output = None;
        let boundaries = self.boundaries;
        let arbitrated = self.arbitrated;
        let pool = &mut self.pool;
        self.jobs.retain_mut(|job| {
            job.remaining -= 1;
            if job.next_stage < 5 && job.remaining == boundaries[job.next_stage] {
                job.data = transform(field, pool, arbitrated, job.next_stage, job.data.clone());
                job.next_stage += 1;
            }
            if job.remaining == 0 {
                let Data::Done(ref point) = job.data else {
                    unreachable!()
                };
                output = Some((job.tag, point.clone()));
                false
            } else {
                true
            }
        });
        output
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

fn transform(field: &Field, pool: &mut MulPool, arbitrated: bool, stage: usize, data: Data) -> Data {
    match (stage, data) {
        (0, Data::Input { p, q }) => Data::PreAdd {
            sum: field.add(&p.y, &p.x),
            diff: field.sub(&p.y, &p.x, 1),
            z: p.z,
            t: p.t,
            q,
        },
        (1, Data::PreAdd {
            sum,
            diff,
            z,
            t,
            q,
        }) => {
            // A and B share one multiplier under arbitration; C keeps
            // its own
            let (a, b) = if arbitrated {
                pool.request(diff, q.x);
                pool.request(sum, q.y);
                let [a, b] = pool.reconstruct(|x, y| field.mul_coarse(x, y));
                (a, b)
            } else {
                (field.mul_coarse(&diff, &q.x), field.mul_coarse(&sum, &q.y))
            };
            Data::MulCoarse {
                a,
                b,
                c: field.mul_coarse(&t, &q.t),
                d: z,
            }
        }
        (2, Data::MulCoarse { a, b, c, d }) => {
            let headroom = field.coarse_bound();
            Data::CrossAdd {
                e: field.sub(&b, &a, headroom),
                f: field.sub(&d, &c, headroom),
                g: field.add(&d, &c),
                h: field.add(&b, &a),
            }
        }
        // subsequent multiplications assume fully reduced inputs
        (3, Data::CrossAdd { e, f, g, h }) => Data::FineReduce {
            e: field.fine(e),
            f: field.fine(f),
            g: field.fine(g),
            h: field.fine(h),
        },
        (4, Data::FineReduce { e, f, g, h }) => {
            let ((x, y), (t, z)) = if arbitrated {
                pool.request(e.clone(), f.clone());
                pool.request(g.clone(), h.clone());
                let [x, y] = pool.reconstruct(|a, b| field.mul_fine(a, b));
                pool.request(e, h);
                pool.request(f, g);
                let [t, z] = pool.reconstruct(|a, b| field.mul_fine(a, b));
                ((x, y), (t, z))
            } else {
                (
                    (field.mul_fine(&e, &f), field.mul_fine(&g, &h)),
                    (field.mul_fine(&e, &h), field.mul_fine(&f, &g)),
                )
            };
            Data::Done(ExtendedPoint { x, y, z, t })
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{random_te_points, seeded_rng};
    use ark_std::Zero as _;

    fn adder_and_field(arbitrated: bool) -> (PointAdder, Field) {
        let cfg = Config {
            arbitrated_mul: arbitrated,
            ..Config::default()
        };
        let field = Field::new(crate::point::modulus(), cfg.field_bits, cfg.log2_depth);
        (PointAdder::new(&cfg), field)
    }

    fn tag() -> Tag {
        Tag {
            window: 0,
            bucket: 1,
            slot: Slot::new(0),
        }
    }

    #[test]
    fn adds_like_the_reference_model() {
        for arbitrated in [false, true] {
            let (mut adder, field) = adder_and_field(arbitrated);
            let mut rng = seeded_rng(2);
            let points = random_te_points(8, &mut rng);
            for pair in points.chunks(2) {
                let p: crate::point::TEProjective = pair[0].into();
                let expected = p + pair[1];
                adder.issue(tag(), ExtendedPoint::from_te(&p), AffineAuxPoint::from(&pair[1]));
                let mut out = None;
                for _ in 0..adder.latency() {
                    out = adder.tick(&field);
                }
                let (_, sum) = out.unwrap();
                assert_eq!(sum.to_te(), expected);
            }
        }
    }

    #[test]
    fn accumulates_into_the_identity_without_a_special_case() {
        let (mut adder, field) = adder_and_field(true);
        let point = random_te_points(1, &mut seeded_rng(3)).pop().unwrap();
        adder.issue(tag(), ExtendedPoint::identity(), AffineAuxPoint::from(&point));
        let mut out = None;
        for _ in 0..adder.latency() {
            out = adder.tick(&field);
        }
        let (_, sum) = out.unwrap();
        let expected: crate::point::TEProjective = point.into();
        assert_eq!(sum.to_te(), expected);
        assert!(!sum.to_te().is_zero());
    }

    #[test]
    fn latency_is_deterministic() {
        let (mut adder, field) = adder_and_field(true);
        let point = random_te_points(1, &mut seeded_rng(4)).pop().unwrap();
        adder.issue(tag(), ExtendedPoint::identity(), AffineAuxPoint::from(&point));
        for cycle in 1..=adder.latency() {
            let out = adder.tick(&field);
            if cycle < adder.latency() {
                assert!(out.is_none(), "early output at cycle {}", cycle);
            } else {
                assert!(out.is_some(), "no output at the latency mark");
            }
        }
        assert!(adder.is_empty());
    }

    #[test]
    fn occupants_exit_in_issue_order_and_spacing() {
        let (mut adder, field) = adder_and_field(false);
        let points = random_te_points(3, &mut seeded_rng(5));
        for (i, point) in points.iter().enumerate() {
            let tag = Tag {
                window: i,
                bucket: 1,
                slot: Slot::new(i),
            };
            adder.issue(tag, ExtendedPoint::identity(), AffineAuxPoint::from(point));
            // one bubble between issues
            adder.tick(&field);
            adder.tick(&field);
        }
        let mut exits = Vec::new();
        for _ in 0..adder.latency() {
            if let Some((tag, _)) = adder.tick(&field) {
                exits.push(tag.window);
            }
        }
        assert_eq!(exits, vec![0, 1, 2]);
    }
}
