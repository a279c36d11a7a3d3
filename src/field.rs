//! Modular arithmetic units of the datapath.
//!
//! Values are plain unsigned words of the configured width. Reduction is
//! two-phase: a cheap table fold bounds a wide product to a small
//! multiple of the modulus (coarse), and a conditional-subtract chain
//! fully reduces at observable boundaries (fine). Latencies live in the
//! stage table, not here; every operation is a pure function of its
//! inputs.

use num_bigint::BigUint;
use num_traits::ToPrimitive;

/// Field context: the modulus, the datapath width, and the coarse
/// reduction table derived from the modulus.
#[derive(Clone, Debug)]
pub struct Field {
    modulus: BigUint,
    bits: usize,
    coarse: ReductionTable,
}

impl Field {
    /// `bits` must exceed the modulus length; enforced by configuration
    /// validation before a `Field` is built.
    pub fn new(modulus: BigUint, bits: usize, log2_depth: usize) -> Self {
        debug_assert!(bits as u64 > modulus.bits());
        // products of coarse operands reach twice the datapath width
        let coarse = ReductionTable::new(&modulus, 2 * bits + 2, log2_depth);
        Self {
            modulus,
            bits,
            coarse,
        }
    }

    pub const fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub const fn bits(&self) -> usize {
        self.bits
    }

    /// Plain widening sum; the result may exceed the modulus.
    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        a + b
    }

    /// `a + headroom·p − b`, the could-be-negative mode of the
    /// subtractor. `headroom` must cover the coarse bound of `b`.
    pub fn sub(&self, a: &BigUint, b: &BigUint, headroom: u32) -> BigUint {
        let padded = a + &self.modulus * headroom;
        debug_assert!(padded >= *b);
        padded - b
    }

    /// Full product folded through the reduction table; the result lies
    /// within [`Field::coarse_bound`] multiples of the modulus.
    pub fn mul_coarse(&self, a: &BigUint, b: &BigUint) -> BigUint {
        debug_assert!(a.bits() <= self.bits as u64 + 1);
        debug_assert!(b.bits() <= self.bits as u64 + 1);
        self.coarse.fold(a * b)
    }

    /// Fully reduced product.
    pub fn mul_fine(&self, a: &BigUint, b: &BigUint) -> BigUint {
        self.fine(self.mul_coarse(a, b))
    }

    /// Shifted conditional-subtract chain; exact reduction below the
    /// modulus for any input width.
    pub fn fine(&self, mut value: BigUint) -> BigUint {
        let shifts = value.bits().saturating_sub(self.modulus.bits()) as usize;
        for shift in (0..=shifts).rev() {
            let multiple = &self.modulus << shift;
            if value >= multiple {
                value -= multiple;
            }
        }
        value
    }

    /// Bound on coarse values, in multiples of the modulus.
    pub fn coarse_bound(&self) -> u32 {
        self.coarse.bound()
    }
}

/// Chunked reduction table derived from the modulus: for every chunk
/// position above the modulus width, `tables[pos][chunk]` holds
/// `(chunk << shift) mod p`. Folding a wide value sums one lookup per
/// position plus the low passthrough, so the result is bounded by
/// `positions + 2` multiples of the modulus.
#[derive(Clone, Debug)]
struct ReductionTable {
    base_bits: usize,
    chunk_bits: usize,
    tables: Vec<Vec<BigUint>>,
}

impl ReductionTable {
    fn new(modulus: &BigUint, max_bits: usize, log2_depth: usize) -> Self {
        let base_bits = modulus.bits() as usize;
        let chunk_bits = log2_depth;
        let positions = (max_bits - base_bits + chunk_bits - 1) / chunk_bits;
        let tables = (0..positions)
            .map(|pos| {
                let shift = base_bits + pos * chunk_bits;
                (0..1usize << chunk_bits)
                    .map(|chunk| (BigUint::from(chunk) << shift) % modulus)
                    .collect()
            })
            .collect();
        Self {
            base_bits,
            chunk_bits,
            tables,
        }
    }

    fn fold(&self, value: BigUint) -> BigUint {
        let low_mask = (BigUint::from(1u8) << self.base_bits) - 1u8;
        let chunk_mask = (1u64 << self.chunk_bits) - 1;
        let high = &value >> self.base_bits;
        debug_assert!(high.bits() as usize <= self.tables.len() * self.chunk_bits);
        let mut acc = value & low_mask;
        for (pos, table) in self.tables.iter().enumerate() {
            let chunk = ((&high >> (pos * self.chunk_bits)) & BigUint::from(chunk_mask))
                .to_usize()
                .unwrap_or_else(|| unreachable!());
            acc += &table[chunk];
        }
        acc
    }

    fn bound(&self) -> u32 {
        self.tables.len() as u32 + 2
    }
}

/// Depth-2 request queue feeding one shared multiplier.
///
/// Two multiplies accepted in the same cycle are serialized through the
/// single unit at double rate and reconstructed in request order; the
/// stage table charges both one extra stage of latency. A throughput
/// and area trade-off, never a correctness one.
#[derive(Debug, Default)]
pub struct MulPool {
    pending: [Option<(BigUint, BigUint)>; 2],
    len: usize,
}

impl MulPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one operand pair; at most two before reconstruction.
    pub fn request(&mut self, a: BigUint, b: BigUint) {
        debug_assert!(self.len < 2);
        self.pending[self.len] = Some((a, b));
        self.len += 1;
    }

    /// Drain both requests through the shared unit; outputs come back
    /// in request order.
    pub fn reconstruct(&mut self, mut unit: impl FnMut(&BigUint, &BigUint) -> BigUint) -> [BigUint; 2] {
        debug_assert_eq!(self.len, 2);
        let (a0, b0) = self.pending[0].take().unwrap_or_else(|| unreachable!());
        let (a1, b1) = self.pending[1].take().unwrap_or_else(|| unreachable!());
        self.len = 0;
        [unit(&a0, &b0), unit(&a1, &b1)]
    }
}
