//! Twisted-Edwards point representations of the datapath, point
//! preprocessing, and conversions to the arkworks reference curve.

use ark_bls12_377::{g1::Parameters, Fq, Fr};
use ark_ec::models::twisted_edwards::{Affine, Projective, TECurveConfig as _};
use ark_ff::{BigInteger, MontFp, PrimeField};
use ark_std::Zero as _;
use num_bigint::BigUint;

/// Twisted-Edwards form of BLS12-377 G1, the reference model types.
pub type TEAffine = Affine<Parameters>;
pub type TEProjective = Projective<Parameters>;

/// 1/2 in Fq.
const FQ_HALF: Fq = MontFp!("129332213006484547005326366847446766768196756377457330269942131333360234174170411387484444069786680062220160729089");

pub fn fq_to_uint(value: &Fq) -> BigUint {
    BigUint::from_bytes_le(&value.into_bigint().to_bytes_le())
}

pub fn uint_to_fq(value: &BigUint) -> Fq {
    Fq::from_le_bytes_mod_order(&value.to_bytes_le())
}

pub fn uint_to_fr(value: &BigUint) -> Fr {
    Fr::from_le_bytes_mod_order(&value.to_bytes_le())
}

/// The base field modulus.
pub fn modulus() -> BigUint {
    BigUint::from_bytes_le(&<Fq as PrimeField>::MODULUS.to_bytes_le())
}

/// Extended twisted-Edwards coordinates of a running bucket sum;
/// well-formed values satisfy `x·y ≡ z·t (mod p)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendedPoint {
    pub x: BigUint,
    pub y: BigUint,
    pub z: BigUint,
    pub t: BigUint,
}

impl ExtendedPoint {
    /// Canonical representation of the identity.
    pub fn identity() -> Self {
        Self {
            x: BigUint::zero(),
            y: BigUint::from(1u8),
            z: BigUint::from(1u8),
            t: BigUint::zero(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.x.is_zero() && self.y == self.z
    }

    pub fn to_te(&self) -> TEProjective {
        let mut point = TEProjective::zero();
        point.x = uint_to_fq(&self.x);
        point.y = uint_to_fq(&self.y);
        point.z = uint_to_fq(&self.z);
        point.t = uint_to_fq(&self.t);
        point
    }

    pub fn from_te(point: &TEProjective) -> Self {
        Self {
            x: fq_to_uint(&point.x),
            y: fq_to_uint(&point.y),
            z: fq_to_uint(&point.z),
            t: fq_to_uint(&point.t),
        }
    }
}

/// Preprocessed affine operand of mixed addition.
///
/// Stores `(y−x)/2`, `(y+x)/2` and `d·x·y`, folding the curve constant
/// and the doubling of z into the point itself so the pipeline formula
/// needs no constant multiplier and no identity special case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AffineAuxPoint {
    pub x: BigUint,
    pub y: BigUint,
    pub t: BigUint,
}

impl AffineAuxPoint {
    pub fn preprocess(point: &TEAffine) -> Self {
        let x = (point.y - point.x) * FQ_HALF;
        let y = (point.y + point.x) * FQ_HALF;
        let t = Parameters::COEFF_D * point.x * point.y;
        Self {
            x: fq_to_uint(&x),
            y: fq_to_uint(&y),
            t: fq_to_uint(&t),
        }
    }

    /// Recover the affine point; inverse of the preprocessing.
    pub fn to_te(&self) -> TEAffine {
        let x = uint_to_fq(&self.y) - uint_to_fq(&self.x);
        let y = uint_to_fq(&self.y) + uint_to_fq(&self.x);
        TEAffine::new(x, y)
    }
}

impl From<&TEAffine> for AffineAuxPoint {
    fn from(point: &TEAffine) -> Self {
        Self::preprocess(point)
    }
}

/// Preprocess a whole batch of affine points.
pub fn preprocess_points(points: &[TEAffine]) -> Vec<AffineAuxPoint> {
    points.iter().map(AffineAuxPoint::preprocess).collect()
}
