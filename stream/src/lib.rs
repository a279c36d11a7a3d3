//! # torrent-stream
//!
//! Beat-level streaming primitives: a one-slot valid/ready handshake
//! register, plus packing and unpacking of values wider than one
//! transfer across multiple sequential beats.

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("value of {width} bits does not fit {beats} beats of {beat_bits} bits")]
    WidthOverflow {
        width: u64,
        beats: usize,
        beat_bits: usize,
    },
}

pub type Result<T> = core::result::Result<T, Error>;

/// One transfer word of a serialized value.
///
/// `last` marks the final beat of the final logical item of a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Beat {
    pub data: BigUint,
    pub last: bool,
}

/// One-slot handshake register.
///
/// A transfer happens exactly when the producer offers a value into an
/// empty slot. While the slot is occupied the offer is refused and the
/// producer must hold its value and validity steady; nothing is lost or
/// skipped under withheld readiness.
#[derive(Debug)]
pub struct Handshake<T> {
    slot: Option<T>,
}

impl<T> Default for Handshake<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handshake<T> {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// A value is presented and may be taken.
    pub const fn valid(&self) -> bool {
        self.slot.is_some()
    }

    /// The producer may offer a value this cycle.
    pub const fn ready(&self) -> bool {
        self.slot.is_none()
    }

    /// Offer a value; refused (and handed back) while the slot is full.
    pub fn offer(&mut self, value: T) -> core::result::Result<(), T> {
        match self.slot {
            Some(_) => Err(value),
            None => {
                self.slot = Some(value);
                Ok(())
            }
        }
    }

    pub const fn peek(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

/// Serializes values into `ceil(width / beat_bits)` beats, least
/// significant beat first.
#[derive(Clone, Copy, Debug)]
pub struct Packer {
    beat_bits: usize,
}

impl Packer {
    pub const fn new(beat_bits: usize) -> Self {
        Self { beat_bits }
    }

    pub const fn beats(&self, width: usize) -> usize {
        (width + self.beat_bits - 1) / self.beat_bits
    }

    /// Serialize `value` of the declared `width`; when `mark_last` is
    /// set the final beat carries the end-of-batch marker.
    pub fn pack(&self, value: &BigUint, width: usize, mark_last: bool) -> Result<Vec<Beat>> {
        let beats = self.beats(width);
        if value.bits() > width as u64 {
            return Err(Error::WidthOverflow {
                width: value.bits(),
                beats,
                beat_bits: self.beat_bits,
            });
        }
        let mask = (BigUint::from(1u8) << self.beat_bits) - 1u8;
        Ok((0..beats)
            .map(|beat| Beat {
                data: (value >> (beat * self.beat_bits)) & &mask,
                last: mark_last && beat + 1 == beats,
            })
            .collect())
    }
}

/// Reassembles values of a fixed width from their beat serialization.
#[derive(Clone, Debug)]
pub struct Unpacker {
    beat_bits: usize,
    width: usize,
    acc: BigUint,
    count: usize,
}

impl Unpacker {
    pub fn new(beat_bits: usize, width: usize) -> Self {
        Self {
            beat_bits,
            width,
            acc: BigUint::default(),
            count: 0,
        }
    }

    pub const fn beats(&self) -> usize {
        (self.width + self.beat_bits - 1) / self.beat_bits
    }

    /// A value is partially assembled.
    pub const fn in_progress(&self) -> bool {
        self.count != 0
    }

    /// Absorb one beat; returns the reassembled value on the final beat.
    pub fn push(&mut self, beat: &Beat) -> Option<BigUint> {
        self.acc += &beat.data << (self.count * self.beat_bits);
        self.count += 1;
        if self.count == self.beats() {
            self.count = 0;
            Some(core::mem::take(&mut self.acc))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.acc = BigUint::default();
        self.count = 0;
    }
}
