//! Build-time configuration and the pipeline stage table.
//!
//! Every knob is fixed for the lifetime of an engine; an inconsistent
//! combination is refused at construction, never at runtime.

use thiserror::Error;

/// Elaboration-time configuration faults.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("field width {field_bits} does not exceed the modulus length {modulus_bits}")]
    FieldWidth {
        field_bits: usize,
        modulus_bits: usize,
    },
    #[error("window width {window_bits} must be in 1..=24 and not exceed the scalar width {scalar_bits}")]
    WindowSplit {
        window_bits: usize,
        scalar_bits: usize,
    },
    #[error("arithmetic stage counts must be nonzero")]
    ZeroStages,
    #[error("beat width must be nonzero")]
    BeatWidth,
    #[error("reduction table depth {log2_depth} must be in 1..=16")]
    TableDepth { log2_depth: usize },
    #[error("stall queue depth {depth} is below the pipeline latency {latency}")]
    StallDepth { depth: usize, latency: usize },
}

/// One stage of the point-addition pipeline with its fixed latency.
#[derive(Clone, Copy, Debug)]
pub struct Stage {
    pub name: &'static str,
    pub latency: usize,
}

/// Configuration of the accumulation core.
#[derive(Clone, Debug)]
pub struct Config {
    /// datapath width of a field element, must exceed the modulus length
    pub field_bits: usize,
    /// width of the input scalars
    pub scalar_bits: usize,
    /// bucket-index width of the equally sized windows
    pub window_bits: usize,
    /// latency of the modular adder/subtractor units
    pub adder_stages: usize,
    /// latency of the modular multiplier
    pub mul_stages: usize,
    /// timeshare one multiplier across paired multiplies, costing one
    /// extra stage
    pub arbitrated_mul: bool,
    /// bucket memory read latency
    pub ram_latency: usize,
    /// transfer width of the stream boundary
    pub beat_bits: usize,
    /// log2 of the coarse reduction table depth
    pub log2_depth: usize,
    /// stall queue depth; 0 sizes the queues to the pipeline latency
    pub stall_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_bits: 384,
            scalar_bits: 253,
            window_bits: 13,
            adder_stages: 2,
            mul_stages: 3,
            arbitrated_mul: true,
            ram_latency: 2,
            beat_bits: 64,
            log2_depth: 8,
            stall_depth: 0,
        }
    }
}

impl Config {
    pub fn validate(&self, modulus_bits: usize) -> Result<(), ConfigError> {
        if self.field_bits <= modulus_bits {
            return Err(ConfigError::FieldWidth {
                field_bits: self.field_bits,
                modulus_bits,
            });
        }
        if self.window_bits == 0 || self.window_bits > 24 || self.window_bits > self.scalar_bits {
            return Err(ConfigError::WindowSplit {
                window_bits: self.window_bits,
                scalar_bits: self.scalar_bits,
            });
        }
        if self.adder_stages == 0 || self.mul_stages == 0 {
            return Err(ConfigError::ZeroStages);
        }
        if self.beat_bits == 0 {
            return Err(ConfigError::BeatWidth);
        }
        if self.log2_depth == 0 || self.log2_depth > 16 {
            return Err(ConfigError::TableDepth {
                log2_depth: self.log2_depth,
            });
        }
        if self.stall_depth != 0 && self.stall_depth < self.latency() {
            return Err(ConfigError::StallDepth {
                depth: self.stall_depth,
                latency: self.latency(),
            });
        }
        Ok(())
    }

    /// Stage descriptor table of the point-addition pipeline. Total
    /// latency is derived from this table only, never re-derived at the
    /// call sites.
    pub fn stages(&self) -> [Stage; 5] {
        let arb = self.arbitrated_mul as usize;
        [
            Stage {
                name: "pre-add",
                latency: self.adder_stages,
            },
            Stage {
                name: "mul-coarse",
                latency: self.mul_stages + arb,
            },
            Stage {
                name: "cross-add",
                latency: self.adder_stages,
            },
            Stage {
                name: "fine-reduce",
                latency: self.adder_stages,
            },
            // the fine path carries one extra reduction stage
            Stage {
                name: "mul-fine",
                latency: self.mul_stages + 1 + arb,
            },
        ]
    }

    /// Issue-to-writeback latency in cycles, including the bucket read.
    pub fn latency(&self) -> usize {
        self.ram_latency
            + self
                .stages()
                .iter()
                .map(|stage| stage.latency)
                .sum::<usize>()
    }

    pub fn stall_queue_depth(&self) -> usize {
        if self.stall_depth == 0 {
            self.latency()
        } else {
            self.stall_depth
        }
    }

    /// Number of accumulation windows; the last absorbs the remainder
    /// bits of the scalar and may be wider than the others.
    pub const fn num_windows(&self) -> usize {
        self.scalar_bits / self.window_bits
    }

    /// Bit width of window `w`.
    pub const fn window_width(&self, w: usize) -> usize {
        if w + 1 == self.num_windows() {
            self.scalar_bits - (self.num_windows() - 1) * self.window_bits
        } else {
            self.window_bits
        }
    }

    /// Highest materially accumulated bucket index of window `w`;
    /// bucket 0 never accumulates.
    pub const fn last_bucket(&self, w: usize) -> u32 {
        (1u32 << self.window_width(w)) - 1
    }

    /// Total number of drained (window, bucket) results.
    pub fn num_results(&self) -> usize {
        (0..self.num_windows())
            .map(|w| self.last_bucket(w) as usize)
            .sum()
    }

    /// Width of one serialized ingress pair: scalar plus the three
    /// auxiliary point coordinates.
    pub const fn pair_bits(&self) -> usize {
        self.scalar_bits + 3 * self.field_bits
    }

    /// Width of one serialized egress result: four extended coordinates.
    pub const fn result_bits(&self) -> usize {
        4 * self.field_bits
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latency_follows_the_stage_table() {
        let cfg = Config {
            adder_stages: 2,
            mul_stages: 3,
            arbitrated_mul: true,
            ram_latency: 2,
            ..Config::default()
        };
        // 2 + (2 + 4 + 2 + 2 + 5)
        assert_eq!(cfg.latency(), 17);

        let unshared = Config {
            arbitrated_mul: false,
            ..cfg
        };
        assert_eq!(unshared.latency(), 15);
    }

    #[test]
    fn window_partition() {
        let cfg = Config {
            scalar_bits: 12,
            window_bits: 3,
            ..Config::default()
        };
        assert_eq!(cfg.num_windows(), 4);
        assert!((0..4).all(|w| cfg.window_width(w) == 3));
        assert_eq!(cfg.num_results(), 28);

        // the last window absorbs the remainder bit
        let cfg = Config {
            scalar_bits: 13,
            window_bits: 3,
            ..Config::default()
        };
        assert_eq!(cfg.num_windows(), 4);
        assert_eq!(cfg.window_width(3), 4);
        assert_eq!(cfg.last_bucket(3), 15);
        assert_eq!(cfg.num_results(), 36);
    }

    #[test]
    fn inconsistent_configurations_are_refused() {
        let cfg = Config {
            field_bits: 377,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(377),
            Err(ConfigError::FieldWidth {
                field_bits: 377,
                modulus_bits: 377
            })
        );

        let cfg = Config {
            window_bits: 14,
            scalar_bits: 13,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(377),
            Err(ConfigError::WindowSplit { .. })
        ));

        let cfg = Config {
            stall_depth: 3,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(377),
            Err(ConfigError::StallDepth { .. })
        ));

        assert!(Config::default().validate(377).is_ok());
    }
}
