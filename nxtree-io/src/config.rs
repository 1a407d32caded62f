//! Writer configuration.

use crate::{Error, Result};
use nxtree_core::{element_count, ElementType, MIN_SLAB_BUDGET};
use sysinfo::System;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of elements written per slab.
pub const DEFAULT_SLAB_BUDGET: i64 = 80_000;

/// Environment variable overriding the slab budget.
pub const SLAB_BUDGET_ENV: &str = "NXTREE_SLAB_SIZE";

/// Rank-1 arrays smaller than this are never compressed.
pub const MIN_COMPRESSED_ELEMENTS: usize = 500;

/// Bytes of the widest element type; sizes the memory cap on slabs.
const WIDEST_ELEMENT_BYTES: u64 = 8;

/// Dataset compression policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompressionPolicy {
    /// Store every dataset contiguously.
    #[default]
    Disabled,
    /// Deflate eligible datasets at the given level (0-9).
    Deflate(u8),
}

/// Configuration for committing a node tree.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WriterConfig {
    /// Maximum elements per bounded write. Values at or below 100 disable slabbing.
    pub slab_budget: i64,
    /// Compression applied to newly created datasets.
    pub compression: CompressionPolicy,
    /// When set, caps one slab to this fraction of available system memory.
    pub memory_fraction: Option<f64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            slab_budget: DEFAULT_SLAB_BUDGET,
            compression: CompressionPolicy::Disabled,
            memory_fraction: None,
        }
    }
}

impl WriterConfig {
    /// Default configuration with the slab budget taken from
    /// `NXTREE_SLAB_SIZE` when it is set and parses.
    #[must_use]
    pub fn from_env() -> Self {
        let slab_budget = std::env::var(SLAB_BUDGET_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_SLAB_BUDGET);
        Self {
            slab_budget,
            ..Self::default()
        }
    }

    /// Set the slab budget in elements.
    #[must_use]
    pub fn with_slab_budget(mut self, elements: i64) -> Self {
        self.slab_budget = elements;
        self
    }

    /// Set the compression policy.
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionPolicy) -> Self {
        self.compression = compression;
        self
    }

    /// Cap slabs to a fraction of available system memory.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = Some(fraction);
        self
    }

    /// Deflate level for a new dataset, if it should be compressed.
    ///
    /// Character data is never compressed, nor are rank-1 arrays with fewer
    /// than [`MIN_COMPRESSED_ELEMENTS`] elements.
    #[must_use]
    pub fn compression_for(&self, element_type: ElementType, shape: &[usize]) -> Option<u8> {
        let CompressionPolicy::Deflate(level) = self.compression else {
            return None;
        };
        if element_type.is_char() || element_count(shape) == 0 {
            return None;
        }
        if shape.len() <= 1 && element_count(shape) < MIN_COMPRESSED_ELEMENTS {
            return None;
        }
        Some(level.min(9))
    }

    /// Resolve the effective slab budget.
    ///
    /// # Errors
    /// Returns an error if `memory_fraction` is outside `(0.0, 1.0]` or the
    /// available memory cannot be determined.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn resolve_slab_budget(&self) -> Result<i64> {
        let Some(fraction) = self.memory_fraction else {
            return Ok(self.slab_budget);
        };
        if !(0.0 < fraction && fraction <= 1.0) {
            return Err(Error::InvalidFormat(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidFormat(
                "available system memory reported as 0".to_string(),
            ));
        }
        let cap_bytes = (available as f64 * fraction).floor() as u64;
        let cap = i64::try_from(cap_bytes / WIDEST_ELEMENT_BYTES)
            .unwrap_or(i64::MAX)
            .max(MIN_SLAB_BUDGET + 1);
        Ok(self.slab_budget.min(cap))
    }
}
