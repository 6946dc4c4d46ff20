//! Per-entity statistics and their epoch-level aggregation.

mod blob;
mod inkwell;
mod summary;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use blob::Blob;
pub use inkwell::{InkWell, Table};
pub use summary::BlobSummary;

/// Identity of one tracked agent during an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub ent_id: u64,
    pub ann_id: u64,
}

impl EntityKey {
    pub fn new(ent_id: u64, ann_id: u64) -> Self {
        Self { ent_id, ann_id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ent_id, self.ann_id)
    }
}

/// Arithmetic mean, `NaN` for an empty slice.
pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation, `NaN` for an empty slice.
pub fn std(samples: &[f64]) -> f64 {
    let mu = mean(samples);
    let var = samples.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / samples.len() as f64;
    var.sqrt()
}

/// `mean` that reads an empty slice as `0`, for telemetry that may be missing.
pub fn mean_or_zero(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        mean(samples)
    }
}

/// `std` that reads an empty slice as `0`.
pub fn std_or_zero(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        std(samples)
    }
}
