use serde::{Deserialize, Serialize};

use super::Blob;
use crate::error::{Result, TrinityError};

/// Epoch-scoped aggregate over many finalized blobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobSummary {
    pub rollout_count: u64,
    pub update_count: u64,
    pub lifetime: Vec<f64>,
    pub reward: Vec<f64>,
    pub value: Vec<f64>,
}

impl BlobSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates `blobs` into the summary. Pure append, nothing is removed
    /// or reordered, so adding disjoint batches one by one gives the same
    /// totals as adding their union at once.
    ///
    /// # Returns
    /// `NotFinalized` if any blob is still open, in which case nothing is added.
    pub fn add<'a, I>(&mut self, blobs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = &'a Blob>,
    {
        let blobs: Vec<&Blob> = blobs.into_iter().collect();
        if let Some(open) = blobs.iter().find(|blob| !blob.is_finalized()) {
            return Err(TrinityError::NotFinalized(open.key()));
        }

        for blob in blobs {
            self.rollout_count += 1;
            self.update_count += blob.lifetime();

            self.lifetime.push(blob.lifetime() as f64);
            self.reward.extend_from_slice(blob.reward());
            self.value.extend_from_slice(blob.value());
        }

        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.rollout_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::EntityKey;

    fn finished(id: u64, values: &[f64]) -> Blob {
        let mut blob = Blob::new(EntityKey::new(id, 0));
        for &value in values {
            blob.record_input(Some(value * 10.0));
            blob.record_output(value);
        }
        blob.finalize().unwrap();
        blob
    }

    #[test]
    fn value_samples_collapse_per_blob() {
        let blobs = [
            finished(0, &[1.0, 3.0]),
            finished(1, &[2.0]),
            finished(2, &[4.0, 4.0, 4.0]),
        ];

        let mut summary = BlobSummary::new();
        summary.add(&blobs).unwrap();

        assert_eq!(summary.value, vec![2.0, 2.0, 4.0]);
        assert_eq!(summary.lifetime, vec![2.0, 1.0, 3.0]);
        assert_eq!(summary.rollout_count, 3);
        assert_eq!(summary.update_count, 6);
    }

    #[test]
    fn add_is_associative() {
        let a = [finished(0, &[1.0, 2.0]), finished(1, &[5.0])];
        let b = [finished(2, &[0.5]), finished(3, &[1.0, 1.0, 4.0])];

        let mut split = BlobSummary::new();
        split.add(&a).unwrap().add(&b).unwrap();

        let mut union = BlobSummary::new();
        union.add(a.iter().chain(&b)).unwrap();

        assert_eq!(split, union);
    }

    #[test]
    fn open_blobs_are_rejected_without_partial_adds() {
        let open = Blob::new(EntityKey::new(9, 9));
        let blobs = vec![finished(0, &[1.0]), open];

        let mut summary = BlobSummary::new();
        let err = summary.add(&blobs).unwrap_err();

        assert!(matches!(err, TrinityError::NotFinalized(key) if key.ent_id == 9));
        assert!(summary.is_empty());
        assert!(summary.value.is_empty());
    }
}
