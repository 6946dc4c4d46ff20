use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{mean, EntityKey};
use crate::error::{Result, TrinityError};

/// Running statistics of one entity across one epoch.
///
/// Owned by the worker that tracks the entity. Once [`Blob::finalize`] has
/// collapsed the samples the blob is frozen and may be cloned out to the
/// aggregation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    key: EntityKey,
    lifetime: u64,
    reward: Vec<f64>,
    value: Vec<f64>,
    counts: BTreeMap<String, u64>,
    unique: BTreeMap<String, u64>,
    finalized: bool,
}

impl Blob {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            lifetime: 0,
            reward: Vec::new(),
            value: Vec::new(),
            counts: BTreeMap::new(),
            unique: BTreeMap::new(),
            finalized: false,
        }
    }

    /// Records what the entity received this tick. Ignored once finalized.
    pub fn record_input(&mut self, reward: Option<f64>) {
        if let (false, Some(reward)) = (self.finalized, reward) {
            self.reward.push(reward);
        }
    }

    /// Records the value estimate of the decision taken for the entity.
    /// Ignored once finalized.
    pub fn record_output(&mut self, value: f64) {
        if self.finalized {
            return;
        }

        self.value.push(value);
        self.lifetime += 1;
    }

    /// Counts a visit of the entity to a tile with texture `tex`.
    pub fn record_tile(&mut self, tex: &str, first_visit: bool) {
        if self.finalized {
            return;
        }

        *self.counts.entry(tex.to_string()).or_insert(0) += 1;
        *self.unique.entry(tex.to_string()).or_insert(0) += u64::from(first_visit);
    }

    /// Collapses the reward and value samples to their means and freezes the blob.
    ///
    /// The caller must have recorded at least one reward and one value, the
    /// mean of an empty sequence is `NaN`.
    ///
    /// # Returns
    /// `AlreadyFinalized` on a second call, leaving the blob untouched.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(TrinityError::AlreadyFinalized(self.key));
        }

        self.reward = vec![mean(&self.reward)];
        self.value = vec![mean(&self.value)];
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Ticks the entity was alive for, one per recorded output.
    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    pub fn reward(&self) -> &[f64] {
        &self.reward
    }

    pub fn value(&self) -> &[f64] {
        &self.value
    }

    /// Visits per tile texture.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    /// First visits per tile texture, keyed like [`Blob::counts`].
    pub fn unique(&self) -> &BTreeMap<String, u64> {
        &self.unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> Blob {
        Blob::new(EntityKey::new(3, 1))
    }

    #[test]
    fn lifetime_tracks_outputs() {
        let mut blob = blob();
        blob.record_input(None);
        blob.record_input(Some(1.0));
        blob.record_output(0.5);
        blob.record_output(1.5);

        assert_eq!(blob.lifetime(), 2);
        assert_eq!(blob.lifetime() as usize, blob.value().len());
        assert_eq!(blob.reward(), &[1.0]);
    }

    #[test]
    fn finalize_collapses_to_means() {
        let mut blob = blob();
        for (reward, value) in [(1.0, 1.0), (2.0, 3.0), (3.0, 5.0)] {
            blob.record_input(Some(reward));
            blob.record_output(value);
        }

        blob.finalize().unwrap();

        assert!(blob.is_finalized());
        assert_eq!(blob.reward(), &[2.0]);
        assert_eq!(blob.value(), &[3.0]);
        assert_eq!(blob.lifetime(), 3);
    }

    #[test]
    fn second_finalize_is_rejected() {
        let mut blob = blob();
        blob.record_input(Some(1.0));
        blob.record_output(2.0);
        blob.finalize().unwrap();

        let err = blob.finalize().unwrap_err();
        assert!(matches!(err, TrinityError::AlreadyFinalized(key) if key == EntityKey::new(3, 1)));
        assert_eq!(blob.value(), &[2.0]);
    }

    #[test]
    fn frozen_after_finalize() {
        let mut blob = blob();
        blob.record_input(Some(1.0));
        blob.record_output(2.0);
        blob.finalize().unwrap();

        blob.record_input(Some(9.0));
        blob.record_output(9.0);
        blob.record_tile("grass", true);

        assert_eq!(blob.lifetime(), 1);
        assert_eq!(blob.value(), &[2.0]);
        assert!(blob.counts().is_empty());
    }

    #[test]
    fn tiles_count_visits_and_first_visits() {
        let mut blob = blob();
        blob.record_tile("grass", true);
        blob.record_tile("grass", false);
        blob.record_tile("stone", false);

        assert_eq!(blob.counts()["grass"], 2);
        assert_eq!(blob.unique()["grass"], 1);
        assert_eq!(blob.unique()["stone"], 0);
    }
}
