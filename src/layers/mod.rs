//! Reference workers for the three tiers.
//!
//! The learned policy, the simulated environment and the optimizer are
//! external collaborators, plugged in through [`Policy`], [`Environment`]
//! and [`Trainer`].

mod cluster;
mod core;
mod server;

use crate::{
    channel::{Decision, ObservationBatch, Rollout},
    stats::EntityKey,
};

pub use self::core::CoreWorker;
pub use cluster::ClusterWorker;
pub use server::{ServerOutput, ServerWorker};

/// Decision making model run by core workers.
pub trait Policy: Send + 'static {
    /// Replaces the model's weights.
    fn load(&mut self, weights: &[f32]);

    /// Picks one decision per observation, in observation order.
    fn decide(&mut self, batch: &ObservationBatch) -> Vec<Decision>;
}

/// Simulation stepped by server workers.
pub trait Environment: Send + 'static {
    /// What every live entity sees this tick.
    fn observe(&mut self) -> ObservationBatch;

    /// Applies the decisions and advances one tick.
    ///
    /// # Returns
    /// The entities that were retired during this tick.
    fn apply(&mut self, decisions: &[Decision]) -> Vec<EntityKey>;

    /// Number of live entities.
    fn population(&self) -> usize;
}

/// Optimizer owned by the model-owning cluster worker.
pub trait Trainer: Send + 'static {
    /// Computes the next weights from the current ones and an epoch's experience.
    fn update(&mut self, weights: &[f32], rollouts: &[Rollout]) -> Vec<f32>;
}

/// Splits `batch` into at most `parts` contiguous, near-equal chunks.
///
/// Returns no chunk at all when `parts` is `0` or the batch is empty.
fn shard<T>(mut batch: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if parts == 0 || batch.is_empty() {
        return Vec::new();
    }

    let size = batch.len().div_ceil(parts);
    let mut shards = Vec::with_capacity(parts);
    while !batch.is_empty() {
        let rest = batch.split_off(size.min(batch.len()));
        shards.push(batch);
        batch = rest;
    }

    shards
}
