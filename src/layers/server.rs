use std::collections::HashMap;

use log::{debug, warn};

use super::{shard, CoreWorker, Environment};
use crate::{
    channel::{
        Endpoint, ExperienceLog, LogRecord, NodeId, Packet, PerformanceLog, Role, LOGS,
    },
    error::Result,
    stats::{Blob, EntityKey},
    telemetry::TierLog,
    tier::{Step, Tier, Worker},
};

/// What a server hands its cluster after an epoch.
#[derive(Debug, Clone, Default)]
pub struct ServerOutput {
    /// Finalized statistics of every entity retired during the epoch.
    pub blobs: Vec<Blob>,
    /// Utilization of the cores this server stepped.
    pub core_log: TierLog,
}

/// Middle tier worker: steps an environment, fanning observations out to
/// the core tier, and keeps one [`Blob`] per live entity.
pub struct ServerWorker {
    env: Box<dyn Environment>,
    cores: Tier<CoreWorker>,
    blobs: HashMap<EntityKey, Blob>,
    log_sinks: Vec<NodeId>,
}

impl ServerWorker {
    /// Creates a new `ServerWorker`.
    ///
    /// # Arguments
    /// * `env` - The environment this server owns.
    /// * `cores` - The core tier decisions are requested from.
    /// * `log_sinks` - Receivers of the performance and experience logs.
    pub fn new(env: Box<dyn Environment>, cores: Tier<CoreWorker>, log_sinks: Vec<NodeId>) -> Self {
        Self {
            env,
            cores,
            blobs: HashMap::new(),
            log_sinks,
        }
    }

    /// Entities currently being tracked.
    pub fn tracked(&self) -> usize {
        self.blobs.len()
    }

    async fn tick(&mut self, retired: &mut Vec<Blob>, core_log: &mut TierLog) -> Result<()> {
        let batch = self.env.observe();
        for obs in &batch {
            let blob = self.blobs.entry(obs.key).or_insert_with(|| Blob::new(obs.key));
            blob.record_input(obs.reward);
            if let Some(tile) = &obs.tile {
                blob.record_tile(&tile.tex, tile.first_visit);
            }
        }

        let shards = shard(batch, self.cores.len());
        let stepped = self.cores.step(shards).await?;

        let mut decisions = Vec::new();
        for core in stepped {
            core_log.samples.push(core.utilization);
            decisions.extend(core.output);
        }

        for decision in &decisions {
            if let Some(blob) = self.blobs.get_mut(&decision.key) {
                blob.record_output(decision.value);
            }
        }

        for key in self.env.apply(&decisions) {
            let Some(mut blob) = self.blobs.remove(&key) else {
                continue;
            };

            if blob.lifetime() == 0 || blob.reward().is_empty() {
                debug!("dropping entity {key} retired without samples");
                continue;
            }

            blob.finalize()?;
            retired.push(blob);
        }

        Ok(())
    }

    fn publish(&self, endpoint: &Endpoint, retired: &[Blob]) {
        let lifetime: Vec<_> = retired.iter().map(|b| b.lifetime() as f64).collect();
        let performance = PerformanceLog {
            lifetime,
            population: Some(self.env.population()),
        };
        let experience = ExperienceLog {
            rollouts: retired.len() as u64,
            updates: retired.iter().map(Blob::lifetime).sum(),
        };

        for record in [
            LogRecord::Performance(performance),
            LogRecord::Experience(experience),
        ] {
            if let Err(e) = endpoint.send(LOGS, Packet::Log(record), &self.log_sinks) {
                warn!("failed to publish server logs: node={} err={e}", endpoint.node());
            }
        }
    }
}

impl Worker for ServerWorker {
    /// Environment ticks to run.
    type Input = usize;
    type Output = ServerOutput;

    async fn step(&mut self, endpoint: &mut Endpoint, ticks: usize) -> Result<Step<ServerOutput>> {
        let mut retired = Vec::new();
        let mut core_log = TierLog::new(Role::Core.name(), Vec::new());

        for _ in 0..ticks {
            self.tick(&mut retired, &mut core_log).await?;
        }

        debug!(
            index = endpoint.node().index;
            "server epoch done: retired={} tracked={}",
            retired.len(),
            self.tracked()
        );
        self.publish(endpoint, &retired);

        Ok(Step::new(ServerOutput {
            blobs: retired,
            core_log,
        }))
    }
}
