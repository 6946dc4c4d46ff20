use std::time::Duration;

use actix::Addr;
use log::{debug, info};

use super::{ServerWorker, Trainer};
use crate::{
    channel::{
        Endpoint, LogRecord, ModelPacket, NodeId, Packet, Rollout, Role, Timeout, EXPERIENCE,
        MODEL, UTILIZATION,
    },
    error::Result,
    stats::{mean_or_zero, BlobSummary, InkWell},
    status::EPOCH_MARKER,
    telemetry::{Quill, Save, Scrawl, TierLog},
    tier::{Step, Tier, Worker},
    trinity::ClusterOutput,
};

/// Top tier worker and owner of the model.
///
/// Each step broadcasts the current weights to the cores, runs one epoch on
/// every server, folds the retired entities into a [`BlobSummary`] and hands
/// it to the [`Quill`], then trains on the experience the cores produced.
pub struct ClusterWorker {
    trainer: Box<dyn Trainer>,
    weights: Vec<f32>,
    servers: Tier<ServerWorker>,
    cores: Vec<NodeId>,
    quill: Addr<Quill>,
    ticks: usize,
    sync_timeout: Duration,
    epoch: u64,
}

impl ClusterWorker {
    /// Creates a new `ClusterWorker`.
    ///
    /// # Arguments
    /// * `trainer` - The optimizer updating the weights.
    /// * `weights` - The initial model weights.
    /// * `servers` - The server tier run every epoch.
    /// * `cores` - The core nodes weights are published to and experience
    ///   is collected from.
    /// * `quill` - The metrics logger.
    /// * `ticks` - Environment ticks per epoch.
    pub fn new(
        trainer: Box<dyn Trainer>,
        weights: Vec<f32>,
        servers: Tier<ServerWorker>,
        cores: Vec<NodeId>,
        quill: Addr<Quill>,
        ticks: usize,
    ) -> Self {
        Self {
            trainer,
            weights,
            servers,
            cores,
            quill,
            ticks,
            sync_timeout: Duration::ZERO,
            epoch: 0,
        }
    }

    /// Sets how long to wait for the tiers' experience and utilization once
    /// the servers are done. Zero only takes what already arrived.
    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    fn broadcast(&self, endpoint: &Endpoint) -> Result<()> {
        let model = Packet::Model(ModelPacket::new(self.weights.as_slice()));
        endpoint.send(MODEL, model, &self.cores)
    }
}

impl Worker for ClusterWorker {
    type Input = ();
    type Output = ClusterOutput;

    async fn run(&mut self, endpoint: &mut Endpoint) -> Result<()> {
        self.broadcast(endpoint)?;
        info!("initial model published to {} cores", self.cores.len());
        Ok(())
    }

    async fn step(&mut self, endpoint: &mut Endpoint, _input: ()) -> Result<Step<ClusterOutput>> {
        self.broadcast(endpoint)?;

        let stepped = self.servers.step_all(self.ticks).await?;
        let mut blobs = Vec::new();
        let mut tier_logs = Vec::with_capacity(stepped.len());
        for server in stepped {
            blobs.extend(server.output.blobs);
            tier_logs.push(server.output.core_log);
        }

        let mut summary = BlobSummary::new();
        summary.add(&blobs)?;

        for (tile, ratios) in InkWell::explore(&blobs) {
            debug!(epoch = self.epoch; "{tile}: {:.3}", mean_or_zero(&ratios));
        }

        let rollouts: Vec<Rollout> = gather(endpoint, EXPERIENCE, &self.cores, self.sync_timeout)
            .await?
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Experience(rollout) => Some(rollout),
                _ => None,
            })
            .collect();
        self.weights = self.trainer.update(&self.weights, &rollouts);
        debug!(epoch = self.epoch; "trained on {} rollouts", rollouts.len());

        let scrawled = self.quill.send(Scrawl(summary.clone())).await?;
        self.quill.send(Save(summary)).await??;

        let servers = self.servers.nodes();
        let disciple_samples = gather(endpoint, UTILIZATION, &servers, self.sync_timeout)
            .await?
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Log(LogRecord::Utilization(sample)) => Some(sample),
                _ => None,
            })
            .collect();

        let save = format!(
            "{EPOCH_MARKER}{}] Saved model: {} weights, lifetime {:.3}",
            self.epoch,
            self.weights.len(),
            scrawled.lifetime_mean
        );
        self.epoch += 1;

        Ok(Step::new(ClusterOutput {
            save,
            stats: scrawled.stats,
            tier_logs,
            disciple_logs: TierLog::new(Role::Server.name(), disciple_samples),
        }))
    }
}

/// Receives `channel` traffic from `sources`, waiting up to `timeout` for the
/// first payload. Nothing can come from no sources, so that returns at once.
async fn gather(
    endpoint: &mut Endpoint,
    channel: &str,
    sources: &[NodeId],
    timeout: Duration,
) -> Result<Vec<Packet>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    endpoint.recv(channel, sources, Timeout::from(timeout)).await
}
