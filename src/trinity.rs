//! The three tier orchestrator and its epoch loop.

use std::iter;

use actix::prelude::*;
use log::{debug, info, warn};
use tokio::task::JoinSet;

use crate::{
    channel::{NodeId, Role, Roster, Switchboard},
    config::Config,
    error::Result,
    status::{self, StatusBlock},
    telemetry::{monitor::Poll, EpochReport, LogSummary, Quill, TierLog, UtilizationMonitor},
    tier::{Tier, Wiring, Worker},
};

/// What one step of the first cluster worker produces.
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    /// Save marker line, starts with [`status::EPOCH_MARKER`].
    pub save: String,
    /// Counters rendered by the metrics logger.
    pub stats: String,
    /// Logs the cluster gathered from the tiers below it.
    pub tier_logs: Vec<TierLog>,
    /// Utilization of the cluster's direct children.
    pub disciple_logs: TierLog,
}

/// Owner of the cluster, server and core tiers.
///
/// Epochs are strictly sequential: [`Trinity::step`] steps the first cluster
/// worker, which drives the tiers below it, then writes one block to the
/// status file.
pub struct Trinity<C: Worker, S: Worker, K: Worker> {
    config: Config,
    cluster: Tier<C>,
    server: Tier<S>,
    core: Tier<K>,
    quill: Addr<Quill>,
    monitor: Addr<UtilizationMonitor>,
    tasks: JoinSet<Result<()>>,
    epoch: u64,
}

impl<C, S, K> Trinity<C, S, K>
where
    C: Worker<Input = (), Output = ClusterOutput>,
    S: Worker,
    K: Worker,
{
    /// Validates `config`, starts the metrics logger and the monitor, spawns
    /// the core, server and cluster tiers in that order and waits for every
    /// worker to finish its initial synchronization.
    ///
    /// Must be called from within a running actix system.
    ///
    /// # Arguments
    /// * `config` - Worker counts and where the reports go.
    /// * `dashboard` - The live dashboard, used when `config.log` is set.
    /// * `cluster` - Builds cluster worker `i` given the server tier.
    /// * `server` - Builds server worker `i` given the core tier.
    /// * `core` - Builds core worker `i`.
    ///
    /// # Returns
    /// `InvalidConfig` before anything is spawned, `ChannelResolution` or
    /// `WorkerGone` if a worker can't start.
    pub async fn launch<FC, FS, FK>(
        config: Config,
        dashboard: Option<Recipient<EpochReport>>,
        mut cluster: FC,
        mut server: FS,
        mut core: FK,
    ) -> Result<Self>
    where
        FC: FnMut(usize, &Roster, &Tier<S>, &Addr<Quill>) -> C,
        FS: FnMut(usize, &Roster, &Tier<K>) -> S,
        FK: FnMut(usize, &Roster) -> K,
    {
        config.validate()?;

        let roster = Roster::new(config.n_cluster, config.n_server, config.n_core);
        let mut board = Switchboard::for_roster(
            &roster,
            config.channel_capacity,
            config.monitor_capacity(),
        );
        let mut tasks = JoinSet::new();

        let quill = Quill::new(&config, dashboard).start();
        let monitor = UtilizationMonitor::new(
            board.endpoint(NodeId::MONITOR)?,
            roster,
            config.monitor_interval(),
        )
        .start();

        let trainer = NodeId::new(Role::Cluster, 0);

        let core_tier = Tier::spawn(
            Role::Core,
            (0..roster.n_core).map(|i| core(i, &roster)),
            &mut board,
            Wiring {
                utilization: vec![NodeId::MONITOR],
                experience: vec![trainer],
            },
            &mut tasks,
        )?;

        let server_tier = Tier::spawn(
            Role::Server,
            (0..roster.n_server).map(|i| server(i, &roster, &core_tier)),
            &mut board,
            Wiring {
                utilization: vec![NodeId::MONITOR, trainer],
                experience: vec![],
            },
            &mut tasks,
        )?;

        let cluster_tier = Tier::spawn(
            Role::Cluster,
            (0..roster.n_cluster).map(|i| cluster(i, &roster, &server_tier, &quill)),
            &mut board,
            Wiring {
                utilization: vec![NodeId::MONITOR],
                experience: vec![],
            },
            &mut tasks,
        )?;

        cluster_tier.ready().await?;
        server_tier.ready().await?;
        core_tier.ready().await?;

        info!(
            "trinity launched: cluster={} server={} core={} device={}",
            roster.n_cluster, roster.n_server, roster.n_core, config.device
        );

        Ok(Self {
            config,
            cluster: cluster_tier,
            server: server_tier,
            core: core_tier,
            quill,
            monitor,
            tasks,
            epoch: 0,
        })
    }

    /// Runs one epoch and appends its block to the status file.
    ///
    /// The monitor is polled once the epoch is done, so its gauges follow
    /// the latest epoch and its inboxes are emptied at least once per epoch.
    ///
    /// # Returns
    /// The block's text, the same that was written.
    pub async fn step(&mut self) -> Result<String> {
        let stepped = self.cluster.step_one(0, ()).await?;
        let ClusterOutput {
            save,
            stats,
            tier_logs,
            disciple_logs,
        } = stepped.output;

        let own = TierLog::new(Role::Cluster.name(), vec![stepped.utilization]);
        let summary = LogSummary::merge(
            iter::once(disciple_logs)
                .chain(tier_logs)
                .chain(iter::once(own)),
        );

        let block = StatusBlock {
            save,
            stats,
            summary: summary.to_string(),
        };
        status::append(&self.config.stat_path(), &block).await?;

        self.monitor.do_send(Poll);

        self.epoch += 1;
        info!(epoch = self.epoch; "epoch complete");

        Ok(block.text())
    }

    /// Runs epochs forever.
    ///
    /// An epoch failing on a non fatal error is skipped with a warning.
    ///
    /// # Returns
    /// The first fatal error.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.step().await {
                Ok(text) => debug!("{text}"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("epoch {} skipped: {e}", self.epoch),
            }
        }
    }

    /// Epochs completed so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn quill(&self) -> &Addr<Quill> {
        &self.quill
    }

    pub fn monitor(&self) -> &Addr<UtilizationMonitor> {
        &self.monitor
    }

    /// Worker counts per tier, cluster first.
    pub fn sizes(&self) -> [usize; 3] {
        [self.cluster.len(), self.server.len(), self.core.len()]
    }

    /// Drops every tier handle and waits for the worker tasks to wind down.
    ///
    /// # Returns
    /// The first error a worker task ended with.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            cluster,
            server,
            core,
            mut tasks,
            ..
        } = self;
        drop((cluster, server, core));

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => result?,
                Err(e) => warn!("worker task did not finish cleanly: {e}"),
            }
        }

        info!("trinity shut down");
        Ok(())
    }
}
