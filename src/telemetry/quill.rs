use std::{path::PathBuf, time::Instant};

use actix::prelude::*;
use log::{debug, info};

use super::{report::EpochReport, store};
use crate::{config::Config, error::Result, stats::BlobSummary};

/// Pushes epoch reports to the live dashboard, if one is attached.
#[derive(Default)]
pub struct Logger {
    dashboard: Option<Recipient<EpochReport>>,
}

impl Logger {
    pub fn new(dashboard: Option<Recipient<EpochReport>>) -> Self {
        Self { dashboard }
    }

    pub fn is_attached(&self) -> bool {
        self.dashboard.is_some()
    }

    /// Fire-and-forget, a full or dead dashboard never stalls an epoch.
    pub fn log(&self, report: EpochReport) {
        if let Some(dashboard) = &self.dashboard {
            dashboard.do_send(report);
        }
    }
}

/// Single writer of the summary store and keeper of the run's totals.
pub struct Quill {
    store: PathBuf,
    logger: Logger,
    time: Instant,
    cur_updates: u64,
    cur_rollouts: u64,
    n_updates: u64,
    n_rollouts: u64,
    tick: u64,
    latest: Option<(f64, f64)>,
}

impl Quill {
    /// Creates a new `Quill` and deletes any summary store left by a
    /// previous run.
    ///
    /// # Arguments
    /// * `config` - Where the store lives and whether to forward reports.
    /// * `dashboard` - The live dashboard, only used when `config.log` is set.
    pub fn new(config: &Config, dashboard: Option<Recipient<EpochReport>>) -> Self {
        let store = config.store_path();

        store::reset(&store);

        let logger = Logger::new(dashboard.filter(|_| config.log));
        if logger.is_attached() {
            info!("forwarding epoch reports to the dashboard");
        }

        Self {
            store,
            logger,
            time: Instant::now(),
            cur_updates: 0,
            cur_rollouts: 0,
            n_updates: 0,
            n_rollouts: 0,
            tick: 0,
            latest: None,
        }
    }

    /// Seconds elapsed since the previous call, or since construction.
    pub fn timestamp(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.time).as_secs_f64();
        self.time = now;
        elapsed
    }

    /// Renders the update and rollout counters, totals then this epoch's.
    pub fn stats(&self) -> String {
        let updates = format!("Updates:  (Total) {}", self.n_updates);
        let rollouts = format!("Rollouts: (Total) {}", self.n_rollouts);
        let width = updates.len();

        format!(
            "{updates:<width$}  |  (Epoch) {}\n{rollouts:<width$}  |  (Epoch) {}",
            self.cur_updates, self.cur_rollouts,
        )
    }

    /// `(lifetime_mean, reward_mean)` of the last scrawled epoch.
    pub fn latest(&self) -> Option<(f64, f64)> {
        self.latest
    }

    fn scrawl(&mut self, summary: &BlobSummary) -> Scrawled {
        self.n_updates += summary.update_count;
        self.n_rollouts += summary.rollout_count;
        self.cur_updates = summary.update_count;
        self.cur_rollouts = summary.rollout_count;

        let timestamp = self.timestamp();
        let report = EpochReport::new(summary, timestamp, self.tick);
        self.tick += 1;

        self.latest = Some((report.lifetime_mean, report.reward_mean));
        self.logger.log(report.clone());

        debug!(tick = report.tick; "value function: {}", report.value_mean);

        Scrawled {
            stats: self.stats(),
            lifetime_mean: report.lifetime_mean,
            report,
        }
    }
}

impl Actor for Quill {
    type Context = Context<Self>;
}

/// Folds an epoch's summary into the run's totals.
#[derive(Message)]
#[rtype(result = "Scrawled")]
pub struct Scrawl(pub BlobSummary);

/// Answer to [`Scrawl`].
#[derive(Debug, Clone)]
pub struct Scrawled {
    /// The rendered counters, see [`Quill::stats`].
    pub stats: String,
    pub lifetime_mean: f64,
    pub report: EpochReport,
}

impl Handler<Scrawl> for Quill {
    type Result = MessageResult<Scrawl>;

    fn handle(&mut self, Scrawl(summary): Scrawl, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.scrawl(&summary))
    }
}

/// Appends an epoch's summary to the store.
#[derive(Message)]
#[rtype(result = "Result<()>")]
pub struct Save(pub BlobSummary);

impl Handler<Save> for Quill {
    type Result = AtomicResponse<Self, Result<()>>;

    /// Saves are written one at a time, in the order they were sent.
    fn handle(&mut self, Save(summary): Save, _ctx: &mut Self::Context) -> Self::Result {
        let path = self.store.clone();
        AtomicResponse::new(Box::pin(
            async move { store::append(&path, &summary).await }.into_actor(self),
        ))
    }
}

/// Asks for [`Quill::latest`].
#[derive(Message)]
#[rtype(result = "Option<(f64, f64)>")]
pub struct Latest;

impl Handler<Latest> for Quill {
    type Result = Option<(f64, f64)>;

    fn handle(&mut self, _msg: Latest, _ctx: &mut Self::Context) -> Self::Result {
        self.latest()
    }
}
