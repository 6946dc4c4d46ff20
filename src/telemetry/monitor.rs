use std::time::Duration;

use actix::prelude::*;
use log::{debug, warn};

use super::progress::Bar;
use crate::{
    channel::{Endpoint, LogRecord, Packet, Role, Roster, UtilizationLog, LOGS, UTILIZATION},
    error::Result,
    stats::mean_or_zero,
};

/// Duty cycle of a set of run/wait samples.
///
/// `0` for no samples and whenever the mean run time is `0`, otherwise
/// `mean(run) / (mean(run) + mean(wait))`.
pub fn utilization(samples: &[UtilizationLog]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let runs: Vec<_> = samples.iter().map(|s| s.run).collect();
    let waits: Vec<_> = samples.iter().map(|s| s.wait).collect();
    let run = mean_or_zero(&runs);
    let wait = mean_or_zero(&waits);

    if run == 0.0 {
        0.0
    } else {
        run / (run + wait)
    }
}

/// What the monitor saw during one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSnapshot {
    pub cluster: f64,
    pub server: f64,
    pub core: f64,
    /// Mean lifetime of the entities servers retired, `0` if none reported.
    pub lifetime: f64,
    /// Mean live population reported by servers, `0` if none reported.
    pub population: f64,
    /// Rollouts the servers reported finishing.
    pub rollouts: u64,
}

impl MonitorSnapshot {
    /// `Lifetime: x, Population: y`, only once some lifetime was reported.
    pub fn performance(&self) -> Option<String> {
        (self.lifetime > 0.0).then(|| {
            format!(
                "Lifetime: {:.2}, Population: {:.2}",
                self.lifetime, self.population
            )
        })
    }
}

/// Polls the side channels of every tier and keeps one gauge per tier.
///
/// It never blocks: every receive is a poll, so a silent tier reads as `0`.
pub struct UtilizationMonitor {
    endpoint: Endpoint,
    roster: Roster,
    interval: Duration,
    bars: [Bar; 3],
    latest: MonitorSnapshot,
}

impl UtilizationMonitor {
    /// Creates a new `UtilizationMonitor`.
    ///
    /// # Arguments
    /// * `endpoint` - The monitor node's endpoint.
    /// * `roster` - Which workers exist.
    /// * `interval` - Period of the automatic polling once started.
    pub fn new(endpoint: Endpoint, roster: Roster, interval: Duration) -> Self {
        Self {
            endpoint,
            roster,
            interval,
            bars: [Bar::new("Cluster"), Bar::new("Server "), Bar::new("Core   ")],
            latest: MonitorSnapshot::default(),
        }
    }

    fn poll(&mut self) -> Result<MonitorSnapshot> {
        let servers = self.roster.ids(Role::Server);

        let mut lifetime = Vec::new();
        let mut population = Vec::new();
        let mut rollouts = 0;

        for packet in self.endpoint.try_recv(LOGS, &servers)? {
            match packet {
                Packet::Log(LogRecord::Performance(perf)) => {
                    population.push(perf.population() as f64);
                    lifetime.extend(perf.lifetime);
                }
                Packet::Log(LogRecord::Experience(exp)) => rollouts += exp.rollouts,
                other => debug!("monitor ignoring {} on {LOGS}", other.kind()),
            }
        }

        let snapshot = MonitorSnapshot {
            cluster: utilization(&self.samples(Role::Cluster)?),
            server: utilization(&self.samples(Role::Server)?),
            core: utilization(&self.samples(Role::Core)?),
            lifetime: mean_or_zero(&lifetime),
            population: mean_or_zero(&population),
            rollouts,
        };

        for (bar, value) in self
            .bars
            .iter_mut()
            .zip([snapshot.cluster, snapshot.server, snapshot.core])
        {
            bar.percent(value);
        }

        self.latest = snapshot.clone();
        Ok(snapshot)
    }

    fn samples(&mut self, role: Role) -> Result<Vec<UtilizationLog>> {
        let sources = self.roster.ids(role);
        let samples = self
            .endpoint
            .try_recv(UTILIZATION, &sources)?
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Log(LogRecord::Utilization(sample)) => Some(sample),
                _ => None,
            })
            .collect();

        Ok(samples)
    }

    fn render(&self) -> String {
        let mut lines: Vec<_> = self.bars.iter().map(ToString::to_string).collect();
        lines.extend(self.latest.performance());
        lines.join("\n")
    }
}

impl Actor for UtilizationMonitor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("utilization monitor started");

        ctx.run_interval(self.interval, |act, _ctx| {
            if let Err(e) = act.poll() {
                warn!("utilization poll failed: {e}");
            }
        });
    }
}

/// Polls the side channels right now.
#[derive(Message)]
#[rtype(result = "Result<MonitorSnapshot>")]
pub struct Poll;

impl Handler<Poll> for UtilizationMonitor {
    type Result = Result<MonitorSnapshot>;

    fn handle(&mut self, _msg: Poll, _ctx: &mut Self::Context) -> Self::Result {
        self.poll()
    }
}

/// Renders the gauges, one per line, plus the performance line if any.
#[derive(Message)]
#[rtype(result = "String")]
pub struct Render;

impl Handler<Render> for UtilizationMonitor {
    type Result = String;

    fn handle(&mut self, _msg: Render, _ctx: &mut Self::Context) -> Self::Result {
        self.render()
    }
}
