use std::fmt;

use actix::Message;
use serde::{Deserialize, Serialize};

use super::monitor::utilization;
use crate::{
    channel::UtilizationLog,
    stats::{mean_or_zero, std_or_zero, BlobSummary},
};

/// First line of every rendered [`LogSummary`].
pub const SUMMARY_HEADER: &str = "Utilization:";

/// One epoch's scalar statistics, also the record pushed to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct EpochReport {
    /// Seconds since the previous report.
    pub timestamp: f64,
    pub lifetime_mean: f64,
    pub reward_mean: f64,
    pub value_mean: f64,
    pub lifetime_std: f64,
    pub reward_std: f64,
    pub value_std: f64,
    pub update_count: u64,
    pub rollout_count: u64,
    pub tick: u64,
}

impl EpochReport {
    /// Computes the report of `summary`. An epoch without rollouts reports zeros.
    pub fn new(summary: &BlobSummary, timestamp: f64, tick: u64) -> Self {
        Self {
            timestamp,
            lifetime_mean: mean_or_zero(&summary.lifetime),
            reward_mean: mean_or_zero(&summary.reward),
            value_mean: mean_or_zero(&summary.value),
            lifetime_std: std_or_zero(&summary.lifetime),
            reward_std: std_or_zero(&summary.reward),
            value_std: std_or_zero(&summary.value),
            update_count: summary.update_count,
            rollout_count: summary.rollout_count,
            tick,
        }
    }
}

/// Utilization samples collected from the workers of one tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierLog {
    pub name: String,
    pub samples: Vec<UtilizationLog>,
}

impl TierLog {
    pub fn new(name: impl Into<String>, samples: Vec<UtilizationLog>) -> Self {
        Self {
            name: name.into(),
            samples,
        }
    }
}

/// Tier logs merged by name, keeping the order names first appeared in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSummary {
    tiers: Vec<TierLog>,
}

impl LogSummary {
    pub fn merge<I>(logs: I) -> Self
    where
        I: IntoIterator<Item = TierLog>,
    {
        let mut tiers: Vec<TierLog> = Vec::new();

        for log in logs {
            match tiers.iter_mut().find(|t| t.name == log.name) {
                Some(tier) => tier.samples.extend(log.samples),
                None => tiers.push(log),
            }
        }

        Self { tiers }
    }

    pub fn tiers(&self) -> &[TierLog] {
        &self.tiers
    }
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SUMMARY_HEADER}")?;

        for tier in &self.tiers {
            let runs: Vec<_> = tier.samples.iter().map(|s| s.run).collect();
            let waits: Vec<_> = tier.samples.iter().map(|s| s.wait).collect();

            write!(
                f,
                "\n  {:<8} samples: {:>3}  run: {:>8.4}s  wait: {:>8.4}s  util: {:>5.1}%",
                tier.name,
                tier.samples.len(),
                mean_or_zero(&runs),
                mean_or_zero(&waits),
                100.0 * utilization(&tier.samples),
            )?;
        }

        Ok(())
    }
}
