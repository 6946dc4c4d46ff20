use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::stats::EntityKey;

/// A payload travelling through the switchboard.
#[derive(Debug, Clone)]
pub enum Packet {
    Model(ModelPacket),
    Experience(Rollout),
    Log(LogRecord),
}

impl Packet {
    /// Short name used when logging unexpected payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Model(_) => "model",
            Packet::Experience(_) => "experience",
            Packet::Log(LogRecord::Utilization(_)) => "log/utilization",
            Packet::Log(LogRecord::Performance(_)) => "log/performance",
            Packet::Log(LogRecord::Experience(_)) => "log/experience",
        }
    }
}

/// A full snapshot of the model weights. There is no version tag, the most
/// recently received snapshot wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPacket {
    pub weights: Arc<[f32]>,
}

impl ModelPacket {
    pub fn new(weights: impl Into<Arc<[f32]>>) -> Self {
        Self {
            weights: weights.into(),
        }
    }
}

/// The tile an entity stands on when observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TileVisit {
    /// Texture key of the tile's material, used as the category label.
    pub tex: String,
    /// Whether this entity has never stood on this tile before.
    pub first_visit: bool,
}

/// What one entity sees on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: EntityKey,
    pub reward: Option<f64>,
    pub features: Vec<f32>,
    pub tile: Option<TileVisit>,
}

pub type ObservationBatch = Vec<Observation>;

/// A core worker's answer for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub key: EntityKey,
    pub action: usize,
    pub value: f64,
}

/// Observations paired with the decisions taken on them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollout {
    pub observations: ObservationBatch,
    pub decisions: Vec<Decision>,
}

/// Closed set of telemetry records. Absent numeric fields read as `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Utilization(UtilizationLog),
    Performance(PerformanceLog),
    Experience(ExperienceLog),
}

/// Seconds a worker spent computing versus waiting for its next request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UtilizationLog {
    pub run: f64,
    pub wait: f64,
}

/// Lifetimes of the entities a server retired plus its live population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceLog {
    #[serde(default)]
    pub lifetime: Vec<f64>,
    #[serde(default)]
    pub population: Option<usize>,
}

impl PerformanceLog {
    pub fn population(&self) -> usize {
        self.population.unwrap_or(0)
    }
}

/// How much experience a server produced during one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceLog {
    #[serde(default)]
    pub rollouts: u64,
    #[serde(default)]
    pub updates: u64,
}
