use std::{env, fs};

use actix::prelude::*;
use anyhow::Context as _;
use log::info;
use trinity::{
    channel::{Decision, NodeId, Observation, ObservationBatch, Role, Rollout, TileVisit},
    layers::{ClusterWorker, CoreWorker, Environment, Policy, ServerWorker, Trainer},
    stats::EntityKey,
    telemetry::{monitor::Render, EpochReport},
    Config, Trinity,
};

const FEATURES: usize = 4;
const TILES: [&str; 3] = ["grass", "forest", "water"];

/// Entities wander over three kinds of tiles and retire after a fixed span.
struct Arena {
    server: u64,
    next_id: u64,
    entities: Vec<(u64, u64)>,
}

impl Arena {
    fn new(server: usize, population: u64) -> Self {
        Self {
            server: server as u64,
            next_id: population,
            entities: (0..population).map(|id| (id, 0)).collect(),
        }
    }

    fn lifespan(id: u64) -> u64 {
        3 + id % 5
    }
}

impl Environment for Arena {
    fn observe(&mut self) -> ObservationBatch {
        self.entities
            .iter()
            .map(|&(id, age)| Observation {
                key: EntityKey::new(id, self.server),
                reward: Some(1.0 / (age + 1) as f64),
                features: (0..FEATURES).map(|f| ((id + age + f as u64) % 3) as f32).collect(),
                tile: Some(TileVisit {
                    tex: TILES[((id + age) % 3) as usize].to_string(),
                    first_visit: age < 3,
                }),
            })
            .collect()
    }

    fn apply(&mut self, decisions: &[Decision]) -> Vec<EntityKey> {
        for decision in decisions {
            if let Some(entity) = self.entities.iter_mut().find(|(id, _)| *id == decision.key.ent_id) {
                entity.1 += 1;
            }
        }

        let mut retired = Vec::new();
        for entity in &mut self.entities {
            if entity.1 >= Self::lifespan(entity.0) {
                retired.push(EntityKey::new(entity.0, self.server));
                *entity = (self.next_id, 0);
                self.next_id += 1;
            }
        }

        retired
    }

    fn population(&self) -> usize {
        self.entities.len()
    }
}

/// Linear value estimate over the observation features.
#[derive(Default)]
struct Linear {
    weights: Vec<f32>,
}

impl Policy for Linear {
    fn load(&mut self, weights: &[f32]) {
        self.weights = weights.to_vec();
    }

    fn decide(&mut self, batch: &ObservationBatch) -> Vec<Decision> {
        batch
            .iter()
            .map(|obs| {
                let value: f32 = obs.features.iter().zip(&self.weights).map(|(x, w)| x * w).sum();
                Decision {
                    key: obs.key,
                    action: (value.abs() as usize) % FEATURES,
                    value: f64::from(value),
                }
            })
            .collect()
    }
}

/// Nudges the weights towards the features of rewarded observations.
struct Hebbian {
    rate: f32,
}

impl Trainer for Hebbian {
    fn update(&mut self, weights: &[f32], rollouts: &[Rollout]) -> Vec<f32> {
        let mut next = weights.to_vec();
        for obs in rollouts.iter().flat_map(|r| &r.observations) {
            let reward = obs.reward.unwrap_or(0.0) as f32;
            for (w, x) in next.iter_mut().zip(&obs.features) {
                *w += self.rate * reward * x;
            }
        }

        next
    }
}

/// Dashboard stand-in that logs every report it receives.
struct Console;

impl Actor for Console {
    type Context = Context<Self>;
}

impl Handler<EpochReport> for Console {
    type Result = ();

    fn handle(&mut self, report: EpochReport, _ctx: &mut Self::Context) {
        info!(
            tick = report.tick;
            "dashboard: lifetime={:.3} reward={:.3} value={:.3}",
            report.lifetime_mean, report.reward_mean, report.value_mean
        );
    }
}

async fn run(config: Config, epochs: u64) -> anyhow::Result<()> {
    let dashboard = Console.start().recipient();
    let ticks = config.ticks_per_epoch;
    let sync_timeout = config.sync_timeout();

    let mut trinity = Trinity::launch(
        config,
        Some(dashboard),
        |_, roster, servers, quill| {
            ClusterWorker::new(
                Box::new(Hebbian { rate: 0.01 }),
                vec![0.1; FEATURES],
                servers.clone(),
                roster.ids(Role::Core),
                quill.clone(),
                ticks,
            )
            .with_sync_timeout(sync_timeout)
        },
        |i, _, cores| ServerWorker::new(Box::new(Arena::new(i, 8)), cores.clone(), vec![NodeId::MONITOR]),
        |_, roster| CoreWorker::new(Box::<Linear>::default(), roster.ids(Role::Cluster)),
    )
    .await
    .context("failed to launch trinity")?;

    for _ in 0..epochs {
        let text = trinity.step().await.context("epoch failed")?;
        println!("{text}");

        let bars = trinity.monitor().send(Render).await?;
        println!("{bars}");
    }

    trinity.shutdown().await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let config: Config = match args.next() {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("invalid config file {path}"))?
        }
        None => Config::default(),
    };

    let epochs = args
        .next()
        .map(|n| n.parse::<u64>())
        .transpose()
        .context("epochs must be a non negative integer")?
        .unwrap_or(3);

    System::new().block_on(run(config, epochs))
}
