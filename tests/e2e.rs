use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use trinity::{
    channel::{Decision, Endpoint, NodeId, Observation, ObservationBatch, Role, Rollout},
    layers::{ClusterWorker, CoreWorker, Environment, Policy, ServerWorker, Trainer},
    stats::EntityKey,
    status,
    telemetry::{monitor::Render, quill::Latest, store, SUMMARY_HEADER},
    tier::{Step, Worker},
    ClusterOutput, Config, Result, Trinity, TrinityError,
};

/// Replays a fixed value schedule per entity; an entity retires once its
/// schedule is exhausted.
struct Scripted {
    schedule: Vec<Vec<f32>>,
    ages: Vec<usize>,
}

impl Scripted {
    fn new(schedule: Vec<Vec<f32>>) -> Self {
        let ages = vec![0; schedule.len()];
        Self { schedule, ages }
    }

    fn alive(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.schedule.len()).filter(|&i| self.ages[i] < self.schedule[i].len())
    }
}

impl Environment for Scripted {
    fn observe(&mut self) -> ObservationBatch {
        self.alive()
            .map(|i| Observation {
                key: EntityKey::new(i as u64, 0),
                reward: Some(0.0),
                features: vec![self.schedule[i][self.ages[i]]],
                tile: None,
            })
            .collect()
    }

    fn apply(&mut self, decisions: &[Decision]) -> Vec<EntityKey> {
        let mut retired = Vec::new();
        for decision in decisions {
            let i = decision.key.ent_id as usize;
            self.ages[i] += 1;
            if self.ages[i] == self.schedule[i].len() {
                retired.push(decision.key);
            }
        }

        retired.sort();
        retired
    }

    fn population(&self) -> usize {
        self.alive().count()
    }
}

/// Reports the first feature as the value estimate.
struct Mirror;

impl Policy for Mirror {
    fn load(&mut self, _weights: &[f32]) {}

    fn decide(&mut self, batch: &ObservationBatch) -> Vec<Decision> {
        batch
            .iter()
            .map(|obs| Decision {
                key: obs.key,
                action: 0,
                value: f64::from(obs.features[0]),
            })
            .collect()
    }
}

struct Frozen;

impl Trainer for Frozen {
    fn update(&mut self, weights: &[f32], _rollouts: &[Rollout]) -> Vec<f32> {
        weights.to_vec()
    }
}

/// Cluster stand-in whose `n`th step fails with whatever `fail(n)` says.
struct Flaky {
    calls: Arc<AtomicU64>,
    fail: fn(u64) -> Option<TrinityError>,
}

impl Worker for Flaky {
    type Input = ();
    type Output = ClusterOutput;

    async fn step(&mut self, _endpoint: &mut Endpoint, _input: ()) -> Result<Step<ClusterOutput>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = (self.fail)(n) {
            return Err(e);
        }

        Ok(Step::new(ClusterOutput {
            save: format!("[epoch {n}] Saved model"),
            ..Default::default()
        }))
    }
}

/// Worker with nothing to do, fills the tiers below a [`Flaky`] cluster.
struct Idle;

impl Worker for Idle {
    type Input = ();
    type Output = ();

    async fn step(&mut self, _endpoint: &mut Endpoint, _input: ()) -> Result<Step<()>> {
        Ok(Step::new(()))
    }
}

async fn launch_flaky(
    name: &str,
    fail: fn(u64) -> Option<TrinityError>,
) -> (Trinity<Flaky, Idle, Idle>, Arc<AtomicU64>) {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);

    let trinity = Trinity::launch(
        config(name, 0, 0, 1),
        None,
        move |_, _, _, _| Flaky {
            calls: Arc::clone(&counter),
            fail,
        },
        |_, _, _| Idle,
        |_, _| Idle,
    )
    .await
    .unwrap();

    (trinity, calls)
}

fn config(name: &str, n_server: usize, n_core: usize, ticks: usize) -> Config {
    let model_dir: PathBuf =
        std::env::temp_dir().join(format!("trinity-e2e-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&model_dir);

    Config {
        n_server,
        n_core,
        model_dir,
        ticks_per_epoch: ticks,
        ..Default::default()
    }
}

async fn launch(
    config: Config,
    schedule: Vec<Vec<f32>>,
) -> Trinity<ClusterWorker, ServerWorker, CoreWorker> {
    let ticks = config.ticks_per_epoch;
    let sync_timeout = config.sync_timeout();

    Trinity::launch(
        config,
        None,
        |_, roster, servers, quill| {
            ClusterWorker::new(
                Box::new(Frozen),
                vec![0.0],
                servers.clone(),
                roster.ids(Role::Core),
                quill.clone(),
                ticks,
            )
            .with_sync_timeout(sync_timeout)
        },
        |_, _, cores| {
            ServerWorker::new(
                Box::new(Scripted::new(schedule.clone())),
                cores.clone(),
                vec![NodeId::MONITOR],
            )
        },
        |_, roster| CoreWorker::new(Box::new(Mirror), roster.ids(Role::Cluster)),
    )
    .await
    .unwrap()
}

#[actix_rt::test]
async fn epoch_rolls_entity_values_into_one_summary() {
    let config = config("values", 1, 2, 3);
    let stat_path = config.stat_path();
    let store_path = config.store_path();

    let mut trinity = launch(config, vec![vec![1.0, 3.0], vec![2.0], vec![4.0, 4.0, 4.0]]).await;
    let text = trinity.step().await.unwrap();

    let summaries = store::read_all(&store_path).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].value, vec![2.0, 2.0, 4.0]);
    assert_eq!(summaries[0].lifetime, vec![1.0, 2.0, 3.0]);
    assert_eq!(summaries[0].rollout_count, 3);
    assert_eq!(summaries[0].update_count, 6);

    let blocks = status::read_blocks(&stat_path).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].text(), text);
    assert!(blocks[0].save.starts_with("[epoch 0]"));
    assert!(blocks[0].stats.starts_with("Updates:  (Total) 6"));

    let tiers: Vec<_> = blocks[0]
        .summary
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().next().unwrap().to_string())
        .collect();
    assert_eq!(blocks[0].summary.lines().next(), Some(SUMMARY_HEADER));
    assert_eq!(tiers, vec!["Server", "Core", "Cluster"]);

    assert_eq!(trinity.quill().send(Latest).await.unwrap(), Some((2.0, 0.0)));
    assert_eq!(trinity.epoch(), 1);
    trinity.shutdown().await.unwrap();
}

#[actix_rt::test]
async fn empty_tiers_do_not_block_the_epoch_loop() {
    for (name, n_server, n_core) in [("no-servers", 0, 2), ("no-cores", 1, 0)] {
        let config = config(name, n_server, n_core, 2);
        let stat_path = config.stat_path();

        let mut trinity = launch(config, vec![vec![1.0]]).await;
        assert_eq!(trinity.sizes(), [1, n_server, n_core]);

        for _ in 0..2 {
            let text = trinity.step().await.unwrap();
            assert!(text.contains("Rollouts: (Total) 0"));
        }

        let blocks = status::read_blocks(&stat_path).await.unwrap();
        let saves: Vec<_> = blocks.iter().map(|b| b.save.split(']').next().unwrap()).collect();
        assert_eq!(saves, vec!["[epoch 0", "[epoch 1"]);
        trinity.shutdown().await.unwrap();
    }
}

#[actix_rt::test]
async fn invalid_config_is_rejected_before_spawning() {
    let config = Config {
        n_cluster: 0,
        ..config("invalid", 1, 1, 1)
    };
    let ticks = config.ticks_per_epoch;
    let sync_timeout = config.sync_timeout();

    let result = Trinity::launch(
        config,
        None,
        |_, roster, servers, quill| {
            ClusterWorker::new(
                Box::new(Frozen),
                vec![],
                servers.clone(),
                roster.ids(Role::Core),
                quill.clone(),
                ticks,
            )
            .with_sync_timeout(sync_timeout)
        },
        |_, _, cores| ServerWorker::new(Box::new(Scripted::new(vec![])), cores.clone(), vec![]),
        |_, roster| CoreWorker::new(Box::new(Mirror), roster.ids(Role::Cluster)),
    )
    .await;

    assert!(matches!(result, Err(trinity::TrinityError::InvalidConfig(_))));
}

#[actix_rt::test]
async fn run_skips_an_epoch_that_fails_softly() {
    let (mut trinity, calls) = launch_flaky("soft-failure", |n| {
        (n == 1).then(|| TrinityError::NotFinalized(EntityKey::new(7, 0)))
    })
    .await;

    let outcome = tokio::time::timeout(Duration::from_millis(200), trinity.run()).await;
    assert!(outcome.is_err(), "run only returns on a fatal error");

    let calls = calls.load(Ordering::SeqCst);
    assert!(calls > 2, "run stopped after the failed epoch: calls={calls}");
    assert!(trinity.epoch() >= calls - 2 && trinity.epoch() < calls);

    let saves: Vec<_> = status::read_blocks(&trinity.config().stat_path())
        .await
        .unwrap()
        .into_iter()
        .map(|block| block.save)
        .take(2)
        .collect();
    assert_eq!(saves, vec!["[epoch 0] Saved model", "[epoch 2] Saved model"]);
    trinity.shutdown().await.unwrap();
}

#[actix_rt::test]
async fn run_returns_the_first_fatal_error() {
    let (mut trinity, calls) = launch_flaky("fatal-failure", |n| {
        (n == 2).then(|| TrinityError::WorkerGone(NodeId::new(Role::Server, 3)))
    })
    .await;

    let result = tokio::time::timeout(Duration::from_secs(5), trinity.run())
        .await
        .expect("a fatal error ends the run");

    assert!(matches!(result, Err(TrinityError::WorkerGone(node)) if node.index == 3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(trinity.epoch(), 2);
    trinity.shutdown().await.unwrap();
}

#[actix_rt::test]
async fn monitor_keeps_up_with_fast_epochs_on_small_inboxes() {
    let config = Config {
        channel_capacity: 32,
        monitor_interval_ms: 60_000,
        ..config("monitor-capacity", 1, 2, 16)
    };
    assert!(config.monitor_capacity() > config.channel_capacity);

    let mut trinity = launch(config, vec![vec![1.0; 4]; 4]).await;
    for _ in 0..20 {
        trinity.step().await.unwrap();
    }

    let bars = trinity.monitor().send(Render).await.unwrap();
    let cluster = bars.lines().next().unwrap();
    assert!(cluster.starts_with("Cluster"));
    assert!(!cluster.contains("  0%"), "cluster samples were dropped: {cluster}");
    trinity.shutdown().await.unwrap();
}
