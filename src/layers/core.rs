use log::debug;

use super::Policy;
use crate::{
    channel::{Decision, Endpoint, NodeId, ObservationBatch, Packet, Rollout, Timeout, MODEL},
    error::Result,
    tier::{Step, Worker},
};

/// Bottom tier worker: evaluates the policy on observation batches.
pub struct CoreWorker {
    policy: Box<dyn Policy>,
    model_sources: Vec<NodeId>,
}

impl CoreWorker {
    /// Creates a new `CoreWorker`.
    ///
    /// # Arguments
    /// * `policy` - The model to evaluate.
    /// * `model_sources` - The nodes that publish model weights.
    pub fn new(policy: Box<dyn Policy>, model_sources: Vec<NodeId>) -> Self {
        Self {
            policy,
            model_sources,
        }
    }

    /// Loads the most recent model in `packets`, if any.
    fn sync(&mut self, packets: Vec<Packet>) -> bool {
        let latest = packets.into_iter().rev().find_map(|packet| match packet {
            Packet::Model(model) => Some(model),
            other => {
                debug!("core ignoring {} on {MODEL}", other.kind());
                None
            }
        });

        match latest {
            Some(model) => {
                self.policy.load(&model.weights);
                true
            }
            None => false,
        }
    }
}

impl Worker for CoreWorker {
    type Input = ObservationBatch;
    type Output = Vec<Decision>;

    async fn run(&mut self, endpoint: &mut Endpoint) -> Result<()> {
        let packets = endpoint
            .recv(MODEL, &self.model_sources, Timeout::Block)
            .await?;
        self.sync(packets);
        Ok(())
    }

    async fn step(
        &mut self,
        endpoint: &mut Endpoint,
        batch: ObservationBatch,
    ) -> Result<Step<Vec<Decision>>> {
        let packets = endpoint.try_recv(MODEL, &self.model_sources)?;
        if self.sync(packets) {
            debug!(index = endpoint.node().index; "core synced weights");
        }

        let decisions = self.policy.decide(&batch);
        let rollout = Rollout {
            observations: batch,
            decisions: decisions.clone(),
        };

        Ok(Step::new(decisions).with_experience(Packet::Experience(rollout)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::task::JoinSet;

    use super::*;
    use crate::{
        channel::{ModelPacket, Observation, Role, Switchboard, CHANNELS, EXPERIENCE},
        stats::EntityKey,
        tier::{Tier, Wiring},
    };

    const CLUSTER: NodeId = NodeId::new(Role::Cluster, 0);

    /// Answers with the first loaded weight as action, remembers every load.
    struct Echo(Arc<Mutex<Vec<f32>>>);

    impl Policy for Echo {
        fn load(&mut self, weights: &[f32]) {
            self.0.lock().unwrap().push(weights[0]);
        }

        fn decide(&mut self, batch: &ObservationBatch) -> Vec<Decision> {
            let current = *self.0.lock().unwrap().last().unwrap();
            batch
                .iter()
                .map(|obs| Decision {
                    key: obs.key,
                    action: current as usize,
                    value: f64::from(current),
                })
                .collect()
        }
    }

    fn observation(id: u64) -> Observation {
        Observation {
            key: EntityKey::new(id, 0),
            reward: None,
            features: vec![],
            tile: None,
        }
    }

    fn model(weight: f32) -> Packet {
        Packet::Model(ModelPacket::new(vec![weight]))
    }

    #[tokio::test]
    async fn stale_models_are_discarded() {
        let loads = Arc::new(Mutex::new(Vec::new()));
        let core = NodeId::new(Role::Core, 0);
        let mut board = Switchboard::new(CHANNELS, [CLUSTER, core], 16);
        let mut cluster = board.endpoint(CLUSTER).unwrap();
        let mut tasks = JoinSet::new();

        let worker = CoreWorker::new(Box::new(Echo(Arc::clone(&loads))), vec![CLUSTER]);
        let wiring = Wiring {
            utilization: vec![],
            experience: vec![CLUSTER],
        };
        let tier = Tier::spawn(Role::Core, [worker], &mut board, wiring, &mut tasks).unwrap();

        cluster.send(MODEL, model(1.0), &[core]).unwrap();
        tier.ready().await.unwrap();

        for weight in [2.0, 3.0, 4.0] {
            cluster.send(MODEL, model(weight), &[core]).unwrap();
        }

        let stepped = tier.step_one(0, vec![observation(7)]).await.unwrap();
        assert_eq!(stepped.output[0].action, 4);
        assert_eq!(*loads.lock().unwrap(), vec![1.0, 4.0]);

        let stepped = tier.step_one(0, vec![observation(8)]).await.unwrap();
        assert_eq!(stepped.output[0].action, 4);

        let experience = cluster.try_recv(EXPERIENCE, &[core]).unwrap();
        assert_eq!(experience.len(), 2);
        assert!(matches!(
            &experience[0],
            Packet::Experience(rollout) if rollout.decisions.len() == 1
        ));
    }
}
