//! Pools of independently scheduled workers sharing one step contract.

mod harness;
mod stopwatch;

use std::{fmt, future::Future};

use futures::future;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
};

use crate::{
    channel::{Endpoint, NodeId, Packet, Role, Switchboard, UtilizationLog},
    error::{Result, TrinityError},
};

pub use stopwatch::Stopwatch;

/// Pending step requests a worker may queue up.
const REQUEST_BUFFER: usize = 8;

/// Behaviour of one worker in a tier.
///
/// The harness calls [`Worker::run`] once, then [`Worker::step`] for every
/// request it receives. Experience returned by a step is published on the
/// experience channel by the harness, and so is the step's utilization sample
/// whether the step succeeded or not.
pub trait Worker: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Mandatory synchronization before the first step, typically a blocking
    /// receive of the initial model. Ready right away by default.
    fn run(&mut self, endpoint: &mut Endpoint) -> impl Future<Output = Result<()>> + Send {
        let _ = endpoint;
        async { Ok(()) }
    }

    /// Performs one unit of work.
    fn step(
        &mut self,
        endpoint: &mut Endpoint,
        input: Self::Input,
    ) -> impl Future<Output = Result<Step<Self::Output>>> + Send;
}

/// What a worker hands back from one step.
#[derive(Debug)]
pub struct Step<O> {
    pub output: O,
    pub experience: Option<Packet>,
}

impl<O> Step<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            experience: None,
        }
    }

    pub fn with_experience(mut self, experience: Packet) -> Self {
        self.experience = Some(experience);
        self
    }
}

/// What the caller of a tier gets back for one worker's step.
#[derive(Debug)]
pub struct Stepped<O> {
    pub node: NodeId,
    pub output: O,
    pub experience: Option<Packet>,
    pub utilization: UtilizationLog,
}

/// Lifecycle of a worker, published by its harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    AwaitingSync,
    Ready,
    Stepping,
    Terminated,
}

/// Who hears about a tier's side traffic.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    /// Receivers of every step's utilization sample.
    pub utilization: Vec<NodeId>,
    /// Receivers of the experience steps produce.
    pub experience: Vec<NodeId>,
}

struct Request<W: Worker> {
    input: W::Input,
    reply: oneshot::Sender<Result<Stepped<W::Output>>>,
}

struct WorkerHandle<W: Worker> {
    node: NodeId,
    requests: mpsc::Sender<Request<W>>,
    state: watch::Receiver<WorkerState>,
}

impl<W: Worker> Clone for WorkerHandle<W> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            requests: self.requests.clone(),
            state: self.state.clone(),
        }
    }
}

impl<W: Worker> WorkerHandle<W> {
    async fn step(&self, input: W::Input) -> Result<Stepped<W::Output>> {
        let (reply, response) = oneshot::channel();
        let request = Request { input, reply };

        self.requests
            .send(request)
            .await
            .map_err(|_| TrinityError::WorkerGone(self.node))?;

        response
            .await
            .map_err(|_| TrinityError::WorkerGone(self.node))?
    }
}

/// A fixed-size pool of workers of one kind.
///
/// Cloning a tier is cheap, clones drive the same workers.
pub struct Tier<W: Worker> {
    role: Role,
    workers: Vec<WorkerHandle<W>>,
}

impl<W: Worker> Clone for Tier<W> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            workers: self.workers.clone(),
        }
    }
}

impl<W: Worker> fmt::Debug for Tier<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("role", &self.role)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl<W: Worker> Tier<W> {
    /// Spawns one harness task per worker.
    ///
    /// Worker `i` becomes node `(role, i)` and claims that node's endpoint.
    ///
    /// # Arguments
    /// * `role` - The layer these workers live in.
    /// * `workers` - The workers, in index order.
    /// * `switchboard` - Where the workers' endpoints are claimed from.
    /// * `wiring` - Receivers of the tier's utilization and experience traffic.
    /// * `tasks` - The set the harness tasks are spawned into.
    ///
    /// # Returns
    /// `ChannelResolution` if any worker's endpoint can't be claimed.
    pub fn spawn<I>(
        role: Role,
        workers: I,
        switchboard: &mut Switchboard,
        wiring: Wiring,
        tasks: &mut JoinSet<Result<()>>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = W>,
    {
        let mut handles = Vec::new();

        for (index, worker) in workers.into_iter().enumerate() {
            let node = NodeId::new(role, index);
            let endpoint = switchboard.endpoint(node)?;
            let (requests, inbox) = mpsc::channel(REQUEST_BUFFER);
            let (state_tx, state) = watch::channel(WorkerState::Uninitialized);

            tasks.spawn(harness::drive(
                worker,
                endpoint,
                inbox,
                state_tx,
                wiring.clone(),
            ));

            handles.push(WorkerHandle {
                node,
                requests,
                state,
            });
        }

        Ok(Self {
            role,
            workers: handles,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Addresses of the tier's workers, in index order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.workers.iter().map(|w| w.node).collect()
    }

    /// Current lifecycle state of every worker.
    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| *w.state.borrow()).collect()
    }

    /// Waits until every worker has finished its initial synchronization.
    ///
    /// # Returns
    /// `WorkerGone` if a worker terminated instead.
    pub async fn ready(&self) -> Result<()> {
        for worker in &self.workers {
            let mut state = worker.state.clone();
            let reached = state
                .wait_for(|s| !matches!(s, WorkerState::Uninitialized | WorkerState::AwaitingSync))
                .await
                .map(|s| *s)
                .unwrap_or(WorkerState::Terminated);

            if reached == WorkerState::Terminated {
                return Err(TrinityError::WorkerGone(worker.node));
            }
        }

        Ok(())
    }

    /// Steps worker `i` with `inputs[i]`, all concurrently, and waits for
    /// every reply. Extra inputs, or extra workers, are left out. An empty
    /// tier returns at once.
    ///
    /// # Returns
    /// The first error any worker reports.
    pub async fn step(&self, inputs: Vec<W::Input>) -> Result<Vec<Stepped<W::Output>>> {
        let steps = self
            .workers
            .iter()
            .zip(inputs)
            .map(|(worker, input)| worker.step(input));

        future::try_join_all(steps).await
    }

    /// Steps every worker with a copy of `input`.
    pub async fn step_all(&self, input: W::Input) -> Result<Vec<Stepped<W::Output>>>
    where
        W::Input: Clone,
    {
        self.step(vec![input; self.len()]).await
    }

    /// Steps a single worker.
    ///
    /// # Returns
    /// `WorkerGone` if the tier has no worker `index`.
    pub async fn step_one(&self, index: usize, input: W::Input) -> Result<Stepped<W::Output>> {
        let worker = self
            .workers
            .get(index)
            .ok_or(TrinityError::WorkerGone(NodeId::new(self.role, index)))?;

        worker.step(input).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::{
        LogRecord, ModelPacket, Rollout, Timeout, CHANNELS, EXPERIENCE, MODEL, UTILIZATION,
    };

    const PARENT: NodeId = NodeId::new(Role::Server, 0);

    /// Doubles its input, fails on negatives, waits for a model first.
    struct Doubler {
        synced: bool,
    }

    impl Worker for Doubler {
        type Input = i64;
        type Output = i64;

        async fn run(&mut self, endpoint: &mut Endpoint) -> Result<()> {
            endpoint.recv(MODEL, &[PARENT], Timeout::Block).await?;
            self.synced = true;
            Ok(())
        }

        async fn step(&mut self, _endpoint: &mut Endpoint, input: i64) -> Result<Step<i64>> {
            assert!(self.synced);
            if input < 0 {
                return Err(TrinityError::InvalidConfig("negative".into()));
            }

            Ok(Step::new(input * 2).with_experience(Packet::Experience(Rollout::default())))
        }
    }

    fn setup(n: usize) -> (Switchboard, Endpoint, JoinSet<Result<()>>) {
        let nodes = (0..n)
            .map(|i| NodeId::new(Role::Core, i))
            .chain([PARENT]);
        let mut board = Switchboard::new(CHANNELS, nodes, 16);
        let parent = board.endpoint(PARENT).unwrap();
        (board, parent, JoinSet::new())
    }

    fn wiring() -> Wiring {
        Wiring {
            utilization: vec![PARENT],
            experience: vec![PARENT],
        }
    }

    fn doublers(n: usize) -> Vec<Doubler> {
        (0..n).map(|_| Doubler { synced: false }).collect()
    }

    #[tokio::test]
    async fn workers_wait_for_sync_before_stepping() {
        let (mut board, parent, mut tasks) = setup(2);
        let tier = Tier::spawn(Role::Core, doublers(2), &mut board, wiring(), &mut tasks).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tier
            .states()
            .iter()
            .all(|s| *s == WorkerState::AwaitingSync));

        let model = Packet::Model(ModelPacket::new(vec![0.0]));
        parent.send(MODEL, model, &tier.nodes()).unwrap();
        tier.ready().await.unwrap();

        let outputs = tier.step(vec![1, 2]).await.unwrap();
        let values: Vec<_> = outputs.iter().map(|s| s.output).collect();
        assert_eq!(values, vec![2, 4]);
        assert!(tier.states().iter().all(|s| *s == WorkerState::Ready));
    }

    #[tokio::test]
    async fn empty_tier_steps_without_blocking() {
        let (mut board, _parent, mut tasks) = setup(0);
        let tier = Tier::<Doubler>::spawn(Role::Core, vec![], &mut board, wiring(), &mut tasks)
            .unwrap();

        let outputs = tokio::time::timeout(Duration::from_secs(1), tier.step_all(3))
            .await
            .expect("an empty tier must not block")
            .unwrap();

        assert!(outputs.is_empty());
        tier.ready().await.unwrap();
    }

    #[tokio::test]
    async fn utilization_is_sent_even_when_a_step_fails() {
        let (mut board, mut parent, mut tasks) = setup(1);
        let tier = Tier::spawn(Role::Core, doublers(1), &mut board, wiring(), &mut tasks).unwrap();
        let core = tier.nodes();
        parent
            .send(MODEL, Packet::Model(ModelPacket::new(vec![0.0])), &core)
            .unwrap();

        assert!(tier.step(vec![-1]).await.is_err());

        let samples = parent.recv(UTILIZATION, &core, Timeout::Poll).await.unwrap();
        assert!(matches!(
            samples.as_slice(),
            [Packet::Log(LogRecord::Utilization(_))]
        ));
        let experience = parent.recv(EXPERIENCE, &core, Timeout::Poll).await.unwrap();
        assert!(experience.is_empty());

        let stepped = tier.step_one(0, 5).await.unwrap();
        assert_eq!(stepped.output, 10);
        assert!(stepped.utilization.run >= 0.0);
        let experience = parent.recv(EXPERIENCE, &core, Timeout::Poll).await.unwrap();
        assert_eq!(experience.len(), 1);
    }

    #[tokio::test]
    async fn missing_worker_is_reported_gone() {
        let (mut board, _parent, mut tasks) = setup(1);
        let tier = Tier::spawn(Role::Core, doublers(1), &mut board, wiring(), &mut tasks).unwrap();

        let err = tier.step_one(3, 1).await.unwrap_err();
        assert!(matches!(err, TrinityError::WorkerGone(node) if node.index == 3));
    }

    #[tokio::test]
    async fn failed_sync_terminates_the_worker() {
        struct Broken;

        impl Worker for Broken {
            type Input = ();
            type Output = ();

            async fn run(&mut self, endpoint: &mut Endpoint) -> Result<()> {
                endpoint.recv("Nowhere", &[PARENT], Timeout::Block).await?;
                Ok(())
            }

            async fn step(&mut self, _endpoint: &mut Endpoint, _input: ()) -> Result<Step<()>> {
                Ok(Step::new(()))
            }
        }

        let (mut board, _parent, mut tasks) = setup(1);
        let tier = Tier::spawn(Role::Core, [Broken], &mut board, wiring(), &mut tasks).unwrap();

        assert!(matches!(tier.ready().await, Err(TrinityError::WorkerGone(_))));
        let joined = tasks.join_next().await.unwrap().unwrap();
        assert!(matches!(joined, Err(TrinityError::ChannelResolution { .. })));
        assert!(tier.step_all(()).await.is_err());
    }
}
