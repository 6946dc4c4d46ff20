//! Named, directional, timeout-capable message passing between nodes.
//!
//! A [`Switchboard`] is built once with every channel name and every node
//! known up front. Each node then claims its own [`Endpoint`], which owns one
//! bounded inbox per channel. Sending clones the payload into the inbox of
//! every destination; receiving drains the caller's inbox, keeping only what
//! came from the requested sources and stashing the rest for later.

mod packet;

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use log::{debug, warn};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time,
};

use crate::error::{Result, TrinityError};

pub use packet::{
    Decision, ExperienceLog, LogRecord, ModelPacket, Observation, ObservationBatch, Packet,
    PerformanceLog, Rollout, TileVisit, UtilizationLog,
};

/// Model weight broadcasts, from the cluster tier down to the cores.
pub const MODEL: &str = "Model";
/// Experience produced by a worker's step.
pub const EXPERIENCE: &str = "Experience";
/// Per-step run/wait samples.
pub const UTILIZATION: &str = "Utilization";
/// Performance and experience telemetry from the server tier.
pub const LOGS: &str = "Logs";

/// Every channel a trinity switchboard is wired with.
pub const CHANNELS: [&str; 4] = [MODEL, EXPERIENCE, UTILIZATION, LOGS];

/// The layer a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Cluster,
    Server,
    Core,
    Monitor,
}

impl Role {
    /// Human readable name used in rendered summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Cluster => "Cluster",
            Role::Server => "Server",
            Role::Core => "Core",
            Role::Monitor => "Monitor",
        }
    }
}

/// Address of anything owning an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub role: Role,
    pub index: usize,
}

impl NodeId {
    /// The single utilization monitor node.
    pub const MONITOR: NodeId = NodeId::new(Role::Monitor, 0);

    pub const fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role.name().to_lowercase(), self.index)
    }
}

/// How many workers each tier has, hence which nodes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roster {
    pub n_cluster: usize,
    pub n_server: usize,
    pub n_core: usize,
}

impl Roster {
    pub fn new(n_cluster: usize, n_server: usize, n_core: usize) -> Self {
        Self {
            n_cluster,
            n_server,
            n_core,
        }
    }

    /// Number of workers in the tier playing `role`.
    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Cluster => self.n_cluster,
            Role::Server => self.n_server,
            Role::Core => self.n_core,
            Role::Monitor => 1,
        }
    }

    /// The addresses of every worker in the tier playing `role`.
    pub fn ids(&self, role: Role) -> Vec<NodeId> {
        (0..self.count(role))
            .map(|index| NodeId::new(role, index))
            .collect()
    }

    /// Every node in the system, the monitor included.
    pub fn all(&self) -> Vec<NodeId> {
        [Role::Cluster, Role::Server, Role::Core, Role::Monitor]
            .into_iter()
            .flat_map(|role| self.ids(role))
            .collect()
    }
}

/// How long a receive may wait for a first payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until at least one payload arrives.
    Block,
    /// Return immediately with whatever is already there.
    Poll,
    /// Wait up to the given duration.
    After(Duration),
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        match value {
            None => Timeout::Block,
            Some(d) if d.is_zero() => Timeout::Poll,
            Some(d) => Timeout::After(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Some(value).into()
    }
}

#[derive(Debug)]
struct Envelope {
    source: NodeId,
    packet: Packet,
}

type Routes = HashMap<String, HashMap<NodeId, mpsc::Sender<Envelope>>>;

/// Owner of every inbox until each node claims its endpoint.
pub struct Switchboard {
    routes: Arc<Routes>,
    inboxes: HashMap<NodeId, HashMap<String, mpsc::Receiver<Envelope>>>,
}

impl Switchboard {
    /// Creates a new `Switchboard`.
    ///
    /// # Arguments
    /// * `channels` - The channel names to wire.
    /// * `nodes` - Every node that will ever send or receive.
    /// * `capacity` - The bound of each (channel, node) inbox.
    ///
    /// # Returns
    /// A new `Switchboard` instance.
    pub fn new<'a, C, N>(channels: C, nodes: N, capacity: usize) -> Self
    where
        C: IntoIterator<Item = &'a str>,
        N: IntoIterator<Item = NodeId>,
    {
        Self::with_capacities(channels, nodes, |_| capacity)
    }

    /// Same as [`Switchboard::new`], with the inbox bound chosen per node.
    pub fn with_capacities<'a, C, N, F>(channels: C, nodes: N, capacity: F) -> Self
    where
        C: IntoIterator<Item = &'a str>,
        N: IntoIterator<Item = NodeId>,
        F: Fn(NodeId) -> usize,
    {
        let nodes: Vec<_> = nodes.into_iter().collect();
        let mut routes = Routes::new();
        let mut inboxes: HashMap<NodeId, HashMap<String, _>> = HashMap::new();

        for channel in channels {
            let route = routes.entry(channel.to_string()).or_default();

            for &node in &nodes {
                let (tx, rx) = mpsc::channel(capacity(node));
                route.insert(node, tx);
                inboxes
                    .entry(node)
                    .or_default()
                    .insert(channel.to_string(), rx);
            }
        }

        Self {
            routes: Arc::new(routes),
            inboxes,
        }
    }

    /// A switchboard with the standard channels for every node of `roster`.
    ///
    /// The monitor hears from every worker, so its inboxes get their own
    /// bound, `monitor_capacity`.
    pub fn for_roster(roster: &Roster, capacity: usize, monitor_capacity: usize) -> Self {
        Self::with_capacities(CHANNELS, roster.all(), |node| {
            if node == NodeId::MONITOR {
                monitor_capacity
            } else {
                capacity
            }
        })
    }

    /// Hands the inboxes of `node` over to a new endpoint.
    ///
    /// # Returns
    /// `ChannelResolution` if the node is unknown or its endpoint was already claimed.
    pub fn endpoint(&mut self, node: NodeId) -> Result<Endpoint> {
        let receivers = self
            .inboxes
            .remove(&node)
            .ok_or_else(|| TrinityError::ChannelResolution {
                channel: "*".to_string(),
                node: Some(node),
            })?;

        let inboxes = receivers
            .into_iter()
            .map(|(channel, rx)| {
                let inbox = Inbox {
                    rx,
                    stash: HashMap::new(),
                };
                (channel, inbox)
            })
            .collect();

        Ok(Endpoint {
            node,
            routes: Arc::clone(&self.routes),
            inboxes,
        })
    }
}

struct Inbox {
    rx: mpsc::Receiver<Envelope>,
    stash: HashMap<NodeId, VecDeque<Packet>>,
}

impl Inbox {
    fn keep(&mut self, envelope: Envelope) {
        self.stash
            .entry(envelope.source)
            .or_default()
            .push_back(envelope.packet);
    }

    fn drain_ready(&mut self) {
        while let Ok(envelope) = self.rx.try_recv() {
            self.keep(envelope);
        }
    }

    fn take(&mut self, sources: &[NodeId]) -> Vec<Packet> {
        let mut packets = Vec::new();
        for source in sources {
            if let Some(queue) = self.stash.get_mut(source) {
                packets.extend(queue.drain(..));
            }
        }

        packets
    }

    /// Waits until something from `sources` shows up. Cancel safe, anything
    /// read before cancellation stays in the stash.
    async fn wait(&mut self, sources: &[NodeId]) -> Vec<Packet> {
        while let Some(envelope) = self.rx.recv().await {
            let wanted = sources.contains(&envelope.source);
            self.keep(envelope);

            if wanted {
                self.drain_ready();
                return self.take(sources);
            }
        }

        Vec::new()
    }
}

/// A node's handle on the switchboard.
pub struct Endpoint {
    node: NodeId,
    routes: Arc<Routes>,
    inboxes: HashMap<String, Inbox>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("node", &self.node).finish()
    }
}

impl Endpoint {
    /// The address other nodes see as the source of this endpoint's sends.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Fire-and-forget send of `packet` to every node in `destinations`.
    ///
    /// All destinations are resolved before anything is sent. A full inbox
    /// drops its copy with a warning; a receiver that is gone is skipped.
    ///
    /// # Returns
    /// `ChannelResolution` if the channel or any destination is unknown.
    pub fn send(&self, channel: &str, packet: Packet, destinations: &[NodeId]) -> Result<()> {
        let route = self.route(channel)?;
        let senders = destinations
            .iter()
            .map(|dest| {
                route
                    .get(dest)
                    .ok_or_else(|| TrinityError::ChannelResolution {
                        channel: channel.to_string(),
                        node: Some(*dest),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        for (dest, tx) in destinations.iter().zip(senders) {
            let envelope = Envelope {
                source: self.node,
                packet: packet.clone(),
            };

            match tx.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => warn!(
                    "inbox full, dropping payload: channel={} from={} to={} kind={}",
                    channel,
                    self.node,
                    dest,
                    envelope.packet.kind()
                ),
                Err(TrySendError::Closed(_)) => {
                    debug!("receiver gone, skipping: channel={channel} to={dest}")
                }
            }
        }

        Ok(())
    }

    /// Collects the payloads addressed to this node from `sources`.
    ///
    /// Payloads from one source come back in send order, sources are visited
    /// in the order given. An empty result means no data, never an error.
    ///
    /// # Arguments
    /// * `channel` - The channel name.
    /// * `sources` - The nodes to accept payloads from.
    /// * `timeout` - How long to wait for a first payload.
    ///
    /// # Returns
    /// `ChannelResolution` if the channel or any source is unknown.
    pub async fn recv(
        &mut self,
        channel: &str,
        sources: &[NodeId],
        timeout: impl Into<Timeout>,
    ) -> Result<Vec<Packet>> {
        let packets = self.try_recv(channel, sources)?;
        if !packets.is_empty() {
            return Ok(packets);
        }

        let inbox = self.inbox(channel)?;

        let packets = match timeout.into() {
            Timeout::Poll => packets,
            Timeout::Block => inbox.wait(sources).await,
            Timeout::After(d) => time::timeout(d, inbox.wait(sources))
                .await
                .unwrap_or_default(),
        };

        Ok(packets)
    }

    /// Non-blocking receive, same as [`Endpoint::recv`] with [`Timeout::Poll`].
    pub fn try_recv(&mut self, channel: &str, sources: &[NodeId]) -> Result<Vec<Packet>> {
        let route = self.route(channel)?;
        if let Some(unknown) = sources.iter().find(|src| !route.contains_key(*src)) {
            return Err(TrinityError::ChannelResolution {
                channel: channel.to_string(),
                node: Some(*unknown),
            });
        }

        let inbox = self.inbox(channel)?;
        inbox.drain_ready();
        Ok(inbox.take(sources))
    }

    fn route(&self, channel: &str) -> Result<&HashMap<NodeId, mpsc::Sender<Envelope>>> {
        self.routes
            .get(channel)
            .ok_or_else(|| TrinityError::ChannelResolution {
                channel: channel.to_string(),
                node: None,
            })
    }

    fn inbox(&mut self, channel: &str) -> Result<&mut Inbox> {
        self.inboxes
            .get_mut(channel)
            .ok_or_else(|| TrinityError::ChannelResolution {
                channel: channel.to_string(),
                node: Some(self.node),
            })
    }
}
