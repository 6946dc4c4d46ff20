use std::{error::Error, fmt, io};

use crate::{channel::NodeId, stats::EntityKey};

/// The crate's result type.
pub type Result<T> = std::result::Result<T, TrinityError>;

/// Every failure the orchestration engine can surface.
///
/// Transient emptiness (a receive that found nothing) is never an error and
/// has no variant here.
#[derive(Debug)]
pub enum TrinityError {
    /// Unknown channel name or node, a wiring bug. Aborts worker startup.
    ChannelResolution { channel: String, node: Option<NodeId> },
    /// `Blob::finalize` was called a second time.
    AlreadyFinalized(EntityKey),
    /// An unfinalized `Blob` was handed to the aggregation layer.
    NotFinalized(EntityKey),
    /// A tier worker task is gone and can't answer a step request.
    WorkerGone(NodeId),
    /// Invalid configuration, caught before anything is spawned.
    InvalidConfig(String),
    /// An actix mailbox refused or dropped a message.
    Actor(actix::MailboxError),
    /// Failed to encode or decode a persisted record.
    Codec(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for TrinityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelResolution {
                channel,
                node: Some(node),
            } => write!(f, "channel resolution error: {node} is not wired to channel '{channel}'"),
            Self::ChannelResolution {
                channel,
                node: None,
            } => write!(f, "channel resolution error: unknown channel '{channel}'"),
            Self::AlreadyFinalized(key) => write!(f, "blob {key} was already finalized"),
            Self::NotFinalized(key) => write!(f, "blob {key} must be finalized before aggregation"),
            Self::WorkerGone(node) => write!(f, "worker {node} is no longer running"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Actor(e) => write!(f, "actor mailbox error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrinityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Actor(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrinityError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrinityError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<actix::MailboxError> for TrinityError {
    fn from(value: actix::MailboxError) -> Self {
        Self::Actor(value)
    }
}

impl TrinityError {
    /// Whether this error should abort the whole process rather than one epoch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelResolution { .. } | Self::WorkerGone(_) | Self::InvalidConfig(_)
        )
    }
}
