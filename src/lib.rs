//! Three tier actor orchestration: a cluster tier owning the model, a server
//! tier stepping environments and a core tier evaluating the policy, talking
//! over named channels and rolling their statistics up into epoch reports.

pub mod channel;
pub mod config;
pub mod error;
pub mod layers;
pub mod stats;
pub mod status;
pub mod telemetry;
pub mod tier;
pub mod trinity;

pub use config::Config;
pub use error::{Result, TrinityError};
pub use trinity::{ClusterOutput, Trinity};
