//! Everything the engine reports about itself: gauges, the utilization
//! monitor, epoch reports and the metrics logger.

pub mod monitor;
pub mod progress;
pub mod quill;
pub mod report;
pub mod store;

pub use monitor::{utilization, MonitorSnapshot, UtilizationMonitor};
pub use progress::Bar;
pub use quill::{Latest, Logger, Quill, Save, Scrawl, Scrawled};
pub use report::{EpochReport, LogSummary, TierLog, SUMMARY_HEADER};
