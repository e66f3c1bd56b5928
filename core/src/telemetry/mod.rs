pub mod log;
pub mod metrics;

pub use log::RateLimitedLog;
pub use metrics::{Counter, MetricsRecorder, RelayStats};
