//! Real-time relay for framed radar pulse streams.
//!
//! Pulses arrive from a TCP server or a durable queue, are reconciled with
//! antenna-angle and scan-control telemetry, monitored for test-pulse
//! calibration, and republished in batches to an output queue.

pub mod engine;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use engine::{EngineState, RelayEngine, RelayEngineBuilder};
pub use prelude::{Clock, Heartbeat, ManualClock, NoopHeartbeat, RelayConfig, RelayError, RelayResult, SystemClock};
pub use telemetry::RelayStats;
