//! # Gatehub Registry
//!
//! Service registry and health surveillance: tracks service instances, runs
//! active HTTP/TCP liveness probes with hysteresis, and publishes
//! state-change events to downstream consumers.

pub mod checker;
pub mod ops;
pub mod probe;
pub mod publisher;
pub mod storage;
pub mod sweeper;

pub use checker::{CheckerStats, HealthChecker, InstanceState, ProbeResult};
pub use ops::InstanceRegistry;
pub use probe::{ProbeOutcome, probe_instance};
pub use publisher::{EventPublisher, NullPublisher, RecordingPublisher};
pub use storage::{MemoryRegistryStorage, RegistryStorage};
pub use sweeper::HeartbeatSweeper;
