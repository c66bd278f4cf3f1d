//! # Gatehub Fabric
//!
//! Push-based change-notification broker: multiplexes configuration updates
//! and service-instance changes over long-lived client streams with
//! per-client fan-in channels. Delivery is bounded and non-blocking; a slow
//! consumer loses events instead of stalling publishers, and reconciles by
//! refetching on reconnect.

pub mod config_service;
pub mod fingerprint;
pub mod publish;
pub mod stream;
pub mod subscriber;
pub mod watcher;

pub use config_service::ConfigService;
pub use fingerprint::{entry_fingerprint, namespace_fingerprint};
pub use publish::FabricPublisher;
pub use stream::{StreamState, stream_router};
pub use subscriber::ServiceSubscriber;
pub use watcher::ConfigWatcher;
