pub mod config_entry;
pub mod event;
pub mod gateway;
pub mod instance;
pub mod tunnel;

pub use config_entry::ConfigEntry;
pub use event::{ConfigChangeEvent, ConfigEventType, ServiceChangeEvent, ServiceEventType};
pub use gateway::{GatewayResponse, RouteResult};
pub use instance::{HealthStatus, ServiceInstance};
pub use tunnel::{
    ProxyType, TunnelClient, TunnelClientStatus, TunnelServer, TunnelServerNode,
    TunnelServerStatus, TunnelService, TunnelStatus,
};
