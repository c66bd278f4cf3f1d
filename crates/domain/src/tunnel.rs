use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a tunnel server or client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Running,
    Stopped,
    Error,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelStatus::Running => "running",
            TunnelStatus::Stopped => "stopped",
            TunnelStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Proxy kinds supported by static port maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyType {
    Tcp,
    Udp,
    Http,
    Https,
    Stcp,
    Sudp,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Tcp => "TCP",
            ProxyType::Udp => "UDP",
            ProxyType::Http => "HTTP",
            ProxyType::Https => "HTTPS",
            ProxyType::Stcp => "STCP",
            ProxyType::Sudp => "SUDP",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(ProxyType::Tcp),
            "UDP" => Ok(ProxyType::Udp),
            "HTTP" => Ok(ProxyType::Http),
            "HTTPS" => Ok(ProxyType::Https),
            "STCP" => Ok(ProxyType::Stcp),
            "SUDP" => Ok(ProxyType::Sudp),
            other => Err(format!("unknown proxy type: {other}")),
        }
    }
}

/// Durable tunnel server record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelServer {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Control-plane bind address for client connections
    pub control_address: String,
    pub control_port: u16,
    /// Virtual-host ports for HTTP/HTTPS dynamic services
    pub vhost_http_port: Option<u16>,
    pub vhost_https_port: Option<u16>,
    /// Optional dashboard listener
    pub dashboard_port: Option<u16>,
    pub auth_token: String,
    pub tls_enabled: bool,
    /// PEM material backing the control listener when TLS is on
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub status: TunnelStatus,
    pub active: bool,
    pub config_version: u64,
    pub last_start_time: Option<DateTime<Utc>>,
}

/// Durable tunnel client record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelClient {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Server control endpoint this client dials
    pub server_address: String,
    pub server_port: u16,
    pub auth_token: String,
    pub tls_enabled: bool,
    pub heartbeat_interval_secs: u64,
    /// Reconnect attempts before giving up; 0 = retry forever
    pub max_reconnect_attempts: u32,
    pub status: TunnelStatus,
    pub active: bool,
    pub config_version: u64,
    pub last_start_time: Option<DateTime<Utc>>,
}

/// A service announced by a client at runtime (dynamic endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelService {
    pub id: String,
    pub tenant_id: String,
    pub client_id: String,
    /// Unique per tenant
    pub service_name: String,
    pub proxy_type: ProxyType,
    pub local_address: String,
    pub local_port: u16,
    /// Exclusive when set; allocated by the server when absent
    pub remote_port: Option<u16>,
    pub custom_domains: Vec<String>,
    pub sub_domain: Option<String>,
    pub active: bool,
}

/// A preconfigured static port map on a tunnel server
///
/// Bound at server start regardless of any client's presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelServerNode {
    pub id: String,
    pub tenant_id: String,
    pub server_id: String,
    pub name: String,
    pub proxy_type: ProxyType,
    pub listen_address: String,
    pub listen_port: u16,
    pub target_address: String,
    pub target_port: u16,
    pub active: bool,
}

impl TunnelServerNode {
    /// The uniqueness key among active static proxies
    pub fn bind_key(&self) -> (String, u16, ProxyType) {
        (self.listen_address.clone(), self.listen_port, self.proxy_type)
    }
}

/// Runtime snapshot of a tunnel server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelServerStatus {
    pub running: bool,
    pub connection_count: usize,
    pub uptime_secs: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub error_count: u64,
}

/// Runtime snapshot of a tunnel client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelClientStatus {
    pub running: bool,
    pub connected: bool,
    pub registered_services: usize,
    pub uptime_secs: u64,
    pub reconnect_count: u64,
    pub error_count: u64,
}
