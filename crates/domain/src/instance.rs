use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Health classification of a service instance.
///
/// Transitions between `Healthy` and `Unhealthy` are authoritative only from
/// the health checker; everything else starts out as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered service instance
///
/// Registered via the admin surface, deregistered explicitly or by the
/// heartbeat sweeper once `last_heartbeat` goes stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Tenant-scoped instance ID
    pub id: String,
    pub tenant_id: String,
    pub namespace_id: String,
    pub service_name: String,
    pub group_name: String,
    pub host: String,
    pub port: u16,
    /// Whether the instance speaks HTTPS
    pub secure: bool,
    pub health_status: HealthStatus,
    /// Inactive instances are excluded from health surveillance
    pub active: bool,
    pub last_heartbeat: DateTime<Utc>,
    /// Free-form per-instance overrides (e.g. `health_check_path`)
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// Base URL for HTTP probes and forwarding
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// `host:port` target for TCP dials
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-instance health check path override, if any
    pub fn health_check_path(&self) -> Option<&str> {
        self.metadata.get("health_check_path").map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(secure: bool) -> ServiceInstance {
        ServiceInstance {
            id: "inst-1".to_string(),
            tenant_id: "t1".to_string(),
            namespace_id: "default".to_string(),
            service_name: "orders".to_string(),
            group_name: "DEFAULT_GROUP".to_string(),
            host: "10.0.0.5".to_string(),
            port: 8080,
            secure,
            health_status: HealthStatus::Unknown,
            active: true,
            last_heartbeat: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_url_scheme_follows_secure_flag() {
        assert_eq!(instance(false).url(), "http://10.0.0.5:8080");
        assert_eq!(instance(true).url(), "https://10.0.0.5:8080");
    }

    #[test]
    fn test_health_check_path_override() {
        let mut inst = instance(false);
        assert!(inst.health_check_path().is_none());

        inst.metadata
            .insert("health_check_path".to_string(), "/actuator/health".to_string());
        assert_eq!(inst.health_check_path(), Some("/actuator/health"));
    }

    #[test]
    fn test_health_status_serializes_uppercase() {
        let json = serde_json::to_string(&HealthStatus::Healthy).unwrap();
        assert_eq!(json, "\"HEALTHY\"");
    }
}
