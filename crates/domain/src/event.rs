use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event timestamp format used on the wire (`YYYY-MM-DD HH:MM:SS`)
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way subscription frames carry it
pub fn format_event_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(EVENT_TIMESTAMP_FORMAT).to_string()
}

/// Service-side change notifications delivered over subscription streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEventType {
    ServiceRegistered,
    ServiceUpdated,
    ServiceDeregistered,
    InstanceRegistered,
    InstanceDeregistered,
    InstanceHeartbeatUpdated,
    InstanceStatusChange,
    InstanceHealthChange,
}

/// Configuration change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigEventType {
    ConfigUpdated,
    ConfigDeleted,
}

/// Immutable record describing one service change
///
/// Frame payload on `/stream/services`. `payload` carries producer-specific
/// JSON (e.g. the instance list for a service).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceChangeEvent {
    pub event_type: ServiceEventType,
    /// `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    pub tenant_id: String,
    pub namespace_id: String,
    pub group_name: String,
    pub service_name: String,
    /// Node that produced the event
    pub producer: String,
    pub message: String,
    /// Event data, e.g. the instance node list for a service change
    #[serde(rename = "nodes")]
    pub payload: Value,
}

impl ServiceChangeEvent {
    pub fn new(
        event_type: ServiceEventType,
        tenant_id: &str,
        namespace_id: &str,
        group_name: &str,
        service_name: &str,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            timestamp: format_event_timestamp(Utc::now()),
            tenant_id: tenant_id.to_string(),
            namespace_id: namespace_id.to_string(),
            group_name: group_name.to_string(),
            service_name: service_name.to_string(),
            producer: String::new(),
            message: message.into(),
            payload,
        }
    }
}

/// Immutable record describing one configuration change
///
/// Frame payload on `/stream/config`. `content` is present on updates and
/// absent on deletes; `content_md5` lets receivers skip no-op refetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    pub event_type: ConfigEventType,
    /// `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    pub tenant_id: String,
    pub namespace_id: String,
    pub group_name: String,
    #[serde(rename = "configDataId")]
    pub data_id: String,
    pub producer: String,
    pub message: String,
    #[serde(rename = "config")]
    pub content: Option<String>,
    pub content_md5: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(format_event_timestamp(ts), "2025-03-14 09:26:53");
    }

    #[test]
    fn test_service_event_type_wire_names() {
        let json = serde_json::to_string(&ServiceEventType::InstanceHealthChange).unwrap();
        assert_eq!(json, "\"INSTANCE_HEALTH_CHANGE\"");

        let json = serde_json::to_string(&ConfigEventType::ConfigUpdated).unwrap();
        assert_eq!(json, "\"CONFIG_UPDATED\"");
    }

    #[test]
    fn test_service_event_camel_case_fields() {
        let event = ServiceChangeEvent::new(
            ServiceEventType::InstanceRegistered,
            "t1",
            "default",
            "DEFAULT_GROUP",
            "orders",
            "instance registered",
            serde_json::json!({"host": "10.0.0.5"}),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("eventType").is_some());
        assert!(value.get("namespaceId").is_some());
        assert!(value.get("serviceName").is_some());
        assert_eq!(value["nodes"]["host"], "10.0.0.5");
    }

    #[test]
    fn test_config_event_wire_field_names() {
        let event = ConfigChangeEvent {
            event_type: ConfigEventType::ConfigUpdated,
            timestamp: format_event_timestamp(Utc::now()),
            tenant_id: "t1".to_string(),
            namespace_id: "default".to_string(),
            group_name: "DEFAULT_GROUP".to_string(),
            data_id: "db.yaml".to_string(),
            producer: String::new(),
            message: "config updated".to_string(),
            content: Some("a: 1".to_string()),
            content_md5: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["configDataId"], "db.yaml");
        assert_eq!(value["config"], "a: 1");
        assert!(value.get("contentMd5").is_some());
        assert!(value.get("dataId").is_none());
    }
}
