/*!
 * Event Publisher Contract
 *
 * One-shot delivery of domain events to downstream consumers. The checker
 * and sweeper publish through this seam; the push fabric implements it.
 */

use async_trait::async_trait;
use std::sync::Mutex;

use gatehub_common::Result;
use gatehub_domain::ServiceChangeEvent;

/// Emits one domain event to whoever is listening
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ServiceChangeEvent) -> Result<()>;
}

/// Test double that records every published event
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ServiceChangeEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ServiceChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ServiceChangeEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Publisher that drops everything (disabled surveillance)
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _event: ServiceChangeEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehub_domain::ServiceEventType;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_publisher_captures_events() {
        let publisher = RecordingPublisher::new();
        assert!(publisher.is_empty());

        publisher
            .publish(ServiceChangeEvent::new(
                ServiceEventType::InstanceHealthChange,
                "t1",
                "default",
                "DEFAULT_GROUP",
                "orders",
                "HEALTHY -> UNHEALTHY",
                json!({"host": "10.0.0.5", "port": 8080}),
            ))
            .await
            .unwrap();

        assert_eq!(publisher.len(), 1);
        assert_eq!(
            publisher.events()[0].event_type,
            ServiceEventType::InstanceHealthChange
        );
    }
}
