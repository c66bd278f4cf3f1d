/*!
 * Fabric Event Publisher
 *
 * Adapts the registry's `EventPublisher` seam onto the service subscriber,
 * so checker and sweeper transitions fan out to connected streams.
 */

use async_trait::async_trait;
use std::sync::Arc;

use gatehub_common::Result;
use gatehub_domain::ServiceChangeEvent;
use gatehub_registry::EventPublisher;

use crate::subscriber::ServiceSubscriber;

pub struct FabricPublisher {
    subscriber: Arc<ServiceSubscriber>,
}

impl FabricPublisher {
    pub fn new(subscriber: Arc<ServiceSubscriber>) -> Self {
        Self { subscriber }
    }
}

#[async_trait]
impl EventPublisher for FabricPublisher {
    async fn publish(&self, event: ServiceChangeEvent) -> Result<()> {
        let (tenant, namespace, group, service) = (
            event.tenant_id.clone(),
            event.namespace_id.clone(),
            event.group_name.clone(),
            event.service_name.clone(),
        );
        self.subscriber
            .notify_service_change(&tenant, &namespace, &group, &service, event)
            .await;
        Ok(())
    }
}
