/*!
 * Instance Lifecycle Operations
 *
 * The admin-facing write path for the registry: registration, explicit
 * deregistration, and heartbeat renewal. Every mutation lands in storage
 * first and then fans out as a service change event. Health classification
 * stays with the checker; these operations never touch `health_status`.
 */

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use gatehub_common::{Error, Result};
use gatehub_domain::{HealthStatus, ServiceChangeEvent, ServiceEventType, ServiceInstance};

use crate::publisher::EventPublisher;
use crate::storage::RegistryStorage;

pub struct InstanceRegistry {
    storage: Arc<dyn RegistryStorage>,
    publisher: Arc<dyn EventPublisher>,
}

impl InstanceRegistry {
    pub fn new(storage: Arc<dyn RegistryStorage>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { storage, publisher }
    }

    /// Register a new instance (or re-register after expiry)
    ///
    /// The instance enters as UNKNOWN with a fresh heartbeat; the checker
    /// decides when it becomes HEALTHY.
    pub async fn register_instance(&self, mut instance: ServiceInstance) -> Result<()> {
        if instance.id.is_empty() {
            return Err(Error::Validation("instance id is required".to_string()));
        }
        if instance.host.is_empty() || instance.port == 0 {
            return Err(Error::Validation(
                "instance host and port are required".to_string(),
            ));
        }

        instance.health_status = HealthStatus::Unknown;
        instance.last_heartbeat = Utc::now();
        self.storage.save_instance(instance.clone()).await?;

        info!(
            instance = %instance.id,
            service = %instance.service_name,
            addr = %instance.addr(),
            "instance registered"
        );
        self.publish(&instance, ServiceEventType::InstanceRegistered, "instance registered")
            .await;
        Ok(())
    }

    /// Explicit removal via the admin surface
    pub async fn deregister_instance(&self, tenant_id: &str, instance_id: &str) -> Result<()> {
        let instance = self.storage.get_instance(tenant_id, instance_id).await?;
        self.storage.remove_instance(tenant_id, instance_id).await?;

        info!(instance = %instance_id, "instance deregistered");
        self.publish(
            &instance,
            ServiceEventType::InstanceDeregistered,
            "instance deregistered",
        )
        .await;
        Ok(())
    }

    /// Renew an instance's heartbeat, keeping it clear of the sweeper
    pub async fn heartbeat(&self, tenant_id: &str, instance_id: &str) -> Result<()> {
        let mut instance = self.storage.get_instance(tenant_id, instance_id).await?;
        instance.last_heartbeat = Utc::now();
        self.storage.save_instance(instance.clone()).await?;

        self.publish(
            &instance,
            ServiceEventType::InstanceHeartbeatUpdated,
            "heartbeat renewed",
        )
        .await;
        Ok(())
    }

    /// Flip the active flag without deleting the record
    ///
    /// Inactive instances drop out of health surveillance on the next
    /// `load_instances`.
    pub async fn set_instance_active(
        &self,
        tenant_id: &str,
        instance_id: &str,
        active: bool,
    ) -> Result<()> {
        let mut instance = self.storage.get_instance(tenant_id, instance_id).await?;
        instance.active = active;
        self.storage.save_instance(instance.clone()).await?;

        info!(instance = %instance_id, active, "instance activity changed");
        self.publish(
            &instance,
            ServiceEventType::InstanceStatusChange,
            if active { "instance activated" } else { "instance deactivated" },
        )
        .await;
        Ok(())
    }

    async fn publish(&self, instance: &ServiceInstance, event_type: ServiceEventType, message: &str) {
        let event = ServiceChangeEvent::new(
            event_type,
            &instance.tenant_id,
            &instance.namespace_id,
            &instance.group_name,
            &instance.service_name,
            message,
            serde_json::json!({
                "instanceId": instance.id,
                "host": instance.host,
                "port": instance.port,
                "active": instance.active,
            }),
        );
        if let Err(e) = self.publisher.publish(event).await {
            warn!(instance = %instance.id, error = %e, "failed to publish instance event");
        }
    }
}
