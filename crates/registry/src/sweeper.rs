/*!
 * Heartbeat Sweeper
 *
 * Deregisters instances whose heartbeat went stale. Registration happens on
 * the admin surface; expiry happens here, so a crashed instance disappears
 * from the registry without operator action.
 */

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gatehub_common::Result;
use gatehub_domain::{ServiceChangeEvent, ServiceEventType};

use crate::publisher::EventPublisher;
use crate::storage::RegistryStorage;

pub struct HeartbeatSweeper {
    storage: Arc<dyn RegistryStorage>,
    publisher: Arc<dyn EventPublisher>,
    tenant_id: String,
    ttl: Duration,
    interval: Duration,
}

impl HeartbeatSweeper {
    pub fn new(
        storage: Arc<dyn RegistryStorage>,
        publisher: Arc<dyn EventPublisher>,
        tenant_id: &str,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            publisher,
            tenant_id: tenant_id.to_string(),
            ttl,
            interval,
        }
    }

    /// Run sweep rounds until the scope is cancelled
    pub async fn run(self, scope: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "heartbeat sweep failed");
                    }
                }
            }
        }
        debug!("heartbeat sweeper stopped");
    }

    /// One sweep round; returns how many instances were deregistered
    pub async fn sweep_once(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::seconds(90));

        let instances = self.storage.list_all_instances(&self.tenant_id).await?;
        let mut swept = 0usize;

        for instance in instances {
            if instance.last_heartbeat >= cutoff {
                continue;
            }

            if let Err(e) = self
                .storage
                .remove_instance(&instance.tenant_id, &instance.id)
                .await
            {
                warn!(instance = %instance.id, error = %e, "failed to deregister expired instance");
                continue;
            }
            swept += 1;

            info!(
                instance = %instance.id,
                service = %instance.service_name,
                "deregistered expired instance"
            );

            let event = ServiceChangeEvent::new(
                ServiceEventType::InstanceDeregistered,
                &instance.tenant_id,
                &instance.namespace_id,
                &instance.group_name,
                &instance.service_name,
                "heartbeat expired",
                serde_json::json!({
                    "instanceId": instance.id,
                    "host": instance.host,
                    "port": instance.port,
                }),
            );
            if let Err(e) = self.publisher.publish(event).await {
                warn!(instance = %instance.id, error = %e, "failed to publish deregistration event");
            }
        }

        Ok(swept)
    }
}
