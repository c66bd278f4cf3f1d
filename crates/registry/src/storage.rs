/*!
 * Registry Storage Contract
 *
 * The core touches persisted instance state only through this interface.
 * Absence is a typed error, never `Ok` with a sentinel, so callers can
 * distinguish not-found from real failures.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use gatehub_common::{Error, Result};
use gatehub_domain::{HealthStatus, ServiceInstance};

/// Entity CRUD over registered service instances
#[async_trait]
pub trait RegistryStorage: Send + Sync {
    /// All instances registered under a tenant, active or not
    async fn list_all_instances(&self, tenant_id: &str) -> Result<Vec<ServiceInstance>>;

    async fn get_instance(&self, tenant_id: &str, instance_id: &str) -> Result<ServiceInstance>;

    async fn save_instance(&self, instance: ServiceInstance) -> Result<()>;

    async fn remove_instance(&self, tenant_id: &str, instance_id: &str) -> Result<()>;

    /// Persist a health transition decided by the checker
    async fn update_instance_health(
        &self,
        tenant_id: &str,
        instance_id: &str,
        status: HealthStatus,
    ) -> Result<()>;
}

/// In-process storage backed by a reader/writer-locked map
///
/// The default implementation for single-node deployments and the test
/// double for everything else.
#[derive(Default)]
pub struct MemoryRegistryStorage {
    instances: RwLock<HashMap<(String, String), ServiceInstance>>,
}

impl MemoryRegistryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStorage for MemoryRegistryStorage {
    async fn list_all_instances(&self, tenant_id: &str) -> Result<Vec<ServiceInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, inst)| inst.clone())
            .collect())
    }

    async fn get_instance(&self, tenant_id: &str, instance_id: &str) -> Result<ServiceInstance> {
        let instances = self.instances.read().await;
        instances
            .get(&(tenant_id.to_string(), instance_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("instance {tenant_id}/{instance_id}")))
    }

    async fn save_instance(&self, instance: ServiceInstance) -> Result<()> {
        let key = (instance.tenant_id.clone(), instance.id.clone());
        self.instances.write().await.insert(key, instance);
        Ok(())
    }

    async fn remove_instance(&self, tenant_id: &str, instance_id: &str) -> Result<()> {
        let removed = self
            .instances
            .write()
            .await
            .remove(&(tenant_id.to_string(), instance_id.to_string()));
        if removed.is_none() {
            return Err(Error::NotFound(format!(
                "instance {tenant_id}/{instance_id}"
            )));
        }
        Ok(())
    }

    async fn update_instance_health(
        &self,
        tenant_id: &str,
        instance_id: &str,
        status: HealthStatus,
    ) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(&(tenant_id.to_string(), instance_id.to_string()))
            .ok_or_else(|| Error::NotFound(format!("instance {tenant_id}/{instance_id}")))?;
        instance.health_status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn instance(tenant: &str, id: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            namespace_id: "default".to_string(),
            service_name: "orders".to_string(),
            group_name: "DEFAULT_GROUP".to_string(),
            host: "10.0.0.5".to_string(),
            port: 8080,
            secure: false,
            health_status: HealthStatus::Unknown,
            active: true,
            last_heartbeat: Utc::now(),
            metadata: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let storage = MemoryRegistryStorage::new();
        storage.save_instance(instance("t1", "i1")).await.unwrap();
        storage.save_instance(instance("t2", "i1")).await.unwrap();

        let listed = storage.list_all_instances("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tenant_id, "t1");

        let fetched = storage.get_instance("t1", "i1").await.unwrap();
        assert_eq!(fetched.id, "i1");

        storage.remove_instance("t1", "i1").await.unwrap();
        assert!(
            storage
                .get_instance("t1", "i1")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_not_found_is_typed() {
        let storage = MemoryRegistryStorage::new();
        let err = storage.get_instance("t1", "ghost").await.unwrap_err();
        assert!(err.is_not_found());

        let err = storage.remove_instance("t1", "ghost").await.unwrap_err();
        assert!(err.is_not_found());

        let err = storage
            .update_instance_health("t1", "ghost", HealthStatus::Healthy)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_health() {
        let storage = MemoryRegistryStorage::new();
        storage.save_instance(instance("t1", "i1")).await.unwrap();

        storage
            .update_instance_health("t1", "i1", HealthStatus::Unhealthy)
            .await
            .unwrap();

        let fetched = storage.get_instance("t1", "i1").await.unwrap();
        assert_eq!(fetched.health_status, HealthStatus::Unhealthy);
    }
}
