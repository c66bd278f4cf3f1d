/*!
 * Tunnel Storage Contract
 *
 * Durable tunnel state lives behind this interface: servers, clients,
 * dynamically-registered services, and static proxy nodes. The in-memory
 * implementation serves single-node deployments and tests.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use gatehub_common::{Error, Result};
use gatehub_domain::{TunnelClient, TunnelServer, TunnelServerNode, TunnelService};

#[async_trait]
pub trait TunnelStorage: Send + Sync {
    async fn list_servers(&self, tenant_id: &str) -> Result<Vec<TunnelServer>>;
    async fn get_server(&self, tenant_id: &str, server_id: &str) -> Result<TunnelServer>;
    async fn save_server(&self, server: TunnelServer) -> Result<()>;

    async fn list_clients(&self, tenant_id: &str) -> Result<Vec<TunnelClient>>;
    async fn get_client(&self, tenant_id: &str, client_id: &str) -> Result<TunnelClient>;
    async fn save_client(&self, client: TunnelClient) -> Result<()>;

    async fn list_services(&self, tenant_id: &str) -> Result<Vec<TunnelService>>;
    async fn save_service(&self, service: TunnelService) -> Result<()>;

    async fn list_nodes(&self, tenant_id: &str) -> Result<Vec<TunnelServerNode>>;
    async fn save_node(&self, node: TunnelServerNode) -> Result<()>;

    /// Release underlying resources; called once at shutdown
    async fn close(&self) -> Result<()>;
}

/// In-process tunnel storage backed by reader/writer-locked maps
#[derive(Default)]
pub struct MemoryTunnelStorage {
    servers: RwLock<HashMap<(String, String), TunnelServer>>,
    clients: RwLock<HashMap<(String, String), TunnelClient>>,
    services: RwLock<HashMap<(String, String), TunnelService>>,
    nodes: RwLock<HashMap<(String, String), TunnelServerNode>>,
}

impl MemoryTunnelStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TunnelStorage for MemoryTunnelStorage {
    async fn list_servers(&self, tenant_id: &str) -> Result<Vec<TunnelServer>> {
        Ok(self
            .servers
            .read()
            .await
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_server(&self, tenant_id: &str, server_id: &str) -> Result<TunnelServer> {
        self.servers
            .read()
            .await
            .get(&(tenant_id.to_string(), server_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tunnel server {tenant_id}/{server_id}")))
    }

    async fn save_server(&self, server: TunnelServer) -> Result<()> {
        let key = (server.tenant_id.clone(), server.id.clone());
        self.servers.write().await.insert(key, server);
        Ok(())
    }

    async fn list_clients(&self, tenant_id: &str) -> Result<Vec<TunnelClient>> {
        Ok(self
            .clients
            .read()
            .await
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_client(&self, tenant_id: &str, client_id: &str) -> Result<TunnelClient> {
        self.clients
            .read()
            .await
            .get(&(tenant_id.to_string(), client_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tunnel client {tenant_id}/{client_id}")))
    }

    async fn save_client(&self, client: TunnelClient) -> Result<()> {
        let key = (client.tenant_id.clone(), client.id.clone());
        self.clients.write().await.insert(key, client);
        Ok(())
    }

    async fn list_services(&self, tenant_id: &str) -> Result<Vec<TunnelService>> {
        Ok(self
            .services
            .read()
            .await
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn save_service(&self, service: TunnelService) -> Result<()> {
        let key = (service.tenant_id.clone(), service.id.clone());
        self.services.write().await.insert(key, service);
        Ok(())
    }

    async fn list_nodes(&self, tenant_id: &str) -> Result<Vec<TunnelServerNode>> {
        Ok(self
            .nodes
            .read()
            .await
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn save_node(&self, node: TunnelServerNode) -> Result<()> {
        let key = (node.tenant_id.clone(), node.id.clone());
        self.nodes.write().await.insert(key, node);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehub_domain::{ProxyType, TunnelStatus};

    fn server(tenant: &str, id: &str) -> TunnelServer {
        TunnelServer {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            name: format!("server-{id}"),
            control_address: "0.0.0.0".to_string(),
            control_port: 7000,
            vhost_http_port: None,
            vhost_https_port: None,
            dashboard_port: None,
            auth_token: "token".to_string(),
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            status: TunnelStatus::Stopped,
            active: true,
            config_version: 1,
            last_start_time: None,
        }
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        let storage = MemoryTunnelStorage::new();
        storage.save_server(server("t1", "s1")).await.unwrap();
        storage.save_server(server("t2", "s1")).await.unwrap();

        assert_eq!(storage.list_servers("t1").await.unwrap().len(), 1);
        assert_eq!(storage.get_server("t1", "s1").await.unwrap().id, "s1");
        assert!(
            storage
                .get_server("t1", "ghost")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_node_round_trip() {
        let storage = MemoryTunnelStorage::new();
        storage
            .save_node(TunnelServerNode {
                id: "n1".to_string(),
                tenant_id: "t1".to_string(),
                server_id: "s1".to_string(),
                name: "ssh".to_string(),
                proxy_type: ProxyType::Tcp,
                listen_address: "0.0.0.0".to_string(),
                listen_port: 2222,
                target_address: "10.0.0.9".to_string(),
                target_port: 22,
                active: true,
            })
            .await
            .unwrap();

        let nodes = storage.list_nodes("t1").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].listen_port, 2222);
    }
}
