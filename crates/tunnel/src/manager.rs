/*!
 * Tunnel Manager
 *
 * Process-wide coordinator for tunnel servers and clients: loads durable
 * records into memory, drives start/stop/reload, and owns the validation
 * rules for static proxies and service registrations.
 *
 * The global accessor is a compatibility shim; new code should take an
 * `Arc<TunnelManager>` handle wired from program entry.
 */

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use gatehub_common::{Error, Result};
use gatehub_config::TunnelConfig;
use gatehub_domain::{
    TunnelClient, TunnelClientStatus, TunnelServer, TunnelServerNode, TunnelServerStatus,
    TunnelService,
};

use crate::client::TunnelClientCore;
use crate::server::{ReloadOutcome, TunnelServerCore};
use crate::storage::TunnelStorage;

static GLOBAL_MANAGER: Lazy<std::sync::RwLock<Option<Arc<TunnelManager>>>> =
    Lazy::new(|| std::sync::RwLock::new(None));

/// Install the process-wide manager handle
pub fn set_global(manager: Arc<TunnelManager>) {
    *GLOBAL_MANAGER.write().unwrap() = Some(manager);
}

/// Fetch the process-wide manager handle, if installed
pub fn global() -> Option<Arc<TunnelManager>> {
    GLOBAL_MANAGER.read().unwrap().clone()
}

struct ServerEntry {
    record: TunnelServer,
    core: Option<Arc<TunnelServerCore>>,
    /// Static proxies changed while running; applied on next restart
    rebind_pending: bool,
}

struct ClientEntry {
    record: TunnelClient,
    core: Option<Arc<TunnelClientCore>>,
}

pub struct TunnelManager {
    config: TunnelConfig,
    storage: Arc<dyn TunnelStorage>,
    servers: RwLock<HashMap<String, ServerEntry>>,
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig, storage: Arc<dyn TunnelStorage>) -> Self {
        Self {
            config,
            storage,
            servers: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn tenant(&self) -> &str {
        &self.config.default_tenant
    }

    /// Load every active server and client of the default tenant into memory
    pub async fn initialize(&self) -> Result<()> {
        let tenant = self.tenant();

        let servers = self.storage.list_servers(tenant).await?;
        let mut server_map = self.servers.write().await;
        for record in servers.into_iter().filter(|s| s.active) {
            server_map.insert(
                record.id.clone(),
                ServerEntry {
                    record,
                    core: None,
                    rebind_pending: false,
                },
            );
        }
        let server_count = server_map.len();
        drop(server_map);

        let clients = self.storage.list_clients(tenant).await?;
        let mut client_map = self.clients.write().await;
        for record in clients.into_iter().filter(|c| c.active) {
            client_map.insert(record.id.clone(), ClientEntry { record, core: None });
        }
        let client_count = client_map.len();
        drop(client_map);

        info!(
            tenant,
            servers = server_count,
            clients = client_count,
            "tunnel manager initialized"
        );
        Ok(())
    }

    /// Start every loaded server, then every loaded client
    ///
    /// Individual failures are logged, not propagated.
    pub async fn start_all(&self) {
        let server_ids: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for id in server_ids {
            if let Err(e) = self.start_server(&id).await {
                error!(server = %id, error = %e, "failed to start tunnel server");
            }
        }

        let client_ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for id in client_ids {
            if let Err(e) = self.start_client(&id).await {
                error!(client = %id, error = %e, "failed to start tunnel client");
            }
        }
    }

    /// Stop clients, then servers, then close storage
    pub async fn shutdown(&self) {
        let client_ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for id in client_ids {
            if let Err(e) = self.stop_client(&id).await {
                warn!(client = %id, error = %e, "failed to stop tunnel client");
            }
        }

        let server_ids: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for id in server_ids {
            if let Err(e) = self.stop_server(&id).await {
                warn!(server = %id, error = %e, "failed to stop tunnel server");
            }
        }

        if let Err(e) = self.storage.close().await {
            warn!(error = %e, "failed to close tunnel storage");
        }
        info!("tunnel manager shut down");
    }

    // ---- servers ----

    /// Start one server, consulting storage when it is not in memory
    pub async fn start_server(&self, server_id: &str) -> Result<()> {
        let (record, rebind_pending) = {
            let servers = self.servers.read().await;
            match servers.get(server_id) {
                Some(entry) => {
                    if entry.core.as_ref().is_some_and(|c| c.is_running()) {
                        return Err(Error::Validation(format!(
                            "server already running: {server_id}"
                        )));
                    }
                    (entry.record.clone(), entry.rebind_pending)
                }
                None => (
                    self.storage.get_server(self.tenant(), server_id).await?,
                    false,
                ),
            }
        };

        if !record.active {
            return Err(Error::Validation(format!(
                "server is inactive: {server_id}"
            )));
        }

        if rebind_pending {
            info!(server = %server_id, "applying static proxies persisted since last start");
        }

        // Socket binds happen outside the map lock; the core re-reads the
        // node table at start, which picks up any pending rebinds
        let core = Arc::new(TunnelServerCore::new(record.clone(), self.storage.clone()));
        core.start().await?;

        self.servers.write().await.insert(
            server_id.to_string(),
            ServerEntry {
                record,
                core: Some(core),
                rebind_pending: false,
            },
        );
        Ok(())
    }

    /// Stop one server and drop it from memory
    pub async fn stop_server(&self, server_id: &str) -> Result<()> {
        let core = {
            let mut servers = self.servers.write().await;
            match servers.remove(server_id) {
                Some(entry) => entry.core,
                None => {
                    // Distinguish "never existed" from "exists but not running"
                    self.storage.get_server(self.tenant(), server_id).await?;
                    return Err(Error::Validation(format!(
                        "server is not running: {server_id}"
                    )));
                }
            }
        };

        match core {
            Some(core) => core.stop().await,
            None => Err(Error::Validation(format!(
                "server is not running: {server_id}"
            ))),
        }
    }

    /// Runtime snapshot for one server
    pub async fn get_server_status(&self, server_id: &str) -> Result<TunnelServerStatus> {
        let servers = self.servers.read().await;
        let entry = servers
            .get(server_id)
            .ok_or_else(|| Error::NotFound(format!("tunnel server {server_id}")))?;

        match &entry.core {
            Some(core) => Ok(core.status().await),
            None => Ok(TunnelServerStatus::default()),
        }
    }

    // ---- clients ----

    pub async fn start_client(&self, client_id: &str) -> Result<()> {
        let record = {
            let clients = self.clients.read().await;
            match clients.get(client_id) {
                Some(entry) => {
                    if entry.core.as_ref().is_some_and(|c| c.is_running()) {
                        return Err(Error::Validation(format!(
                            "client already running: {client_id}"
                        )));
                    }
                    entry.record.clone()
                }
                None => self.storage.get_client(self.tenant(), client_id).await?,
            }
        };

        if !record.active {
            return Err(Error::Validation(format!(
                "client is inactive: {client_id}"
            )));
        }

        // The client announces its own active services at login
        let services: Vec<TunnelService> = self
            .storage
            .list_services(self.tenant())
            .await?
            .into_iter()
            .filter(|s| s.active && s.client_id == client_id)
            .collect();

        let core = Arc::new(TunnelClientCore::new(
            record.clone(),
            services,
            self.config.max_backoff_seconds,
        ));
        core.start().await?;

        self.clients.write().await.insert(
            client_id.to_string(),
            ClientEntry {
                record,
                core: Some(core),
            },
        );
        Ok(())
    }

    pub async fn stop_client(&self, client_id: &str) -> Result<()> {
        let core = {
            let mut clients = self.clients.write().await;
            match clients.remove(client_id) {
                Some(entry) => entry.core,
                None => {
                    self.storage.get_client(self.tenant(), client_id).await?;
                    return Err(Error::Validation(format!(
                        "client is not running: {client_id}"
                    )));
                }
            }
        };

        match core {
            Some(core) => core.stop().await,
            None => Err(Error::Validation(format!(
                "client is not running: {client_id}"
            ))),
        }
    }

    pub async fn get_client_status(&self, client_id: &str) -> Result<TunnelClientStatus> {
        let clients = self.clients.read().await;
        let entry = clients
            .get(client_id)
            .ok_or_else(|| Error::NotFound(format!("tunnel client {client_id}")))?;

        match &entry.core {
            Some(core) => Ok(core.status()),
            None => Ok(TunnelClientStatus::default()),
        }
    }

    // ---- static proxies & services ----

    /// Validate and persist a static proxy node
    ///
    /// When the owning server is running, the new bind applies on its next
    /// restart; the entry is marked so the restart path rebinds.
    pub async fn create_static_proxy(&self, node: TunnelServerNode) -> Result<()> {
        self.validate_node(&node).await?;
        self.storage.save_node(node.clone()).await?;

        let mut servers = self.servers.write().await;
        if let Some(entry) = servers.get_mut(&node.server_id) {
            if entry.core.as_ref().is_some_and(|c| c.is_running()) {
                entry.rebind_pending = true;
                info!(
                    server = %node.server_id,
                    node = %node.name,
                    "static proxy persisted; rebind on next server restart"
                );
            }
        }
        Ok(())
    }

    async fn validate_node(&self, node: &TunnelServerNode) -> Result<()> {
        if node.listen_port == 0 {
            return Err(Error::Validation("listen port is required".to_string()));
        }
        if node.target_port == 0 {
            return Err(Error::Validation("target port is required".to_string()));
        }

        let nodes = self.storage.list_nodes(&node.tenant_id).await?;
        if let Some(conflict) = nodes.iter().find(|existing| {
            existing.active && existing.id != node.id && existing.bind_key() == node.bind_key()
        }) {
            return Err(Error::Validation(format!(
                "bind {}:{}/{} already taken by node {} ({})",
                node.listen_address,
                node.listen_port,
                node.proxy_type,
                conflict.name,
                conflict.id
            )));
        }
        Ok(())
    }

    /// Validate and persist a tunnel service registration
    pub async fn register_service(&self, service: TunnelService) -> Result<()> {
        self.validate_service(&service).await?;
        self.storage.save_service(service).await?;
        Ok(())
    }

    async fn validate_service(&self, service: &TunnelService) -> Result<()> {
        if service.service_name.is_empty() {
            return Err(Error::Validation("service name is required".to_string()));
        }
        if service.local_port == 0 {
            return Err(Error::Validation("local port is required".to_string()));
        }

        let services = self.storage.list_services(&service.tenant_id).await?;

        if services.iter().any(|existing| {
            existing.active
                && existing.id != service.id
                && existing.service_name == service.service_name
        }) {
            return Err(Error::Validation(format!(
                "service name already taken: {}",
                service.service_name
            )));
        }

        if let Some(port) = service.remote_port {
            if let Some(conflict) = services.iter().find(|existing| {
                existing.active && existing.id != service.id && existing.remote_port == Some(port)
            }) {
                return Err(Error::Validation(format!(
                    "remote port {port} already held by service {}",
                    conflict.service_name
                )));
            }
        }
        Ok(())
    }

    // ---- reload ----

    /// Re-read one server from storage
    ///
    /// Gone-or-inactive records drop out of memory; otherwise the in-memory
    /// record is rebuilt. A running core applies reload-safe fields live and
    /// reports when a manual restart is required.
    pub async fn reload_server_config(&self, server_id: &str) -> Result<()> {
        let fresh = match self.storage.get_server(self.tenant(), server_id).await {
            Ok(record) if record.active => record,
            Ok(_) | Err(Error::NotFound(_)) => {
                if self.servers.write().await.remove(server_id).is_some() {
                    info!(server = %server_id, "server dropped from memory on reload");
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut servers = self.servers.write().await;
        match servers.get_mut(server_id) {
            Some(entry) => {
                if let Some(core) = entry.core.as_ref().filter(|c| c.is_running()) {
                    match core.reload(fresh.clone()).await {
                        ReloadOutcome::Applied => {
                            info!(server = %server_id, "reload-safe changes applied live")
                        }
                        ReloadOutcome::RestartRequired => {
                            warn!(server = %server_id, "config changed; restart required to apply")
                        }
                    }
                }
                entry.record = fresh;
            }
            None => {
                servers.insert(
                    server_id.to_string(),
                    ServerEntry {
                        record: fresh,
                        core: None,
                        rebind_pending: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Re-read one client from storage (restart to apply when running)
    pub async fn reload_client_config(&self, client_id: &str) -> Result<()> {
        let fresh = match self.storage.get_client(self.tenant(), client_id).await {
            Ok(record) if record.active => record,
            Ok(_) | Err(Error::NotFound(_)) => {
                if self.clients.write().await.remove(client_id).is_some() {
                    info!(client = %client_id, "client dropped from memory on reload");
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut clients = self.clients.write().await;
        match clients.get_mut(client_id) {
            Some(entry) => {
                if entry.core.as_ref().is_some_and(|c| c.is_running()) {
                    warn!(client = %client_id, "config changed; restart required to apply");
                }
                entry.record = fresh;
            }
            None => {
                clients.insert(client_id.to_string(), ClientEntry { record: fresh, core: None });
            }
        }
        Ok(())
    }

    /// Reload every entity currently loaded in memory
    pub async fn reload_all_configs(&self) -> Result<()> {
        let server_ids: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for id in server_ids {
            if let Err(e) = self.reload_server_config(&id).await {
                warn!(server = %id, error = %e, "server reload failed");
            }
        }

        let client_ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for id in client_ids {
            if let Err(e) = self.reload_client_config(&id).await {
                warn!(client = %id, error = %e, "client reload failed");
            }
        }
        Ok(())
    }

    pub async fn loaded_server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn loaded_client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTunnelStorage;
    use gatehub_domain::{ProxyType, TunnelStatus};

    fn config() -> TunnelConfig {
        TunnelConfig {
            default_tenant: "t1".to_string(),
            heartbeat_interval_seconds: 1,
            heartbeat_timeout_seconds: 5,
            max_backoff_seconds: 1,
        }
    }

    fn server(id: &str, active: bool) -> TunnelServer {
        TunnelServer {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            name: format!("server-{id}"),
            control_address: "127.0.0.1".to_string(),
            control_port: 0,
            vhost_http_port: None,
            vhost_https_port: None,
            dashboard_port: None,
            auth_token: "sesame".to_string(),
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            heartbeat_interval_secs: 1,
            heartbeat_timeout_secs: 5,
            status: TunnelStatus::Stopped,
            active,
            config_version: 1,
            last_start_time: None,
        }
    }

    fn node(id: &str, port: u16) -> TunnelServerNode {
        TunnelServerNode {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            server_id: "s1".to_string(),
            name: format!("node-{id}"),
            proxy_type: ProxyType::Tcp,
            listen_address: "0.0.0.0".to_string(),
            listen_port: port,
            target_address: "10.0.0.9".to_string(),
            target_port: 22,
            active: true,
        }
    }

    fn service(id: &str, name: &str, remote_port: Option<u16>) -> TunnelService {
        TunnelService {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            client_id: "c1".to_string(),
            service_name: name.to_string(),
            proxy_type: ProxyType::Tcp,
            local_address: "127.0.0.1".to_string(),
            local_port: 9000,
            remote_port,
            custom_domains: vec![],
            sub_domain: None,
            active: true,
        }
    }

    async fn manager() -> (TunnelManager, Arc<MemoryTunnelStorage>) {
        let storage = Arc::new(MemoryTunnelStorage::new());
        (TunnelManager::new(config(), storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_initialize_loads_active_only() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", true)).await.unwrap();
        storage.save_server(server("s2", false)).await.unwrap();

        manager.initialize().await.unwrap();
        assert_eq!(manager.loaded_server_count().await, 1);
    }

    #[tokio::test]
    async fn test_start_unknown_server_is_not_found() {
        let (manager, _storage) = manager().await;
        assert!(manager.start_server("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_start_inactive_server_is_validation() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", false)).await.unwrap();

        assert!(matches!(
            manager.start_server("s1").await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_server_lifecycle_and_memory_removal() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", true)).await.unwrap();

        manager.start_server("s1").await.unwrap();
        let status = manager.get_server_status("s1").await.unwrap();
        assert!(status.running);

        // Double start is refused
        assert!(matches!(
            manager.start_server("s1").await.unwrap_err(),
            Error::Validation(_)
        ));

        manager.stop_server("s1").await.unwrap();
        assert_eq!(manager.loaded_server_count().await, 0);

        // Stopping again: exists in storage but is not running
        assert!(matches!(
            manager.stop_server("s1").await.unwrap_err(),
            Error::Validation(_)
        ));
        // Persisted status followed the lifecycle
        assert_eq!(
            storage.get_server("t1", "s1").await.unwrap().status,
            TunnelStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_static_proxy_uniqueness() {
        let (manager, _storage) = manager().await;

        manager.create_static_proxy(node("n1", 2222)).await.unwrap();

        let err = manager
            .create_static_proxy(node("n2", 2222))
            .await
            .unwrap_err();
        match err {
            Error::Validation(message) => {
                assert!(message.contains("2222"));
                assert!(message.contains("node-n1"), "conflict names the holder");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Same port, different proxy type is allowed
        let mut udp = node("n3", 2222);
        udp.proxy_type = ProxyType::Udp;
        manager.create_static_proxy(udp).await.unwrap();
    }

    #[tokio::test]
    async fn test_node_port_validation() {
        let (manager, _storage) = manager().await;
        assert!(matches!(
            manager.create_static_proxy(node("n1", 0)).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_service_name_and_port_exclusivity() {
        let (manager, _storage) = manager().await;

        manager
            .register_service(service("svc1", "ssh", Some(2222)))
            .await
            .unwrap();

        // Duplicate name
        assert!(matches!(
            manager
                .register_service(service("svc2", "ssh", None))
                .await
                .unwrap_err(),
            Error::Validation(_)
        ));

        // Duplicate remote port
        let err = manager
            .register_service(service("svc3", "rdp", Some(2222)))
            .await
            .unwrap_err();
        match err {
            Error::Validation(message) => assert!(message.contains("2222")),
            other => panic!("unexpected error: {other}"),
        }

        // Distinct name, no remote port claim
        manager
            .register_service(service("svc4", "web", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reload_drops_gone_and_inactive() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", true)).await.unwrap();
        manager.initialize().await.unwrap();
        assert_eq!(manager.loaded_server_count().await, 1);

        // Inactive in storage: dropped from memory
        storage.save_server(server("s1", false)).await.unwrap();
        manager.reload_server_config("s1").await.unwrap();
        assert_eq!(manager.loaded_server_count().await, 0);
    }

    #[tokio::test]
    async fn test_reload_rebuilds_record() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", true)).await.unwrap();
        manager.initialize().await.unwrap();

        let mut updated = server("s1", true);
        updated.heartbeat_interval_secs = 42;
        storage.save_server(updated).await.unwrap();

        manager.reload_server_config("s1").await.unwrap();
        let servers = manager.servers.read().await;
        assert_eq!(servers.get("s1").unwrap().record.heartbeat_interval_secs, 42);
    }

    #[tokio::test]
    async fn test_start_all_and_shutdown() {
        let (manager, storage) = manager().await;
        storage.save_server(server("s1", true)).await.unwrap();
        storage.save_server(server("s2", true)).await.unwrap();
        manager.initialize().await.unwrap();

        manager.start_all().await;
        assert!(manager.get_server_status("s1").await.unwrap().running);
        assert!(manager.get_server_status("s2").await.unwrap().running);

        manager.shutdown().await;
        assert_eq!(manager.loaded_server_count().await, 0);
    }

    #[tokio::test]
    async fn test_global_accessor_shim() {
        let (manager, _storage) = manager().await;
        let manager = Arc::new(manager);

        set_global(manager.clone());
        assert!(global().is_some());
    }
}
