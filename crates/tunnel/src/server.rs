/*!
 * Tunnel Server Core
 *
 * Control-port listener for reverse tunnels: authenticates client
 * connections, tracks sessions with heartbeat eviction, binds static proxy
 * nodes at start, and accepts dynamic service registrations at runtime.
 *
 * ```text
 * client ──TCP──> control listener ──> session (login/heartbeat/register)
 * external ──TCP──> static proxy bind ──> target address
 * ```
 */

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gatehub_common::{Error, Result};
use gatehub_domain::{
    ProxyType, TunnelServer, TunnelServerNode, TunnelServerStatus, TunnelService, TunnelStatus,
};

use crate::protocol::{ControlMessage, decode, encode};
use crate::storage::TunnelStorage;

/// How long a connection may idle before its first Login frame
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// First port handed to dynamic services that request none
const DYNAMIC_PORT_BASE: u16 = 20000;

/// Result of a config reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Changes were reload-safe and are live
    Applied,
    /// Changes need a full stop/start cycle
    RestartRequired,
}

/// One authenticated control connection
#[derive(Debug)]
struct Session {
    client_id: String,
    client_name: String,
    remote_addr: String,
    last_heartbeat: Instant,
    scope: CancellationToken,
    /// Dynamic services announced over this session; withdrawn when it ends
    services: Vec<String>,
}

pub struct TunnelServerCore {
    record: RwLock<TunnelServer>,
    storage: Arc<dyn TunnelStorage>,

    sessions: RwLock<HashMap<String, Session>>,
    dynamic_services: RwLock<HashMap<String, TunnelService>>,
    static_binds: RwLock<Vec<(String, SocketAddr)>>,

    next_remote_port: AtomicU16,
    running: AtomicBool,
    scope: std::sync::Mutex<CancellationToken>,
    started_at: std::sync::Mutex<Option<Instant>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    error_count: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TunnelServerCore {
    pub fn new(record: TunnelServer, storage: Arc<dyn TunnelStorage>) -> Self {
        Self {
            record: RwLock::new(record),
            storage,
            sessions: RwLock::new(HashMap::new()),
            dynamic_services: RwLock::new(HashMap::new()),
            static_binds: RwLock::new(Vec::new()),
            next_remote_port: AtomicU16::new(DYNAMIC_PORT_BASE),
            running: AtomicBool::new(false),
            scope: std::sync::Mutex::new(CancellationToken::new()),
            started_at: std::sync::Mutex::new(None),
            local_addr: std::sync::Mutex::new(None),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Control-port address after start (useful when bound to port 0)
    pub fn control_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Addresses of bound static proxies
    pub async fn static_binds(&self) -> Vec<(String, SocketAddr)> {
        self.static_binds.read().await.clone()
    }

    /// Open the control listener, bind static proxies, emit `running`
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Validation("server already running".to_string()));
        }

        let record = self.record.read().await.clone();

        // Misconfiguration fails start, before any socket is opened
        if record.tls_enabled && (record.tls_cert_path.is_none() || record.tls_key_path.is_none()) {
            self.running.store(false, Ordering::Release);
            return Err(Error::Fatal(
                "TLS enabled but certificate material is missing".to_string(),
            ));
        }

        let scope = CancellationToken::new();
        *self.scope.lock().unwrap() = scope.clone();

        let bind = format!("{}:{}", record.control_address, record.control_port);
        let listener = TcpListener::bind(&bind).await.map_err(|e| {
            self.running.store(false, Ordering::Release);
            Error::Fatal(format!("control listener bind {bind}: {e}"))
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            self.running.store(false, Ordering::Release);
            Error::Fatal(e.to_string())
        })?;
        *self.local_addr.lock().unwrap() = Some(local_addr);

        let mut tasks = self.tasks.lock().await;

        // Static proxies are bound at server start, client or no client
        let nodes = match self.storage.list_nodes(&record.tenant_id).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        for node in nodes
            .into_iter()
            .filter(|n| n.active && n.server_id == record.id)
        {
            if node.proxy_type != ProxyType::Tcp {
                warn!(node = %node.name, proxy_type = %node.proxy_type, "only TCP static proxies bind at runtime");
                continue;
            }
            let core = Arc::clone(self);
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                core.run_static_proxy(node, scope).await;
            }));
        }

        // Accept loop for control connections
        {
            let core = Arc::clone(self);
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                core.accept_loop(listener, scope).await;
            }));
        }

        // Session eviction by heartbeat timeout
        {
            let core = Arc::clone(self);
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                core.eviction_loop(scope).await;
            }));
        }
        drop(tasks);

        *self.started_at.lock().unwrap() = Some(Instant::now());
        {
            let mut record = self.record.write().await;
            record.status = TunnelStatus::Running;
            record.last_start_time = Some(chrono::Utc::now());
            if let Err(e) = self.storage.save_server(record.clone()).await {
                warn!(server = %record.id, error = %e, "failed to persist running status");
            }
        }

        info!(server = %record.id, addr = %local_addr, "tunnel server started");
        Ok(())
    }

    /// Close listeners, end sessions, persist final state, emit `stopped`
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.scope.lock().unwrap().cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        {
            let mut sessions = self.sessions.write().await;
            for (id, session) in sessions.drain() {
                session.scope.cancel();
                debug!(session = %id, client = %session.client_id, "session terminated");
            }
        }
        self.static_binds.write().await.clear();
        *self.local_addr.lock().unwrap() = None;
        *self.started_at.lock().unwrap() = None;

        let mut record = self.record.write().await;
        record.status = TunnelStatus::Stopped;
        if let Err(e) = self.storage.save_server(record.clone()).await {
            warn!(server = %record.id, error = %e, "failed to persist stopped status");
        }

        info!(server = %record.id, "tunnel server stopped");
        Ok(())
    }

    /// Swap reload-safe config fields without a restart
    ///
    /// Only heartbeat timings apply live; anything else signals that a
    /// manual stop/start is needed.
    pub async fn reload(&self, config: TunnelServer) -> ReloadOutcome {
        let mut record = self.record.write().await;

        let reload_safe = config.id == record.id
            && config.control_address == record.control_address
            && config.control_port == record.control_port
            && config.auth_token == record.auth_token
            && config.tls_enabled == record.tls_enabled
            && config.vhost_http_port == record.vhost_http_port
            && config.vhost_https_port == record.vhost_https_port;

        if !reload_safe {
            return ReloadOutcome::RestartRequired;
        }

        record.heartbeat_interval_secs = config.heartbeat_interval_secs;
        record.heartbeat_timeout_secs = config.heartbeat_timeout_secs;
        record.config_version = config.config_version;
        info!(server = %record.id, "heartbeat timings reloaded");
        ReloadOutcome::Applied
    }

    /// Runtime snapshot
    pub async fn status(&self) -> TunnelServerStatus {
        TunnelServerStatus {
            running: self.is_running(),
            connection_count: self.sessions.read().await.len(),
            uptime_secs: self
                .started_at
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn dynamic_service_count(&self) -> usize {
        self.dynamic_services.read().await.len()
    }

    // ---- task bodies ----

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, scope: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = scope.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let core = Arc::clone(&self);
                    let scope = scope.clone();
                    tokio::spawn(async move {
                        core.handle_control_connection(stream, peer, scope).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "control accept failed");
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        debug!("control accept loop stopped");
    }

    async fn handle_control_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        scope: CancellationToken,
    ) {
        let mut framed = Framed::new(stream, LinesCodec::new());

        // First frame must be Login, within the login window
        let login = tokio::time::timeout(LOGIN_TIMEOUT, framed.next()).await;
        let (client_id, client_name) = match login {
            Ok(Some(Ok(line))) => match decode(&line) {
                Ok(ControlMessage::Login {
                    token,
                    client_id,
                    client_name,
                }) => {
                    let expected = self.record.read().await.auth_token.clone();
                    if token != expected {
                        warn!(peer = %peer, client = %client_id, "login rejected: bad token");
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                        let _ = Self::send(
                            &mut framed,
                            &ControlMessage::Error {
                                code: "AUTH_FAILED".to_string(),
                                message: "invalid token".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                    (client_id, client_name)
                }
                _ => {
                    warn!(peer = %peer, "first frame was not a login");
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            },
            _ => {
                debug!(peer = %peer, "connection closed before login");
                return;
            }
        };

        let session_id = Uuid::new_v4().simple().to_string();
        let session_scope = CancellationToken::new();
        let heartbeat_interval = self.record.read().await.heartbeat_interval_secs;

        self.sessions.write().await.insert(
            session_id.clone(),
            Session {
                client_id: client_id.clone(),
                client_name: client_name.clone(),
                remote_addr: peer.to_string(),
                last_heartbeat: Instant::now(),
                scope: session_scope.clone(),
                services: Vec::new(),
            },
        );

        if Self::send(
            &mut framed,
            &ControlMessage::LoginResp {
                ok: true,
                message: "welcome".to_string(),
                session_id: session_id.clone(),
                heartbeat_interval_secs: heartbeat_interval,
            },
        )
        .await
        .is_err()
        {
            self.sessions.write().await.remove(&session_id);
            return;
        }

        info!(session = %session_id, client = %client_id, peer = %peer, "tunnel session established");

        loop {
            let frame = tokio::select! {
                _ = scope.cancelled() => break,
                _ = session_scope.cancelled() => {
                    debug!(session = %session_id, "session evicted");
                    break;
                }
                frame = framed.next() => frame,
            };

            let line = match frame {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(session = %session_id, error = %e, "control frame error");
                    break;
                }
                None => break,
            };

            match decode(&line) {
                Ok(ControlMessage::Heartbeat { session_id: sid, seq }) => {
                    if let Some(session) = self.sessions.write().await.get_mut(&sid) {
                        session.last_heartbeat = Instant::now();
                    }
                    if Self::send(&mut framed, &ControlMessage::HeartbeatAck { seq })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(ControlMessage::RegisterService { service, .. }) => {
                    let name = service.service_name.clone();
                    let resp = match self.register_dynamic_service(service).await {
                        Ok(remote_port) => {
                            if let Some(session) = self.sessions.write().await.get_mut(&session_id)
                            {
                                session.services.push(name.clone());
                            }
                            ControlMessage::RegisterResp {
                                ok: true,
                                message: "registered".to_string(),
                                service_name: name,
                                remote_port: Some(remote_port),
                            }
                        }
                        Err(e) => {
                            self.error_count.fetch_add(1, Ordering::Relaxed);
                            ControlMessage::RegisterResp {
                                ok: false,
                                message: e.to_string(),
                                service_name: name,
                                remote_port: None,
                            }
                        }
                    };
                    if Self::send(&mut framed, &resp).await.is_err() {
                        break;
                    }
                }
                Ok(other) => {
                    debug!(session = %session_id, message = ?other, "ignoring unexpected control message");
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "undecodable control frame");
                }
            }
        }

        if let Some(session) = self.sessions.write().await.remove(&session_id) {
            let mut dynamic = self.dynamic_services.write().await;
            for name in &session.services {
                dynamic.remove(name);
                debug!(session = %session_id, service = %name, "dynamic service withdrawn");
            }
        }
        info!(session = %session_id, client = %client_id, "tunnel session closed");
    }

    /// Validate and admit a dynamically-announced service
    ///
    /// Allocation of the remote port happens here when the client left it
    /// unset; the chosen port rides back on the RegisterResp.
    async fn register_dynamic_service(&self, mut service: TunnelService) -> Result<u16> {
        let tenant_id = self.record.read().await.tenant_id.clone();

        let persisted = self.storage.list_services(&tenant_id).await?;

        // Validation and admission under one lock so racing registrations
        // cannot both claim a name or port
        let mut dynamic = self.dynamic_services.write().await;

        let name_taken = dynamic.contains_key(&service.service_name)
            || persisted
                .iter()
                .any(|s| s.active && s.service_name == service.service_name && s.id != service.id);
        if name_taken {
            return Err(Error::Validation(format!(
                "service name already registered: {}",
                service.service_name
            )));
        }

        if let Some(port) = service.remote_port {
            let port_taken = dynamic.values().any(|s| s.remote_port == Some(port))
                || persisted
                    .iter()
                    .any(|s| s.active && s.remote_port == Some(port) && s.id != service.id);
            if port_taken {
                return Err(Error::Validation(format!(
                    "remote port already in use: {port}"
                )));
            }
        }

        let remote_port = match service.remote_port {
            Some(port) => port,
            None => self.next_remote_port.fetch_add(1, Ordering::Relaxed),
        };
        service.remote_port = Some(remote_port);
        service.tenant_id = tenant_id;

        dynamic.insert(service.service_name.clone(), service.clone());
        drop(dynamic);

        if let Err(e) = self.storage.save_service(service.clone()).await {
            self.dynamic_services
                .write()
                .await
                .remove(&service.service_name);
            return Err(e);
        }

        info!(service = %service.service_name, remote_port, "dynamic service registered");
        Ok(remote_port)
    }

    async fn eviction_loop(self: Arc<Self>, scope: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    let timeout =
                        Duration::from_secs(self.record.read().await.heartbeat_timeout_secs);
                    let mut sessions = self.sessions.write().await;
                    let stale: Vec<String> = sessions
                        .iter()
                        .filter(|(_, s)| s.last_heartbeat.elapsed() > timeout)
                        .map(|(id, _)| id.clone())
                        .collect();

                    for id in stale {
                        if let Some(session) = sessions.remove(&id) {
                            warn!(
                                session = %id,
                                client = %session.client_id,
                                remote = %session.remote_addr,
                                name = %session.client_name,
                                "session heartbeat timed out"
                            );
                            session.scope.cancel();
                        }
                    }
                }
            }
        }
        debug!("eviction loop stopped");
    }

    /// Accept on a static node's listen port and pump bytes to its target
    async fn run_static_proxy(self: Arc<Self>, node: TunnelServerNode, scope: CancellationToken) {
        let bind = format!("{}:{}", node.listen_address, node.listen_port);
        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(node = %node.name, bind = %bind, error = %e, "static proxy bind failed");
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let Ok(addr) = listener.local_addr() {
            self.static_binds.write().await.push((node.id.clone(), addr));
            info!(node = %node.name, addr = %addr, target = %format!("{}:{}", node.target_address, node.target_port), "static proxy bound");
        }

        loop {
            let accepted = tokio::select! {
                _ = scope.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (mut inbound, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(node = %node.name, error = %e, "static proxy accept failed");
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let target = format!("{}:{}", node.target_address, node.target_port);
            let core = Arc::clone(&self);
            let node_name = node.name.clone();
            tokio::spawn(async move {
                match TcpStream::connect(&target).await {
                    Ok(mut outbound) => {
                        match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                            Ok((to_target, to_client)) => {
                                core.bytes_in.fetch_add(to_target, Ordering::Relaxed);
                                core.bytes_out.fetch_add(to_client, Ordering::Relaxed);
                            }
                            Err(e) => {
                                debug!(node = %node_name, peer = %peer, error = %e, "proxy stream ended with error");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(node = %node_name, target = %target, error = %e, "static proxy dial failed");
                        core.error_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
        debug!(node = %node.name, "static proxy stopped");
    }

    async fn send(
        framed: &mut Framed<TcpStream, LinesCodec>,
        message: &ControlMessage,
    ) -> Result<()> {
        let line = encode(message)?;
        framed
            .send(line)
            .await
            .map_err(|e| Error::transient("control send", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTunnelStorage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn record(port: u16) -> TunnelServer {
        TunnelServer {
            id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            name: "edge".to_string(),
            control_address: "127.0.0.1".to_string(),
            control_port: port,
            vhost_http_port: None,
            vhost_https_port: None,
            dashboard_port: None,
            auth_token: "sesame".to_string(),
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            heartbeat_interval_secs: 1,
            heartbeat_timeout_secs: 3,
            status: TunnelStatus::Stopped,
            active: true,
            config_version: 1,
            last_start_time: None,
        }
    }

    fn service(name: &str, remote_port: Option<u16>) -> TunnelService {
        TunnelService {
            id: format!("svc-{name}"),
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

    async fn started_server() -> (Arc<TunnelServerCore>, SocketAddr) {
        let storage = Arc::new(MemoryTunnelStorage::new());
        let core = Arc::new(TunnelServerCore::new(record(0), storage));
        core.start().await.unwrap();
        let addr = core.control_addr().unwrap();
        (core, addr)
    }

    async fn login(addr: SocketAddr, token: &str) -> Framed<TcpStream, LinesCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, LinesCodec::new());
        framed
            .send(
                encode(&ControlMessage::Login {
                    token: token.to_string(),
                    client_id: "c1".to_string(),
                    client_name: "edge-1".to_string(),
                })
                .unwrap(),
            )
            .await
            .unwrap();
        framed
    }

    #[tokio::test]
    async fn test_login_and_heartbeat() {
        let (core, addr) = started_server().await;
        let mut framed = login(addr, "sesame").await;

        let session_id = match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::LoginResp {
                ok, session_id, ..
            } => {
                assert!(ok);
                session_id
            }
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(core.session_count().await, 1);

        framed
            .send(
                encode(&ControlMessage::Heartbeat {
                    session_id,
                    seq: 7,
                })
                .unwrap(),
            )
            .await
            .unwrap();

        match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::HeartbeatAck { seq } => assert_eq!(seq, 7),
            other => panic!("unexpected: {other:?}"),
        }

        core.stop().await.unwrap();
        assert!(!core.is_running());
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let (core, addr) = started_server().await;
        let mut framed = login(addr, "wrong").await;

        match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::Error { code, .. } => assert_eq!(code, "AUTH_FAILED"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(core.session_count().await, 0);
        assert!(core.status().await.error_count >= 1);

        core.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dynamic_registration_allocates_port() {
        let (core, addr) = started_server().await;
        let mut framed = login(addr, "sesame").await;
        let session_id = match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::LoginResp { session_id, .. } => session_id,
            other => panic!("unexpected: {other:?}"),
        };

        framed
            .send(
                encode(&ControlMessage::RegisterService {
                    session_id: session_id.clone(),
                    service: service("ssh", None),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::RegisterResp {
                ok, remote_port, ..
            } => {
                assert!(ok);
                assert!(remote_port.unwrap() >= DYNAMIC_PORT_BASE);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(core.dynamic_service_count().await, 1);

        // A second registration under the same name is refused
        framed
            .send(
                encode(&ControlMessage::RegisterService {
                    session_id,
                    service: service("ssh", None),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        match decode(&framed.next().await.unwrap().unwrap()).unwrap() {
            ControlMessage::RegisterResp { ok, message, .. } => {
                assert!(!ok);
                assert!(message.contains("already registered"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        core.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_tls_without_material_is_fatal() {
        let storage = Arc::new(MemoryTunnelStorage::new());
        let mut rec = record(0);
        rec.tls_enabled = true;
        let core = Arc::new(TunnelServerCore::new(rec, storage));

        let err = core.start().await.unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
        assert!(!core.is_running());
    }

    #[tokio::test]
    async fn test_reload_safe_and_unsafe_fields() {
        let (core, _addr) = started_server().await;

        let mut cfg = record(0);
        cfg.heartbeat_interval_secs = 9;
        cfg.heartbeat_timeout_secs = 27;
        assert_eq!(core.reload(cfg).await, ReloadOutcome::Applied);
        assert_eq!(core.record.read().await.heartbeat_interval_secs, 9);

        let mut cfg = record(0);
        cfg.auth_token = "rotated".to_string();
        assert_eq!(core.reload(cfg).await, ReloadOutcome::RestartRequired);

        core.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_proxy_forwards_bytes() {
        // Backend echoes one payload back
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = backend.accept().await {
                let mut buf = [0u8; 64];
                if let Ok(n) = stream.read(&mut buf).await {
                    let _ = stream.write_all(&buf[..n]).await;
                }
            }
        });

        let storage = Arc::new(MemoryTunnelStorage::new());
        storage
            .save_node(TunnelServerNode {
                id: "n1".to_string(),
                tenant_id: "t1".to_string(),
                server_id: "s1".to_string(),
                name: "echo".to_string(),
                proxy_type: ProxyType::Tcp,
                listen_address: "127.0.0.1".to_string(),
                listen_port: 0,
                target_address: backend_addr.ip().to_string(),
                target_port: backend_addr.port(),
                active: true,
            })
            .await
            .unwrap();

        let core = Arc::new(TunnelServerCore::new(record(0), storage));
        core.start().await.unwrap();

        // Wait for the static bind to land
        let mut binds = core.static_binds().await;
        for _ in 0..50 {
            if !binds.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            binds = core.static_binds().await;
        }
        let (_, proxy_addr) = binds.first().expect("static proxy bound").clone();

        let mut conn = TcpStream::connect(proxy_addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // Traffic totals land once the proxied connection winds down
        drop(conn);
        let mut status = core.status().await;
        for _ in 0..50 {
            if status.bytes_in >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = core.status().await;
        }
        assert!(status.bytes_in >= 4);
        assert!(status.bytes_out >= 4);

        core.stop().await.unwrap();
    }
}
