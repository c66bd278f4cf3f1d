/*!
 * Tunnel Client Core
 *
 * Dials the server's control port, authenticates, announces local services,
 * and keeps the session alive with heartbeats. Connection loss feeds a
 * reconnect loop with jittered exponential backoff, bounded by the record's
 * `max_reconnect_attempts` (0 = retry forever).
 */

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gatehub_common::{Error, Result};
use gatehub_domain::{TunnelClient, TunnelClientStatus, TunnelService};

use crate::backoff::calculate_backoff;
use crate::protocol::{ControlMessage, decode, encode};

/// Dial + login must fit in this window
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TunnelClientCore {
    record: TunnelClient,
    services: Vec<TunnelService>,
    max_backoff_secs: u64,

    running: AtomicBool,
    connected: AtomicBool,
    registered_services: AtomicUsize,
    reconnect_count: AtomicU64,
    error_count: AtomicU64,
    scope: std::sync::Mutex<CancellationToken>,
    started_at: std::sync::Mutex<Option<Instant>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelClientCore {
    pub fn new(record: TunnelClient, services: Vec<TunnelService>, max_backoff_secs: u64) -> Self {
        Self {
            record,
            services,
            max_backoff_secs,
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            registered_services: AtomicUsize::new(0),
            reconnect_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            scope: std::sync::Mutex::new(CancellationToken::new()),
            started_at: std::sync::Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Launch the connect/reconnect loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Validation("client already running".to_string()));
        }

        let scope = CancellationToken::new();
        *self.scope.lock().unwrap() = scope.clone();
        *self.started_at.lock().unwrap() = Some(Instant::now());

        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            core.run(scope).await;
        });
        *self.task.lock().await = Some(handle);

        info!(
            client = %self.record.id,
            server = %format!("{}:{}", self.record.server_address, self.record.server_port),
            "tunnel client started"
        );
        Ok(())
    }

    /// Close the control connection and stop reconnecting
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.scope.lock().unwrap().cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }

        self.connected.store(false, Ordering::Release);
        self.registered_services.store(0, Ordering::Release);
        *self.started_at.lock().unwrap() = None;

        info!(client = %self.record.id, "tunnel client stopped");
        Ok(())
    }

    /// Runtime snapshot
    pub fn status(&self) -> TunnelClientStatus {
        TunnelClientStatus {
            running: self.is_running(),
            connected: self.is_connected(),
            registered_services: self.registered_services.load(Ordering::Acquire),
            uptime_secs: self
                .started_at
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    async fn run(self: Arc<Self>, scope: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if scope.is_cancelled() {
                break;
            }

            match self.run_session(&scope).await {
                Ok(()) => {
                    // Graceful end (stop requested)
                    break;
                }
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    self.registered_services.store(0, Ordering::Release);
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    self.reconnect_count.fetch_add(1, Ordering::Relaxed);

                    let max = self.record.max_reconnect_attempts;
                    if max > 0 && attempt >= max {
                        error!(
                            client = %self.record.id,
                            attempts = attempt,
                            error = %e,
                            "giving up after too many reconnect attempts"
                        );
                        self.running.store(false, Ordering::Release);
                        break;
                    }

                    let backoff = calculate_backoff(attempt, 1, self.max_backoff_secs);
                    warn!(
                        client = %self.record.id,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "control session failed, reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = scope.cancelled() => break,
                    }
                }
            }
        }

        debug!(client = %self.record.id, "client loop stopped");
    }

    /// One full session: dial, login, announce, heartbeat until failure
    async fn run_session(&self, scope: &CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.record.server_address, self.record.server_port);

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::transient("dial", "connect timeout"))?
            .map_err(|e| Error::transient("dial", e))?;
        let mut framed = Framed::new(stream, LinesCodec::new());

        // Authenticate
        self.send(&mut framed, &ControlMessage::Login {
            token: self.record.auth_token.clone(),
            client_id: self.record.id.clone(),
            client_name: self.record.name.clone(),
        })
        .await?;

        let (session_id, heartbeat_interval) =
            match tokio::time::timeout(CONNECT_TIMEOUT, framed.next()).await {
                Ok(Some(Ok(line))) => match decode(&line)? {
                    ControlMessage::LoginResp {
                        ok: true,
                        session_id,
                        heartbeat_interval_secs,
                        ..
                    } => (session_id, heartbeat_interval_secs.max(1)),
                    ControlMessage::LoginResp { message, .. } => {
                        return Err(Error::Auth(format!("login rejected: {message}")));
                    }
                    ControlMessage::Error { code, message } => {
                        return Err(Error::Auth(format!("login failed: {code}: {message}")));
                    }
                    other => {
                        return Err(Error::transient(
                            "login",
                            format!("unexpected reply: {other:?}"),
                        ));
                    }
                },
                _ => return Err(Error::transient("login", "no reply from server")),
            };

        self.connected.store(true, Ordering::Release);
        info!(client = %self.record.id, session = %session_id, "control session established");

        // Announce local services
        for service in &self.services {
            self.send(&mut framed, &ControlMessage::RegisterService {
                session_id: session_id.clone(),
                service: service.clone(),
            })
            .await?;

            match tokio::time::timeout(CONNECT_TIMEOUT, framed.next()).await {
                Ok(Some(Ok(line))) => match decode(&line)? {
                    ControlMessage::RegisterResp {
                        ok: true,
                        service_name,
                        remote_port,
                        ..
                    } => {
                        self.registered_services.fetch_add(1, Ordering::AcqRel);
                        info!(
                            client = %self.record.id,
                            service = %service_name,
                            remote_port = remote_port.unwrap_or(0),
                            "service announced"
                        );
                    }
                    ControlMessage::RegisterResp {
                        message,
                        service_name,
                        ..
                    } => {
                        warn!(
                            client = %self.record.id,
                            service = %service_name,
                            reason = %message,
                            "service registration refused"
                        );
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        return Err(Error::transient(
                            "register",
                            format!("unexpected reply: {other:?}"),
                        ));
                    }
                },
                _ => return Err(Error::transient("register", "no reply from server")),
            }
        }

        // Heartbeat until the session dies or stop is requested
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_interval));
        let ack_deadline = Duration::from_secs(heartbeat_interval * 3);
        let mut last_ack = Instant::now();
        let mut seq: u64 = 0;

        loop {
            tokio::select! {
                _ = scope.cancelled() => {
                    debug!(client = %self.record.id, "session closing on stop");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if last_ack.elapsed() > ack_deadline {
                        return Err(Error::transient("heartbeat", "no ack within deadline"));
                    }
                    seq += 1;
                    self.send(&mut framed, &ControlMessage::Heartbeat {
                        session_id: session_id.clone(),
                        seq,
                    })
                    .await?;
                }
                frame = framed.next() => {
                    match frame {
                        Some(Ok(line)) => match decode(&line)? {
                            ControlMessage::HeartbeatAck { seq: acked } => {
                                last_ack = Instant::now();
                                debug!(client = %self.record.id, seq = acked, "heartbeat acked");
                            }
                            ControlMessage::Error { code, message } => {
                                return Err(Error::transient(
                                    "session",
                                    format!("{code}: {message}"),
                                ));
                            }
                            other => {
                                debug!(client = %self.record.id, message = ?other, "ignoring control message");
                            }
                        },
                        Some(Err(e)) => return Err(Error::transient("session", e)),
                        None => return Err(Error::transient("session", "connection closed")),
                    }
                }
            }
        }
    }

    async fn send(
        &self,
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
    use crate::server::TunnelServerCore;
    use crate::storage::MemoryTunnelStorage;
    use gatehub_domain::{ProxyType, TunnelServer, TunnelStatus};

    fn server_record(port: u16) -> TunnelServer {
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
            heartbeat_timeout_secs: 5,
            status: TunnelStatus::Stopped,
            active: true,
            config_version: 1,
            last_start_time: None,
        }
    }

    fn client_record(port: u16, token: &str, max_attempts: u32) -> TunnelClient {
        TunnelClient {
            id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            name: "branch-1".to_string(),
            server_address: "127.0.0.1".to_string(),
            server_port: port,
            auth_token: token.to_string(),
            tls_enabled: false,
            heartbeat_interval_secs: 1,
            max_reconnect_attempts: max_attempts,
            status: TunnelStatus::Stopped,
            active: true,
            config_version: 1,
            last_start_time: None,
        }
    }

    fn service(name: &str) -> TunnelService {
        TunnelService {
            id: format!("svc-{name}"),
            tenant_id: "t1".to_string(),
            client_id: "c1".to_string(),
            service_name: name.to_string(),
            proxy_type: ProxyType::Tcp,
            local_address: "127.0.0.1".to_string(),
            local_port: 9000,
            remote_port: None,
            custom_domains: vec![],
            sub_domain: None,
            active: true,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_connect_announce_heartbeat() {
        let storage = Arc::new(MemoryTunnelStorage::new());
        let server = Arc::new(TunnelServerCore::new(server_record(0), storage));
        server.start().await.unwrap();
        let port = server.control_addr().unwrap().port();

        let client = Arc::new(TunnelClientCore::new(
            client_record(port, "sesame", 0),
            vec![service("ssh")],
            4,
        ));
        client.start().await.unwrap();

        let connected = {
            let client = client.clone();
            wait_until(move || client.is_connected() && client.status().registered_services == 1)
                .await
        };
        assert!(connected, "client connected and announced its service");
        assert_eq!(server.session_count().await, 1);
        assert_eq!(server.dynamic_service_count().await, 1);

        client.stop().await.unwrap();
        assert!(!client.is_running());

        // Server withdraws the session and its dynamic services
        let drained = {
            let server = server.clone();
            let mut done = false;
            for _ in 0..100 {
                if server.session_count().await == 0 && server.dynamic_service_count().await == 0 {
                    done = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            done
        };
        assert!(drained, "session and services withdrawn after disconnect");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_token_counts_errors() {
        let storage = Arc::new(MemoryTunnelStorage::new());
        let server = Arc::new(TunnelServerCore::new(server_record(0), storage));
        server.start().await.unwrap();
        let port = server.control_addr().unwrap().port();

        let client = Arc::new(TunnelClientCore::new(
            client_record(port, "wrong", 2),
            vec![],
            1,
        ));
        client.start().await.unwrap();

        let gave_up = {
            let client = client.clone();
            wait_until(move || !client.is_running()).await
        };
        assert!(gave_up, "bounded reconnect gives up");
        assert!(client.status().error_count >= 2);
        assert!(!client.is_connected());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_bounded_when_server_absent() {
        // Port 1 refuses connections immediately
        let client = Arc::new(TunnelClientCore::new(
            client_record(1, "sesame", 2),
            vec![],
            1,
        ));
        client.start().await.unwrap();

        let gave_up = {
            let client = client.clone();
            wait_until(move || !client.is_running()).await
        };
        assert!(gave_up);
        assert_eq!(client.status().reconnect_count, 2);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        // Unbounded retries keep the loop alive while we probe double-start
        let client = Arc::new(TunnelClientCore::new(
            client_record(1, "sesame", 0),
            vec![],
            1,
        ));
        client.start().await.unwrap();
        assert!(matches!(
            client.start().await.unwrap_err(),
            Error::Validation(_)
        ));
        client.stop().await.unwrap();
        assert!(!client.is_running());
    }
}
