/*!
 * Stream Endpoints
 *
 * Long-lived websocket streams delivering config and service change events.
 *
 * ## Endpoints
 * - `/stream/config` — config change events for the requested data ids
 * - `/stream/services` — service change events (batch or whole namespace)
 *
 * ## Connection Flow
 * 1. Client connects with an `Authorization` header (Basic or Bearer)
 * 2. Validate credentials unless auth is toggled off
 * 3. Register the subscription and take its fan-in channel
 * 4. Forward channel events to the socket as JSON frames
 * 5. Unsubscribe on disconnect
 */

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use gatehub_common::{AuthOutcome, Authenticator, ConfigProvider};

use crate::config_service::ConfigService;
use crate::subscriber::ServiceSubscriber;
use crate::watcher::ConfigWatcher;

/// Heartbeat cadence on every stream
const PING_INTERVAL_SECS: u64 = 30;

/// Shared state behind the stream endpoints
pub struct StreamState {
    pub watcher: Arc<ConfigWatcher>,
    pub subscriber: Arc<ServiceSubscriber>,
    /// Present when this node serves config documents; feeds initial snapshots
    pub configs: Option<Arc<ConfigService>>,
    pub authenticator: Arc<Authenticator>,
    pub toggles: Arc<dyn ConfigProvider>,
}

/// Build the stream router
pub fn stream_router(state: Arc<StreamState>) -> Router {
    Router::new()
        .route("/stream/config", get(config_stream_handler))
        .route("/stream/services", get(service_stream_handler))
        .with_state(state)
}

/// Query parameters for a config stream
#[derive(Debug, Deserialize)]
pub struct ConfigStreamQuery {
    tenant: String,
    namespace: String,
    group: String,
    /// Comma-separated data ids
    data_ids: String,
    watcher_id: Option<String>,
}

/// Query parameters for a service stream
#[derive(Debug, Deserialize)]
pub struct ServiceStreamQuery {
    tenant: String,
    namespace: String,
    group: String,
    /// Comma-separated service names; absent = whole namespace
    services: Option<String>,
    subscriber_id: Option<String>,
}

async fn authenticate(state: &StreamState, headers: &HeaderMap) -> Result<Option<AuthOutcome>, Response> {
    if !state.toggles.enable_auth() {
        return Ok(None);
    }

    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.authenticator.authenticate(header).await {
        Ok(outcome) => Ok(Some(outcome)),
        Err(e) => {
            warn!(error = %e, "stream authentication failed");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "code": "UNAUTHENTICATED",
                    "message": "invalid or missing authorization",
                })),
            )
                .into_response())
        }
    }
}

async fn config_stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConfigStreamQuery>,
    State(state): State<Arc<StreamState>>,
    headers: HeaderMap,
) -> Response {
    let outcome = match authenticate(&state, &headers).await {
        Ok(outcome) => outcome,
        Err(denied) => return denied,
    };

    let watcher_id = query
        .watcher_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    info!(
        watcher = %watcher_id,
        user = outcome.as_ref().map(|o| o.user_id.as_str()).unwrap_or("-"),
        "config stream connection request"
    );

    ws.on_upgrade(move |socket| run_config_stream(socket, state, query, watcher_id))
}

async fn run_config_stream(
    socket: WebSocket,
    state: Arc<StreamState>,
    query: ConfigStreamQuery,
    watcher_id: String,
) {
    let data_ids: Vec<String> = query
        .data_ids
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let Some(rx) = state
        .watcher
        .watch(
            &query.tenant,
            &query.namespace,
            &query.group,
            &data_ids,
            &watcher_id,
        )
        .await
    else {
        error!(watcher = %watcher_id, "watcher id already in use");
        return;
    };

    // Current state first, then live changes
    if let Some(configs) = &state.configs {
        configs
            .send_snapshot(&watcher_id, &query.tenant, &query.namespace, &query.group, &data_ids)
            .await;
    }

    info!(watcher = %watcher_id, data_ids = data_ids.len(), "config stream connected");
    forward_events(socket, rx).await;

    state.watcher.unwatch(&watcher_id).await;
    info!(watcher = %watcher_id, "config stream disconnected");
}

async fn service_stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ServiceStreamQuery>,
    State(state): State<Arc<StreamState>>,
    headers: HeaderMap,
) -> Response {
    let outcome = match authenticate(&state, &headers).await {
        Ok(outcome) => outcome,
        Err(denied) => return denied,
    };

    let subscriber_id = query
        .subscriber_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    info!(
        subscriber = %subscriber_id,
        user = outcome.as_ref().map(|o| o.user_id.as_str()).unwrap_or("-"),
        "service stream connection request"
    );

    ws.on_upgrade(move |socket| run_service_stream(socket, state, query, subscriber_id))
}

async fn run_service_stream(
    socket: WebSocket,
    state: Arc<StreamState>,
    query: ServiceStreamQuery,
    subscriber_id: String,
) {
    let services: Vec<String> = query
        .services
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let (rx, batch) = if services.is_empty() {
        let rx = state
            .subscriber
            .subscribe_namespace(&query.tenant, &query.namespace, &query.group, &subscriber_id)
            .await;
        (rx, false)
    } else {
        match state
            .subscriber
            .subscribe_multiple_services(
                &query.tenant,
                &query.namespace,
                &query.group,
                &services,
                &subscriber_id,
            )
            .await
        {
            Some(rx) => (rx, true),
            None => {
                error!(subscriber = %subscriber_id, "subscriber id already in use");
                return;
            }
        }
    };

    info!(
        subscriber = %subscriber_id,
        mode = if batch { "batch" } else { "namespace" },
        "service stream connected"
    );
    forward_events(socket, rx).await;

    if batch {
        state
            .subscriber
            .unsubscribe_multiple_services(&subscriber_id)
            .await;
    } else {
        state
            .subscriber
            .unsubscribe_namespace(&query.tenant, &query.namespace, &query.group, &subscriber_id)
            .await;
    }
    info!(subscriber = %subscriber_id, "service stream disconnected");
}

/// Pump channel events into the socket until either side goes away
async fn forward_events<E: serde::Serialize>(socket: WebSocket, mut rx: mpsc::Receiver<E>) {
    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval =
        tokio::time::interval(std::time::Duration::from_secs(PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            // Client-side messages: only close and ping matter
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        debug!("client closed stream");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "websocket error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Fan-in channel events become JSON frames
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                error!(error = %e, "failed to serialize stream event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            error!("failed to send event frame");
                            break;
                        }
                    }
                    None => {
                        debug!("subscription channel closed");
                        break;
                    }
                }
            }

            // Periodic heartbeat keeps intermediaries from reaping the stream
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AuthOff;
    impl ConfigProvider for AuthOff {
        fn enable_auth(&self) -> bool {
            false
        }
    }

    struct AuthOn;
    impl ConfigProvider for AuthOn {
        fn enable_auth(&self) -> bool {
            true
        }
    }

    struct EmptyUsers;

    #[async_trait::async_trait]
    impl gatehub_common::UserStore for EmptyUsers {
        async fn lookup(
            &self,
            _user_id: &str,
        ) -> gatehub_common::Result<Option<(String, String, String)>> {
            Ok(None)
        }
    }

    fn state(toggles: Arc<dyn ConfigProvider>) -> Arc<StreamState> {
        Arc::new(StreamState {
            watcher: Arc::new(ConfigWatcher::new(100)),
            subscriber: Arc::new(ServiceSubscriber::new(100)),
            configs: None,
            authenticator: Arc::new(Authenticator::new(
                Box::new(EmptyUsers),
                Box::new(gatehub_common::JwtValidator::new(
                    "test_secret_key_minimum_32_characters_long",
                )),
            )),
            toggles,
        })
    }

    #[tokio::test]
    async fn test_authenticate_short_circuits_when_disabled() {
        let state = state(Arc::new(AuthOff));
        let headers = HeaderMap::new();

        let outcome = authenticate(&state, &headers).await.unwrap();
        assert!(outcome.is_none(), "no auth performed when toggled off");
    }

    #[tokio::test]
    async fn test_authenticate_rejects_missing_header() {
        let state = state(Arc::new(AuthOn));
        let headers = HeaderMap::new();

        let denied = authenticate(&state, &headers).await.unwrap_err();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_authenticate_accepts_valid_bearer() {
        let state = state(Arc::new(AuthOn));
        let token = gatehub_common::create_jwt(
            "u1",
            "test_secret_key_minimum_32_characters_long",
            3600,
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let outcome = authenticate(&state, &headers).await.unwrap().unwrap();
        assert_eq!(outcome.user_id, "u1");
        assert_eq!(outcome.auth_type, "bearer");
    }
}
