/*!
 * Built-in Handlers
 *
 * The stock pipeline: trace logging, route resolution against a prefix
 * table, and upstream forwarding. Deployments compose these with their own
 * policy handlers via `GatewayEngine::use_handler`.
 */

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use gatehub_common::{Authenticator, ConfigProvider};
use gatehub_domain::RouteResult;

use crate::chain::Handler;
use crate::context::{
    KEY_AUTH_TENANT_ID, KEY_AUTH_TYPE, KEY_AUTH_USER_ID, KEY_AUTHORIZATION, RequestContext,
};

/// Logs one line per request with the trace id; always continues
pub struct TraceLogHandler;

#[async_trait]
impl Handler for TraceLogHandler {
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool {
        info!(
            trace_id = %ctx.trace_id(),
            method = %ctx.method,
            path = %ctx.path,
            remote = %ctx.remote_addr,
            "gateway request"
        );
        true
    }

    fn name(&self) -> &str {
        "trace-log"
    }
}

/// Enforces the `Authorization` contract on gateway requests
///
/// Short-circuits as authenticated while the auth toggle is off. On success
/// the connection annotations land in the context map for later handlers;
/// on failure the request terminates with a canonical 401.
pub struct AuthHandler {
    authenticator: Arc<Authenticator>,
    toggles: Arc<dyn ConfigProvider>,
}

impl AuthHandler {
    pub fn new(authenticator: Arc<Authenticator>, toggles: Arc<dyn ConfigProvider>) -> Self {
        Self {
            authenticator,
            toggles,
        }
    }
}

#[async_trait]
impl Handler for AuthHandler {
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool {
        if !self.toggles.enable_auth() {
            return true;
        }

        let header = ctx.get_string(KEY_AUTHORIZATION).await;
        match self.authenticator.authenticate(header.as_deref()).await {
            Ok(outcome) => {
                ctx.set(KEY_AUTH_USER_ID, Value::from(outcome.user_id)).await;
                ctx.set(KEY_AUTH_TYPE, Value::from(outcome.auth_type)).await;
                ctx.set(KEY_AUTH_TENANT_ID, Value::from(outcome.tenant_id))
                    .await;
                true
            }
            Err(e) => {
                debug!(trace_id = %ctx.trace_id(), error = %e, "request authentication failed");
                ctx.add_error(format!("authentication: {e}"));
                let _ = ctx
                    .abort(
                        401,
                        json!({
                            "code": "UNAUTHENTICATED",
                            "message": "invalid or missing authorization",
                        }),
                    )
                    .await;
                false
            }
        }
    }

    fn name(&self) -> &str {
        "auth"
    }
}

/// One routing rule: longest matching prefix wins
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub path_prefix: String,
    pub service_id: String,
    /// Upstream base URL, e.g. `http://10.0.0.5:8080`
    pub upstream: String,
}

/// Resolves the request path against the route table
///
/// A match records the routing decision into the context; a miss continues
/// the chain so the engine's terminal 404 can fire.
pub struct RouteHandler {
    routes: RwLock<Vec<Route>>,
}

impl RouteHandler {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: RwLock::new(routes),
        }
    }

    pub fn add_route(&self, route: Route) {
        self.routes.write().unwrap().push(route);
    }

    fn resolve(&self, path: &str) -> Option<Route> {
        self.routes
            .read()
            .unwrap()
            .iter()
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
            .cloned()
    }
}

#[async_trait]
impl Handler for RouteHandler {
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool {
        match self.resolve(&ctx.path) {
            Some(route) => {
                debug!(
                    trace_id = %ctx.trace_id(),
                    route_id = %route.id,
                    service_id = %route.service_id,
                    "route matched"
                );
                ctx.set_route(RouteResult {
                    target_url: format!("{}{}", route.upstream, ctx.path),
                    route_id: route.id,
                    service_id: route.service_id,
                    matched_path: route.path_prefix,
                });
            }
            None => {
                debug!(trace_id = %ctx.trace_id(), path = %ctx.path, "no route matched");
            }
        }
        true
    }

    fn name(&self) -> &str {
        "route"
    }
}

/// Forwards routed requests upstream and relays the response
///
/// Unrouted requests pass through untouched. Upstream failures terminate the
/// request with a canonical 502.
pub struct ForwardHandler {
    client: reqwest::Client,
}

impl ForwardHandler {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn forward(&self, ctx: &RequestContext, target_url: &str) {
        ctx.mark_forward_start();

        let request = match ctx.method.as_str() {
            "POST" => self.client.post(target_url),
            "PUT" => self.client.put(target_url),
            "DELETE" => self.client.delete(target_url),
            _ => self.client.get(target_url),
        };

        let scope = ctx.scope();
        let outcome = tokio::select! {
            resp = request.send() => resp,
            _ = scope.cancelled() => {
                debug!(trace_id = %ctx.trace_id(), "forward cancelled");
                return;
            }
        };

        ctx.mark_forward_response();

        match outcome {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let is_json = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.contains("json"))
                    .unwrap_or(false);
                let body = resp.text().await.unwrap_or_default();

                let result = if is_json {
                    match serde_json::from_str::<serde_json::Value>(&body) {
                        Ok(value) => ctx.json(status, &value),
                        Err(_) => ctx.string(status, body),
                    }
                } else {
                    ctx.string(status, body)
                };
                if let Err(e) = result {
                    warn!(trace_id = %ctx.trace_id(), error = %e, "failed to relay upstream response");
                }
            }
            Err(e) => {
                warn!(trace_id = %ctx.trace_id(), target = %target_url, error = %e, "upstream forward failed");
                ctx.add_error(format!("forward to {target_url}: {e}"));
                let _ = ctx
                    .abort(
                        502,
                        json!({
                            "code": "UPSTREAM_UNAVAILABLE",
                            "message": "upstream request failed",
                        }),
                    )
                    .await;
            }
        }
    }
}

#[async_trait]
impl Handler for ForwardHandler {
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool {
        let Some(route) = ctx.route() else {
            return true;
        };
        self.forward(&ctx, &route.target_url).await;
        true
    }

    fn name(&self) -> &str {
        "forward"
    }
}
