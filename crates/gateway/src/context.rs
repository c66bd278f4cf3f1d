/*!
 * Request Context
 *
 * Per-request mutable scratchpad shared by every handler in the chain.
 * Typed fields carry what handlers actually need (trace id, timings, routing
 * decision, error sink); a small reader/writer-locked map remains for opaque
 * handler-to-handler hints.
 *
 * ## Contracts
 *
 * - Exactly one response per request: the `responded` flag is first-write-wins
 *   and every response-producing method is a no-op once it is set.
 * - `abort` additionally records the final status into the map, canonicalizes
 *   loose bodies into a gateway response, and cancels the scope so downstream
 *   work unwinds.
 * - `reset` makes a context safe for pool reuse without reallocation of the
 *   error buffer.
 */

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use gatehub_common::{Error, Result};
use gatehub_domain::{GatewayResponse, RouteResult};

/// Map key under which `abort` records the final HTTP status
pub const KEY_FINAL_STATUS: &str = "gateway.final_status";

/// Map key carrying the inbound `Authorization` header, when present
pub const KEY_AUTHORIZATION: &str = "gateway.authorization";

/// Map keys annotated by the auth handler on success
pub const KEY_AUTH_USER_ID: &str = "auth.user_id";
pub const KEY_AUTH_TYPE: &str = "auth.type";
pub const KEY_AUTH_TENANT_ID: &str = "auth.tenant_id";

/// Timing checkpoints over one request's lifecycle
///
/// `request_start` is the basis for elapsed reporting; the inbound
/// connection's establishment time (`connect_time`) is kept for diagnostics
/// only, because connection reuse would inflate latencies by the idle gap.
#[derive(Debug, Clone, Default)]
pub struct Timings {
    pub request_start: Option<Instant>,
    pub connect_time: Option<Instant>,
    pub forward_start: Option<Instant>,
    pub forward_response: Option<Instant>,
    pub response: Option<Instant>,
}

/// Buffered response written by exactly one handler (or the engine fallback)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Per-request context threaded through the handler chain
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    trace_id: Mutex<String>,

    /// Opaque handler-to-handler hints; reads take the shared lock
    values: RwLock<HashMap<String, Value>>,

    responded: AtomicBool,
    response: Mutex<Option<ResponseParts>>,
    errors: Mutex<Vec<String>>,
    timings: Mutex<Timings>,
    route: Mutex<Option<RouteResult>>,

    /// Cancellable scope released on abort/reset
    scope: Mutex<CancellationToken>,
}

impl RequestContext {
    pub fn new(method: &str, path: &str, remote_addr: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            remote_addr: remote_addr.to_string(),
            trace_id: Mutex::new(String::new()),
            values: RwLock::new(HashMap::new()),
            responded: AtomicBool::new(false),
            response: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            timings: Mutex::new(Timings::default()),
            route: Mutex::new(None),
            scope: Mutex::new(CancellationToken::new()),
        }
    }

    // ---- identity & timing ----

    pub fn set_trace_id(&self, trace_id: &str) {
        *self.trace_id.lock().unwrap() = trace_id.to_string();
    }

    pub fn trace_id(&self) -> String {
        self.trace_id.lock().unwrap().clone()
    }

    pub fn mark_request_start(&self) {
        self.timings.lock().unwrap().request_start = Some(Instant::now());
    }

    pub fn set_connect_time(&self, at: Instant) {
        self.timings.lock().unwrap().connect_time = Some(at);
    }

    pub fn mark_forward_start(&self) {
        self.timings.lock().unwrap().forward_start = Some(Instant::now());
    }

    pub fn mark_forward_response(&self) {
        self.timings.lock().unwrap().forward_response = Some(Instant::now());
    }

    pub fn timings(&self) -> Timings {
        self.timings.lock().unwrap().clone()
    }

    /// Time since request start; zero before the engine stamps it
    pub fn elapsed(&self) -> Duration {
        self.timings
            .lock()
            .unwrap()
            .request_start
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    // ---- routing ----

    pub fn set_route(&self, route: RouteResult) {
        *self.route.lock().unwrap() = Some(route);
    }

    pub fn route(&self) -> Option<RouteResult> {
        self.route.lock().unwrap().clone()
    }

    // ---- value bag ----

    pub async fn set(&self, key: &str, value: Value) {
        self.values.write().await.insert(key.to_string(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    /// Like `get`, but absence is an error carrying the key
    pub async fn must_get(&self, key: &str) -> Result<Value> {
        self.get(key)
            .await
            .ok_or_else(|| Error::NotFound(format!("context key: {key}")))
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key).await {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub async fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).await.and_then(|v| v.as_i64())
    }

    pub async fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).await.and_then(|v| v.as_bool())
    }

    // ---- errors ----

    pub fn add_error(&self, err: impl Into<String>) {
        self.errors.lock().unwrap().push(err.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    // ---- cancellation scope ----

    pub fn scope(&self) -> CancellationToken {
        self.scope.lock().unwrap().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.lock().unwrap().is_cancelled()
    }

    // ---- response ----

    pub fn is_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// First-write-wins claim of the response; true exactly once
    fn claim_response(&self) -> bool {
        !self.responded.swap(true, Ordering::AcqRel)
    }

    /// Force the responded flag without writing a body (diagnostics/tests)
    pub fn set_responded(&self) {
        self.responded.store(true, Ordering::Release);
    }

    /// Write a JSON response; no-op if already responded
    pub fn json<T: Serialize>(&self, status: u16, body: &T) -> Result<()> {
        if !self.claim_response() {
            return Ok(());
        }
        let body = serde_json::to_string(body)?;
        self.store_response(status, CONTENT_TYPE_JSON, body);
        Ok(())
    }

    /// Write a plain-text response; no-op if already responded
    pub fn string(&self, status: u16, body: impl Into<String>) -> Result<()> {
        if !self.claim_response() {
            return Ok(());
        }
        self.store_response(status, CONTENT_TYPE_TEXT, body.into());
        Ok(())
    }

    /// Terminate the request with a canonical gateway response
    ///
    /// Loose JSON bodies are wrapped into the canonical shape (code, message,
    /// domain, path, traceId); an already-canonical body passes through. The
    /// final status is recorded into the map for later inspectors, and the
    /// scope is cancelled to release downstream work.
    pub async fn abort(&self, status: u16, body: Value) -> Result<()> {
        if self.claim_response() {
            let canonical = self.canonicalize(status, body);
            let body = serde_json::to_string(&canonical)?;
            self.store_response(status, CONTENT_TYPE_JSON, body);
        }
        self.set(KEY_FINAL_STATUS, Value::from(status)).await;
        self.scope.lock().unwrap().cancel();
        Ok(())
    }

    fn canonicalize(&self, status: u16, body: Value) -> GatewayResponse {
        if let Ok(resp) = serde_json::from_value::<GatewayResponse>(body.clone()) {
            return resp;
        }
        let code = body
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| status.to_string());
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| body.to_string());
        GatewayResponse::new(code, message, "", &self.path, self.trace_id())
    }

    fn store_response(&self, status: u16, content_type: &'static str, body: String) {
        *self.response.lock().unwrap() = Some(ResponseParts {
            status,
            content_type,
            body,
        });
        self.timings.lock().unwrap().response = Some(Instant::now());
    }

    /// The buffered response, if any handler produced one
    pub fn response(&self) -> Option<ResponseParts> {
        self.response.lock().unwrap().clone()
    }

    // ---- reuse ----

    /// Point a recycled context at a new request
    pub(crate) fn rebind(mut self, method: &str, path: &str, remote_addr: &str) -> Self {
        self.method = method.to_string();
        self.path = path.to_string();
        self.remote_addr = remote_addr.to_string();
        self
    }

    /// Rewind the context for pool reuse
    ///
    /// Cancels the old scope, reallocates the map, zeroes timing and routing
    /// state, and truncates the error buffer in place keeping its capacity.
    pub async fn reset(&self) {
        {
            let mut scope = self.scope.lock().unwrap();
            scope.cancel();
            *scope = CancellationToken::new();
        }
        *self.values.write().await = HashMap::new();
        self.responded.store(false, Ordering::Release);
        *self.response.lock().unwrap() = None;
        self.errors.lock().unwrap().clear();
        *self.timings.lock().unwrap() = Timings::default();
        *self.route.lock().unwrap() = None;
        *self.trace_id.lock().unwrap() = String::new();
    }
}
