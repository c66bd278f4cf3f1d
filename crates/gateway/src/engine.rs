/*!
 * Gateway Engine
 *
 * Accepts an HTTP request, mints a trace id, bootstraps the request context,
 * drives the handler chain, and guarantees a terminal response: no request
 * leaves the engine without a well-formed body.
 */

use std::sync::{Arc, Mutex};
use std::time::Instant;

use gatehub_domain::GatewayResponse;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chain::{Handler, HandlerChain};
use crate::context::{KEY_FINAL_STATUS, RequestContext, ResponseParts};

/// What the ingress adapter hands to the engine per request
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    /// `Authorization` header value, when the client sent one
    pub authorization: Option<String>,
    /// TCP connection establishment time, when the inbound scope carries one.
    /// Kept for diagnostics only; elapsed reporting uses request start so
    /// connection reuse cannot inflate latencies by the idle gap.
    pub connect_time: Option<Instant>,
}

/// Pool of recycled request contexts
///
/// Contexts are reset before reuse; the pool is bounded so a burst cannot
/// pin memory forever.
pub struct ContextPool {
    free: Mutex<Vec<RequestContext>>,
    max_idle: usize,
}

impl ContextPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    async fn acquire(&self, req: &IngressRequest) -> RequestContext {
        let recycled = self.free.lock().unwrap().pop();
        match recycled {
            Some(ctx) => {
                ctx.reset().await;
                ctx.rebind(&req.method, &req.path, &req.remote_addr)
            }
            None => RequestContext::new(&req.method, &req.path, &req.remote_addr),
        }
    }

    fn release(&self, ctx: RequestContext) {
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_idle {
            free.push(ctx);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// The HTTP gateway engine
///
/// Safe for concurrent `handle` invocations; chain mutation during live
/// traffic is permitted but visible only to subsequent requests.
pub struct GatewayEngine {
    chain: HandlerChain,
    pool: ContextPool,
}

impl Default for GatewayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayEngine {
    pub fn new() -> Self {
        Self {
            chain: HandlerChain::new(),
            pool: ContextPool::new(256),
        }
    }

    /// Append a handler to the chain
    pub fn use_handler(&self, handler: Arc<dyn Handler>) {
        self.chain.add(handler);
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Drive one request through the pipeline
    ///
    /// Returns the response parts to write to the client, plus the finished
    /// context for callers that want to inspect it (tests, access logs).
    pub async fn handle(&self, req: IngressRequest) -> (ResponseParts, Arc<RequestContext>) {
        let ctx = Arc::new(self.pool.acquire(&req).await);

        let trace_id = gatehub_common::trace_id();
        ctx.set_trace_id(&trace_id);
        ctx.mark_request_start();
        if let Some(at) = req.connect_time {
            ctx.set_connect_time(at);
        }
        if let Some(auth) = &req.authorization {
            ctx.set(crate::context::KEY_AUTHORIZATION, Value::from(auth.clone()))
                .await;
        }

        debug!(trace_id = %trace_id, method = %req.method, path = %req.path, "request accepted");

        self.chain.execute(&ctx).await;

        // Terminal guarantee: every accepted request ends with a response.
        if !ctx.is_responded() {
            let fallback = GatewayResponse::route_not_found(&req.path, &trace_id);
            if let Err(e) = ctx.json(404, &fallback) {
                warn!(trace_id = %trace_id, error = %e, "failed to serialize fallback response");
            }
            ctx.set(KEY_FINAL_STATUS, Value::from(404)).await;
        }

        let parts = ctx.response().unwrap_or_else(|| ResponseParts {
            status: 404,
            content_type: crate::context::CONTENT_TYPE_JSON,
            body: "{}".to_string(),
        });

        debug!(
            trace_id = %trace_id,
            status = parts.status,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "request completed"
        );

        (parts, ctx)
    }

    /// Return a finished context to the free pool when no one else holds it
    pub fn recycle(&self, ctx: Arc<RequestContext>) {
        if let Some(ctx) = Arc::into_inner(ctx) {
            self.pool.release(ctx);
        }
    }
}
