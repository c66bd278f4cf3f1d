/*!
 * Handler Chain
 *
 * A handler exposes a single capability: `apply(ctx) -> continue`. The chain
 * is an ordered sequence executed per request; execution stops on the first
 * `false` or as soon as the context is responded. The chain is mutated only
 * during engine setup; the hot path iterates a snapshot taken under the
 * shared lock.
 */

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::context::RequestContext;

/// One link in the request pipeline
///
/// Handlers receive the shared context and may mutate it. Returning `false`
/// short-circuits the rest of the chain. Handlers must not panic; the engine
/// installs no recover boundary.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool;

    /// Name used in trace logs
    fn name(&self) -> &str {
        "handler"
    }
}

/// Ordered handler sequence with short-circuit execution
#[derive(Default)]
pub struct HandlerChain {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; called during engine setup under the writer lock
    pub fn add(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().unwrap().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().unwrap().is_empty()
    }

    /// Run the chain over a snapshot, in insertion order
    pub async fn execute(&self, ctx: &Arc<RequestContext>) {
        let snapshot: Vec<Arc<dyn Handler>> = self.handlers.read().unwrap().clone();

        for handler in snapshot {
            if ctx.is_responded() {
                break;
            }
            if !handler.apply(Arc::clone(ctx)).await {
                tracing::debug!(
                    trace_id = %ctx.trace_id(),
                    handler = handler.name(),
                    "chain short-circuited"
                );
                break;
            }
        }
    }
}

/// Adapter so plain async closures can join the chain
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = bool> + Send,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = bool> + Send,
{
    async fn apply(&self, ctx: Arc<RequestContext>) -> bool {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
