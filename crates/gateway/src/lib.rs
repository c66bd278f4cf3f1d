//! # Gatehub Gateway
//!
//! The HTTP gateway engine: a configurable handler chain running per
//! request, with a shared per-request context carrying trace identifiers,
//! timing checkpoints, routing decisions, and response state. The engine
//! guarantees every accepted request ends with a well-formed response.

pub mod chain;
pub mod context;
pub mod engine;
pub mod handlers;
pub mod http;

pub use chain::{FnHandler, Handler, HandlerChain};
pub use context::{RequestContext, ResponseParts, Timings};
pub use engine::{ContextPool, GatewayEngine, IngressRequest};
pub use handlers::{AuthHandler, ForwardHandler, Route, RouteHandler, TraceLogHandler};
pub use http::ingress_router;
