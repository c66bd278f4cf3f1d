/*!
 * HTTP Ingress
 *
 * Adapts axum onto the gateway engine: every request, any method or path,
 * funnels through `GatewayEngine::handle` and comes back out as a buffered
 * response with the right content type.
 */

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::{GatewayEngine, IngressRequest};

/// Build the ingress router; all traffic falls through to the engine
pub fn ingress_router(engine: Arc<GatewayEngine>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn dispatch(
    State(engine): State<Arc<GatewayEngine>>,
    request: Request<Body>,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let ingress = IngressRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        remote_addr,
        authorization: request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        connect_time: None,
    };

    let (parts, ctx) = engine.handle(ingress).await;
    engine.recycle(ctx);

    Response::builder()
        .status(StatusCode::from_u16(parts.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, parts.content_type)
        .body(Body::from(parts.body))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .expect("empty response")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FnHandler;
    use axum::body::to_bytes;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(router: Router, path: &str) -> (StatusCode, String, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, content_type, body)
    }

    #[tokio::test]
    async fn test_fallback_404_over_http() {
        let engine = Arc::new(GatewayEngine::new());
        let router = ingress_router(engine);

        let (status, content_type, body) = send(router, "/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(content_type, "application/json; charset=utf-8");
        assert_eq!(body["code"], "ROUTE_NOT_FOUND");
        assert_eq!(body["path"], "/missing");
    }

    #[tokio::test]
    async fn test_handler_response_over_http() {
        let engine = Arc::new(GatewayEngine::new());
        engine.use_handler(Arc::new(FnHandler::new("ok", |ctx| async move {
            ctx.json(200, &json!({"pong": true})).unwrap();
            true
        })));
        let router = ingress_router(engine);

        let (status, _content_type, body) = send(router, "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pong"], true);
    }
}
