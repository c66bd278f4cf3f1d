use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use gatehub_common::{Authenticator, ConfigProvider, JwtValidator, UserStore};
use gatehub_fabric::{ConfigWatcher, FabricPublisher, ServiceSubscriber, StreamState};
use gatehub_gateway::{ForwardHandler, GatewayEngine, RouteHandler, TraceLogHandler};
use gatehub_registry::{HealthChecker, HeartbeatSweeper, MemoryRegistryStorage};

const SHUTDOWN_CHANNEL_SIZE: usize = 16;

/// Feature toggles backed by the loaded configuration
struct StaticToggles {
    enable_auth: bool,
}

impl ConfigProvider for StaticToggles {
    fn enable_auth(&self) -> bool {
        self.enable_auth
    }
}

/// User store placeholder until the admin surface wires a real one.
/// Basic credentials are rejected; Bearer tokens still validate.
struct EmptyUserStore;

#[async_trait::async_trait]
impl UserStore for EmptyUserStore {
    async fn lookup(
        &self,
        _user_id: &str,
    ) -> gatehub_common::Result<Option<(String, String, String)>> {
        Ok(None)
    }
}

/// Gateway service: HTTP ingress through the handler chain, plus the push
/// fabric stream endpoints and health surveillance for the default tenant.
#[tokio::main]
async fn main() -> Result<()> {
    gatehub_common::init_tracing();

    let config = gatehub_config::Config::load()?;
    info!("starting gateway service");

    // Graceful shutdown: Ctrl-C fans out over a broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(SHUTDOWN_CHANNEL_SIZE);
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to install Ctrl-C handler");
            return;
        }
        warn!("received Ctrl-C, initiating graceful shutdown");
        let _ = shutdown_signal.send(());
    });

    // Push fabric
    let watcher = Arc::new(ConfigWatcher::new(config.fabric.channel_capacity));
    let subscriber = Arc::new(ServiceSubscriber::new(config.fabric.channel_capacity));

    // Registry + health surveillance, publishing into the fabric
    let storage = Arc::new(MemoryRegistryStorage::new());
    let publisher = Arc::new(FabricPublisher::new(subscriber.clone()));
    let checker = Arc::new(
        HealthChecker::new(config.health_check.clone(), storage.clone(), publisher.clone())
            .context("health checker construction failed")?,
    );
    checker.load_instances("default").await.ok();
    checker.start().await;

    let sweeper = HeartbeatSweeper::new(
        storage.clone(),
        publisher.clone(),
        "default",
        Duration::from_secs(config.health_check.heartbeat_ttl_seconds),
        Duration::from_secs(config.health_check.interval_seconds),
    );
    let sweeper_scope = tokio_util::sync::CancellationToken::new();
    {
        let scope = sweeper_scope.clone();
        tokio::spawn(async move {
            sweeper.run(scope).await;
        });
    }

    // Gateway engine with the stock pipeline
    let engine = Arc::new(GatewayEngine::new());
    engine.use_handler(Arc::new(TraceLogHandler));
    engine.use_handler(Arc::new(RouteHandler::new(Vec::new())));
    engine.use_handler(Arc::new(
        ForwardHandler::new(Duration::from_secs(config.gateway.forward_timeout_seconds))
            .context("forward handler construction failed")?,
    ));

    // Stream endpoints share the fabric and the auth contract
    let configs = Arc::new(gatehub_fabric::ConfigService::new(watcher.clone()));
    let stream_state = Arc::new(StreamState {
        watcher,
        subscriber,
        configs: Some(configs),
        authenticator: Arc::new(Authenticator::new(
            Box::new(EmptyUserStore),
            Box::new(JwtValidator::new(&config.auth.jwt_secret)),
        )),
        toggles: Arc::new(StaticToggles {
            enable_auth: config.fabric.enable_auth,
        }),
    });

    let router = Router::new()
        .merge(gatehub_fabric::stream_router(stream_state))
        .merge(gatehub_gateway::ingress_router(engine));

    let bind = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "gateway listening");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await
    .context("gateway server error")?;

    // Wind the background surveillance down after the listener drains
    sweeper_scope.cancel();
    checker.stop().await;

    info!("gateway shutdown complete");
    Ok(())
}
