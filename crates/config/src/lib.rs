//! Configuration management for Gatehub
//!
//! Loads and validates service configuration from environment variables.
//! Every section has sensible defaults; only secrets are required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Main configuration struct for the entire platform
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub health_check: HealthCheckConfig,
    pub fabric: FabricConfig,
    pub tunnel: TunnelConfig,
    pub auth: AuthConfig,
    pub observability: ObservabilityConfig,
}

/// Gateway HTTP ingress configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to (0.0.0.0 for all interfaces)
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Upstream forward timeout in seconds
    pub forward_timeout_seconds: u64,
}

/// Health checker configuration
///
/// Invariants enforced at load: thresholds >= 1, interval > 0, and the
/// per-probe timeout strictly below the interval.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Master toggle; when false the checker never starts
    pub enabled: bool,

    /// Seconds between scheduler ticks
    pub interval_seconds: u64,

    /// Per-probe timeout in seconds
    pub timeout_seconds: u64,

    /// Worker pool size
    pub workers: usize,

    /// Consecutive failures before flipping to UNHEALTHY
    pub failure_threshold: u32,

    /// Consecutive successes before flipping back to HEALTHY
    pub success_threshold: u32,

    /// Default probe path when an instance carries no override
    pub default_path: String,

    /// Probe method toggles; HTTP is preferred when both are on
    pub http_enabled: bool,
    pub tcp_enabled: bool,

    /// Heartbeat TTL for the deregistration sweep, in seconds
    pub heartbeat_ttl_seconds: u64,
}

/// Push-fabric configuration (config watcher + service subscriber)
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    /// Per-subscriber channel capacity; overflow drops
    pub channel_capacity: usize,

    /// When false, stream endpoints skip the auth interceptor
    pub enable_auth: bool,
}

/// Tunnel control-plane configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Default tenant loaded by the manager at initialize
    pub default_tenant: String,

    /// Heartbeat defaults applied to records that carry none
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,

    /// Client reconnect backoff cap in seconds
    pub max_backoff_seconds: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT secret for token signing (min 32 chars)
    pub jwt_secret: String,

    /// JWT expiration in hours
    pub jwt_expiration_hours: i64,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Rust log filter (trace, debug, info, warn, error)
    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            gateway: Self::load_gateway()?,
            health_check: Self::load_health_check()?,
            fabric: Self::load_fabric()?,
            tunnel: Self::load_tunnel()?,
            auth: Self::load_auth()?,
            observability: Self::load_observability()?,
        })
    }

    fn load_gateway() -> Result<GatewayConfig> {
        Ok(GatewayConfig {
            host: env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("GATEWAY_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            forward_timeout_seconds: env::var("GATEWAY_FORWARD_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        })
    }

    fn load_health_check() -> Result<HealthCheckConfig> {
        let config = HealthCheckConfig {
            enabled: env::var("HEALTH_CHECK_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            interval_seconds: env::var("HEALTH_CHECK_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            timeout_seconds: env::var("HEALTH_CHECK_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            workers: env::var("HEALTH_CHECK_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            failure_threshold: env::var("HEALTH_CHECK_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            success_threshold: env::var("HEALTH_CHECK_SUCCESS_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            default_path: env::var("HEALTH_CHECK_DEFAULT_PATH")
                .unwrap_or_else(|_| "/health".to_string()),
            http_enabled: env::var("HEALTH_CHECK_HTTP_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            tcp_enabled: env::var("HEALTH_CHECK_TCP_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            heartbeat_ttl_seconds: env::var("HEALTH_CHECK_HEARTBEAT_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(90),
        };

        config.validate()?;
        Ok(config)
    }

    fn load_fabric() -> Result<FabricConfig> {
        Ok(FabricConfig {
            channel_capacity: env::var("FABRIC_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            enable_auth: env::var("FABRIC_ENABLE_AUTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        })
    }

    fn load_tunnel() -> Result<TunnelConfig> {
        Ok(TunnelConfig {
            default_tenant: env::var("TUNNEL_DEFAULT_TENANT")
                .unwrap_or_else(|_| "default".to_string()),
            heartbeat_interval_seconds: env::var("TUNNEL_HEARTBEAT_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            heartbeat_timeout_seconds: env::var("TUNNEL_HEARTBEAT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(90),
            max_backoff_seconds: env::var("TUNNEL_MAX_BACKOFF_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        })
    }

    fn load_auth() -> Result<AuthConfig> {
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters");
        }

        Ok(AuthConfig {
            jwt_secret,
            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(24),
        })
    }

    fn load_observability() -> Result<ObservabilityConfig> {
        Ok(ObservabilityConfig {
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info,gatehub=debug".to_string()),
        })
    }
}

impl HealthCheckConfig {
    /// Enforce the checker invariants; violation is a startup error
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold < 1 {
            anyhow::bail!("HEALTH_CHECK_FAILURE_THRESHOLD must be >= 1");
        }
        if self.success_threshold < 1 {
            anyhow::bail!("HEALTH_CHECK_SUCCESS_THRESHOLD must be >= 1");
        }
        if self.interval_seconds == 0 {
            anyhow::bail!("HEALTH_CHECK_INTERVAL_SECONDS must be > 0");
        }
        if self.timeout_seconds >= self.interval_seconds {
            anyhow::bail!(
                "HEALTH_CHECK_TIMEOUT_SECONDS ({}) must be below HEALTH_CHECK_INTERVAL_SECONDS ({})",
                self.timeout_seconds,
                self.interval_seconds
            );
        }
        if self.workers == 0 {
            anyhow::bail!("HEALTH_CHECK_WORKERS must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_health_env() {
        for key in [
            "HEALTH_CHECK_ENABLED",
            "HEALTH_CHECK_INTERVAL_SECONDS",
            "HEALTH_CHECK_TIMEOUT_SECONDS",
            "HEALTH_CHECK_WORKERS",
            "HEALTH_CHECK_FAILURE_THRESHOLD",
            "HEALTH_CHECK_SUCCESS_THRESHOLD",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_jwt_secret_validation() {
        clear_health_env();
        unsafe { env::set_var("JWT_SECRET", "short") };

        let result = Config::load();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("32 characters"));
    }

    #[test]
    #[serial]
    fn test_defaults_load() {
        clear_health_env();
        unsafe {
            env::set_var(
                "JWT_SECRET",
                "test_secret_key_minimum_32_characters_long",
            )
        };

        let config = Config::load().unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.health_check.failure_threshold, 3);
        assert_eq!(config.health_check.success_threshold, 1);
        assert_eq!(config.fabric.channel_capacity, 100);
        assert_eq!(config.tunnel.default_tenant, "default");
    }

    #[test]
    #[serial]
    fn test_health_check_timeout_must_be_below_interval() {
        clear_health_env();
        unsafe {
            env::set_var(
                "JWT_SECRET",
                "test_secret_key_minimum_32_characters_long",
            );
            env::set_var("HEALTH_CHECK_INTERVAL_SECONDS", "5");
            env::set_var("HEALTH_CHECK_TIMEOUT_SECONDS", "5");
        }

        let result = Config::load();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must be below"));

        clear_health_env();
    }

    #[test]
    fn test_threshold_invariants() {
        let mut config = HealthCheckConfig {
            enabled: true,
            interval_seconds: 10,
            timeout_seconds: 5,
            workers: 4,
            failure_threshold: 0,
            success_threshold: 1,
            default_path: "/health".to_string(),
            http_enabled: true,
            tcp_enabled: true,
            heartbeat_ttl_seconds: 90,
        };
        assert!(config.validate().is_err());

        config.failure_threshold = 1;
        config.success_threshold = 0;
        assert!(config.validate().is_err());

        config.success_threshold = 1;
        assert!(config.validate().is_ok());
    }
}
