/*!
 * Liveness Probes
 *
 * One probe classifies one instance as healthy or unhealthy. HTTP is
 * preferred when enabled; TCP dial is the fallback. Every probe is bounded
 * by the configured timeout and honors the checker's cancellation scope.
 */

use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gatehub_common::{Error, Result};
use gatehub_config::HealthCheckConfig;
use gatehub_domain::{HealthStatus, ServiceInstance};

pub const PROBE_USER_AGENT: &str = "Registry-HealthChecker/1.0";
pub const PROBE_ACCEPT: &str = "application/json,text/plain";

/// Outcome of a single probe attempt
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub response_time: Duration,
    pub error: Option<String>,
}

/// Probe one instance with the configured method preference
pub async fn probe_instance(
    client: &reqwest::Client,
    config: &HealthCheckConfig,
    instance: &ServiceInstance,
    scope: &CancellationToken,
) -> Result<ProbeOutcome> {
    let timeout = Duration::from_secs(config.timeout_seconds);

    if config.http_enabled {
        return Ok(probe_http(client, config, instance, timeout, scope).await);
    }
    if config.tcp_enabled {
        return Ok(probe_tcp(instance, timeout, scope).await);
    }

    Err(Error::Fatal("no health check method enabled".to_string()))
}

async fn probe_http(
    client: &reqwest::Client,
    config: &HealthCheckConfig,
    instance: &ServiceInstance,
    timeout: Duration,
    scope: &CancellationToken,
) -> ProbeOutcome {
    let path = instance
        .health_check_path()
        .unwrap_or(&config.default_path);
    let url = format!("{}{}", instance.url(), path);
    let start = Instant::now();

    let request = client
        .get(&url)
        .header(reqwest::header::USER_AGENT, PROBE_USER_AGENT)
        .header(reqwest::header::ACCEPT, PROBE_ACCEPT)
        .timeout(timeout);

    let outcome = tokio::select! {
        resp = request.send() => resp,
        _ = scope.cancelled() => {
            return ProbeOutcome {
                status: HealthStatus::Unhealthy,
                response_time: start.elapsed(),
                error: Some("probe cancelled".to_string()),
            };
        }
    };

    let response_time = start.elapsed();
    match outcome {
        Ok(resp) if resp.status().is_success() => {
            debug!(instance = %instance.id, url = %url, ms = response_time.as_millis() as u64, "http probe ok");
            ProbeOutcome {
                status: HealthStatus::Healthy,
                response_time,
                error: None,
            }
        }
        Ok(resp) => ProbeOutcome {
            status: HealthStatus::Unhealthy,
            response_time,
            error: Some(format!("unexpected status {}", resp.status().as_u16())),
        },
        Err(e) => ProbeOutcome {
            status: HealthStatus::Unhealthy,
            response_time,
            error: Some(e.to_string()),
        },
    }
}

async fn probe_tcp(
    instance: &ServiceInstance,
    timeout: Duration,
    scope: &CancellationToken,
) -> ProbeOutcome {
    let addr = instance.addr();
    let start = Instant::now();

    let dial = tokio::time::timeout(timeout, TcpStream::connect(&addr));
    let outcome = tokio::select! {
        result = dial => result,
        _ = scope.cancelled() => {
            return ProbeOutcome {
                status: HealthStatus::Unhealthy,
                response_time: start.elapsed(),
                error: Some("probe cancelled".to_string()),
            };
        }
    };

    let response_time = start.elapsed();
    match outcome {
        Ok(Ok(_stream)) => {
            debug!(instance = %instance.id, addr = %addr, ms = response_time.as_millis() as u64, "tcp probe ok");
            ProbeOutcome {
                status: HealthStatus::Healthy,
                response_time,
                error: None,
            }
        }
        Ok(Err(e)) => ProbeOutcome {
            status: HealthStatus::Unhealthy,
            response_time,
            error: Some(e.to_string()),
        },
        Err(_) => ProbeOutcome {
            status: HealthStatus::Unhealthy,
            response_time,
            error: Some(format!("dial timeout after {}s", timeout.as_secs())),
        },
    }
}
