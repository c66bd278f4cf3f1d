/*!
 * Health Checker
 *
 * Continuously classifies registered instances as healthy or unhealthy and
 * surfaces transitions to storage and event subscribers.
 *
 * ## Architecture
 *
 * ```text
 * scheduler tick ──> check_queue ──> worker pool (N) ──> result_queue
 *                                                             │
 *                                            result processor (hysteresis)
 *                                                             │
 *                                          storage update + event publish
 * ```
 *
 * Both queues are bounded at `2 × workers` and fed with non-blocking sends;
 * overflow drops with a visible warning rather than backing up the scheduler.
 */

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gatehub_common::{Error, Result};
use gatehub_config::HealthCheckConfig;
use gatehub_domain::{HealthStatus, ServiceChangeEvent, ServiceEventType, ServiceInstance};

use crate::probe::{ProbeOutcome, probe_instance};
use crate::publisher::EventPublisher;
use crate::storage::RegistryStorage;

/// Deadline for the storage update + event publish pair on a transition
const TRANSITION_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Checker-internal per-instance probe state
///
/// Exactly one of the two counters is non-zero after each processed probe.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub instance: ServiceInstance,
    pub consecutive_success: u32,
    pub consecutive_fails: u32,
    pub last_status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
}

impl InstanceState {
    fn new(instance: ServiceInstance) -> Self {
        let last_status = instance.health_status;
        Self {
            instance,
            consecutive_success: 0,
            consecutive_fails: 0,
            last_status,
            last_check: None,
        }
    }
}

/// One completed probe, headed for the result processor
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub instance_id: String,
    pub status: HealthStatus,
    pub response_time: Duration,
    pub check_time: DateTime<Utc>,
    pub error: Option<String>,
}

impl ProbeResult {
    fn from_outcome(instance_id: &str, outcome: ProbeOutcome) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            status: outcome.status,
            response_time: outcome.response_time,
            check_time: Utc::now(),
            error: outcome.error,
        }
    }
}

/// Rolling checker statistics; the accessor returns a copy
#[derive(Debug, Clone, Default)]
pub struct CheckerStats {
    pub check_count: u64,
    pub error_count: u64,
    pub average_response_time_ms: f64,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub last_check_time: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker").finish_non_exhaustive()
    }
}

/// Worker-pool prober with a hysteresis state machine per instance
pub struct HealthChecker {
    config: HealthCheckConfig,
    storage: Arc<dyn RegistryStorage>,
    publisher: Arc<dyn EventPublisher>,

    instances: RwLock<HashMap<String, InstanceState>>,
    stats: std::sync::Mutex<CheckerStats>,

    running: AtomicBool,
    scope: std::sync::Mutex<CancellationToken>,
    check_tx: std::sync::Mutex<Option<mpsc::Sender<ServiceInstance>>>,
    result_tx: std::sync::Mutex<Option<mpsc::Sender<ProbeResult>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Build a checker, failing fast on misconfiguration
    pub fn new(
        config: HealthCheckConfig,
        storage: Arc<dyn RegistryStorage>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Fatal(e.to_string()))?;
        if config.enabled && !config.http_enabled && !config.tcp_enabled {
            return Err(Error::Fatal("no health check method enabled".to_string()));
        }

        Ok(Self {
            config,
            storage,
            publisher,
            instances: RwLock::new(HashMap::new()),
            stats: std::sync::Mutex::new(CheckerStats::default()),
            running: AtomicBool::new(false),
            scope: std::sync::Mutex::new(CancellationToken::new()),
            check_tx: std::sync::Mutex::new(None),
            result_tx: std::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Launch workers, result processor, and scheduler
    ///
    /// No-op when disabled by config or already running.
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("health checker disabled by config");
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("health checker already running");
            return;
        }

        let scope = CancellationToken::new();
        *self.scope.lock().unwrap() = scope.clone();

        let queue_size = 2 * self.config.workers;
        let (check_tx, check_rx) = mpsc::channel::<ServiceInstance>(queue_size);
        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(queue_size);
        *self.check_tx.lock().unwrap() = Some(check_tx.clone());
        *self.result_tx.lock().unwrap() = Some(result_tx.clone());

        let mut tasks = self.tasks.lock().await;

        // Worker pool shares the check queue behind one lock
        let check_rx = Arc::new(Mutex::new(check_rx));
        for worker_id in 0..self.config.workers {
            let checker = Arc::clone(self);
            let check_rx = Arc::clone(&check_rx);
            let result_tx = result_tx.clone();
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                checker.worker_loop(worker_id, check_rx, result_tx, scope).await;
            }));
        }

        // Single result processor applies the hysteresis machine
        {
            let checker = Arc::clone(self);
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                checker.result_loop(result_rx, scope).await;
            }));
        }

        // Scheduler fans the instance list into the check queue each tick
        {
            let checker = Arc::clone(self);
            let scope = scope.clone();
            tasks.push(tokio::spawn(async move {
                checker.scheduler_loop(check_tx, scope).await;
            }));
        }

        info!(
            workers = self.config.workers,
            interval_secs = self.config.interval_seconds,
            "health checker started"
        );
    }

    /// Cancel the internal scope, then close both queues
    ///
    /// No further results are delivered after stop returns.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.scope.lock().unwrap().cancel();
        self.check_tx.lock().unwrap().take();
        self.result_tx.lock().unwrap().take();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        info!("health checker stopped");
    }

    // ---- instance map management ----

    pub async fn add_instance(&self, instance: ServiceInstance) {
        let mut instances = self.instances.write().await;
        instances.insert(instance.id.clone(), InstanceState::new(instance));
    }

    pub async fn remove_instance(&self, instance_id: &str) {
        self.instances.write().await.remove(instance_id);
    }

    /// Replace the map with the tenant's active instances
    pub async fn load_instances(&self, tenant_id: &str) -> Result<usize> {
        let all = self.storage.list_all_instances(tenant_id).await?;
        let mut fresh: HashMap<String, InstanceState> = HashMap::new();
        for instance in all.into_iter().filter(|i| i.active) {
            fresh.insert(instance.id.clone(), InstanceState::new(instance));
        }
        let count = fresh.len();
        *self.instances.write().await = fresh;
        info!(tenant = tenant_id, count, "instances loaded into checker");
        Ok(count)
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Copy of the current statistics
    pub fn stats(&self) -> CheckerStats {
        self.stats.lock().unwrap().clone()
    }

    // ---- task bodies ----

    async fn scheduler_loop(&self, check_tx: mpsc::Sender<ServiceInstance>, scope: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_seconds));

        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot: Vec<ServiceInstance> = self
                        .instances
                        .read()
                        .await
                        .values()
                        .map(|s| s.instance.clone())
                        .collect();

                    for instance in snapshot {
                        if let Err(e) = check_tx.try_send(instance) {
                            warn!(error = %e, "check queue full, dropping scheduled probe");
                        }
                    }
                }
            }
        }
        debug!("scheduler stopped");
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        check_rx: Arc<Mutex<mpsc::Receiver<ServiceInstance>>>,
        result_tx: mpsc::Sender<ProbeResult>,
        scope: CancellationToken,
    ) {
        let client = reqwest::Client::new();

        loop {
            let instance = {
                let mut rx = check_rx.lock().await;
                tokio::select! {
                    _ = scope.cancelled() => break,
                    instance = rx.recv() => match instance {
                        Some(instance) => instance,
                        None => break,
                    },
                }
            };

            match probe_instance(&client, &self.config, &instance, &scope).await {
                Ok(outcome) => {
                    let result = ProbeResult::from_outcome(&instance.id, outcome);
                    if let Err(e) = result_tx.try_send(result) {
                        warn!(error = %e, "result queue full, dropping probe result");
                    }
                }
                Err(e) => {
                    // Only reachable when every probe method is toggled off
                    error!(worker = worker_id, error = %e, "probe failed");
                }
            }
        }
        debug!(worker = worker_id, "worker stopped");
    }

    async fn result_loop(&self, mut result_rx: mpsc::Receiver<ProbeResult>, scope: CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = scope.cancelled() => break,
                result = result_rx.recv() => match result {
                    Some(result) => result,
                    None => break,
                },
            };
            self.process_result(result).await;
        }
        debug!("result processor stopped");
    }

    // ---- hysteresis ----

    /// Apply one probe result to the state machine
    ///
    /// Returns `Some((old, new))` when the instance flipped state.
    fn apply_hysteresis(
        state: &mut InstanceState,
        result: &ProbeResult,
        failure_threshold: u32,
        success_threshold: u32,
    ) -> Option<(HealthStatus, HealthStatus)> {
        if result.status == HealthStatus::Healthy {
            state.consecutive_success += 1;
            state.consecutive_fails = 0;
        } else {
            state.consecutive_fails += 1;
            state.consecutive_success = 0;
        }

        let old = state.last_status;
        let new = if result.status == HealthStatus::Healthy
            && state.consecutive_success >= success_threshold
            && old != HealthStatus::Healthy
        {
            HealthStatus::Healthy
        } else if result.status != HealthStatus::Healthy
            && state.consecutive_fails >= failure_threshold
            && old != HealthStatus::Unhealthy
        {
            HealthStatus::Unhealthy
        } else {
            old
        };

        state.last_status = new;
        state.last_check = Some(result.check_time);

        (new != old).then_some((old, new))
    }

    /// Apply one completed probe to the hysteresis machine
    ///
    /// Normally fed by the worker pool; public so alternate probe sources
    /// (agent-reported health, admin overrides) can inject results.
    pub async fn process_result(&self, result: ProbeResult) {
        let transition = {
            let mut instances = self.instances.write().await;
            let Some(state) = instances.get_mut(&result.instance_id) else {
                debug!(instance = %result.instance_id, "result for unknown instance, ignoring");
                return;
            };

            Self::apply_hysteresis(
                state,
                &result,
                self.config.failure_threshold,
                self.config.success_threshold,
            )
            .map(|(old, new)| (old, new, state.instance.clone()))
        };

        self.update_stats(&result).await;

        if let Some((old, new, instance)) = transition {
            info!(
                instance = %instance.id,
                service = %instance.service_name,
                old = %old,
                new = %new,
                "instance health transition"
            );
            self.publish_transition(&instance, old, new).await;
        }
    }

    /// Storage update + event publish, bounded by a 5s deadline
    ///
    /// Failures are logged and do not revert the in-memory status.
    async fn publish_transition(&self, instance: &ServiceInstance, old: HealthStatus, new: HealthStatus) {
        let io = async {
            if let Err(e) = self
                .storage
                .update_instance_health(&instance.tenant_id, &instance.id, new)
                .await
            {
                error!(instance = %instance.id, error = %e, "failed to persist health transition");
            }

            let event = ServiceChangeEvent::new(
                ServiceEventType::InstanceHealthChange,
                &instance.tenant_id,
                &instance.namespace_id,
                &instance.group_name,
                &instance.service_name,
                format!("{old} -> {new}"),
                serde_json::json!({
                    "instanceId": instance.id,
                    "host": instance.host,
                    "port": instance.port,
                    "oldStatus": old,
                    "newStatus": new,
                }),
            );
            if let Err(e) = self.publisher.publish(event).await {
                error!(instance = %instance.id, error = %e, "failed to publish health change event");
            }
        };

        if tokio::time::timeout(TRANSITION_IO_TIMEOUT, io).await.is_err() {
            error!(instance = %instance.id, "health transition I/O timed out");
        }
    }

    async fn update_stats(&self, result: &ProbeResult) {
        let (total, healthy, unhealthy) = {
            let instances = self.instances.read().await;
            let healthy = instances
                .values()
                .filter(|s| s.last_status == HealthStatus::Healthy)
                .count();
            let unhealthy = instances
                .values()
                .filter(|s| s.last_status == HealthStatus::Unhealthy)
                .count();
            (instances.len(), healthy, unhealthy)
        };

        let mut stats = self.stats.lock().unwrap();
        stats.check_count += 1;
        if result.error.is_some() {
            stats.error_count += 1;
        }
        if result.status == HealthStatus::Healthy {
            let sample = result.response_time.as_millis() as f64;
            stats.average_response_time_ms = (stats.average_response_time_ms + sample) / 2.0;
        }
        stats.total_instances = total;
        stats.healthy_instances = healthy;
        stats.unhealthy_instances = unhealthy;
        stats.last_check_time = Some(result.check_time);
    }
}
