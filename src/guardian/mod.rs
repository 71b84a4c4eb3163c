// Guardian module - owns the supervised child, the monitoring loop and restarts

mod status;
#[cfg(test)]
mod tests;

pub use status::{GuardianStatus, MonitorTick, TickAction};

use crate::config::{GuardianConfig, UnhealthyPolicy};
use crate::degradation::{DegradationStatus, GracefulDegradation};
use crate::error::{GuardianError, Result};
use crate::health::{HealthCheck, HealthMonitor, HealthReport, HealthStatus};
use crate::process::{
    spawn_process, terminate, LaunchSpec, MemoryProbe, MemoryState, MemoryStats, ProcessState,
    RestartAttempt, RestartTrigger, SysinfoProbe,
};
use crate::protection::{CircuitState, RestartProtection};
use crate::state::capture::GuardianSnapshot;
use crate::state::{CompleteState, ContextProvider, StateManager};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Environment variable carrying the state directory to the child
pub const STATE_DIR_ENV: &str = "MEMORY_GUARDIAN_STATE_DIR";
/// Environment variable carrying the number of restarts before this launch
pub const RESTART_COUNT_ENV: &str = "MEMORY_GUARDIAN_RESTART_COUNT";

pub const FEATURE_AUTOMATED_RESTART: &str = "automated_restart";
pub const FEATURE_STATE_PERSISTENCE: &str = "state_persistence";
pub const FEATURE_PROCESS_HEALTH: &str = "process_health";

enum RestartOutcome {
    Rejected,
    Completed(bool),
}

impl RestartOutcome {
    fn action(self) -> TickAction {
        match self {
            RestartOutcome::Rejected => TickAction::RestartRejected,
            RestartOutcome::Completed(success) => TickAction::Restarted { success },
        }
    }
}

struct MonitorHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Everything the guardian mutates, behind one lock. Never held across a
/// process wait.
struct Inner {
    child: Option<Child>,
    pid: Option<u32>,
    process_state: ProcessState,
    started_at: Option<Instant>,
    probe: Box<dyn MemoryProbe>,
    protection: RestartProtection,
    health: HealthMonitor,
    degradation: GracefulDegradation,
    state_manager: StateManager,
    memory_stats: MemoryStats,
    memory_state: MemoryState,
    restart_attempts: Vec<RestartAttempt>,
    app_state: Option<CompleteState>,
}

impl Inner {
    /// Forget the child after it exited on its own
    fn mark_crashed(&mut self) {
        self.child = None;
        self.pid = None;
        self.started_at = None;
        self.process_state = ProcessState::Crashed;
        self.health.set_monitored_process(None);
    }

    /// Check a running child for an unexpected exit
    fn poll_exit(&mut self) -> bool {
        if self.process_state != ProcessState::Running {
            return false;
        }

        let pid = self.pid.unwrap_or(0);
        let exited = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(pid, %status, "supervised process exited unexpectedly");
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(pid, "failed to poll process status: {}", e);
                    false
                }
            },
            None => true,
        };

        if exited {
            self.mark_crashed();
        }
        exited
    }

    fn uptime_secs(&self) -> Option<f64> {
        self.started_at.map(|t| t.elapsed().as_secs_f64())
    }
}

/// Memory watchdog for one supervised process
pub struct MemoryGuardian {
    config: GuardianConfig,
    inner: Mutex<Inner>,
    restart_guard: Mutex<()>,
    monitor: Mutex<Option<MonitorHandle>>,
    context: Option<Arc<dyn ContextProvider>>,
}

impl MemoryGuardian {
    /// Build a guardian reading memory through sysinfo.
    ///
    /// Fails if the configuration is invalid; nothing is spawned here.
    pub fn new(config: GuardianConfig) -> Result<Self> {
        Self::with_probe(config, SysinfoProbe::new())
    }

    /// Build a guardian with a caller-supplied memory probe
    pub fn with_probe<P>(config: GuardianConfig, probe: P) -> Result<Self>
    where
        P: MemoryProbe + 'static,
    {
        config.validate()?;

        let inner = Inner {
            child: None,
            pid: None,
            process_state: ProcessState::NotStarted,
            started_at: None,
            probe: Box::new(probe),
            protection: RestartProtection::from_config(&config),
            health: HealthMonitor::new(config.health.clone()),
            degradation: GracefulDegradation::new(),
            state_manager: StateManager::from_config(&config),
            memory_stats: MemoryStats::new(),
            memory_state: MemoryState::Normal,
            restart_attempts: Vec::new(),
            app_state: None,
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
            restart_guard: Mutex::new(()),
            monitor: Mutex::new(None),
            context: None,
        })
    }

    /// Attach the application context captured before and restored after restarts
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(provider);
        self
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Prepare the state directory, load prior state and reset the lifecycle.
    ///
    /// # Returns
    /// * `true` - Ready to start
    /// * `false` - The state directory could not be prepared
    pub async fn initialize(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if let Err(e) = inner.state_manager.ensure_dir() {
            error!("Failed to initialize memory guardian: {}", e);
            return false;
        }

        if self.config.persist_state {
            if let Some(state) = inner.state_manager.restore_state(None) {
                info!(
                    total_restarts = inner.state_manager.total_restarts(),
                    "loaded previously persisted state"
                );
                inner.app_state = Some(state);
            }
        }

        if inner.child.is_none() {
            inner.process_state = ProcessState::NotStarted;
        }
        inner
            .health
            .set_working_directory(self.config.working_directory.clone());

        let removed = inner.state_manager.cleanup_old_states();
        info!(
            state_dir = %self.config.state_dir().display(),
            removed_states = removed,
            "memory guardian initialized"
        );

        true
    }

    /// Spawn the configured command and wait out the startup grace period.
    ///
    /// `restart_policy.startup_grace_secs` is the startup timeout: this returns
    /// once it elapses, and fails if the child exited before then.
    pub async fn start_process(&self) -> bool {
        match self.launch().await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to start process: {}", e);
                false
            }
        }
    }

    async fn launch(&self) -> Result<u32> {
        let pid = {
            let mut inner = self.inner.lock().await;

            if inner.child.is_some() {
                return Err(GuardianError::InvalidProcessState(
                    "process is already running".to_string(),
                ));
            }

            let spec = LaunchSpec::from_config(&self.config)?
                .with_env(STATE_DIR_ENV, self.config.state_dir().display().to_string())
                .with_env(
                    RESTART_COUNT_ENV,
                    inner.state_manager.total_restarts().to_string(),
                );

            let spawned = spawn_process(&spec)?;
            let pid = spawned.pid;

            inner.child = Some(spawned.child);
            inner.pid = Some(pid);
            inner.started_at = Some(Instant::now());
            inner.process_state = ProcessState::Running;
            inner.health.set_monitored_process(Some(pid));

            debug!(pid, program = %spec.program, "process spawned");
            pid
        };

        let grace = self.config.restart_policy.startup_grace();
        if !grace.is_zero() {
            sleep(grace).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.pid != Some(pid) {
            return Err(GuardianError::SpawnError(format!(
                "process {} exited during startup",
                pid
            )));
        }

        let early_exit = match inner.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => {
                    warn!(pid, "failed to poll process after startup: {}", e);
                    None
                }
            },
            None => Some("no process handle".to_string()),
        };

        if let Some(status) = early_exit {
            inner.mark_crashed();
            return Err(GuardianError::SpawnError(format!(
                "process {} exited during startup: {}",
                pid, status
            )));
        }

        info!(pid, "process started");
        Ok(pid)
    }

    /// One polling tick.
    ///
    /// Detects an unexpected exit, samples memory, classifies it, feeds the
    /// leak detector and restarts on emergency or a confirmed leak.
    pub async fn monitor_memory(&self) -> MonitorTick {
        let mut inner = self.inner.lock().await;

        if !self.config.enabled {
            return tick(&inner, None, TickAction::None);
        }

        inner.poll_exit();

        if inner.process_state == ProcessState::Crashed {
            if inner.degradation.is_disabled(FEATURE_AUTOMATED_RESTART) {
                warn!("process is down but automated restart is disabled");
                return tick(&inner, None, TickAction::None);
            }
            drop(inner);

            let outcome = self
                .restart_with(RestartTrigger::ProcessDied, "process died")
                .await;
            let inner = self.inner.lock().await;
            return tick(&inner, None, outcome.action());
        }

        let pid = match (inner.process_state, inner.pid) {
            (ProcessState::Running, Some(pid)) => pid,
            _ => return tick(&inner, None, TickAction::None),
        };

        let memory_mb = match inner.probe.memory_mb(pid) {
            Some(mb) if mb.is_finite() && mb > 0.0 => mb,
            other => {
                debug!(pid, reading = ?other, "no usable memory sample this tick");
                return tick(&inner, None, TickAction::None);
            }
        };

        inner.memory_stats.record(memory_mb);

        let previous = inner.memory_state;
        let current = MemoryState::classify(memory_mb, &self.config.thresholds);
        inner.memory_state = current;
        if current > previous {
            warn!(pid, memory_mb, from = %previous, to = %current, "memory state worsened");
        } else if current < previous {
            info!(pid, memory_mb, from = %previous, to = %current, "memory state improved");
        }

        inner.protection.record_memory_sample(memory_mb);
        let trend = inner.protection.detect_memory_leak();

        let (trigger, reason) = if current == MemoryState::Emergency {
            (
                RestartTrigger::Emergency,
                format!("emergency memory usage: {:.1}MB", memory_mb),
            )
        } else if trend.is_leak_suspected && self.config.leak_detection.restart_on_leak {
            (
                RestartTrigger::MemoryLeak,
                format!(
                    "memory leak suspected: +{:.1}MB/min at {:.1}MB",
                    trend.slope_mb_per_minute, memory_mb
                ),
            )
        } else {
            if trend.is_leak_suspected {
                warn!(
                    pid,
                    memory_mb,
                    slope_mb_per_minute = trend.slope_mb_per_minute,
                    "memory growth looks like a leak"
                );
            }

            if current == MemoryState::Critical && self.config.persist_state {
                let action = if self.checkpoint(&mut inner, "critical memory checkpoint") {
                    TickAction::Checkpointed
                } else {
                    TickAction::None
                };
                return tick(&inner, Some(memory_mb), action);
            }

            return tick(&inner, Some(memory_mb), TickAction::None);
        };

        if inner.degradation.is_disabled(FEATURE_AUTOMATED_RESTART) {
            warn!(pid, %reason, "automated restart disabled, not restarting");
            return tick(&inner, Some(memory_mb), TickAction::None);
        }
        drop(inner);

        let outcome = self.restart_with(trigger, &reason).await;
        let inner = self.inner.lock().await;
        tick(&inner, Some(memory_mb), outcome.action())
    }

    /// Capture and persist on the spot, subject to the capture cooldown
    fn checkpoint(&self, inner: &mut Inner, reason: &str) -> bool {
        let process = self.process_snapshot(inner);
        let source = GuardianSnapshot {
            process,
            context: self.context.as_deref(),
        };

        match inner.state_manager.capture_state(reason, &source) {
            Some(state) => {
                inner.app_state = Some(state.clone());
                self.persist(inner, &state)
            }
            None => false,
        }
    }

    /// Capture for a restart or shutdown; falls back to the last capture
    /// inside the cooldown.
    fn capture_for_persist(&self, inner: &mut Inner, reason: &str) -> Option<CompleteState> {
        let process = self.process_snapshot(inner);
        let source = GuardianSnapshot {
            process,
            context: self.context.as_deref(),
        };

        inner
            .state_manager
            .capture_state(reason, &source)
            .or_else(|| inner.state_manager.last_captured().cloned())
            .or_else(|| inner.app_state.clone())
    }

    fn persist(&self, inner: &mut Inner, state: &CompleteState) -> bool {
        let persisted = inner
            .state_manager
            .persist_state(state, self.config.state.compress);

        if persisted {
            inner.degradation.recover_degraded(FEATURE_STATE_PERSISTENCE);
        } else {
            inner.degradation.degrade_feature(
                FEATURE_STATE_PERSISTENCE,
                "failed to persist state",
                Some("state will be retried on the next checkpoint"),
            );
        }
        persisted
    }

    fn process_snapshot(&self, inner: &Inner) -> Value {
        json!({
            "pid": inner.pid,
            "state": inner.process_state,
            "memory_mb": inner.memory_stats.current_mb,
            "peak_memory_mb": inner.memory_stats.peak_mb,
            "memory_state": inner.memory_state,
            "uptime_secs": inner.uptime_secs(),
            "command": self.config.process_command,
            "total_restarts": inner.state_manager.total_restarts(),
        })
    }

    /// Restart the supervised process on request.
    ///
    /// # Arguments
    /// * `reason` - Recorded with the restart attempt
    ///
    /// # Returns
    /// * `true` - The process was replaced
    /// * `false` - Rejected (another restart running, circuit open) or failed
    pub async fn restart_process(&self, reason: &str) -> bool {
        matches!(
            self.restart_with(RestartTrigger::Manual, reason).await,
            RestartOutcome::Completed(true)
        )
    }

    async fn restart_with(&self, trigger: RestartTrigger, reason: &str) -> RestartOutcome {
        let _guard = match self.restart_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!(%trigger, reason, "restart already in progress, rejecting");
                return RestartOutcome::Rejected;
            }
        };

        let (memory_mb, saved_state, child) = {
            let mut inner = self.inner.lock().await;
            let memory_mb = inner.memory_stats.current_mb;

            let (allowed, why) = inner.protection.should_allow_restart(memory_mb);
            if !allowed {
                warn!(%trigger, reason, "restart not allowed: {}", why);
                return RestartOutcome::Rejected;
            }

            if self.config.health.enabled && self.config.health.gate_restarts {
                let (valid, message) = inner.health.validate_before_start();
                if !valid {
                    inner.degradation.degrade_feature(
                        FEATURE_AUTOMATED_RESTART,
                        &message,
                        Some("restarts continue only while pre-start checks pass"),
                    );

                    if self.config.health.on_unhealthy == UnhealthyPolicy::Abort {
                        error!(%trigger, reason, "restart aborted by health gate: {}", message);
                        self.record_outcome(
                            &mut inner,
                            RestartAttempt::failed(
                                reason,
                                trigger,
                                memory_mb,
                                format!("health gate: {}", message),
                            ),
                        );
                        return RestartOutcome::Completed(false);
                    }
                    warn!(%trigger, "health gate failed, restarting anyway: {}", message);
                }
            }

            warn!(%trigger, reason, memory_mb, pid = ?inner.pid, "restarting process");

            let saved_state = if self.config.persist_state {
                self.capture_for_persist(&mut inner, reason)
            } else {
                None
            };

            let child = inner.child.take();
            if child.is_some() {
                inner.process_state = ProcessState::Stopping;
            }
            inner.health.set_monitored_process(None);

            (memory_mb, saved_state, child)
        };

        if let Some(mut child) = child {
            let result = terminate(
                &mut child,
                self.config.restart_policy.graceful_timeout(),
                self.config.restart_policy.force_kill_timeout(),
            )
            .await;

            if let Err(e) = result {
                error!("Failed to stop process for restart: {}", e);
                let mut inner = self.inner.lock().await;
                let pid = inner.pid;
                inner.health.set_monitored_process(pid);
                inner.child = Some(child);
                inner.process_state = ProcessState::Running;
                self.record_outcome(
                    &mut inner,
                    RestartAttempt::failed(reason, trigger, memory_mb, e.to_string()),
                );
                return RestartOutcome::Completed(false);
            }

            let mut inner = self.inner.lock().await;
            inner.pid = None;
            inner.started_at = None;
            inner.process_state = ProcessState::Stopped;
        }

        if let Some(ref state) = saved_state {
            let mut inner = self.inner.lock().await;
            self.persist(&mut inner, state);
        }

        if let Err(e) = self.launch().await {
            error!("Failed to start replacement process: {}", e);
            let mut inner = self.inner.lock().await;
            if inner.child.is_none() {
                inner.process_state = ProcessState::Crashed;
            }
            self.record_outcome(
                &mut inner,
                RestartAttempt::failed(reason, trigger, memory_mb, e.to_string()),
            );
            return RestartOutcome::Completed(false);
        }

        let restored = if self.config.persist_state {
            let mut inner = self.inner.lock().await;
            let restored = inner.state_manager.restore_state(None);
            if restored.is_some() {
                inner.app_state = restored.clone();
            }
            restored
        } else {
            None
        };

        if let (Some(state), Some(provider)) = (restored.as_ref(), self.context.as_ref()) {
            if let Err(e) = provider.restore(state) {
                warn!("Context provider failed to restore state: {}", e);
            }
        }

        let mut inner = self.inner.lock().await;
        self.record_outcome(
            &mut inner,
            RestartAttempt::succeeded(reason, trigger, memory_mb),
        );
        info!(
            %trigger,
            pid = ?inner.pid,
            total_restarts = inner.state_manager.total_restarts(),
            "process restarted"
        );

        RestartOutcome::Completed(true)
    }

    /// Append the attempt and report it to the circuit breaker
    fn record_outcome(&self, inner: &mut Inner, attempt: RestartAttempt) {
        let success = attempt.success;
        inner.restart_attempts.push(attempt);
        inner.protection.record_restart_outcome(success);

        if success {
            inner.state_manager.increment_restarts();
            inner.protection.clear_memory_samples();
            inner.degradation.recover_degraded(FEATURE_AUTOMATED_RESTART);
        } else if inner.protection.circuit_state() == CircuitState::Open {
            let stats = inner.protection.get_restart_statistics();
            inner.degradation.degrade_feature(
                FEATURE_AUTOMATED_RESTART,
                &format!(
                    "restart circuit open after {} consecutive failures",
                    stats.consecutive_failures
                ),
                Some(&format!(
                    "restarts resume after {:.0}s cooldown",
                    stats.current_cooldown_secs
                )),
            );
        }
    }

    /// Stop the child: cooperative request, up to `timeout`, then force kill.
    ///
    /// Returns true when no process is left running.
    pub async fn terminate_process(&self, timeout: Duration) -> bool {
        let child = {
            let mut inner = self.inner.lock().await;
            match inner.child.take() {
                Some(child) => {
                    inner.process_state = ProcessState::Stopping;
                    Some(child)
                }
                None => {
                    if inner.process_state != ProcessState::NotStarted {
                        inner.process_state = ProcessState::Stopped;
                    }
                    None
                }
            }
        };

        let mut child = match child {
            Some(child) => child,
            None => return true,
        };

        let result = terminate(
            &mut child,
            timeout,
            self.config.restart_policy.force_kill_timeout(),
        )
        .await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(outcome) => {
                debug!(?outcome, pid = ?inner.pid, "process terminated");
                inner.pid = None;
                inner.started_at = None;
                inner.process_state = ProcessState::Stopped;
                inner.health.set_monitored_process(None);
                true
            }
            Err(e) => {
                error!("Failed to terminate process: {}", e);
                inner.child = Some(child);
                inner.process_state = ProcessState::Running;
                false
            }
        }
    }

    /// Start the background polling loop. Returns false if it is already
    /// running or the guardian is disabled.
    pub async fn start_monitoring(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            info!("memory guardian is disabled, not monitoring");
            return false;
        }

        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            debug!("monitoring already active");
            return false;
        }

        let (cancel, cancelled) = watch::channel(false);
        let guardian = Arc::clone(self);
        let task = tokio::spawn(async move {
            guardian.monitoring_loop(cancelled).await;
        });

        *monitor = Some(MonitorHandle { cancel, task });
        info!("memory monitoring started");
        true
    }

    /// Stop the polling loop and wait for it to finish its current tick
    pub async fn stop_monitoring(&self) -> bool {
        let handle = self.monitor.lock().await.take();

        match handle {
            Some(handle) => {
                let _ = handle.cancel.send(true);
                if let Err(e) = handle.task.await {
                    warn!("monitoring task ended abnormally: {}", e);
                }
                info!("memory monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    async fn monitoring_loop(self: Arc<Self>, mut cancelled: watch::Receiver<bool>) {
        let monitoring = &self.config.monitoring;
        let mut last_stats_log = Instant::now();
        let mut last_health_check = Instant::now();

        loop {
            if *cancelled.borrow() {
                break;
            }

            let tick = self.monitor_memory().await;

            if monitoring.log_memory_stats && last_stats_log.elapsed() >= monitoring.log_interval() {
                self.log_memory_stats().await;
                last_stats_log = Instant::now();
            }

            if self.config.health.enabled
                && last_health_check.elapsed() >= self.config.health.check_interval()
            {
                self.check_health().await;
                last_health_check = Instant::now();
            }

            let interval = monitoring.interval_for(tick.memory_state);
            tokio::select! {
                _ = sleep(interval) => {}
                changed = cancelled.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("monitoring loop exited");
    }

    async fn log_memory_stats(&self) {
        let inner = self.inner.lock().await;
        let trend = inner.protection.detect_memory_leak();
        info!(
            pid = ?inner.pid,
            current_mb = inner.memory_stats.current_mb,
            peak_mb = inner.memory_stats.peak_mb,
            samples = inner.memory_stats.samples,
            state = %inner.memory_state,
            slope_mb_per_minute = trend.slope_mb_per_minute,
            "memory stats"
        );
    }

    /// Run the health checks and reflect the result in `process_health`
    pub async fn check_health(&self) -> HealthReport {
        let mut inner = self.inner.lock().await;
        let report = inner.health.check_health();

        if report.status == HealthStatus::Healthy {
            inner.degradation.recover_degraded(FEATURE_PROCESS_HEALTH);
        } else {
            let failing: Vec<String> = report
                .checks
                .iter()
                .filter(|c| c.status != HealthStatus::Healthy)
                .map(|c| format!("{}: {}", c.name, c.message))
                .collect();
            inner.degradation.degrade_feature(
                FEATURE_PROCESS_HEALTH,
                &failing.join("; "),
                None,
            );
        }

        report
    }

    pub async fn add_health_check(&self, check: Box<dyn HealthCheck>) {
        self.inner.lock().await.health.add_check(check);
    }

    /// Persist state, stop monitoring and the process. Never fails.
    pub async fn shutdown(&self) {
        info!("shutting down memory guardian");

        if self.config.persist_state {
            let mut inner = self.inner.lock().await;
            match self.capture_for_persist(&mut inner, "shutdown") {
                Some(state) => {
                    if !self.persist(&mut inner, &state) {
                        warn!("state was not persisted during shutdown");
                    }
                }
                None => debug!("no state to persist during shutdown"),
            }
        }

        self.stop_monitoring().await;

        // Let an in-flight restart finish before stopping its replacement
        let _guard = self.restart_guard.lock().await;

        if !self
            .terminate_process(self.config.restart_policy.graceful_timeout())
            .await
        {
            error!("process could not be stopped during shutdown");
        }

        let mut inner = self.inner.lock().await;
        inner.process_state = ProcessState::Stopped;
        info!(
            restarts = inner.restart_attempts.len(),
            "memory guardian shut down"
        );
    }

    pub async fn get_status(&self) -> GuardianStatus {
        let monitoring_active = self.is_monitoring().await;
        let inner = self.inner.lock().await;

        GuardianStatus {
            enabled: self.config.enabled,
            process_state: inner.process_state,
            pid: inner.pid,
            memory_state: inner.memory_state,
            memory: inner.memory_stats.clone(),
            thresholds: self.config.thresholds,
            monitoring_active,
            restart: inner.protection.get_restart_statistics(),
            degradation: inner.degradation.get_status(),
            health: inner.health.last_report().cloned(),
            restart_attempts: inner.restart_attempts.len(),
            last_restart: inner.restart_attempts.last().cloned(),
            total_restarts: inner.state_manager.total_restarts(),
            uptime_secs: inner.uptime_secs(),
        }
    }

    /// Every restart attempt so far, oldest first
    pub async fn restart_history(&self) -> Vec<RestartAttempt> {
        self.inner.lock().await.restart_attempts.clone()
    }

    /// Close the circuit. A caller-disabled `automated_restart` stays disabled.
    pub async fn reset_circuit_breaker(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let reset = inner.protection.reset_circuit_breaker();
        inner.degradation.recover_degraded(FEATURE_AUTOMATED_RESTART);
        reset
    }

    /// Application state last captured or restored
    pub async fn app_state(&self) -> Option<CompleteState> {
        self.inner.lock().await.app_state.clone()
    }

    pub async fn degrade_feature(&self, name: &str, cause: &str, mitigation: Option<&str>) {
        self.inner
            .lock()
            .await
            .degradation
            .degrade_feature(name, cause, mitigation);
    }

    pub async fn disable_feature(&self, name: &str, cause: &str) {
        self.inner.lock().await.degradation.disable_feature(name, cause);
    }

    pub async fn recover_feature(&self, name: &str) -> bool {
        self.inner.lock().await.degradation.recover_feature(name)
    }

    pub async fn degradation_status(&self) -> DegradationStatus {
        self.inner.lock().await.degradation.get_status()
    }
}

fn tick(inner: &Inner, memory_mb: Option<f64>, action: TickAction) -> MonitorTick {
    MonitorTick {
        memory_mb,
        memory_state: inner.memory_state,
        process_state: inner.process_state,
        action,
    }
}

