use super::*;
use crate::config::MemoryThresholds;
use crate::degradation::DegradationLevel;
use crate::health::HealthCheck;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn test_config(dir: &TempDir, command: &[&str]) -> GuardianConfig {
    let mut config = GuardianConfig::default();
    config.thresholds = MemoryThresholds::new(100.0, 200.0, 300.0);
    config.process_command = command.iter().map(|s| s.to_string()).collect();
    config.state_file = dir.path().join("state");
    config.restart_policy.graceful_timeout_secs = 2.0;
    config.restart_policy.force_kill_timeout_secs = 2.0;
    config.restart_policy.startup_grace_secs = 0.1;
    config.health.gate_restarts = false;
    config.state.capture_cooldown_secs = 0.0;
    config
}

fn sleeper(dir: &TempDir) -> GuardianConfig {
    test_config(dir, &["/bin/sleep", "30"])
}

/// Probe that reports whatever the test last stored
fn shared_probe(reading: Arc<std::sync::Mutex<Option<f64>>>) -> impl FnMut(u32) -> Option<f64> + Send {
    move |_pid: u32| *reading.lock().unwrap()
}

fn fixed(mb: f64) -> impl FnMut(u32) -> Option<f64> + Send {
    move |_pid: u32| Some(mb)
}

#[test]
fn test_new_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.thresholds = MemoryThresholds::new(300.0, 200.0, 100.0);

    assert!(MemoryGuardian::with_probe(config, fixed(1.0)).is_err());
}

#[tokio::test]
async fn test_initialize_prepares_state_dir() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(1.0)).unwrap();

    assert!(guardian.initialize().await);
    assert!(dir.path().join("state").is_dir());

    let status = guardian.get_status().await;
    assert_eq!(status.process_state, ProcessState::NotStarted);
    assert_eq!(status.pid, None);
    assert!(!status.monitoring_active);
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(10.0)).unwrap();
    guardian.initialize().await;

    assert!(guardian.start_process().await);
    let status = guardian.get_status().await;
    assert_eq!(status.process_state, ProcessState::Running);
    assert!(status.pid.is_some());

    // A second start while running is refused
    assert!(!guardian.start_process().await);

    guardian.shutdown().await;
    let status = guardian.get_status().await;
    assert_eq!(status.process_state, ProcessState::Stopped);
    assert_eq!(status.pid, None);
    // shutdown persisted the final state
    assert!(dir.path().join("state").join("current_state.json.gz").exists());
}

#[tokio::test]
async fn test_start_missing_binary_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["/definitely/not/a/binary"]);
    let guardian = MemoryGuardian::with_probe(config, fixed(1.0)).unwrap();

    assert!(!guardian.start_process().await);
    assert_eq!(
        guardian.get_status().await.process_state,
        ProcessState::NotStarted
    );
}

#[tokio::test]
async fn test_start_detects_early_exit() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &["/bin/sh", "-c", "exit 1"]);
    config.restart_policy.startup_grace_secs = 0.5;
    let guardian = MemoryGuardian::with_probe(config, fixed(1.0)).unwrap();

    assert!(!guardian.start_process().await);
    assert_eq!(guardian.get_status().await.process_state, ProcessState::Crashed);
}

#[tokio::test]
async fn test_child_receives_guardian_env() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(
        &dir,
        &[
            "/bin/sh",
            "-c",
            "test \"$MEMORY_GUARDIAN_RESTART_COUNT\" = 0 && test -n \"$MEMORY_GUARDIAN_STATE_DIR\" && exec sleep 30",
        ],
    );
    config.restart_policy.startup_grace_secs = 0.5;
    let guardian = MemoryGuardian::with_probe(config, fixed(1.0)).unwrap();

    assert!(guardian.start_process().await);
    assert!(guardian.terminate_process(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_tick_without_process_is_idle() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(999.0)).unwrap();

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_mb, None);
    assert_eq!(tick.action, TickAction::None);
    assert!(guardian.restart_history().await.is_empty());
}

#[tokio::test]
async fn test_failed_reading_is_skipped() {
    let dir = TempDir::new().unwrap();
    let reading = Arc::new(std::sync::Mutex::new(None));
    let guardian =
        MemoryGuardian::with_probe(sleeper(&dir), shared_probe(reading.clone())).unwrap();
    guardian.start_process().await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_mb, None);

    *reading.lock().unwrap() = Some(0.0);
    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_mb, None);

    *reading.lock().unwrap() = Some(42.0);
    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_mb, Some(42.0));

    let status = guardian.get_status().await;
    assert_eq!(status.memory.samples, 1);
    assert_eq!(status.memory.current_mb, 42.0);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_classification_follows_samples() {
    let dir = TempDir::new().unwrap();
    let reading = Arc::new(std::sync::Mutex::new(Some(50.0)));
    let mut config = sleeper(&dir);
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, shared_probe(reading.clone())).unwrap();
    guardian.start_process().await;

    assert_eq!(guardian.monitor_memory().await.memory_state, MemoryState::Normal);

    *reading.lock().unwrap() = Some(150.0);
    assert_eq!(guardian.monitor_memory().await.memory_state, MemoryState::Warning);

    *reading.lock().unwrap() = Some(250.0);
    assert_eq!(guardian.monitor_memory().await.memory_state, MemoryState::Critical);

    *reading.lock().unwrap() = Some(60.0);
    assert_eq!(guardian.monitor_memory().await.memory_state, MemoryState::Normal);

    assert!(guardian.restart_history().await.is_empty());
    guardian.shutdown().await;
}

#[tokio::test]
async fn test_emergency_restarts_process() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(1500.0)).unwrap();
    guardian.initialize().await;
    guardian.start_process().await;
    let first_pid = guardian.get_status().await.pid;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Emergency);
    assert_eq!(tick.action, TickAction::Restarted { success: true });

    let history = guardian.restart_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trigger, RestartTrigger::Emergency);
    assert!(history[0].success);

    let status = guardian.get_status().await;
    assert_eq!(status.process_state, ProcessState::Running);
    assert_ne!(status.pid, first_pid);
    assert_eq!(status.total_restarts, 1);
    assert_eq!(status.restart.consecutive_failures, 0);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_critical_tick_checkpoints_state() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(250.0)).unwrap();
    guardian.initialize().await;
    guardian.start_process().await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Critical);
    assert_eq!(tick.action, TickAction::Checkpointed);
    assert!(dir.path().join("state").join("current_state.json.gz").exists());

    let state = guardian.app_state().await.unwrap();
    assert_eq!(state.get("reason"), Some(&json!("critical memory checkpoint")));

    guardian.shutdown().await;
}

/// Seed the leak window with a steep ramp over the last twenty seconds
async fn seed_ramp(guardian: &MemoryGuardian, from: f64, to: f64) {
    let now = Instant::now();
    let mut inner = guardian.inner.lock().await;
    for i in 0..19u64 {
        let at = now
            .checked_sub(Duration::from_secs(20 - i))
            .unwrap_or(now);
        let mb = from + (to - from) * i as f64 / 18.0;
        inner.protection.record_memory_sample_at(mb, at);
    }
}

#[tokio::test]
async fn test_leak_at_warning_restarts() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(150.0)).unwrap();
    guardian.start_process().await;
    seed_ramp(&guardian, 60.0, 140.0).await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Warning);
    assert_eq!(tick.action, TickAction::Restarted { success: true });

    let history = guardian.restart_history().await;
    assert_eq!(history[0].trigger, RestartTrigger::MemoryLeak);

    // The replacement starts with an empty window
    let status = guardian.get_status().await;
    assert_eq!(status.restart.memory_trend.samples, 0);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_leak_below_warning_restarts() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(90.0)).unwrap();
    guardian.start_process().await;
    seed_ramp(&guardian, 10.0, 85.0).await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Normal);
    assert_eq!(tick.action, TickAction::Restarted { success: true });

    let history = guardian.restart_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trigger, RestartTrigger::MemoryLeak);
    assert_eq!(history[0].memory_mb, 90.0);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_leak_without_restart_on_leak_is_only_logged() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.persist_state = false;
    config.leak_detection.restart_on_leak = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(150.0)).unwrap();
    guardian.start_process().await;
    seed_ramp(&guardian, 60.0, 140.0).await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Warning);
    assert_eq!(tick.action, TickAction::None);
    assert!(guardian.restart_history().await.is_empty());

    let status = guardian.get_status().await;
    assert!(status.restart.memory_trend.is_leak_suspected);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_crash_is_detected_and_restarted() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &["/bin/sh", "-c", "sleep 0.5; exit 3"]);
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(10.0)).unwrap();

    assert!(guardian.start_process().await);
    sleep(Duration::from_millis(1000)).await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.action, TickAction::Restarted { success: true });
    assert_eq!(tick.process_state, ProcessState::Running);

    let history = guardian.restart_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trigger, RestartTrigger::ProcessDied);
    assert_eq!(history[0].reason, "process died");

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_restarts_run_once() {
    let dir = TempDir::new().unwrap();
    // Ignores SIGTERM so the first restart holds the guard for the graceful timeout
    let mut config = test_config(&dir, &["/bin/sh", "-c", "trap '' TERM; exec sleep 30"]);
    config.restart_policy.graceful_timeout_secs = 0.5;
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(10.0)).unwrap();
    assert!(guardian.start_process().await);

    let (a, b, c) = tokio::join!(
        guardian.restart_process("first"),
        guardian.restart_process("second"),
        guardian.restart_process("third"),
    );

    let successes = [a, b, c].iter().filter(|ok| **ok).count();
    assert!(successes <= 1);
    assert_eq!(guardian.restart_history().await.len(), 1);

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_repeated_failures_open_circuit() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &["/definitely/not/a/binary"]);
    config.auto_start = false;
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(1.0)).unwrap();

    for _ in 0..3 {
        assert!(!guardian.restart_process("retry").await);
    }

    let status = guardian.get_status().await;
    assert_eq!(status.restart.circuit_state, CircuitState::Open);
    assert_eq!(status.restart.consecutive_failures, 3);
    assert!(status.degradation.features.contains_key(FEATURE_AUTOMATED_RESTART));

    // Rejected without another attempt
    assert!(!guardian.restart_process("again").await);
    assert_eq!(guardian.restart_history().await.len(), 3);

    assert!(guardian.reset_circuit_breaker().await);
    let status = guardian.get_status().await;
    assert_eq!(status.restart.circuit_state, CircuitState::Closed);
    assert_eq!(status.degradation.level, DegradationLevel::Normal);
}

#[tokio::test]
async fn test_disabled_automated_restart_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.persist_state = false;
    let guardian = MemoryGuardian::with_probe(config, fixed(1500.0)).unwrap();
    guardian.start_process().await;
    guardian
        .disable_feature(FEATURE_AUTOMATED_RESTART, "operator request")
        .await;

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Emergency);
    assert_eq!(tick.action, TickAction::None);
    assert!(guardian.restart_history().await.is_empty());

    // Manual restarts still go through
    assert!(guardian.restart_process("operator").await);

    // ...without lifting the disable
    let degradation = guardian.degradation_status().await;
    assert_eq!(degradation.disabled_features, 1);
    assert!(degradation.features.contains_key(FEATURE_AUTOMATED_RESTART));

    assert!(guardian.reset_circuit_breaker().await);
    assert_eq!(guardian.degradation_status().await.disabled_features, 1);

    let tick = guardian.monitor_memory().await;
    assert_eq!(tick.memory_state, MemoryState::Emergency);
    assert_eq!(tick.action, TickAction::None);
    assert_eq!(guardian.restart_history().await.len(), 1);

    // Only an explicit recover re-enables it
    assert!(guardian.recover_feature(FEATURE_AUTOMATED_RESTART).await);
    assert_eq!(guardian.degradation_status().await.disabled_features, 0);

    guardian.shutdown().await;
}

struct AlwaysFailing;

impl HealthCheck for AlwaysFailing {
    fn name(&self) -> &str {
        "disk_quota"
    }

    fn check(&self) -> crate::error::Result<(HealthStatus, String)> {
        Ok((HealthStatus::Unhealthy, "quota exceeded".to_string()))
    }
}

#[tokio::test]
async fn test_health_gate_abort_keeps_process() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.persist_state = false;
    config.health.gate_restarts = true;
    config.health.on_unhealthy = UnhealthyPolicy::Abort;
    let guardian = MemoryGuardian::with_probe(config, fixed(10.0)).unwrap();
    guardian.add_health_check(Box::new(AlwaysFailing)).await;
    guardian.start_process().await;
    let pid = guardian.get_status().await.pid;

    assert!(!guardian.restart_process("manual").await);

    let history = guardian.restart_history().await;
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(history[0].error.as_deref().unwrap().contains("disk_quota"));

    let status = guardian.get_status().await;
    assert_eq!(status.pid, pid);
    assert_eq!(status.process_state, ProcessState::Running);
    assert!(status.degradation.features.contains_key(FEATURE_AUTOMATED_RESTART));

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_health_check_degrades_process_health() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(10.0)).unwrap();
    guardian.add_health_check(Box::new(AlwaysFailing)).await;

    let report = guardian.check_health().await;
    assert!(report.status >= HealthStatus::Unhealthy);

    let degradation = guardian.degradation_status().await;
    assert!(degradation.features.contains_key(FEATURE_PROCESS_HEALTH));
}

struct RecordingContext {
    restored: AtomicBool,
}

impl ContextProvider for RecordingContext {
    fn conversation(&self) -> crate::error::Result<Value> {
        Ok(json!({"messages": ["keep me"]}))
    }

    fn project(&self) -> crate::error::Result<Value> {
        Ok(json!({"root": "/srv/app"}))
    }

    fn restore(&self, state: &CompleteState) -> crate::error::Result<()> {
        if state.get("conversation").is_some() {
            self.restored.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_restart_carries_context_across() {
    let dir = TempDir::new().unwrap();
    let context = Arc::new(RecordingContext {
        restored: AtomicBool::new(false),
    });
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(10.0))
        .unwrap()
        .with_context_provider(context.clone());
    guardian.initialize().await;
    guardian.start_process().await;

    assert!(guardian.restart_process("refresh").await);
    assert!(context.restored.load(Ordering::SeqCst));

    let state = guardian.app_state().await.unwrap();
    assert_eq!(state.get("conversation"), Some(&json!({"messages": ["keep me"]})));
    assert_eq!(state.get("reason"), Some(&json!("refresh")));

    guardian.shutdown().await;
}

#[tokio::test]
async fn test_monitoring_start_stop() {
    let dir = TempDir::new().unwrap();
    let guardian =
        Arc::new(MemoryGuardian::with_probe(sleeper(&dir), fixed(10.0)).unwrap());

    assert!(guardian.start_monitoring().await);
    assert!(!guardian.start_monitoring().await);
    assert!(guardian.is_monitoring().await);

    assert!(guardian.stop_monitoring().await);
    assert!(!guardian.is_monitoring().await);
    assert!(!guardian.stop_monitoring().await);
}

#[tokio::test]
async fn test_disabled_guardian_does_not_monitor() {
    let dir = TempDir::new().unwrap();
    let mut config = sleeper(&dir);
    config.enabled = false;
    let guardian = Arc::new(MemoryGuardian::with_probe(config, fixed(10.0)).unwrap());

    assert!(!guardian.start_monitoring().await);
}

#[tokio::test]
async fn test_shutdown_without_process() {
    let dir = TempDir::new().unwrap();
    let guardian = MemoryGuardian::with_probe(sleeper(&dir), fixed(10.0)).unwrap();

    guardian.shutdown().await;
    assert_eq!(guardian.get_status().await.process_state, ProcessState::Stopped);
}
