// Restart protection - circuit breaker over restart outcomes plus leak trend detection

pub mod backoff;
pub mod leak;

pub use backoff::BackoffStrategy;
pub use leak::{MemoryTrend, MemoryWindow};

use crate::config::{GuardianConfig, LeakDetectionConfig, MemoryThresholds, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Restart gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Read-only restart statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartStatistics {
    pub total_restarts: u64,
    pub successful_restarts: u64,
    pub failed_restarts: u64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub circuit_trips: u32,
    pub current_cooldown_secs: f64,
    pub cooldown_remaining_secs: f64,
    pub memory_trend: MemoryTrend,
}

/// Decides whether a restart may run and tracks how restarts turn out
#[derive(Debug)]
pub struct RestartProtection {
    policy: RestartPolicy,
    leak_config: LeakDetectionConfig,
    critical_threshold_mb: f64,
    backoff: BackoffStrategy,
    circuit_state: CircuitState,
    consecutive_failures: u32,
    /// Failure instants since the last success, pruned to the attempt window
    recent_failures: VecDeque<Instant>,
    total_restarts: u64,
    successful_restarts: u64,
    failed_restarts: u64,
    circuit_trips: u32,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    trial_in_flight: bool,
    window: MemoryWindow,
}

impl RestartProtection {
    pub fn new(
        policy: RestartPolicy,
        leak_config: LeakDetectionConfig,
        thresholds: &MemoryThresholds,
    ) -> Self {
        let window = MemoryWindow::new(leak_config.window_size, leak_config.window_horizon());
        let backoff = BackoffStrategy::from_policy(&policy);
        let current_cooldown = policy.initial_cooldown();

        Self {
            policy,
            leak_config,
            critical_threshold_mb: thresholds.critical,
            backoff,
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            total_restarts: 0,
            successful_restarts: 0,
            failed_restarts: 0,
            circuit_trips: 0,
            opened_at: None,
            current_cooldown,
            trial_in_flight: false,
            window,
        }
    }

    pub fn from_config(config: &GuardianConfig) -> Self {
        Self::new(
            config.restart_policy.clone(),
            config.leak_detection.clone(),
            &config.thresholds,
        )
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Feed one memory reading into the leak window
    pub fn record_memory_sample(&mut self, memory_mb: f64) -> bool {
        self.record_memory_sample_at(memory_mb, Instant::now())
    }

    pub fn record_memory_sample_at(&mut self, memory_mb: f64, at: Instant) -> bool {
        let accepted = self.window.push(at, memory_mb);
        if !accepted {
            debug!(memory_mb, "ignoring invalid memory sample");
        }
        accepted
    }

    /// Drop all samples, e.g. once a fresh process replaced the leaking one
    pub fn clear_memory_samples(&mut self) {
        self.window.clear();
    }

    pub fn detect_memory_leak(&self) -> MemoryTrend {
        let trend = self.window.trend(
            self.leak_config.min_samples,
            self.leak_config.growth_threshold_mb_per_minute,
        );

        if self.leak_config.enabled {
            trend
        } else {
            MemoryTrend {
                is_leak_suspected: false,
                ..trend
            }
        }
    }

    pub fn should_allow_restart(&mut self, current_memory_mb: f64) -> (bool, String) {
        self.should_allow_restart_at(current_memory_mb, Instant::now())
    }

    pub fn should_allow_restart_at(
        &mut self,
        current_memory_mb: f64,
        now: Instant,
    ) -> (bool, String) {
        match self.circuit_state {
            CircuitState::Closed => (true, "circuit closed".to_string()),
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(now);
                if remaining.is_zero() {
                    self.circuit_state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    info!("restart circuit half-open, allowing one trial restart");
                    (true, "circuit half-open: trial restart allowed".to_string())
                } else if let Some(reason) = self.leak_override(current_memory_mb) {
                    warn!(current_memory_mb, "{}", reason);
                    (true, reason)
                } else {
                    (
                        false,
                        format!(
                            "circuit open: {:.1}s of cooldown remaining",
                            remaining.as_secs_f64()
                        ),
                    )
                }
            }
            CircuitState::HalfOpen => {
                if !self.trial_in_flight {
                    self.trial_in_flight = true;
                    (true, "circuit half-open: trial restart allowed".to_string())
                } else if let Some(reason) = self.leak_override(current_memory_mb) {
                    warn!(current_memory_mb, "{}", reason);
                    (true, reason)
                } else {
                    (
                        false,
                        "circuit half-open: trial restart already in progress".to_string(),
                    )
                }
            }
        }
    }

    /// A leak at or above the critical threshold always gets through
    fn leak_override(&self, current_memory_mb: f64) -> Option<String> {
        if current_memory_mb < self.critical_threshold_mb {
            return None;
        }

        let trend = self.detect_memory_leak();
        if trend.is_leak_suspected {
            Some(format!(
                "emergency override: memory leak suspected at {:.1}MB (+{:.1}MB/min)",
                current_memory_mb, trend.slope_mb_per_minute
            ))
        } else {
            None
        }
    }

    pub fn record_restart_outcome(&mut self, success: bool) {
        self.record_restart_outcome_at(success, Instant::now())
    }

    pub fn record_restart_outcome_at(&mut self, success: bool, now: Instant) {
        self.total_restarts += 1;

        if success {
            self.successful_restarts += 1;
            self.consecutive_failures = 0;
            self.recent_failures.clear();
            if self.circuit_state != CircuitState::Closed {
                info!(previous = %self.circuit_state, "restart succeeded, closing circuit");
            }
            self.close_circuit();
            return;
        }

        self.failed_restarts += 1;
        self.consecutive_failures += 1;
        self.recent_failures.push_back(now);

        let window = self.policy.attempt_window();
        while let Some(&first) = self.recent_failures.front() {
            if now.saturating_duration_since(first) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }

        match self.circuit_state {
            CircuitState::HalfOpen => self.open_circuit(now, "trial restart failed"),
            CircuitState::Open => self.open_circuit(now, "override restart failed"),
            CircuitState::Closed => {
                if self.recent_failures.len() >= self.policy.max_attempts as usize {
                    self.open_circuit(now, "too many failed restarts");
                }
            }
        }
    }

    fn open_circuit(&mut self, now: Instant, cause: &str) {
        self.circuit_trips += 1;
        self.current_cooldown = self
            .backoff
            .cooldown(self.policy.initial_cooldown(), self.circuit_trips);
        self.opened_at = Some(now);
        self.circuit_state = CircuitState::Open;
        self.trial_in_flight = false;

        warn!(
            cause,
            consecutive_failures = self.consecutive_failures,
            cooldown_secs = self.current_cooldown.as_secs_f64(),
            trips = self.circuit_trips,
            "restart circuit opened"
        );
    }

    fn close_circuit(&mut self) {
        self.circuit_state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.circuit_trips = 0;
        self.current_cooldown = self.policy.initial_cooldown();
    }

    fn cooldown_remaining(&self, now: Instant) -> Duration {
        match (self.circuit_state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .current_cooldown
                .saturating_sub(now.saturating_duration_since(opened_at)),
            _ => Duration::ZERO,
        }
    }

    /// Administrative override. Always succeeds.
    pub fn reset_circuit_breaker(&mut self) -> bool {
        info!(previous = %self.circuit_state, "restart circuit breaker reset");
        self.consecutive_failures = 0;
        self.recent_failures.clear();
        self.close_circuit();
        true
    }

    pub fn get_restart_statistics(&self) -> RestartStatistics {
        self.get_restart_statistics_at(Instant::now())
    }

    pub fn get_restart_statistics_at(&self, now: Instant) -> RestartStatistics {
        RestartStatistics {
            total_restarts: self.total_restarts,
            successful_restarts: self.successful_restarts,
            failed_restarts: self.failed_restarts,
            consecutive_failures: self.consecutive_failures,
            circuit_state: self.circuit_state,
            circuit_trips: self.circuit_trips,
            current_cooldown_secs: self.current_cooldown.as_secs_f64(),
            cooldown_remaining_secs: self.cooldown_remaining(now).as_secs_f64(),
            memory_trend: self.detect_memory_leak(),
        }
    }
}
