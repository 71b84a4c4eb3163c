use crate::config::MemoryThresholds;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle of the supervised child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::NotStarted => write!(f, "not_started"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Crashed => write!(f, "crashed"),
        }
    }
}

/// Memory severity, classified fresh from every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl MemoryState {
    /// Classify a reading against the thresholds. No hysteresis.
    pub fn classify(memory_mb: f64, thresholds: &MemoryThresholds) -> Self {
        if memory_mb >= thresholds.emergency {
            MemoryState::Emergency
        } else if memory_mb >= thresholds.critical {
            MemoryState::Critical
        } else if memory_mb >= thresholds.warning {
            MemoryState::Warning
        } else {
            MemoryState::Normal
        }
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryState::Normal => write!(f, "normal"),
            MemoryState::Warning => write!(f, "warning"),
            MemoryState::Critical => write!(f, "critical"),
            MemoryState::Emergency => write!(f, "emergency"),
        }
    }
}

/// Rolling memory aggregate, written only by the monitoring tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub current_mb: f64,
    pub peak_mb: f64,
    pub samples: u64,
    /// Unix epoch seconds of the last successful sample
    pub last_check: Option<f64>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, memory_mb: f64) {
        self.current_mb = memory_mb;
        if memory_mb > self.peak_mb {
            self.peak_mb = memory_mb;
        }
        self.samples += 1;
        self.last_check = Some(epoch_secs());
    }
}

/// What caused a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartTrigger {
    Manual,
    Emergency,
    MemoryLeak,
    ProcessDied,
}

impl std::fmt::Display for RestartTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartTrigger::Manual => write!(f, "manual"),
            RestartTrigger::Emergency => write!(f, "emergency"),
            RestartTrigger::MemoryLeak => write!(f, "memory_leak"),
            RestartTrigger::ProcessDied => write!(f, "process_died"),
        }
    }
}

/// One entry of the append-only restart log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartAttempt {
    pub reason: String,
    /// Unix epoch seconds
    pub timestamp: f64,
    pub success: bool,
    pub trigger: RestartTrigger,
    pub memory_mb: f64,
    pub error: Option<String>,
}

impl RestartAttempt {
    pub fn succeeded(reason: &str, trigger: RestartTrigger, memory_mb: f64) -> Self {
        Self {
            reason: reason.to_string(),
            timestamp: epoch_secs(),
            success: true,
            trigger,
            memory_mb,
            error: None,
        }
    }

    pub fn failed(reason: &str, trigger: RestartTrigger, memory_mb: f64, error: String) -> Self {
        Self {
            reason: reason.to_string(),
            timestamp: epoch_secs(),
            success: false,
            trigger,
            memory_mb,
            error: Some(error),
        }
    }
}

/// Current time as Unix epoch seconds
pub fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> MemoryThresholds {
        MemoryThresholds::new(100.0, 200.0, 300.0)
    }

    #[test]
    fn test_classify_boundaries() {
        let t = thresholds();
        assert_eq!(MemoryState::classify(0.0, &t), MemoryState::Normal);
        assert_eq!(MemoryState::classify(99.9, &t), MemoryState::Normal);
        assert_eq!(MemoryState::classify(100.0, &t), MemoryState::Warning);
        assert_eq!(MemoryState::classify(199.9, &t), MemoryState::Warning);
        assert_eq!(MemoryState::classify(200.0, &t), MemoryState::Critical);
        assert_eq!(MemoryState::classify(300.0, &t), MemoryState::Emergency);
        assert_eq!(MemoryState::classify(1500.0, &t), MemoryState::Emergency);
    }

    #[test]
    fn test_classify_is_monotone() {
        let t = thresholds();
        let mut previous = MemoryState::Normal;
        for mb in (0..400).map(|v| v as f64) {
            let state = MemoryState::classify(mb, &t);
            assert!(state >= previous, "classification regressed at {} MB", mb);
            previous = state;
        }
    }

    #[test]
    fn test_memory_stats_record() {
        let mut stats = MemoryStats::new();
        stats.record(120.0);
        stats.record(80.0);

        assert_eq!(stats.current_mb, 80.0);
        assert_eq!(stats.peak_mb, 120.0);
        assert_eq!(stats.samples, 2);
        assert!(stats.last_check.is_some());
    }

    #[test]
    fn test_restart_attempt_constructors() {
        let ok = RestartAttempt::succeeded("manual", RestartTrigger::Manual, 10.0);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = RestartAttempt::failed(
            "process died",
            RestartTrigger::ProcessDied,
            0.0,
            "spawn failed".to_string(),
        );
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ProcessState::NotStarted.to_string(), "not_started");
        assert_eq!(ProcessState::Crashed.to_string(), "crashed");
        assert_eq!(MemoryState::Emergency.to_string(), "emergency");
        assert_eq!(RestartTrigger::MemoryLeak.to_string(), "memory_leak");
    }
}
