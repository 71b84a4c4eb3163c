use crate::config::MemoryThresholds;
use crate::degradation::DegradationStatus;
use crate::health::HealthReport;
use crate::process::{MemoryState, MemoryStats, ProcessState, RestartAttempt};
use crate::protection::RestartStatistics;
use serde::{Deserialize, Serialize};

/// Read-only snapshot for a CLI or dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianStatus {
    pub enabled: bool,
    pub process_state: ProcessState,
    pub pid: Option<u32>,
    pub memory_state: MemoryState,
    pub memory: MemoryStats,
    pub thresholds: MemoryThresholds,
    pub monitoring_active: bool,
    pub restart: RestartStatistics,
    pub degradation: DegradationStatus,
    pub health: Option<HealthReport>,
    pub restart_attempts: usize,
    pub last_restart: Option<RestartAttempt>,
    pub total_restarts: u64,
    /// Seconds since the current child was spawned
    pub uptime_secs: Option<f64>,
}

/// What a monitoring tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    None,
    Restarted { success: bool },
    RestartRejected,
    Checkpointed,
}

/// Result of one `monitor_memory` call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorTick {
    /// `None` when no sample was taken
    pub memory_mb: Option<f64>,
    pub memory_state: MemoryState,
    pub process_state: ProcessState,
    pub action: TickAction,
}
