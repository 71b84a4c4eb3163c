// Health module - point-in-time health checks and pre-start validation

use crate::config::HealthConfig;
use crate::error::Result;
use crate::process::epoch_secs;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Aggregate health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

impl CheckResult {
    fn new(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

/// Aggregated result of one `check_health` run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub total_checks: u64,
    /// Unix epoch seconds
    pub timestamp: f64,
}

/// A caller-supplied check. Errors and panics count as UNHEALTHY for this check only.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> Result<(HealthStatus, String)>;
}

pub struct HealthMonitor {
    config: HealthConfig,
    pid: Option<u32>,
    working_directory: Option<PathBuf>,
    system: System,
    custom_checks: Vec<Box<dyn HealthCheck>>,
    total_checks: u64,
    last_report: Option<HealthReport>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            pid: None,
            working_directory: None,
            system: System::new(),
            custom_checks: Vec::new(),
            total_checks: 0,
            last_report: None,
        }
    }

    pub fn set_monitored_process(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub fn set_working_directory(&mut self, dir: Option<PathBuf>) {
        self.working_directory = dir;
    }

    pub fn add_check(&mut self, check: Box<dyn HealthCheck>) {
        self.custom_checks.push(check);
    }

    pub fn last_report(&self) -> Option<&HealthReport> {
        self.last_report.as_ref()
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks
    }

    /// Run every check and aggregate to the worst status
    pub fn check_health(&mut self) -> HealthReport {
        self.total_checks += 1;

        let mut checks = Vec::new();
        if self.pid.is_some() {
            checks.push(self.isolated("process_alive", |m| m.check_process_alive()));
        }
        checks.extend(self.preflight_checks());

        let status = aggregate(&checks);
        if status > HealthStatus::Healthy {
            warn!(%status, "health check reported problems");
        } else {
            debug!("health check passed");
        }

        let report = HealthReport {
            status,
            checks,
            total_checks: self.total_checks,
            timestamp: epoch_secs(),
        };
        self.last_report = Some(report.clone());
        report
    }

    /// Stricter gate for starts and restarts: every check except process
    /// liveness must be HEALTHY.
    pub fn validate_before_start(&mut self) -> (bool, String) {
        let failing: Vec<String> = self
            .preflight_checks()
            .into_iter()
            .filter(|c| c.status != HealthStatus::Healthy)
            .map(|c| format!("{} is {}: {}", c.name, c.status, c.message))
            .collect();

        if failing.is_empty() {
            (true, "ready to start".to_string())
        } else {
            (false, failing.join("; "))
        }
    }

    fn preflight_checks(&mut self) -> Vec<CheckResult> {
        let mut checks = vec![
            self.isolated("system_memory", |m| m.check_system_memory()),
            self.isolated("working_directory", |m| m.check_working_directory()),
        ];

        for check in &self.custom_checks {
            let name = check.name().to_string();
            let result = match catch_unwind(AssertUnwindSafe(|| check.check())) {
                Ok(Ok((status, message))) => CheckResult::new(&name, status, message),
                Ok(Err(e)) => CheckResult::new(&name, HealthStatus::Unhealthy, e.to_string()),
                Err(_) => CheckResult::new(&name, HealthStatus::Unhealthy, "check panicked"),
            };
            checks.push(result);
        }

        checks
    }

    fn isolated<F>(&mut self, name: &str, check: F) -> CheckResult
    where
        F: FnOnce(&mut Self) -> CheckResult,
    {
        match catch_unwind(AssertUnwindSafe(|| check(self))) {
            Ok(result) => result,
            Err(_) => CheckResult::new(name, HealthStatus::Unhealthy, "check panicked"),
        }
    }

    fn check_process_alive(&mut self) -> CheckResult {
        let pid = match self.pid {
            Some(pid) => pid,
            None => return CheckResult::new("process_alive", HealthStatus::Healthy, "no process"),
        };

        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        match self.system.process(sys_pid) {
            Some(process) if process.status() != ProcessStatus::Zombie => CheckResult::new(
                "process_alive",
                HealthStatus::Healthy,
                format!("pid {} running", pid),
            ),
            _ => CheckResult::new(
                "process_alive",
                HealthStatus::Critical,
                format!("pid {} is not running", pid),
            ),
        }
    }

    fn check_system_memory(&mut self) -> CheckResult {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return CheckResult::new(
                "system_memory",
                HealthStatus::Degraded,
                "memory probe unavailable",
            );
        }

        let available = self.system.available_memory();
        let used_percent = total.saturating_sub(available) as f64 / total as f64 * 100.0;
        let available_mb = available as f64 / BYTES_PER_MB;

        let (status, message) = if used_percent >= self.config.max_system_memory_percent {
            (
                HealthStatus::Critical,
                format!("system memory {:.1}% used", used_percent),
            )
        } else if available_mb < self.config.min_free_memory_mb {
            (
                HealthStatus::Unhealthy,
                format!(
                    "only {:.0}MB available (minimum {:.0}MB)",
                    available_mb, self.config.min_free_memory_mb
                ),
            )
        } else if used_percent >= self.config.warn_system_memory_percent {
            (
                HealthStatus::Degraded,
                format!("system memory {:.1}% used", used_percent),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("{:.1}% used, {:.0}MB available", used_percent, available_mb),
            )
        };

        CheckResult::new("system_memory", status, message)
    }

    fn check_working_directory(&mut self) -> CheckResult {
        let dir = match self.working_directory {
            Some(ref dir) => dir.clone(),
            None => {
                return CheckResult::new(
                    "working_directory",
                    HealthStatus::Healthy,
                    "inherits guardian directory",
                )
            }
        };

        if !dir.is_dir() {
            return CheckResult::new(
                "working_directory",
                HealthStatus::Unhealthy,
                format!("{} is not a directory", dir.display()),
            );
        }

        match std::fs::read_dir(&dir) {
            Ok(_) => CheckResult::new(
                "working_directory",
                HealthStatus::Healthy,
                format!("{} accessible", dir.display()),
            ),
            Err(e) => CheckResult::new(
                "working_directory",
                HealthStatus::Unhealthy,
                format!("{} not readable: {}", dir.display(), e),
            ),
        }
    }
}

fn aggregate(checks: &[CheckResult]) -> HealthStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Unhealthy)
}
