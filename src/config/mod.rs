use crate::error::{GuardianError, Result};
use crate::process::MemoryState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Memory thresholds in megabytes. Must be strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning: 2048.0,
            critical: 3072.0,
            emergency: 4096.0,
        }
    }
}

impl MemoryThresholds {
    pub fn new(warning: f64, critical: f64, emergency: f64) -> Self {
        Self {
            warning,
            critical,
            emergency,
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("warning", self.warning),
            ("critical", self.critical),
            ("emergency", self.emergency),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GuardianError::ConfigValidationError(format!(
                    "thresholds.{} must be a positive number of megabytes, got {}",
                    name, value
                )));
            }
        }

        if !(self.warning < self.critical && self.critical < self.emergency) {
            return Err(GuardianError::ConfigValidationError(format!(
                "thresholds must be strictly increasing (warning < critical < emergency), got {} / {} / {}",
                self.warning, self.critical, self.emergency
            )));
        }

        Ok(())
    }
}

/// Restart policy: circuit breaker limits, cooldown growth and termination timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Consecutive failures (inside the attempt window) that open the circuit
    pub max_attempts: u32,
    /// Window in which failures are counted (in seconds)
    pub attempt_window_secs: f64,
    /// Cooldown after the circuit first opens (in seconds)
    pub initial_cooldown_secs: f64,
    /// Growth factor applied to the cooldown on every further trip
    pub cooldown_multiplier: f64,
    /// Upper bound for the cooldown (in seconds)
    pub max_cooldown_secs: f64,
    /// Time allowed for a cooperative exit (in seconds)
    pub graceful_timeout_secs: f64,
    /// Time allowed for a forced kill to be reaped (in seconds)
    pub force_kill_timeout_secs: f64,
    /// Whether cooldowns grow with repeated trips
    pub exponential_backoff: bool,
    /// Time a freshly spawned process must survive to count as started (in seconds)
    pub startup_grace_secs: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_window_secs: 300.0,
            initial_cooldown_secs: 30.0,
            cooldown_multiplier: 2.0,
            max_cooldown_secs: 600.0,
            graceful_timeout_secs: 30.0,
            force_kill_timeout_secs: 10.0,
            exponential_backoff: true,
            startup_grace_secs: 1.0,
        }
    }
}

impl RestartPolicy {
    pub fn attempt_window(&self) -> Duration {
        Duration::from_secs_f64(self.attempt_window_secs)
    }

    pub fn initial_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.initial_cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.max_cooldown_secs)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.graceful_timeout_secs)
    }

    pub fn force_kill_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.force_kill_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs_f64(self.startup_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GuardianError::ConfigValidationError(
                "restart_policy.max_attempts must be at least 1".to_string(),
            ));
        }

        if !self.cooldown_multiplier.is_finite() || self.cooldown_multiplier < 1.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "restart_policy.cooldown_multiplier must be >= 1.0, got {}",
                self.cooldown_multiplier
            )));
        }

        for (name, value) in [
            ("attempt_window_secs", self.attempt_window_secs),
            ("initial_cooldown_secs", self.initial_cooldown_secs),
            ("max_cooldown_secs", self.max_cooldown_secs),
            ("graceful_timeout_secs", self.graceful_timeout_secs),
            ("force_kill_timeout_secs", self.force_kill_timeout_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GuardianError::ConfigValidationError(format!(
                    "restart_policy.{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !self.startup_grace_secs.is_finite() || self.startup_grace_secs < 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "restart_policy.startup_grace_secs must not be negative, got {}",
                self.startup_grace_secs
            )));
        }

        if self.initial_cooldown_secs > self.max_cooldown_secs {
            return Err(GuardianError::ConfigValidationError(format!(
                "restart_policy.initial_cooldown_secs ({}) exceeds max_cooldown_secs ({})",
                self.initial_cooldown_secs, self.max_cooldown_secs
            )));
        }

        Ok(())
    }
}

/// Polling intervals keyed by memory severity plus periodic stats logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub normal_interval_secs: f64,
    pub warning_interval_secs: f64,
    pub critical_interval_secs: f64,
    pub emergency_interval_secs: f64,
    pub log_memory_stats: bool,
    pub log_interval_secs: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            normal_interval_secs: 30.0,
            warning_interval_secs: 15.0,
            critical_interval_secs: 5.0,
            emergency_interval_secs: 1.0,
            log_memory_stats: true,
            log_interval_secs: 300.0,
        }
    }
}

impl MonitoringConfig {
    /// Polling interval for the given severity
    pub fn interval_for(&self, state: MemoryState) -> Duration {
        let secs = match state {
            MemoryState::Normal => self.normal_interval_secs,
            MemoryState::Warning => self.warning_interval_secs,
            MemoryState::Critical => self.critical_interval_secs,
            MemoryState::Emergency => self.emergency_interval_secs,
        };
        Duration::from_secs_f64(secs)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs_f64(self.log_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        let ordered = [
            ("normal_interval_secs", self.normal_interval_secs),
            ("warning_interval_secs", self.warning_interval_secs),
            ("critical_interval_secs", self.critical_interval_secs),
            ("emergency_interval_secs", self.emergency_interval_secs),
        ];

        for (name, value) in ordered {
            if !value.is_finite() || value <= 0.0 {
                return Err(GuardianError::ConfigValidationError(format!(
                    "monitoring.{} must be positive, got {}",
                    name, value
                )));
            }
        }

        for pair in ordered.windows(2) {
            let (slower_name, slower) = pair[0];
            let (faster_name, faster) = pair[1];
            if faster > slower {
                return Err(GuardianError::ConfigValidationError(format!(
                    "monitoring.{} ({}) must not exceed monitoring.{} ({})",
                    faster_name, faster, slower_name, slower
                )));
            }
        }

        if !self.log_interval_secs.is_finite() || self.log_interval_secs <= 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "monitoring.log_interval_secs must be positive, got {}",
                self.log_interval_secs
            )));
        }

        Ok(())
    }
}

/// Rolling-window leak trend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakDetectionConfig {
    pub enabled: bool,
    /// Maximum samples kept in the rolling window
    pub window_size: usize,
    /// Samples required before a leak can be suspected
    pub min_samples: usize,
    /// Slope (MB per minute) above which growth counts as a leak
    pub growth_threshold_mb_per_minute: f64,
    /// Samples older than this are evicted (in seconds)
    pub window_horizon_secs: f64,
    /// Restart when a leak is suspected, whatever the memory state
    pub restart_on_leak: bool,
}

impl Default for LeakDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 100,
            min_samples: 10,
            growth_threshold_mb_per_minute: 10.0,
            window_horizon_secs: 3600.0,
            restart_on_leak: true,
        }
    }
}

impl LeakDetectionConfig {
    pub fn window_horizon(&self) -> Duration {
        Duration::from_secs_f64(self.window_horizon_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_samples < 2 {
            return Err(GuardianError::ConfigValidationError(
                "leak_detection.min_samples must be at least 2".to_string(),
            ));
        }

        if self.window_size < self.min_samples {
            return Err(GuardianError::ConfigValidationError(format!(
                "leak_detection.window_size ({}) must be at least min_samples ({})",
                self.window_size, self.min_samples
            )));
        }

        if !self.growth_threshold_mb_per_minute.is_finite()
            || self.growth_threshold_mb_per_minute <= 0.0
        {
            return Err(GuardianError::ConfigValidationError(format!(
                "leak_detection.growth_threshold_mb_per_minute must be positive, got {}",
                self.growth_threshold_mb_per_minute
            )));
        }

        if !self.window_horizon_secs.is_finite() || self.window_horizon_secs <= 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "leak_detection.window_horizon_secs must be positive, got {}",
                self.window_horizon_secs
            )));
        }

        Ok(())
    }
}

/// What a failed pre-restart health gate does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhealthyPolicy {
    /// Skip the restart
    Abort,
    /// Degrade the automated_restart feature and restart anyway
    Degrade,
}

/// Health check and restart gating settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub gate_restarts: bool,
    pub on_unhealthy: UnhealthyPolicy,
    pub check_interval_secs: f64,
    pub min_free_memory_mb: f64,
    pub warn_system_memory_percent: f64,
    pub max_system_memory_percent: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gate_restarts: true,
            on_unhealthy: UnhealthyPolicy::Degrade,
            check_interval_secs: 60.0,
            min_free_memory_mb: 256.0,
            warn_system_memory_percent: 85.0,
            max_system_memory_percent: 95.0,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("warn_system_memory_percent", self.warn_system_memory_percent),
            ("max_system_memory_percent", self.max_system_memory_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(GuardianError::ConfigValidationError(format!(
                    "health.{} must be in (0, 100], got {}",
                    name, value
                )));
            }
        }

        if self.warn_system_memory_percent > self.max_system_memory_percent {
            return Err(GuardianError::ConfigValidationError(format!(
                "health.warn_system_memory_percent ({}) exceeds max_system_memory_percent ({})",
                self.warn_system_memory_percent, self.max_system_memory_percent
            )));
        }

        if !self.min_free_memory_mb.is_finite() || self.min_free_memory_mb < 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "health.min_free_memory_mb must not be negative, got {}",
                self.min_free_memory_mb
            )));
        }

        if !self.check_interval_secs.is_finite() || self.check_interval_secs <= 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "health.check_interval_secs must be positive, got {}",
                self.check_interval_secs
            )));
        }

        Ok(())
    }
}

/// State file compression and retention settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub compress: bool,
    pub retention_days: u64,
    pub max_state_files: usize,
    pub capture_cooldown_secs: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            compress: true,
            retention_days: 7,
            max_state_files: 50,
            capture_cooldown_secs: 60.0,
        }
    }
}

impl StateConfig {
    pub fn capture_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.capture_cooldown_secs.max(0.0))
    }

    fn validate(&self) -> Result<()> {
        if self.max_state_files == 0 {
            return Err(GuardianError::ConfigValidationError(
                "state.max_state_files must be at least 1".to_string(),
            ));
        }

        if !self.capture_cooldown_secs.is_finite() || self.capture_cooldown_secs < 0.0 {
            return Err(GuardianError::ConfigValidationError(format!(
                "state.capture_cooldown_secs must not be negative, got {}",
                self.capture_cooldown_secs
            )));
        }

        Ok(())
    }
}

/// Complete guardian configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Whether the guardian supervises anything at all
    pub enabled: bool,

    pub thresholds: MemoryThresholds,

    pub restart_policy: RestartPolicy,

    pub monitoring: MonitoringConfig,

    pub leak_detection: LeakDetectionConfig,

    pub health: HealthConfig,

    pub state: StateConfig,

    /// argv of the supervised process; the first element is the program
    pub process_command: Vec<String>,

    /// Extra arguments appended after `process_command`
    pub process_args: Vec<String>,

    /// Environment variables for the supervised process
    pub process_env: HashMap<String, String>,

    /// Working directory for the supervised process
    pub working_directory: Option<PathBuf>,

    /// Directory holding current and backup state files
    pub state_file: PathBuf,

    /// Persist and restore application state around restarts
    pub persist_state: bool,

    /// Start the process as soon as the guardian runs
    pub auto_start: bool,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".memory_guardian").join("state")
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: MemoryThresholds::default(),
            restart_policy: RestartPolicy::default(),
            monitoring: MonitoringConfig::default(),
            leak_detection: LeakDetectionConfig::default(),
            health: HealthConfig::default(),
            state: StateConfig::default(),
            process_command: Vec::new(),
            process_args: Vec::new(),
            process_env: HashMap::new(),
            working_directory: None,
            state_file: default_state_dir(),
            persist_state: true,
            auto_start: true,
        }
    }
}

impl GuardianConfig {
    /// Load a guardian configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<GuardianConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GuardianError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(GuardianError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML configuration document
    pub fn parse_toml(contents: &str) -> Result<GuardianConfig> {
        toml::from_str(contents)
            .map_err(|e| GuardianError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    /// Parse a JSON configuration document
    pub fn parse_json(contents: &str) -> Result<GuardianConfig> {
        serde_json::from_str(contents)
            .map_err(|e| GuardianError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate every section. Called once before any process is spawned.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.restart_policy.validate()?;
        self.monitoring.validate()?;
        self.leak_detection.validate()?;
        self.health.validate()?;
        self.state.validate()?;

        if self.enabled && self.auto_start && self.process_command.is_empty() {
            return Err(GuardianError::MissingConfigField(
                "process_command".to_string(),
            ));
        }

        if let Some(program) = self.process_command.first() {
            if program.trim().is_empty() {
                return Err(GuardianError::ConfigValidationError(
                    "process_command[0] must not be empty".to_string(),
                ));
            }
        }

        if let Some(ref cwd) = self.working_directory {
            if !cwd.exists() {
                return Err(GuardianError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(GuardianError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        if self.state_file.as_os_str().is_empty() {
            return Err(GuardianError::MissingConfigField("state_file".to_string()));
        }

        Ok(())
    }

    /// Directory that holds the state files
    pub fn state_dir(&self) -> &Path {
        &self.state_file
    }

    /// Expand environment variables in command, paths and env values
    fn expand_env_vars(&mut self) {
        self.process_command = self
            .process_command
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        self.process_args = self
            .process_args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        self.process_env = self
            .process_env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();

        if let Some(ref cwd) = self.working_directory {
            self.working_directory = Some(expand_env_in_path(cwd));
        }

        self.state_file = expand_env_in_path(&self.state_file);
    }
}

/// Expand `$VAR` and `${VAR}` references. Longer names are substituted first so
/// `$HOME_DIR` is not clobbered by `$HOME`.
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = s.to_string();
    for (key, value) in &vars {
        result = result.replace(&format!("${{{}}}", key), value);
    }
    for (key, value) in &vars {
        result = result.replace(&format!("${}", key), value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
