// Output formatting and display for CLI

use crate::config::GuardianConfig;
use crate::degradation::DegradationLevel;
use crate::guardian::GuardianStatus;
use crate::process::{MemoryState, ProcessState, RestartAttempt};
use crate::protection::CircuitState;
use crate::state::{CanonicalFile, StorageStats};
use chrono::{DateTime, Local, Utc};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn setting(setting: &str, value: impl ToString) -> SettingRow {
    SettingRow {
        setting: setting.to_string(),
        value: value.to_string(),
    }
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Print the resolved configuration
pub fn print_config_summary(config: &GuardianConfig) {
    let policy = &config.restart_policy;
    let command = if config.process_command.is_empty() {
        "-".to_string()
    } else {
        let mut argv = config.process_command.clone();
        argv.extend(config.process_args.iter().cloned());
        truncate(&argv.join(" "), 60)
    };

    let rows = vec![
        setting("Command", command),
        setting(
            "Working directory",
            config
                .working_directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        setting(
            "Thresholds",
            format!(
                "warning {} / critical {} / emergency {}",
                format_mb(config.thresholds.warning),
                format_mb(config.thresholds.critical),
                format_mb(config.thresholds.emergency)
            ),
        ),
        setting(
            "Restart circuit",
            format!(
                "{} failures in {}",
                policy.max_attempts,
                format_duration(&policy.attempt_window())
            ),
        ),
        setting(
            "Cooldown",
            if policy.exponential_backoff {
                format!(
                    "{} x{} up to {}",
                    format_duration(&policy.initial_cooldown()),
                    policy.cooldown_multiplier,
                    format_duration(&policy.max_cooldown())
                )
            } else {
                format_duration(&policy.initial_cooldown())
            },
        ),
        setting(
            "Leak detection",
            if config.leak_detection.enabled {
                format!(
                    "> {:.1}MB/min over {} samples",
                    config.leak_detection.growth_threshold_mb_per_minute,
                    config.leak_detection.min_samples
                )
            } else {
                "disabled".to_string()
            },
        ),
        setting("State directory", config.state_dir().display()),
        setting("Persist state", config.persist_state),
        setting("Auto start", config.auto_start),
    ];

    print_table(rows);
}

/// Print the final guardian status
pub fn print_status(status: &GuardianStatus) {
    println!("\n{}", "Memory Guardian".bold().underline());
    println!();
    println!(
        "  {:<18} {}",
        "Process:".bold(),
        format_process_state_colored(&status.process_state)
    );

    if let Some(pid) = status.pid {
        println!("  {:<18} {}", "PID:".bold(), pid);
    }

    if let Some(uptime) = status.uptime_secs {
        println!(
            "  {:<18} {}",
            "Uptime:".bold(),
            format_duration(&Duration::from_secs_f64(uptime.max(0.0)))
        );
    }

    println!(
        "  {:<18} {} ({})",
        "Memory:".bold(),
        format_mb(status.memory.current_mb),
        format_memory_state_colored(&status.memory_state)
    );
    println!("  {:<18} {}", "Peak:".bold(), format_mb(status.memory.peak_mb));
    println!("  {:<18} {}", "Samples:".bold(), status.memory.samples);
    println!(
        "  {:<18} {:+.1}MB/min",
        "Trend:".bold(),
        status.restart.memory_trend.slope_mb_per_minute
    );
    println!(
        "  {:<18} {}",
        "Circuit:".bold(),
        format_circuit_colored(&status.restart.circuit_state)
    );
    println!(
        "  {:<18} {} ({} failed, {} consecutive)",
        "Restarts:".bold(),
        status.total_restarts,
        status.restart.failed_restarts,
        status.restart.consecutive_failures
    );
    println!(
        "  {:<18} {}",
        "Degradation:".bold(),
        format_degradation_colored(&status.degradation.level)
    );

    for (name, record) in &status.degradation.features {
        println!(
            "    {} {} ({:?}): {}",
            "-".dimmed(),
            name.cyan(),
            record.mode,
            record.cause
        );
    }

    println!();
}

/// Print every restart attempt
pub fn print_restart_history(attempts: &[RestartAttempt]) {
    #[derive(Tabled)]
    struct RestartRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Trigger")]
        trigger: String,
        #[tabled(rename = "Reason")]
        reason: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Result")]
        result: String,
    }

    if attempts.is_empty() {
        println!("{}", "No restarts".dimmed().italic());
        return;
    }

    let rows: Vec<RestartRow> = attempts
        .iter()
        .map(|a| RestartRow {
            time: format_timestamp(a.timestamp),
            trigger: a.trigger.to_string(),
            reason: truncate(&a.reason, 40),
            memory: format_mb(a.memory_mb),
            result: if a.success {
                "ok".green().to_string()
            } else {
                a.error
                    .as_deref()
                    .map(|e| truncate(e, 40))
                    .unwrap_or_else(|| "failed".to_string())
                    .red()
                    .to_string()
            },
        })
        .collect();

    print_table(rows);
    println!(
        "{}",
        format!("Total: {} restart attempt(s)", attempts.len())
            .dimmed()
            .italic()
    );
}

/// Print state storage statistics
pub fn print_storage_stats(stats: &StorageStats) {
    let current = match stats.current {
        CanonicalFile::None => "none".bright_black().to_string(),
        CanonicalFile::Plain => "current_state.json".green().to_string(),
        CanonicalFile::Compressed => "current_state.json.gz".green().to_string(),
    };

    let rows = vec![
        setting("State directory", stats.state_dir.display()),
        setting("Current state", current),
        setting("Backups", stats.backup_count),
        setting("Total size", format_mb(stats.total_size_mb)),
        setting("Restarts recorded", stats.total_restarts),
    ];

    print_table(rows);
}

fn format_process_state_colored(state: &ProcessState) -> String {
    match state {
        ProcessState::Running => state.to_string().green().to_string(),
        ProcessState::NotStarted => state.to_string().bright_black().to_string(),
        ProcessState::Stopping => state.to_string().yellow().to_string(),
        ProcessState::Stopped => state.to_string().bright_black().to_string(),
        ProcessState::Crashed => state.to_string().red().bold().to_string(),
    }
}

fn format_memory_state_colored(state: &MemoryState) -> String {
    match state {
        MemoryState::Normal => state.to_string().green().to_string(),
        MemoryState::Warning => state.to_string().yellow().to_string(),
        MemoryState::Critical => state.to_string().red().to_string(),
        MemoryState::Emergency => state.to_string().red().bold().to_string(),
    }
}

fn format_circuit_colored(state: &CircuitState) -> String {
    match state {
        CircuitState::Closed => state.to_string().green().to_string(),
        CircuitState::HalfOpen => state.to_string().yellow().to_string(),
        CircuitState::Open => state.to_string().red().bold().to_string(),
    }
}

fn format_degradation_colored(level: &DegradationLevel) -> String {
    match level {
        DegradationLevel::Normal => level.to_string().green().to_string(),
        DegradationLevel::Minor => level.to_string().yellow().to_string(),
        DegradationLevel::Moderate => level.to_string().red().to_string(),
        DegradationLevel::Severe => level.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format a megabyte value, switching to GB past 1024MB
fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2}GB", mb / 1024.0)
    } else {
        format!("{:.1}MB", mb)
    }
}

/// Local wall-clock time for a Unix epoch timestamp
fn format_timestamp(epoch_secs: f64) -> String {
    let secs = epoch_secs.trunc() as i64;
    let nanos = (epoch_secs.fract() * 1e9) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(512.0), "512.0MB");
        assert_eq!(format_mb(2048.0), "2.00GB");
        assert_eq!(format_mb(0.0), "0.0MB");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(f64::MAX), "-");
        assert_eq!(format_timestamp(1_700_000_000.25).len(), 19);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé strïng", 8), "ünïcö...");
    }
}
