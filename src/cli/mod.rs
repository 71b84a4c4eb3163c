// CLI module - User-facing command-line interface

mod output;

use crate::config::GuardianConfig;
use crate::error::{GuardianError, Result};
use crate::guardian::MemoryGuardian;
use crate::state::StateManager;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// memguard - memory watchdog for a long-running process
#[derive(Parser, Debug)]
#[command(name = "memguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise the configured process until interrupted
    Run {
        /// Guardian configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// Only monitor; do not start the process even if auto_start is set
        #[arg(long)]
        no_auto_start: bool,

        /// Extra environment variables for the process (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,
    },

    /// Validate a configuration file and print the resolved settings
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show state storage statistics
    States {
        #[arg(short, long)]
        config: PathBuf,

        /// Apply the retention policy before reporting
        #[arg(long)]
        cleanup: bool,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run {
                config,
                no_auto_start,
                env,
            } => {
                let overrides = parse_env_vars(&env)?;
                run(&config, no_auto_start, overrides).await
            }

            Commands::Validate { config } => {
                let config = load_config(&config)?;
                output::print_success_msg("Configuration is valid");
                output::print_config_summary(&config);
                Ok(())
            }

            Commands::States { config, cleanup } => {
                let config = load_config(&config)?;
                let manager = StateManager::from_config(&config);

                if cleanup {
                    let removed = manager.cleanup_old_states();
                    output::print_success_msg(&format!("Removed {} old state file(s)", removed));
                }

                output::print_storage_stats(&manager.storage_stats());
                Ok(())
            }
        }
    }
}

/// Report a top-level failure, including its context chain
pub fn print_error(error: &anyhow::Error) {
    output::print_error(&format!("{:#}", error));
}

fn load_config(path: &Path) -> anyhow::Result<GuardianConfig> {
    GuardianConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run(
    config_path: &Path,
    no_auto_start: bool,
    env_overrides: HashMap<String, String>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    config.process_env.extend(env_overrides);

    if !config.enabled {
        output::print_info("Memory guardian is disabled in the configuration");
        return Ok(());
    }

    let auto_start = config.auto_start && !no_auto_start;
    let guardian = Arc::new(MemoryGuardian::new(config)?);

    if !guardian.initialize().await {
        bail!("Failed to initialize memory guardian");
    }

    if auto_start {
        if !guardian.start_process().await {
            guardian.shutdown().await;
            bail!(
                "Failed to start '{}'",
                guardian.config().process_command.join(" ")
            );
        }
        if let Some(pid) = guardian.get_status().await.pid {
            output::print_success_msg(&format!("Process started (pid {})", pid));
        }
    }

    guardian.start_monitoring().await;
    output::print_info("Monitoring memory, press Ctrl-C to stop");

    wait_for_shutdown_signal().await;

    guardian.shutdown().await;

    output::print_status(&guardian.get_status().await);
    output::print_restart_history(&guardian.restart_history().await);

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            warn!("Failed to install signal handlers, waiting for Ctrl-C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        if let Some((key, value)) = env_str.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        } else {
            return Err(GuardianError::ConfigError(format!(
                "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                env_str
            )));
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_vars() {
        let env_vars = vec!["APP_ENV=production".to_string(), "PORT=3000".to_string()];
        let result = parse_env_vars(&env_vars).unwrap();
        assert_eq!(result.get("APP_ENV"), Some(&"production".to_string()));
        assert_eq!(result.get("PORT"), Some(&"3000".to_string()));
    }

    #[test]
    fn test_parse_env_vars_invalid() {
        let env_vars = vec!["INVALID".to_string()];
        let result = parse_env_vars(&env_vars);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "memguard",
            "run",
            "-c",
            "guardian.toml",
            "--no-auto-start",
            "-e",
            "A=1",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                config,
                no_auto_start,
                env,
            } => {
                assert_eq!(config, PathBuf::from("guardian.toml"));
                assert!(no_auto_start);
                assert_eq!(env, vec!["A=1".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["memguard", "states", "-c", "g.json", "--cleanup", "-v"])
            .unwrap();
        assert!(cli.verbose);
    }
}
