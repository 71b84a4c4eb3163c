use crate::config::GuardianConfig;
use crate::error::{GuardianError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Opaque launch parameters for the supervised executable
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    /// Build a launch spec from `process_command`, `process_args`, `process_env`
    /// and `working_directory`
    pub fn from_config(config: &GuardianConfig) -> Result<Self> {
        let (program, rest) = config
            .process_command
            .split_first()
            .ok_or_else(|| GuardianError::MissingConfigField("process_command".to_string()))?;

        let mut args: Vec<String> = rest.to_vec();
        args.extend(config.process_args.iter().cloned());

        Ok(Self {
            program: program.clone(),
            args,
            env: config.process_env.clone(),
            cwd: config.working_directory.clone(),
        })
    }

    /// Add or override one environment variable
    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }
}

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn the supervised process.
///
/// Output is inherited from the guardian so the child's logs land wherever the
/// guardian's go. The child is killed if its handle is dropped.
pub fn spawn_process(spec: &LaunchSpec) -> Result<SpawnedProcess> {
    if spec.program.trim().is_empty() {
        return Err(GuardianError::SpawnError("empty program".to_string()));
    }

    let mut command = Command::new(&spec.program);

    if !spec.args.is_empty() {
        command.args(&spec.args);
    }

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());
    command.kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        GuardianError::SpawnError(format!("Failed to spawn '{}': {}", spec.program, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        GuardianError::SpawnError(format!("Failed to get PID for '{}'", spec.program))
    })?;

    Ok(SpawnedProcess { child, pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    #[test]
    fn test_from_config_joins_command_and_args() {
        let config = GuardianConfig {
            process_command: vec!["/usr/bin/python3".to_string(), "agent.py".to_string()],
            process_args: vec!["--verbose".to_string()],
            ..GuardianConfig::default()
        };

        let spec = LaunchSpec::from_config(&config).unwrap();
        assert_eq!(spec.program, "/usr/bin/python3");
        assert_eq!(spec.args, vec!["agent.py", "--verbose"]);
    }

    #[test]
    fn test_from_config_empty_command() {
        let config = GuardianConfig::default();
        assert!(matches!(
            LaunchSpec::from_config(&config),
            Err(GuardianError::MissingConfigField(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let mut spawned = spawn_process(&spec("/bin/sleep", &["5"])).unwrap();
        assert!(spawned.pid > 0);
        let _ = spawned.child.kill().await;
    }

    #[tokio::test]
    async fn test_spawn_with_env_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("marker");

        let mut launch = spec("/bin/sh", &["-c", "echo \"$GUARDIAN_TEST\" > marker"])
            .with_env("GUARDIAN_TEST", "hello");
        launch.cwd = Some(temp_dir.path().to_path_buf());

        let mut spawned = spawn_process(&launch).unwrap();
        let status = spawned.child.wait().await.unwrap();
        assert!(status.success());

        let contents = std::fs::read_to_string(marker).unwrap();
        assert_eq!(contents.trim(), "hello");
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_program() {
        let result = spawn_process(&spec("/nonexistent/program", &[]));
        assert!(matches!(result, Err(GuardianError::SpawnError(_))));
    }

    #[tokio::test]
    async fn test_spawn_invalid_working_directory() {
        let mut launch = spec("/bin/echo", &[]);
        launch.cwd = Some(PathBuf::from("/nonexistent/directory"));

        assert!(matches!(
            spawn_process(&launch),
            Err(GuardianError::SpawnError(_))
        ));
    }
}
