//! Process termination.
//!
//! Callers only ever use [`terminate`]; the cooperative and forced stop
//! primitives are selected per platform below it.

use crate::error::{GuardianError, Result};
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How a child ended up stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The child had already exited before we asked
    AlreadyExited,
    /// The child honoured the cooperative request
    Graceful,
    /// The child had to be killed
    Forced,
}

/// Stop a child: cooperative request, wait up to `graceful`, then force-kill
/// and wait up to `force_timeout` for the exit to be reaped.
///
/// Exceeding `force_timeout` is an error; the caller decides what a failed
/// stop means.
pub async fn terminate(
    child: &mut Child,
    graceful: Duration,
    force_timeout: Duration,
) -> Result<TerminationOutcome> {
    if let Some(status) = child.try_wait()? {
        debug!(?status, "process already exited");
        return Ok(TerminationOutcome::AlreadyExited);
    }

    let pid = match child.id() {
        Some(pid) => pid,
        None => return Ok(TerminationOutcome::AlreadyExited),
    };

    if request_exit(pid)? {
        debug!(pid, ?graceful, "waiting for process to exit gracefully");

        match tokio::time::timeout(graceful, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "process exited gracefully");
                return Ok(TerminationOutcome::Graceful);
            }
            Ok(Err(e)) => {
                return Err(GuardianError::StopError(pid, format!("wait failed: {}", e)));
            }
            Err(_) => {
                warn!(pid, ?graceful, "process did not exit in time, force killing");
            }
        }
    }

    force_kill(child, pid)?;

    match tokio::time::timeout(force_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, ?status, "process force killed");
            Ok(TerminationOutcome::Forced)
        }
        Ok(Err(e)) => Err(GuardianError::StopError(
            pid,
            format!("wait after kill failed: {}", e),
        )),
        Err(_) => Err(GuardianError::TimeoutError(format!(
            "process {} still running {:?} after kill",
            pid, force_timeout
        ))),
    }
}

/// Send the cooperative termination request. Returns whether a graceful wait
/// makes sense.
#[cfg(unix)]
fn request_exit(pid: u32) -> Result<bool> {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        // Exited between try_wait and kill; the wait below reaps it
        Err(nix::errno::Errno::ESRCH) => Ok(true),
        Err(e) => Err(GuardianError::SignalError(format!(
            "failed to send SIGTERM to {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn request_exit(pid: u32) -> Result<bool> {
    debug!(pid, "no cooperative termination on this platform");
    Ok(false)
}

#[cfg(unix)]
fn force_kill(_child: &mut Child, pid: u32) -> Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(GuardianError::SignalError(format!(
            "failed to send SIGKILL to {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child, pid: u32) -> Result<()> {
    child
        .start_kill()
        .map_err(|e| GuardianError::StopError(pid, format!("terminate failed: {}", e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut child = Command::new("/bin/sleep").arg("30").spawn().unwrap();

        let outcome = terminate(&mut child, Duration::from_secs(5), Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(outcome, TerminationOutcome::Graceful);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_forces_stubborn_process() {
        // SIGTERM stays ignored across exec
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("trap '' TERM; exec sleep 30")
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = terminate(
            &mut child,
            Duration::from_millis(300),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TerminationOutcome::Forced);
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut child = Command::new("/bin/sh").arg("-c").arg("exit 3").spawn().unwrap();
        let _ = child.wait().await;

        let outcome = terminate(&mut child, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome, TerminationOutcome::AlreadyExited);
    }
}
