// Supervise a process that allocates steadily and watch the guardian react.
//
// Run with: cargo run --example guardian_demo

use memguard::config::{GuardianConfig, MemoryThresholds};
use memguard::MemoryGuardian;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let state_dir = std::env::temp_dir().join("memguard-demo");

    let mut config = GuardianConfig::default();
    config.process_command = vec!["/bin/sleep".to_string(), "300".to_string()];
    config.thresholds = MemoryThresholds::new(64.0, 128.0, 192.0);
    config.state_file = state_dir;
    config.monitoring.normal_interval_secs = 1.0;
    config.monitoring.warning_interval_secs = 1.0;
    config.monitoring.critical_interval_secs = 0.5;
    config.monitoring.emergency_interval_secs = 0.5;

    // A fake reading that grows 20MB per poll, so the demo does not need a
    // process that really leaks.
    let mut simulated_mb = 20.0;
    let probe = move |_pid: u32| {
        simulated_mb += 20.0;
        if simulated_mb > 250.0 {
            simulated_mb = 20.0;
        }
        Some(simulated_mb)
    };

    let guardian = Arc::new(MemoryGuardian::with_probe(config, probe)?);
    guardian.initialize().await;
    guardian.start_process().await;
    guardian.start_monitoring().await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = guardian.get_status().await;
        println!(
            "pid {:?}  {:.0}MB ({})  restarts {}  circuit {}",
            status.pid,
            status.memory.current_mb,
            status.memory_state,
            status.total_restarts,
            status.restart.circuit_state
        );
    }

    guardian.shutdown().await;

    for attempt in guardian.restart_history().await {
        println!(
            "{} at {:.0}MB: {}",
            attempt.trigger,
            attempt.memory_mb,
            if attempt.success { "ok" } else { "failed" }
        );
    }

    Ok(())
}
