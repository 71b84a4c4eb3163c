// Process module - spawning, termination, memory probing and lifecycle types

pub mod probe;
pub mod spawner;
pub mod terminate;
mod types;

pub use probe::{MemoryProbe, SysinfoProbe};
pub use spawner::{spawn_process, LaunchSpec, SpawnedProcess};
pub use terminate::{terminate, TerminationOutcome};
pub use types::{
    epoch_secs, MemoryState, MemoryStats, ProcessState, RestartAttempt, RestartTrigger,
};
