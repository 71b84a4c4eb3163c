// Library exports for the memory guardian

pub mod cli;
pub mod config;
pub mod degradation;
pub mod error;
pub mod guardian;
pub mod health;
pub mod process;
pub mod protection;
pub mod state;

pub use config::GuardianConfig;
pub use error::{GuardianError, Result};
pub use guardian::{GuardianStatus, MemoryGuardian, MonitorTick, TickAction};
