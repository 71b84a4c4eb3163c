use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of per-process resident memory readings.
///
/// `None` means the reading failed; the guardian skips that sample.
pub trait MemoryProbe: Send {
    fn memory_mb(&mut self, pid: u32) -> Option<f64>;
}

impl<F> MemoryProbe for F
where
    F: FnMut(u32) -> Option<f64> + Send,
{
    fn memory_mb(&mut self, pid: u32) -> Option<f64> {
        self(pid)
    }
}

/// Memory probe backed by sysinfo
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, pid: Pid) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
    }

    /// Whether the pid is present and not a zombie
    pub fn is_alive(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.refresh(sys_pid);
        self.system
            .process(sys_pid)
            .map(|p| p.status() != ProcessStatus::Zombie)
            .unwrap_or(false)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn memory_mb(&mut self, pid: u32) -> Option<f64> {
        let sys_pid = Pid::from_u32(pid);
        self.refresh(sys_pid);
        self.system
            .process(sys_pid)
            .map(|p| p.memory() as f64 / BYTES_PER_MB)
    }
}
