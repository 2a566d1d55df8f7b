//! Resource limits for containerized execution

use serde::{Deserialize, Serialize};

/// Resource limits applied to every container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory limit in bytes (default: 256MB)
    pub memory_bytes: u64,
    /// CPU quota (percentage of one core, default: 50%)
    pub cpu_percent: u32,
    /// Maximum number of processes
    pub max_pids: u32,
    /// Disable swap
    pub no_swap: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024, // 256MB
            cpu_percent: 50,
            max_pids: 64,
            no_swap: true,
        }
    }
}

impl ResourceLimits {
    /// Memory limit in whole megabytes
    #[must_use]
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }

    /// Convert to Docker resource arguments
    #[must_use]
    pub fn to_docker_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.push(format!("--memory={}b", self.memory_bytes));

        if self.no_swap {
            args.push(format!("--memory-swap={}b", self.memory_bytes));
        }

        // CPU quota (in microseconds per 100ms period), capped at one core
        let cpu_quota = u64::from(self.cpu_percent.min(100)) * 1000;
        args.push(format!("--cpu-quota={}", cpu_quota));
        args.push("--cpu-period=100000".to_string());

        args.push(format!("--pids-limit={}", self.max_pids));

        args
    }
}
