//! Container runtime detection

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Bound on `docker info`; an unresponsive daemon counts as unavailable
pub const INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported container runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
    /// Docker CLI talking to a reachable daemon
    Docker,
    /// No container runtime available
    None,
}

impl ContainerRuntime {
    /// Detect the available container runtime
    pub async fn detect() -> Self {
        if Self::check_docker().await {
            info!("Using Docker runtime");
            return Self::Docker;
        }

        warn!("No container runtime available");
        Self::None
    }

    /// Check if Docker is available within [`INFO_TIMEOUT`]
    pub async fn check_docker() -> bool {
        let info = tokio::process::Command::new("docker")
            .arg("info")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(INFO_TIMEOUT, info).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("docker info did not answer in time");
                false
            }
        }
    }

    /// Get human-readable name for the runtime
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Docker => "Docker",
            Self::None => "None (no isolation)",
        }
    }

    /// Whether containers can be started
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::None)
    }
}
