//! Network mode for containers

use serde::{Deserialize, Serialize};

/// Network mode for containerized execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No network access (most secure, default)
    #[default]
    None,
    /// Bridge network (isolated network)
    Bridge,
    /// Host network (least secure, not recommended)
    Host,
}

impl NetworkMode {
    /// Convert to Docker network mode string
    #[must_use]
    pub fn as_docker_arg(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
            Self::Host => "host",
        }
    }

    /// Whether the program can reach any network
    #[must_use]
    pub fn allows_network(&self) -> bool {
        !matches!(self, Self::None)
    }
}
