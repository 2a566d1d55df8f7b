//! Container backend configuration

use super::limits::ResourceLimits;
use super::network::NetworkMode;
use serde::{Deserialize, Serialize};

/// Configuration for containerized execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image providing the interpreter
    #[serde(default = "default_image")]
    pub image: String,
    /// Network mode
    #[serde(default)]
    pub network: NetworkMode,
    /// Resource limits
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Additional `--security-opt` values
    #[serde(default = "default_security_opts")]
    pub security_opts: Vec<String>,
    /// Directory the source file is mounted into
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_security_opts() -> Vec<String> {
    vec!["no-new-privileges:true".to_string()]
}

fn default_workdir() -> String {
    "/sandbox".to_string()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            network: NetworkMode::default(),
            limits: ResourceLimits::default(),
            security_opts: default_security_opts(),
            workdir: default_workdir(),
        }
    }
}

impl ContainerConfig {
    /// Path of the program inside the container
    #[must_use]
    pub fn script_path(&self, suffix: &str) -> String {
        format!("{}/main{}", self.workdir.trim_end_matches('/'), suffix)
    }
}
