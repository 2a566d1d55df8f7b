//! Sandbox configuration
//!
//! Every type here deserializes from the `[sandbox]` section of the server
//! configuration and carries a `Default` so the library can be used without
//! a config file.

use crate::container::ContainerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which local backend serves interactive sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Use a container when Docker answers, otherwise a direct PTY
    #[default]
    Auto,
    /// Always run the program directly under a PTY
    Pty,
    /// Always run the program inside a container
    Container,
}

/// Top-level sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Local backend preference (ignored in proxy mode)
    #[serde(default)]
    pub backend: BackendPreference,
    /// Base address of a remote execution service; presence selects proxy mode
    #[serde(default)]
    pub remote_url: Option<String>,
    /// How long to wait for the start message after accept
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Interpreter and timing settings
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Container backend settings
    #[serde(default)]
    pub container: ContainerConfig,
    /// Remote backend settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_handshake_timeout() -> u64 {
    30
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::default(),
            remote_url: None,
            handshake_timeout_secs: default_handshake_timeout(),
            execution: ExecutionConfig::default(),
            container: ContainerConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Remote base address, if one is configured and non-blank
    #[must_use]
    pub fn remote_endpoint(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Handshake wait as a duration
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// How programs are executed locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Interpreter binary
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed before the source path
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// Suffix for the temporary source file
    #[serde(default = "default_source_suffix")]
    pub source_suffix: String,
    /// Wall-clock deadline for batch runs
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL during teardown
    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,
    /// How long to keep reading output after the child exits
    #[serde(default = "default_drain_grace")]
    pub drain_grace_ms: u64,
    /// TERM value exported to interactive children
    #[serde(default = "default_term")]
    pub term: String,
    /// Variables passed through from the server's environment
    #[serde(default = "default_env_whitelist")]
    pub env_whitelist: Vec<String>,
    /// Bytes kept per batch output stream; the rest is discarded
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Libraries advertised to clients as available to programs
    #[serde(default = "default_allowed_libraries")]
    pub allowed_libraries: Vec<String>,
}

/// Environment variables a child may inherit
pub const ENV_WHITELIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "DOCKER_HOST",
];

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-u".to_string()]
}

fn default_source_suffix() -> String {
    ".py".to_string()
}

fn default_batch_timeout() -> u64 {
    5
}

fn default_kill_grace() -> u64 {
    1000
}

fn default_drain_grace() -> u64 {
    200
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_env_whitelist() -> Vec<String> {
    ENV_WHITELIST.iter().map(|s| (*s).to_string()).collect()
}

fn default_max_output_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_allowed_libraries() -> Vec<String> {
    ["math", "random", "collections", "itertools", "functools", "string", "re", "datetime"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            source_suffix: default_source_suffix(),
            batch_timeout_secs: default_batch_timeout(),
            kill_grace_ms: default_kill_grace(),
            drain_grace_ms: default_drain_grace(),
            term: default_term(),
            env_whitelist: default_env_whitelist(),
            max_output_bytes: default_max_output_bytes(),
            allowed_libraries: default_allowed_libraries(),
        }
    }
}

impl ExecutionConfig {
    /// Use a different interpreter with no extra arguments
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self.interpreter_args = Vec::new();
        self.source_suffix = String::new();
        self
    }

    /// Override the batch deadline
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Batch deadline as a duration
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// SIGTERM-to-SIGKILL grace as a duration
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Post-exit drain window as a duration
    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Whitelisted variables present in the current environment
    #[must_use]
    pub fn child_env(&self) -> Vec<(String, String)> {
        self.env_whitelist
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|val| (key.clone(), val)))
            .collect()
    }

    /// Interpreter arguments followed by the script path
    #[must_use]
    pub fn command_args(&self, script: &str) -> Vec<String> {
        let mut args = self.interpreter_args.clone();
        args.push(script.to_string());
        args
    }
}

/// Remote execution service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bound on opening the duplex connection
    #[serde(default = "default_remote_timeout")]
    pub open_timeout_secs: u64,
    /// Bound on one batch request
    #[serde(default = "default_remote_timeout")]
    pub request_timeout_secs: u64,
}

fn default_remote_timeout() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            open_timeout_secs: default_remote_timeout(),
            request_timeout_secs: default_remote_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.backend, BackendPreference::Auto);
        assert!(config.remote_endpoint().is_none());
        assert_eq!(config.execution.batch_timeout(), Duration::from_secs(5));
        assert_eq!(config.remote.open_timeout_secs, 60);
        assert_eq!(config.execution.max_output_bytes, 1024 * 1024);
        assert!(config.execution.allowed_libraries.iter().any(|l| l == "math"));
    }

    #[test]
    fn test_blank_remote_url_is_local_mode() {
        let config = SandboxConfig {
            remote_url: Some("   ".to_string()),
            ..SandboxConfig::default()
        };
        assert!(config.remote_endpoint().is_none());

        let config = SandboxConfig {
            remote_url: Some(" https://exec.example.com ".to_string()),
            ..SandboxConfig::default()
        };
        assert_eq!(config.remote_endpoint(), Some("https://exec.example.com"));
    }

    #[test]
    fn test_command_args_append_script() {
        let execution = ExecutionConfig::default();
        assert_eq!(execution.command_args("/tmp/a.py"), vec!["-u", "/tmp/a.py"]);

        let sh = ExecutionConfig::default().with_interpreter("sh");
        assert_eq!(sh.command_args("/tmp/a"), vec!["/tmp/a"]);
        assert!(sh.source_suffix.is_empty());
    }

    #[test]
    fn test_child_env_only_whitelisted() {
        let execution = ExecutionConfig::default();
        for (key, _) in execution.child_env() {
            assert!(ENV_WHITELIST.contains(&key.as_str()), "{key}");
        }
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"backend":"pty","execution":{"batch_timeout_secs":9}}"#)
                .unwrap();
        assert_eq!(config.backend, BackendPreference::Pty);
        assert_eq!(config.execution.batch_timeout_secs, 9);
        assert_eq!(config.execution.interpreter, "python3");
        assert_eq!(config.handshake_timeout_secs, 30);
    }
}
