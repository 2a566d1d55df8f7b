//! Docker CLI invocations for container-backed runs

use super::config::ContainerConfig;
use super::mount::Mount;
use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bound on one `docker rm -f`; a stalled daemon must not stall teardown
pub const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Fresh, unique container name
#[must_use]
pub fn container_name() -> String {
    format!("coderun-{}", Uuid::new_v4())
}

/// Arguments for `docker run` executing `source` inside a throwaway container
///
/// `tty` allocates a terminal inside the container; it must only be set when
/// the docker CLI itself runs under a PTY.
#[must_use]
pub fn run_args(
    name: &str,
    config: &ContainerConfig,
    execution: &ExecutionConfig,
    source: &Path,
    tty: bool,
) -> Vec<String> {
    let mut docker_args = vec![
        "run".to_string(),
        "--rm".to_string(),
        if tty { "-it" } else { "-i" }.to_string(),
        format!("--name={}", name),
        format!("--network={}", config.network.as_docker_arg()),
    ];

    docker_args.extend(config.limits.to_docker_args());

    for opt in &config.security_opts {
        docker_args.push(format!("--security-opt={}", opt));
    }

    let script = config.script_path(&execution.source_suffix);
    docker_args.push(Mount::read_only(source.display().to_string(), script.clone()).to_docker_arg());
    docker_args.push(format!("--workdir={}", config.workdir));

    if tty {
        docker_args.push("-e".to_string());
        docker_args.push(format!("TERM={}", execution.term));
    }

    docker_args.push(config.image.clone());
    docker_args.push(execution.interpreter.clone());
    docker_args.extend(execution.command_args(&script));

    debug!(args = ?docker_args, "Built docker run arguments");
    docker_args
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("is already in progress")
}

/// Stop and force-remove a container
///
/// Returns `Ok(false)` when the container was already gone. Gives up after
/// [`REMOVE_TIMEOUT`].
pub async fn remove_container(name: &str) -> Result<bool> {
    force_remove("docker", name, REMOVE_TIMEOUT).await
}

/// `<cli> rm -f <name>` bounded by `limit`
pub(crate) async fn force_remove(cli: &str, name: &str, limit: Duration) -> Result<bool> {
    let output = tokio::time::timeout(
        limit,
        tokio::process::Command::new(cli)
            .args(["rm", "-f", name])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        Error::Resource(format!(
            "docker rm -f {} timed out after {}ms",
            name,
            limit.as_millis()
        ))
    })?
    .map_err(|e| Error::Resource(format!("docker rm failed to start: {}", e)))?;

    if output.status.success() {
        return Ok(true);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_missing(&stderr) {
        Ok(false)
    } else {
        Err(Error::Resource(format!("docker rm -f {}: {}", name, stderr.trim())))
    }
}

/// Fire-and-forget removal for contexts that cannot await
pub fn remove_container_detached(name: &str) {
    if let Err(e) = std::process::Command::new("docker")
        .args(["rm", "-f", name])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        warn!(container = %name, error = %e, "Could not launch docker rm");
    }
}
