//! Helpers for tests that drive a real Docker daemon

use super::{ContainerConfig, ContainerRuntime};
use crate::config::ExecutionConfig;
use std::collections::HashSet;
use tokio::sync::{Mutex, MutexGuard};

/// Image used by docker-backed tests; it is never pulled
pub(crate) const TEST_IMAGE: &str = "busybox";

static DOCKER: Mutex<()> = Mutex::const_new(());

/// Exclusive access to the daemon when it is usable, `None` to skip the test
///
/// Holding the guard keeps container snapshots from interleaving.
pub(crate) async fn docker_guard() -> Option<MutexGuard<'static, ()>> {
    if !ContainerRuntime::check_docker().await {
        eprintln!("docker not available, skipping");
        return None;
    }
    let image = tokio::process::Command::new("docker")
        .args(["image", "inspect", TEST_IMAGE])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !image {
        eprintln!("{} image not present, skipping", TEST_IMAGE);
        return None;
    }
    Some(DOCKER.lock().await)
}

/// `sh` inside the test image
pub(crate) fn sh_in_container() -> (ExecutionConfig, ContainerConfig) {
    let execution = ExecutionConfig {
        kill_grace_ms: 300,
        ..ExecutionConfig::default().with_interpreter("sh")
    };
    let config = ContainerConfig {
        image: TEST_IMAGE.to_string(),
        ..ContainerConfig::default()
    };
    (execution, config)
}

/// Every container, running or stopped, named like ours
pub(crate) async fn coderun_containers() -> HashSet<String> {
    let output = tokio::process::Command::new("docker")
        .args(["ps", "-a", "--filter", "name=coderun-", "--format", "{{.Names}}"])
        .output()
        .await
        .expect("docker ps");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}
