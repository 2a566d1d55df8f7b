//! Container isolation through the Docker CLI
//!
//! Key features:
//! - Network isolation (default: none)
//! - Read-only source mount
//! - Resource limits (CPU, memory, pids)
//! - Runtime detection at startup

mod config;
mod docker;
mod limits;
mod mount;
mod network;
mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ContainerConfig;
pub use docker::{container_name, remove_container, remove_container_detached, run_args};
pub use limits::ResourceLimits;
pub use mount::Mount;
pub use network::NetworkMode;
pub use runtime::ContainerRuntime;
