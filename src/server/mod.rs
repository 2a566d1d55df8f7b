//! Server module for Coderun
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `shutdown`: Ctrl+C / SIGTERM handling
//! - `init`: Router assembly and the run loop

pub mod config;
mod init;
mod loader;
mod shutdown;

// Re-export public API
pub use init::{build_router, run};
pub use loader::load_config;

#[cfg(test)]
pub(crate) use init::tests;
