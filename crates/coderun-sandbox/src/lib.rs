//! Coderun Sandbox - execution-session core
//!
//! This crate runs untrusted programs for a remote caller:
//! - Batch runs with captured output and a wall-clock deadline
//! - Interactive sessions over a PTY, a container, or a remote service
//! - A bidirectional bridge between the caller's transport and the worker
//! - Ordered, idempotent teardown on every exit path
//!
//! The caller-facing transport is abstracted by [`transport::MessageSource`]
//! and [`transport::MessageSink`]; the HTTP/websocket layer lives in the
//! `coderun` binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod batch;
pub mod bridge;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod pty;
pub mod reaper;
pub mod session;
pub mod transport;

mod source;

pub use backend::{BackendKind, BackendLauncher, SessionBackend};
pub use batch::{BatchExecutor, BatchRunner};
pub use bridge::BridgeEnd;
pub use config::{BackendPreference, ExecutionConfig, RemoteConfig, SandboxConfig};
pub use controller::{SessionController, SessionOutcome};
pub use error::{Error, Result};
pub use protocol::{BatchRequest, ClientMessage, ExecutionResult, ProtocolError, StartDirective};
pub use reaper::{ReapReport, ReapStep, StepOutcome};
pub use session::Session;
