//! One accepted session and its teardown

use crate::backend::{BackendKind, SessionBackend, WorkerInfo};
use crate::bridge::{self, BridgeEnd};
use crate::reaper::{ReapReport, ReapStep, StepOutcome};
use crate::transport::{MessageSink, MessageSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A worker bound to one caller connection
///
/// The session owns the backend; the bridge only borrows its channels. Call
/// [`Session::reap`] on every exit path. Dropping an unreaped session falls
/// back to a synchronous kill.
pub struct Session {
    id: Uuid,
    backend: Box<dyn SessionBackend>,
    cancel: CancellationToken,
    reaped: bool,
}

impl Session {
    /// Wrap a freshly launched backend
    #[must_use]
    pub fn new(backend: Box<dyn SessionBackend>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            cancel: CancellationToken::new(),
            reaped: false,
        }
    }

    /// Session id, used in logs
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend variant
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Resources currently held
    #[must_use]
    pub fn worker(&self) -> WorkerInfo {
        self.backend.worker()
    }

    /// Forward between the caller and the worker until either side ends
    pub async fn bridge(
        &mut self,
        near_rx: &mut dyn MessageSource,
        near_tx: &mut dyn MessageSink,
    ) -> BridgeEnd {
        let cancel = self.cancel.clone();
        let (mut far_rx, mut far_tx) = self.backend.channels();
        bridge::run(near_rx, near_tx, far_rx.as_mut(), far_tx.as_mut(), &cancel).await
    }

    /// Release everything the session holds
    ///
    /// Safe to call repeatedly; later calls report every step as already gone.
    pub async fn reap(&mut self) -> ReapReport {
        let mut report = ReapReport::new();

        let cancel = if self.cancel.is_cancelled() {
            StepOutcome::AlreadyGone
        } else {
            self.cancel.cancel();
            StepOutcome::Done
        };
        report.record(ReapStep::CancelForwarding, cancel);

        self.backend.release(&mut report).await;

        if !self.reaped {
            if report.is_clean() {
                info!(session_id = %self.id, backend = %self.kind(), "Session reaped");
            } else {
                warn!(session_id = %self.id, backend = %self.kind(), report = ?report, "Session reaped with failures");
            }
        }
        self.reaped = true;
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.reaped {
            debug!(session_id = %self.id, "Session dropped before teardown");
            self.cancel.cancel();
            self.backend.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendLauncher, PtyLauncher};
    use crate::config::ExecutionConfig;
    use crate::protocol::StartDirective;
    use crate::reaper::process_group_exists;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reap_twice_releases_once() {
        let execution = ExecutionConfig {
            kill_grace_ms: 300,
            ..ExecutionConfig::default().with_interpreter("sh")
        };
        let backend = PtyLauncher::new(execution)
            .launch(&StartDirective::interactive("sleep 30"))
            .await
            .unwrap();
        let mut session = Session::new(backend);
        let worker = session.worker();
        let pid = worker.pid.unwrap();
        let source = worker.source_path.unwrap();

        let first = session.reap().await;
        assert!(first.is_clean(), "{first:?}");
        assert_eq!(first.outcome(ReapStep::CancelForwarding), Some(&StepOutcome::Done));
        assert_eq!(
            first.outcome(ReapStep::TerminateProcessGroup),
            Some(&StepOutcome::Done)
        );
        assert_eq!(first.outcome(ReapStep::RemoveSourceFile), Some(&StepOutcome::Done));
        assert!(!source.exists());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_group_exists(pid));

        let second = session.reap().await;
        assert_eq!(second.steps(), first.steps());
        assert!(second.nothing_released(), "{second:?}");
        assert!(session.worker().pid.is_none());
    }
}
