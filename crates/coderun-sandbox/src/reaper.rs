//! Resource Reaper
//!
//! Teardown is an ordered list of independent steps. Each step is attempted
//! regardless of how the previous one went and its outcome is recorded in a
//! [`ReapReport`]. "Already gone" is an expected outcome, not a failure.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Child;
use tracing::{debug, warn};

/// One teardown step, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReapStep {
    /// Stop the forwarding loops
    CancelForwarding,
    /// Close the PTY master
    CloseTerminal,
    /// Close the connection to a remote backend
    CloseRemote,
    /// Terminate the child's process group
    TerminateProcessGroup,
    /// Delete the temporary source file
    RemoveSourceFile,
    /// Force-remove the container
    RemoveContainer,
}

impl fmt::Display for ReapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CancelForwarding => "cancel_forwarding",
            Self::CloseTerminal => "close_terminal",
            Self::CloseRemote => "close_remote",
            Self::TerminateProcessGroup => "terminate_process_group",
            Self::RemoveSourceFile => "remove_source_file",
            Self::RemoveContainer => "remove_container",
        };
        f.write_str(name)
    }
}

/// What happened when a step was attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The resource was released by this step
    Done,
    /// Nothing left to release
    AlreadyGone,
    /// The step failed; the message is for logs only
    Failed(String),
}

/// Ordered record of a teardown
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    entries: Vec<(ReapStep, StepOutcome)>,
}

impl ReapReport {
    /// Empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a step
    pub fn record(&mut self, step: ReapStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Failed(reason) => warn!(step = %step, reason = %reason, "Teardown step failed"),
            other => debug!(step = %step, outcome = ?other, "Teardown step"),
        }
        self.entries.push((step, outcome));
    }

    /// Outcome of `step`, if it ran
    #[must_use]
    pub fn outcome(&self, step: ReapStep) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// Steps in the order they ran
    #[must_use]
    pub fn steps(&self) -> Vec<ReapStep> {
        self.entries.iter().map(|(step, _)| *step).collect()
    }

    /// True when no step failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|(_, outcome)| matches!(outcome, StepOutcome::Failed(_)))
    }

    /// True when every step found nothing to release
    #[must_use]
    pub fn nothing_released(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, outcome)| *outcome == StepOutcome::AlreadyGone)
    }
}

fn group_of(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// Send `signal` to the process group led by `pid`
///
/// Returns `Ok(false)` when the group no longer exists.
pub fn signal_process_group(pid: u32, signal: Signal) -> Result<bool, Errno> {
    let Some(pgid) = group_of(pid) else {
        return Err(Errno::EINVAL);
    };
    match killpg(pgid, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether any live process of the group led by `pid` is still around
///
/// A bare signal check also matches zombies nobody has reaped yet, so on
/// Linux a positive result is confirmed against `/proc`.
#[must_use]
pub fn process_group_exists(pid: u32) -> bool {
    let Some(pgid) = group_of(pid) else {
        return false;
    };
    if matches!(killpg(pgid, None::<Signal>), Err(Errno::ESRCH)) {
        return false;
    }
    #[cfg(target_os = "linux")]
    {
        live_group_member(pid)
    }
    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

#[cfg(target_os = "linux")]
fn live_group_member(pgid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return true;
    };
    entries.flatten().any(|entry| {
        std::fs::read_to_string(entry.path().join("stat"))
            .ok()
            .and_then(|stat| stat_group(&stat))
            .is_some_and(|(state, pgrp)| pgrp == pgid && state != 'Z')
    })
}

/// State and process group from a `/proc/<pid>/stat` line
///
/// The command name may itself contain spaces and parentheses, so fields are
/// counted from the last `)`.
#[cfg(target_os = "linux")]
fn stat_group(stat: &str) -> Option<(char, u32)> {
    let (_, rest) = stat.rsplit_once(')')?;
    // state(0) ppid(1) pgrp(2)
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let pgrp = fields.nth(1)?.parse().ok()?;
    Some((state, pgrp))
}

/// Terminate a child's process group
///
/// A live leader gets SIGTERM, `grace` to exit, then SIGKILL. When the leader
/// has already exited, remaining group members are swept with SIGKILL.
pub async fn terminate_process_group(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> StepOutcome {
    let Some(pid) = pid else {
        return StepOutcome::AlreadyGone;
    };

    let leader_alive = matches!(child.try_wait(), Ok(None));
    if !leader_alive {
        if !process_group_exists(pid) {
            return StepOutcome::AlreadyGone;
        }
        return match signal_process_group(pid, Signal::SIGKILL) {
            Ok(true) => StepOutcome::Done,
            Ok(false) => StepOutcome::AlreadyGone,
            Err(e) => StepOutcome::Failed(format!("sweep of group {} failed: {}", pid, e)),
        };
    }

    if let Err(e) = signal_process_group(pid, Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM to group failed, signalling leader");
        let _ = child.start_kill();
    }

    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        // Descendants may ignore SIGTERM even when the leader honours it.
        let _ = signal_process_group(pid, Signal::SIGKILL);
        return StepOutcome::Done;
    }

    debug!(pid, "Process group ignored SIGTERM, escalating");
    if let Err(e) = signal_process_group(pid, Signal::SIGKILL) {
        let _ = child.start_kill();
        warn!(pid, error = %e, "SIGKILL to group failed");
    }
    match child.wait().await {
        Ok(_) => StepOutcome::Done,
        Err(e) => StepOutcome::Failed(format!("wait for {} failed: {}", pid, e)),
    }
}

/// Delete the temporary source file if it is still held
pub fn remove_source_file(source: &mut Option<TempPath>) -> StepOutcome {
    let Some(path) = source.take() else {
        return StepOutcome::AlreadyGone;
    };
    let display = path.display().to_string();
    match path.close() {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::AlreadyGone,
        Err(e) => StepOutcome::Failed(format!("could not delete {}: {}", display, e)),
    }
}

/// Synchronous last-resort kill used from `Drop`
pub fn kill_process_group_now(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = signal_process_group(pid, Signal::SIGKILL) {
            warn!(pid, error = %e, "Last-resort SIGKILL failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_report_records_in_order() {
        let mut report = ReapReport::new();
        report.record(ReapStep::CancelForwarding, StepOutcome::Done);
        report.record(ReapStep::CloseTerminal, StepOutcome::AlreadyGone);

        assert_eq!(
            report.steps(),
            vec![ReapStep::CancelForwarding, ReapStep::CloseTerminal]
        );
        assert_eq!(
            report.outcome(ReapStep::CloseTerminal),
            Some(&StepOutcome::AlreadyGone)
        );
        assert!(report.outcome(ReapStep::RemoveContainer).is_none());
        assert!(report.is_clean());
        assert!(!report.nothing_released());
    }

    #[test]
    fn test_report_failure_is_not_clean() {
        let mut report = ReapReport::new();
        report.record(ReapStep::RemoveSourceFile, StepOutcome::Failed("x".into()));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_remove_source_file_twice() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"print(1)").unwrap();
        let path = file.path().to_path_buf();
        let mut source = Some(file.into_temp_path());

        assert_eq!(remove_source_file(&mut source), StepOutcome::Done);
        assert!(!path.exists());
        assert_eq!(remove_source_file(&mut source), StepOutcome::AlreadyGone);
    }

    #[test]
    fn test_remove_source_file_deleted_elsewhere() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let mut source = Some(file.into_temp_path());
        std::fs::remove_file(&path).unwrap();

        assert_eq!(remove_source_file(&mut source), StepOutcome::AlreadyGone);
    }

    #[test]
    fn test_missing_group_is_not_an_error() {
        // pid_max on Linux stays far below this value
        assert!(!process_group_exists(4_000_000));
        assert!(!tokio_test::assert_ok!(signal_process_group(
            4_000_000,
            Signal::SIGTERM
        )));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stat_group_parses_awkward_command_names() {
        let stat = "4242 (my (odd) prog) S 1 4200 4200 0 -1 4194560 105 0 0 0";
        assert_eq!(stat_group(stat), Some(('S', 4200)));

        let zombie = "17 (sh) Z 4242 17 17 0 -1";
        assert_eq!(stat_group(zombie), Some(('Z', 17)));

        assert_eq!(stat_group("garbage"), None);
        assert_eq!(stat_group("1 (init) R"), None);
    }

    #[tokio::test]
    async fn test_terminate_process_group_kills_descendants() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30"])
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id();

        let outcome =
            terminate_process_group(&mut child, pid, Duration::from_millis(500)).await;
        assert_eq!(outcome, StepOutcome::Done);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_group_exists(pid.unwrap()));

        // Second attempt finds the leader reaped and the group empty
        let again = terminate_process_group(&mut child, pid, Duration::from_millis(10)).await;
        assert_eq!(again, StepOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_terminate_escalates_when_sigterm_ignored() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome =
            terminate_process_group(&mut child, pid, Duration::from_millis(200)).await;
        assert_eq!(outcome, StepOutcome::Done);
        assert!(child.try_wait().unwrap().is_some());
    }
}
