use super::*;
use crate::batch::BatchRunner;
use crate::config::{BackendPreference, ExecutionConfig, RemoteConfig};
use crate::container::testing::{coderun_containers, docker_guard, sh_in_container};
use crate::protocol::BatchRequest;
use crate::reaper::{process_group_exists, ReapStep, StepOutcome};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

fn sh_execution() -> ExecutionConfig {
    ExecutionConfig {
        kill_grace_ms: 300,
        ..ExecutionConfig::default().with_interpreter("sh")
    }
}

async fn read_until(backend: &mut dyn SessionBackend, needle: &str) -> String {
    let (mut source, _sink) = backend.channels();
    let mut seen = String::new();
    let collect = async {
        while let Some(Ok(chunk)) = source.recv().await {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains(needle) {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), collect).await;
    seen
}

#[test]
fn test_terminal_url_schemes() {
    assert_eq!(terminal_url("http://exec:8000"), "ws://exec:8000/terminal");
    assert_eq!(
        terminal_url("https://exec.example.com/"),
        "wss://exec.example.com/terminal"
    );
    assert_eq!(
        terminal_url("exec.example.com"),
        "wss://exec.example.com/terminal"
    );
    assert_eq!(terminal_url("ws://exec:8000"), "ws://exec:8000/terminal");
}

#[test]
fn test_batch_url() {
    assert_eq!(batch_url("http://exec:8000/"), "http://exec:8000/run");
    assert_eq!(batch_url("exec.example.com"), "https://exec.example.com/run");
    assert_eq!(batch_url("ws://exec:8000"), "http://exec:8000/run");
    assert_eq!(batch_url("wss://exec.example.com/"), "https://exec.example.com/run");
}

#[test]
fn test_backend_kind_display() {
    assert_eq!(BackendKind::Pty.to_string(), "pty");
    assert_eq!(BackendKind::Container.to_string(), "container");
    assert_eq!(BackendKind::Remote.to_string(), "remote");
}

#[tokio::test]
async fn test_explicit_preferences_skip_detection() {
    assert_eq!(LocalLauncher::resolve(BackendPreference::Pty).await, BackendKind::Pty);
    assert_eq!(
        LocalLauncher::resolve(BackendPreference::Container).await,
        BackendKind::Container
    );
}

#[tokio::test]
async fn test_pty_launch_seed_and_release() {
    let launcher = PtyLauncher::new(sh_execution());
    let directive = StartDirective::interactive("read x; echo \"got $x\"; sleep 30").with_stdin("hello");

    let mut backend = launcher.launch(&directive).await.unwrap();
    assert_eq!(backend.kind(), BackendKind::Pty);
    let worker = backend.worker();
    let pid = worker.pid.unwrap();
    let source = worker.source_path.unwrap();
    assert!(source.exists());

    let output = read_until(backend.as_mut(), "got hello").await;
    assert!(output.contains("got hello"), "{output:?}");

    let mut report = ReapReport::new();
    backend.release(&mut report).await;
    assert_eq!(
        report.steps(),
        vec![
            ReapStep::CloseTerminal,
            ReapStep::TerminateProcessGroup,
            ReapStep::RemoveSourceFile
        ]
    );
    assert!(report.is_clean());
    assert!(!source.exists());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process_group_exists(pid));

    let mut again = ReapReport::new();
    backend.release(&mut again).await;
    assert!(again.nothing_released());
}

#[tokio::test]
async fn test_pty_child_exit_ends_stream() {
    let launcher = PtyLauncher::new(sh_execution());
    let mut backend = launcher
        .launch(&StartDirective::interactive("echo done"))
        .await
        .unwrap();

    let mut output = String::new();
    {
        let (mut source, _sink) = backend.channels();
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(chunk)) = source.recv().await {
                output.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await;
        assert!(drained.is_ok(), "stream did not end after child exit");
    }
    assert!(output.contains("done"));

    let pid = backend.worker().pid.unwrap();
    let mut report = ReapReport::new();
    backend.release(&mut report).await;
    assert!(report.is_clean());
    assert_ne!(
        report.outcome(ReapStep::RemoveSourceFile),
        Some(&StepOutcome::AlreadyGone)
    );
    assert!(!process_group_exists(pid));
}

#[tokio::test]
async fn test_pty_spawn_failure() {
    let launcher = PtyLauncher::new(ExecutionConfig::default().with_interpreter("/nonexistent/interp"));
    let err = launcher
        .launch(&StartDirective::interactive("x"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, crate::error::Error::Spawn(_)));
}

#[tokio::test]
async fn test_remote_unreachable() {
    let config = RemoteConfig {
        open_timeout_secs: 5,
        request_timeout_secs: 5,
    };
    let client = RemoteClient::new("http://127.0.0.1:1", config).unwrap();

    let err = client
        .launch(&StartDirective::interactive("x"))
        .await
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "remote backend error: connection to execution service failed"
    );

    assert!(client.run(&BatchRequest::new("x")).await.is_err());
}

#[tokio::test]
async fn test_remote_session_forwards_start_and_output() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let start = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("unexpected {other:?}"),
        };
        ws.send(Message::Text("ready".to_string())).await.unwrap();
        let input = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("unexpected {other:?}"),
        };
        ws.send(Message::Text(format!("echo:{input}"))).await.unwrap();
        ws.close(None).await.unwrap();
        start
    });

    let client = RemoteClient::new(format!("http://{addr}"), RemoteConfig::default()).unwrap();
    let mut backend = client
        .launch(&StartDirective::interactive("print(1)").with_stdin("7"))
        .await
        .unwrap();
    assert_eq!(backend.kind(), BackendKind::Remote);

    {
        let (mut source, mut sink) = backend.channels();
        assert_eq!(source.recv().await.unwrap().unwrap(), b"ready".to_vec());
        sink.send(b"42\n").await.unwrap();
        assert_eq!(source.recv().await.unwrap().unwrap(), b"echo:42\n".to_vec());
        assert!(source.recv().await.is_none());
    }

    let mut report = ReapReport::new();
    backend.release(&mut report).await;
    assert!(report.outcome(ReapStep::CloseRemote).is_some());
    assert!(report.is_clean());

    let start: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(start["type"], "start");
    assert_eq!(start["code"], "print(1)");
    assert_eq!(start["stdin"], "7");
    assert_eq!(start["interactive"], true);
}

#[tokio::test]
async fn test_container_session_reap_removes_container() {
    let Some(_docker) = docker_guard().await else {
        return;
    };
    let (execution, config) = sh_in_container();
    let launcher = ContainerLauncher::new(execution, config);

    let mut backend = launcher
        .launch(&StartDirective::interactive("echo up; sleep 30"))
        .await
        .unwrap();
    assert_eq!(backend.kind(), BackendKind::Container);
    let worker = backend.worker();
    let name = worker.container.unwrap();
    let source = worker.source_path.unwrap();

    let output = read_until(backend.as_mut(), "up").await;
    assert!(output.contains("up"), "{output:?}");
    assert!(coderun_containers().await.contains(&name));

    let mut report = ReapReport::new();
    backend.release(&mut report).await;
    assert_eq!(
        report.steps(),
        vec![
            ReapStep::CloseTerminal,
            ReapStep::TerminateProcessGroup,
            ReapStep::RemoveSourceFile,
            ReapStep::RemoveContainer
        ]
    );
    assert!(report.is_clean(), "{report:?}");
    assert!(!source.exists());
    assert!(!coderun_containers().await.contains(&name));

    let mut again = ReapReport::new();
    backend.release(&mut again).await;
    assert!(again.nothing_released());
}

#[tokio::test]
async fn test_container_session_abandon_removes_container() {
    let Some(_docker) = docker_guard().await else {
        return;
    };
    let (execution, config) = sh_in_container();
    let launcher = ContainerLauncher::new(execution, config);

    let mut backend = launcher
        .launch(&StartDirective::interactive("echo up; sleep 30"))
        .await
        .unwrap();
    let name = backend.worker().container.unwrap();
    let output = read_until(backend.as_mut(), "up").await;
    assert!(output.contains("up"), "{output:?}");

    // Drop goes through the detached removal
    drop(backend);

    let gone = tokio::time::timeout(Duration::from_secs(15), async {
        while coderun_containers().await.contains(&name) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "container {name} still present");
}
