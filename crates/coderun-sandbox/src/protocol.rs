//! Wire messages exchanged with the caller and with the remote backend
//!
//! Inbound text is classified into [`ClientMessage`]. Anything that is not a
//! recognised envelope falls into [`ClientMessage::Legacy`] and is forwarded
//! verbatim to the running program.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Prefix for error lines sent before closing the transport
pub const ERROR_PREFIX: &str = "ERROR:";

/// Build a caller-facing error line
#[must_use]
pub fn error_line(message: &str) -> String {
    format!("{} {}", ERROR_PREFIX, message)
}

/// Tagged envelopes understood on the wire
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    Start {
        code: String,
        #[serde(default)]
        interactive: Option<bool>,
        #[serde(default)]
        stdin: Option<String>,
    },
    Input {
        #[serde(default)]
        data: Option<String>,
    },
}

/// Parsed start directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartDirective {
    /// Program source
    pub code: String,
    /// Input written to the program before forwarding starts
    pub stdin_seed: String,
    /// Interactive session (true) or batch run (false)
    pub interactive: bool,
}

impl StartDirective {
    /// Create an interactive directive with no stdin seed
    #[must_use]
    pub fn interactive(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin_seed: String::new(),
            interactive: true,
        }
    }

    /// Create a batch directive with no stdin
    #[must_use]
    pub fn batch(code: impl Into<String>) -> Self {
        Self {
            interactive: false,
            ..Self::interactive(code)
        }
    }

    /// Set the stdin seed
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin_seed = stdin.into();
        self
    }

    /// Parse the first message of a connection
    pub fn from_handshake(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidStart)?;
        match serde_json::from_value::<Envelope>(value) {
            Ok(Envelope::Start {
                code,
                interactive,
                stdin,
            }) => Ok(Self {
                code,
                stdin_seed: stdin.unwrap_or_default(),
                interactive: interactive.unwrap_or(true),
            }),
            _ => Err(ProtocolError::ExpectedStart),
        }
    }

    /// Start message in the remote backend's wire format
    #[must_use]
    pub fn to_wire(&self) -> String {
        json!({
            "type": "start",
            "code": self.code,
            "stdin": self.stdin_seed,
            "interactive": true,
        })
        .to_string()
    }

    /// Equivalent batch request
    #[must_use]
    pub fn to_batch_request(&self) -> BatchRequest {
        BatchRequest {
            code: self.code.clone(),
            stdin: self.stdin_seed.clone(),
        }
    }
}

/// Handshake failures reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First message was not JSON
    #[error("invalid start message")]
    InvalidStart,
    /// JSON, but not a start envelope with code
    #[error("expected start message with code")]
    ExpectedStart,
    /// A start envelope arrived after the session began
    #[error("session already started")]
    AlreadyStarted,
    /// No start message arrived in time
    #[error("timed out waiting for start message")]
    HandshakeTimeout,
}

impl ProtocolError {
    /// Error line sent to the caller
    #[must_use]
    pub fn to_line(self) -> String {
        error_line(&self.to_string())
    }
}

/// Inbound message during a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Another start directive
    Start(StartDirective),
    /// Typed input, payload forwarded to the program
    Input(String),
    /// Untyped text, forwarded as-is
    Legacy(String),
}

impl ClientMessage {
    /// Classify inbound text
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Envelope>(text) {
            Ok(Envelope::Input { data }) => Self::Input(data.unwrap_or_default()),
            Ok(Envelope::Start {
                code,
                interactive,
                stdin,
            }) => Self::Start(StartDirective {
                code,
                stdin_seed: stdin.unwrap_or_default(),
                interactive: interactive.unwrap_or(true),
            }),
            Err(_) => Self::Legacy(text.to_string()),
        }
    }

    /// Bytes to write to the program, if any
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Input(data) | Self::Legacy(data) if !data.is_empty() => Some(data.as_bytes()),
            _ => None,
        }
    }
}

/// Batch request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Program source
    pub code: String,
    /// Program stdin
    #[serde(default)]
    pub stdin: String,
}

impl BatchRequest {
    /// Create a request with empty stdin
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin: String::new(),
        }
    }

    /// Set stdin
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Stdin with literal `\n` escapes expanded
    #[must_use]
    pub fn normalized_stdin(&self) -> String {
        self.stdin.replace("\\n", "\n")
    }
}

/// Outcome of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Program finished without an uncaught failure
    pub success: bool,
    /// Failure description, empty on success
    #[serde(default)]
    pub error: String,
}

impl ExecutionResult {
    /// Program completed normally
    #[must_use]
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: true,
            error: String::new(),
        }
    }

    /// Program raised or exited non-zero
    #[must_use]
    pub fn failed(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: false,
            error: error.into(),
        }
    }

    /// Deadline expired
    #[must_use]
    pub fn timeout() -> Self {
        Self::failed("", "Time Limit Exceeded", "Timeout")
    }

    /// Worker died without leaving a result
    #[must_use]
    pub fn crash() -> Self {
        Self::failed("", "Crash", "Crash")
    }

    /// Output events forwarded to a caller, stdout first
    #[must_use]
    pub fn output_events(&self) -> Vec<String> {
        [&self.stdout, &self.stderr]
            .into_iter()
            .filter(|text| !text.is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_directive_defaults() {
        let directive = StartDirective::from_handshake(r#"{"type":"start","code":"print(1)"}"#)
            .unwrap();
        assert_eq!(directive.code, "print(1)");
        assert!(directive.interactive);
        assert!(directive.stdin_seed.is_empty());
    }

    #[test]
    fn test_start_directive_batch_with_stdin() {
        let directive = StartDirective::from_handshake(
            r#"{"type":"start","code":"x","interactive":false,"stdin":"5"}"#,
        )
        .unwrap();
        assert!(!directive.interactive);
        assert_eq!(directive.stdin_seed, "5");
    }

    #[test]
    fn test_handshake_rejects_non_json() {
        assert_eq!(
            StartDirective::from_handshake("print('hi')"),
            Err(ProtocolError::InvalidStart)
        );
    }

    #[test]
    fn test_handshake_rejects_wrong_shape() {
        for text in [
            r#"{"type":"start"}"#,
            r#"{"type":"input","data":"x"}"#,
            r#"{"code":"print(1)"}"#,
            r#"{"type":"start","code":5}"#,
            "[1,2,3]",
        ] {
            assert_eq!(
                StartDirective::from_handshake(text),
                Err(ProtocolError::ExpectedStart),
                "{text}"
            );
        }
    }

    #[test]
    fn test_protocol_error_line() {
        assert_eq!(
            ProtocolError::ExpectedStart.to_line(),
            "ERROR: expected start message with code"
        );
    }

    #[test]
    fn test_client_message_classification() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"input","data":"42\n"}"#),
            ClientMessage::Input("42\n".to_string())
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"input"}"#),
            ClientMessage::Input(String::new())
        );
        assert_eq!(
            ClientMessage::parse("ls -la\n"),
            ClientMessage::Legacy("ls -la\n".to_string())
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"resize","rows":10}"#),
            ClientMessage::Legacy(r#"{"type":"resize","rows":10}"#.to_string())
        );
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"start","code":"x"}"#),
            ClientMessage::Start(_)
        ));
    }

    #[test]
    fn test_empty_input_has_no_payload() {
        assert!(ClientMessage::Input(String::new()).payload().is_none());
        assert_eq!(
            ClientMessage::Input("a".to_string()).payload(),
            Some(&b"a"[..])
        );
    }

    #[test]
    fn test_wire_start_carries_code_and_stdin() {
        let wire = StartDirective::batch("print(1)").with_stdin("3").to_wire();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["code"], "print(1)");
        assert_eq!(value["stdin"], "3");
        assert_eq!(value["interactive"], true);
    }

    #[test]
    fn test_batch_request_normalizes_escaped_newlines() {
        let request = BatchRequest::new("x").with_stdin("1\\n2");
        assert_eq!(request.normalized_stdin(), "1\n2");
    }

    #[test]
    fn test_execution_result_serialization() {
        let result = ExecutionResult::completed("hi\n", "");
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"stdout":"hi\n","stderr":"","success":true,"error":""}"#
        );
    }

    #[test]
    fn test_execution_result_error_defaults_when_missing() {
        let result: ExecutionResult =
            serde_json::from_str(r#"{"stdout":"","stderr":"","success":true}"#).unwrap();
        assert!(result.error.is_empty());
    }

    #[test]
    fn test_timeout_and_crash_results() {
        assert!(!ExecutionResult::timeout().success);
        assert_eq!(ExecutionResult::timeout().error, "Timeout");
        assert_eq!(ExecutionResult::timeout().stderr, "Time Limit Exceeded");
        let crash = ExecutionResult::crash();
        assert!(!crash.success);
        assert_eq!(crash.error, "Crash");
    }

    #[test]
    fn test_output_events_skip_empty_streams() {
        assert_eq!(
            ExecutionResult::completed("out", "").output_events(),
            vec!["out".to_string()]
        );
        assert_eq!(
            ExecutionResult::failed("", "trace", "trace").output_events(),
            vec!["trace".to_string()]
        );
    }
}
