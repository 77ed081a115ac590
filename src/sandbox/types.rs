//! Shared data model: validated requests, public results, and the two
//! JSON documents exchanged with the entrypoint over stdio.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Error classification ─────────────────────────────────

/// Failure classification carried in every unsuccessful result.
///
/// Callers distinguish failure kinds through this field (and the
/// human-readable `error` message), never through Rust error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Schema or range violation in the request.
    InvalidInput,
    /// Package identifier failed format, denylist, or allow-list checks.
    PackageRejected,
    /// The isolation runtime could not start the instance.
    SpawnFailure,
    ExecutionTimeout,
    /// Captured output crossed the hard capture cap.
    OutputLimitExceeded,
    /// The instance exited but did not emit a result document.
    ResultParseFailure,
    InstallFailure,
    /// The caller cancelled the execution before it finished.
    Cancelled,
    UnknownFailure,
}

impl ErrorKind {
    /// Stable message placed in `ExecutionResult.error`.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Invalid input",
            ErrorKind::PackageRejected => "Package validation failed",
            ErrorKind::SpawnFailure => "Container failed to start",
            ErrorKind::ExecutionTimeout => "Execution timeout",
            ErrorKind::OutputLimitExceeded => "Output size limit exceeded",
            ErrorKind::ResultParseFailure => "Container output parsing failed",
            ErrorKind::InstallFailure => "Package installation failed",
            ErrorKind::Cancelled => "Execution cancelled",
            ErrorKind::UnknownFailure => "Unknown error",
        }
    }
}

// ── Output caps ──────────────────────────────────────────

/// A pair of stdout/stderr ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCaps {
    pub stdout: usize,
    pub stderr: usize,
}

impl OutputCaps {
    /// Hard byte ceilings enforced while the child runs; crossing one
    /// kills the child.
    pub const CAPTURE: OutputCaps = OutputCaps {
        stdout: 100_000,
        stderr: 50_000,
    };

    /// Character ceilings applied to the buffers returned to the caller.
    pub const REPORT: OutputCaps = OutputCaps {
        stdout: 50_000,
        stderr: 25_000,
    };
}

// ── Caller-facing types ──────────────────────────────────

/// Raw tool input before range checks. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInput {
    pub code: String,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Any JSON number; range-checked before it is rounded.
    pub timeout_ms: Option<f64>,
    pub mem_mb: Option<f64>,
    pub network: Option<bool>,
}

/// A request that passed range and format checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    pub packages: Vec<String>,
    pub timeout: Duration,
    pub memory_mb: u64,
    pub allow_network: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncated {
    pub stdout: bool,
    pub stderr: bool,
}

/// Uniform result returned to callers, structurally complete on every path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub truncated: Truncated,
}

// ── Entrypoint wire documents ────────────────────────────

/// Single document written to the entrypoint's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointRequest {
    pub code: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Single document the entrypoint writes to its stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl EntrypointResponse {
    /// Failure document for faults inside the entrypoint itself.
    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: detail.clone(),
            execution_time_ms: 0,
            error: Some(detail),
            error_kind: Some(kind),
        }
    }
}

// ── Registry entry ───────────────────────────────────────

/// An in-flight execution, owned by the lifecycle manager's registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningExecution {
    pub id: Uuid,
    /// Instance name handed to the container runtime (`code-<id>`).
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_input_defaults() {
        let input: ToolInput = serde_json::from_value(json!({"code": "1+1"})).unwrap();
        assert_eq!(input.code, "1+1");
        assert!(input.packages.is_empty());
        assert!(input.timeout_ms.is_none());
        assert!(input.mem_mb.is_none());
        assert!(input.network.is_none());
    }

    #[test]
    fn test_tool_input_ignores_unknown_fields() {
        let input: ToolInput =
            serde_json::from_value(json!({"code": "x", "language": "js"})).unwrap();
        assert_eq!(input.code, "x");
    }

    #[test]
    fn test_tool_input_camel_case() {
        let input: ToolInput = serde_json::from_value(json!({
            "code": "x",
            "timeoutMs": 2000,
            "memMb": 128,
            "network": true,
            "packages": ["lodash"]
        }))
        .unwrap();
        assert_eq!(input.timeout_ms, Some(2000.0));
        assert_eq!(input.mem_mb, Some(128.0));
        assert_eq!(input.network, Some(true));
        assert_eq!(input.packages, vec!["lodash"]);
    }

    #[test]
    fn test_tool_input_accepts_float_numbers() {
        let input: ToolInput = serde_json::from_value(json!({
            "code": "x",
            "timeoutMs": 2000.0,
            "memMb": 128.5
        }))
        .unwrap();
        assert_eq!(input.timeout_ms, Some(2000.0));
        assert_eq!(input.mem_mb, Some(128.5));
    }

    #[test]
    fn test_entrypoint_request_wire_shape() {
        let request = EntrypointRequest {
            code: "console.log(1)".to_string(),
            packages: vec![],
            timeout_ms: Some(8000),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"code": "console.log(1)", "packages": [], "timeoutMs": 8000})
        );
    }

    #[test]
    fn test_entrypoint_response_minimal_document() {
        let response: EntrypointResponse = serde_json::from_str(
            r#"{"success":true,"exitCode":0,"stdout":"x\n","stderr":"","executionTimeMs":12}"#,
        )
        .unwrap();
        assert!(response.success);
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.stdout, "x\n");
        assert!(response.error.is_none());
    }

    #[test]
    fn test_entrypoint_failure_document() {
        let response = EntrypointResponse::failure(ErrorKind::InstallFailure, "npm exploded");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "npm exploded");
        assert_eq!(value["errorKind"], "InstallFailure");
        assert!(value.get("exitCode").is_none());
    }

    #[test]
    fn test_execution_result_serializes_camel_case() {
        let result = ExecutionResult {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: "boom".to_string(),
            execution_time_ms: 5,
            error: Some("Execution timeout".to_string()),
            error_kind: Some(ErrorKind::ExecutionTimeout),
            truncated: Truncated::default(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["executionTimeMs"], 5);
        assert_eq!(value["errorKind"], "ExecutionTimeout");
        assert_eq!(value["truncated"], json!({"stdout": false, "stderr": false}));
        assert!(value.get("exitCode").is_none());
    }

    #[test]
    fn test_error_kind_messages_are_distinct() {
        let kinds = [
            ErrorKind::InvalidInput,
            ErrorKind::PackageRejected,
            ErrorKind::SpawnFailure,
            ErrorKind::ExecutionTimeout,
            ErrorKind::OutputLimitExceeded,
            ErrorKind::ResultParseFailure,
            ErrorKind::InstallFailure,
            ErrorKind::Cancelled,
            ErrorKind::UnknownFailure,
        ];
        let messages: std::collections::HashSet<_> = kinds.iter().map(|k| k.message()).collect();
        assert_eq!(messages.len(), kinds.len());
        assert_eq!(ErrorKind::InvalidInput.message(), "Invalid input");
    }

    #[test]
    fn test_report_caps_smaller_than_capture_caps() {
        assert!(OutputCaps::REPORT.stdout < OutputCaps::CAPTURE.stdout);
        assert!(OutputCaps::REPORT.stderr < OutputCaps::CAPTURE.stderr);
    }

    #[test]
    fn test_running_execution_serializes_timeout_ms() {
        let entry = RunningExecution {
            id: Uuid::nil(),
            name: "code-test".to_string(),
            started_at: Utc::now(),
            timeout: Duration::from_millis(2500),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["timeout"], 2500);
        assert_eq!(value["name"], "code-test");
        assert_eq!(value["id"], "00000000-0000-0000-0000-000000000000");
        assert!(value["startedAt"].is_string());
    }
}
