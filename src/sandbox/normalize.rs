//! Maps raw outcomes (rejections, entrypoint documents, runtime exits)
//! onto the public [`ExecutionResult`] shape. No I/O.

use super::types::{EntrypointResponse, ErrorKind, ExecutionResult, OutputCaps, Truncated};
use super::validate::Rejection;

/// Runtime exit codes meaning the instance never started
/// (daemon error, command not executable, command not found).
const RUNTIME_START_FAILURE_CODES: [i32; 3] = [125, 126, 127];

/// Keeps at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// A stream counts as truncated once it reaches its report cap.
pub fn truncation_flags(stdout: &str, stderr: &str, caps: OutputCaps) -> Truncated {
    Truncated {
        stdout: stdout.chars().count() >= caps.stdout,
        stderr: stderr.chars().count() >= caps.stderr,
    }
}

/// Wraps a parsed entrypoint document.
pub fn from_entrypoint(response: EntrypointResponse, caps: OutputCaps) -> ExecutionResult {
    let stdout = truncate_chars(&response.stdout, caps.stdout);
    let stderr = truncate_chars(&response.stderr, caps.stderr);
    let truncated = truncation_flags(&stdout, &stderr, caps);

    // A document carrying an error but no classification came from an
    // entrypoint build that predates `errorKind`.
    let error_kind = response
        .error_kind
        .or_else(|| response.error.as_ref().map(|_| ErrorKind::UnknownFailure));

    ExecutionResult {
        success: response.success,
        exit_code: response.exit_code,
        stdout,
        stderr,
        execution_time_ms: response.execution_time_ms,
        error: response.error,
        error_kind,
        truncated,
    }
}

/// Builds a failure result from raw captured text.
pub fn failure(
    kind: ErrorKind,
    stdout: &str,
    stderr: &str,
    execution_time_ms: u64,
    caps: OutputCaps,
) -> ExecutionResult {
    let stdout = truncate_chars(stdout, caps.stdout);
    let stderr = truncate_chars(stderr, caps.stderr);
    let truncated = truncation_flags(&stdout, &stderr, caps);

    ExecutionResult {
        success: false,
        exit_code: None,
        stdout,
        stderr,
        execution_time_ms,
        error: Some(kind.message().to_string()),
        error_kind: Some(kind),
        truncated,
    }
}

/// Result for a request stopped before any instance was created.
pub fn rejection(rejection: &Rejection) -> ExecutionResult {
    failure(
        rejection.kind(),
        "",
        &rejection.to_string(),
        0,
        OutputCaps::REPORT,
    )
}

/// Interprets the runtime's exit.
///
/// A parseable result document on stdout always wins, whatever the exit
/// code. Otherwise start-failure codes map to `SpawnFailure` and anything
/// else to `ResultParseFailure`.
pub fn from_instance_exit(
    exit_code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
    execution_time_ms: u64,
    caps: OutputCaps,
) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    if let Ok(response) = serde_json::from_str::<EntrypointResponse>(stdout.trim()) {
        return from_entrypoint(response, caps);
    }

    let exit = match exit_code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    };

    let (kind, fallback) = match exit_code {
        Some(code) if RUNTIME_START_FAILURE_CODES.contains(&code) => {
            (ErrorKind::SpawnFailure, format!("Container runtime {exit}"))
        }
        Some(0) => (
            ErrorKind::ResultParseFailure,
            "Failed to parse container output".to_string(),
        ),
        _ => (
            ErrorKind::ResultParseFailure,
            format!("Container process {exit} without a result"),
        ),
    };

    let stderr = if stderr.trim().is_empty() {
        fallback
    } else {
        stderr.into_owned()
    };

    let mut result = failure(kind, &stdout, &stderr, execution_time_ms, caps);
    result.exit_code = exit_code;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: OutputCaps = OutputCaps::REPORT;

    // ── truncate_chars tests ────────────────────────────

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn test_truncate_exact_limit() {
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 4), "hell");
    }

    #[test]
    fn test_truncate_multibyte() {
        let text = "🎉".repeat(10);
        let cut = truncate_chars(&text, 3);
        assert_eq!(cut.chars().count(), 3);
        assert_eq!(cut, "🎉🎉🎉");
    }

    // ── truncation_flags tests ──────────────────────────

    #[test]
    fn test_flags_at_and_below_cap() {
        let at_cap = "x".repeat(CAPS.stdout);
        let below = "x".repeat(CAPS.stdout - 1);
        assert!(truncation_flags(&at_cap, "", CAPS).stdout);
        assert!(!truncation_flags(&below, "", CAPS).stdout);
        assert!(truncation_flags("", &"e".repeat(CAPS.stderr), CAPS).stderr);
    }

    // ── from_entrypoint tests ───────────────────────────

    #[test]
    fn test_from_entrypoint_success() {
        let response = EntrypointResponse {
            success: true,
            exit_code: Some(0),
            stdout: "x\n".to_string(),
            stderr: String::new(),
            execution_time_ms: 42,
            error: None,
            error_kind: None,
        };
        let result = from_entrypoint(response, CAPS);
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "x\n");
        assert_eq!(result.execution_time_ms, 42);
        assert!(result.error_kind.is_none());
        assert_eq!(result.truncated, Truncated::default());
    }

    #[test]
    fn test_from_entrypoint_oversized_stdout_capped() {
        let response = EntrypointResponse {
            success: true,
            exit_code: Some(0),
            stdout: "y".repeat(CAPS.stdout * 2),
            stderr: String::new(),
            execution_time_ms: 1,
            error: None,
            error_kind: None,
        };
        let result = from_entrypoint(response, CAPS);
        assert_eq!(result.stdout.len(), CAPS.stdout);
        assert!(result.truncated.stdout);
        assert!(!result.truncated.stderr);
    }

    #[test]
    fn test_from_entrypoint_error_without_kind() {
        let response = EntrypointResponse {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: "stack".to_string(),
            execution_time_ms: 0,
            error: Some("Timeout reading stdin".to_string()),
            error_kind: None,
        };
        let result = from_entrypoint(response, CAPS);
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownFailure));
        assert_eq!(result.error.as_deref(), Some("Timeout reading stdin"));
    }

    #[test]
    fn test_from_entrypoint_nonzero_exit_is_not_an_error() {
        let response = EntrypointResponse {
            success: false,
            exit_code: Some(3),
            stdout: String::new(),
            stderr: "Error: nope".to_string(),
            execution_time_ms: 7,
            error: None,
            error_kind: None,
        };
        let result = from_entrypoint(response, CAPS);
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.error.is_none());
        assert!(result.error_kind.is_none());
    }

    // ── rejection tests ─────────────────────────────────

    #[test]
    fn test_rejection_invalid_input() {
        let result = rejection(&Rejection::EmptyCode);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid input"));
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));
        assert!(result.stderr.contains("Code cannot be empty"));
        assert_eq!(result.execution_time_ms, 0);
    }

    #[test]
    fn test_rejection_package() {
        let result = rejection(&Rejection::DeniedPackage("fs".to_string()));
        assert_eq!(result.error.as_deref(), Some("Package validation failed"));
        assert_eq!(result.error_kind, Some(ErrorKind::PackageRejected));
        assert!(result.stderr.contains("Package not allowed: fs"));
    }

    // ── from_instance_exit tests ────────────────────────

    #[test]
    fn test_exit_with_document() {
        let stdout = br#"{"success":true,"exitCode":0,"stdout":"x","stderr":"","executionTimeMs":9}"#;
        let result = from_instance_exit(Some(0), stdout, b"", 100, CAPS);
        assert!(result.success);
        assert_eq!(result.stdout, "x");
        assert_eq!(result.execution_time_ms, 9);
    }

    #[test]
    fn test_exit_nonzero_with_document_still_parsed() {
        let stdout = br#"{"success":false,"error":"Package installation failed: E404","errorKind":"InstallFailure","stdout":"","stderr":"E404","executionTimeMs":0}"#;
        let result = from_instance_exit(Some(1), stdout, b"", 100, CAPS);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InstallFailure));
    }

    #[test]
    fn test_exit_document_with_trailing_newline() {
        let stdout = b"{\"success\":true,\"exitCode\":0,\"stdout\":\"\",\"stderr\":\"\",\"executionTimeMs\":1}\n";
        assert!(from_instance_exit(Some(0), stdout, b"", 5, CAPS).success);
    }

    #[test]
    fn test_exit_zero_garbage_is_parse_failure() {
        let result = from_instance_exit(Some(0), b"not json", b"", 55, CAPS);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ResultParseFailure));
        assert_eq!(result.error.as_deref(), Some("Container output parsing failed"));
        assert_eq!(result.stdout, "not json");
        assert_eq!(result.stderr, "Failed to parse container output");
        assert_eq!(result.execution_time_ms, 55);
    }

    #[test]
    fn test_exit_125_is_spawn_failure() {
        let result = from_instance_exit(
            Some(125),
            b"",
            b"Unable to find image 'nope:latest' locally",
            10,
            CAPS,
        );
        assert_eq!(result.error_kind, Some(ErrorKind::SpawnFailure));
        assert_eq!(result.exit_code, Some(125));
        assert!(result.stderr.contains("Unable to find image"));
    }

    #[test]
    fn test_exit_127_without_stderr_gets_fallback() {
        let result = from_instance_exit(Some(127), b"", b"", 10, CAPS);
        assert_eq!(result.error_kind, Some(ErrorKind::SpawnFailure));
        assert_eq!(result.stderr, "Container runtime exited with code 127");
    }

    #[test]
    fn test_exit_signal_without_document() {
        let result = from_instance_exit(None, b"", b"", 10, CAPS);
        assert_eq!(result.error_kind, Some(ErrorKind::ResultParseFailure));
        assert!(result.stderr.contains("terminated by a signal"));
    }

    #[test]
    fn test_exit_raw_output_capped() {
        let raw = vec![b'z'; CAPS.stdout + 10];
        let result = from_instance_exit(Some(2), &raw, b"", 1, CAPS);
        assert_eq!(result.stdout.len(), CAPS.stdout);
        assert!(result.truncated.stdout);
    }
}
