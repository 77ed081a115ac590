//! In-isolation entrypoint.
//!
//! Runs inside every container instance with no knowledge of other
//! calls. Reads one request document from stdin, optionally installs
//! packages, runs the submitted code under a timeout with capped output
//! capture, and produces one result document for stdout.

pub mod capture;
pub mod install;

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::sandbox::normalize::truncate_chars;
use crate::sandbox::policy::{TMP_MOUNT, WORK_MOUNT};
use crate::sandbox::types::{EntrypointRequest, EntrypointResponse, ErrorKind, OutputCaps};
use crate::sandbox::validate;
use capture::{ChildOutcome, Stream};

/// Process exit code when SIGTERM/SIGINT interrupts the entrypoint.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Upper bound on the request document read from stdin.
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Everything the entrypoint needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct EntrypointSettings {
    pub interpreter: String,
    pub npm: String,
    pub work_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Used when the request carries no `timeoutMs`.
    pub default_timeout: Duration,
    pub stdin_grace: Duration,
    pub install_timeout: Duration,
    pub memory_limit_mb: Option<u64>,
    pub capture: OutputCaps,
    pub report: OutputCaps,
}

impl Default for EntrypointSettings {
    fn default() -> Self {
        Self {
            interpreter: "node".to_string(),
            npm: "npm".to_string(),
            work_dir: PathBuf::from(WORK_MOUNT),
            tmp_dir: PathBuf::from(TMP_MOUNT),
            default_timeout: Duration::from_millis(8000),
            stdin_grace: Duration::from_secs(5),
            install_timeout: Duration::from_secs(30),
            memory_limit_mb: None,
            capture: OutputCaps::CAPTURE,
            report: OutputCaps::REPORT,
        }
    }
}

impl EntrypointSettings {
    /// Reads `TIMEOUT_MS` and `MEMORY_LIMIT_MB`, as set by the isolation policy.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let env_u64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());

        Self {
            default_timeout: env_u64("TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            memory_limit_mb: env_u64("MEMORY_LIMIT_MB"),
            ..defaults
        }
    }
}

/// A fault that ends the run before the code produced a result.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Runs one request read from `input`. Never fails: faults become a
/// failure document.
pub async fn run<R>(input: R, settings: &EntrypointSettings) -> EntrypointResponse
where
    R: AsyncRead + Unpin,
{
    match run_request(input, settings).await {
        Ok(response) => response,
        Err(failure) => {
            error!("Entrypoint failure: {failure}");
            EntrypointResponse::failure(failure.kind, failure.message)
        }
    }
}

/// A termination signal arrived before the run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted by a termination signal")]
pub struct Interrupted;

impl Interrupted {
    pub fn exit_code(self) -> i32 {
        INTERRUPTED_EXIT_CODE
    }
}

/// Runs `run` on its own task and races it against `signal`.
///
/// A panic inside the run becomes an `UnknownFailure` document. If the
/// signal wins, the run is aborted (dropping any child it spawned).
pub async fn supervise<F, S>(run: F, signal: S) -> Result<EntrypointResponse, Interrupted>
where
    F: Future<Output = EntrypointResponse> + Send + 'static,
    S: Future<Output = ()>,
{
    let mut task = tokio::spawn(run);

    tokio::select! {
        joined = &mut task => Ok(match joined {
            Ok(response) => response,
            Err(e) => {
                error!("Entrypoint task failed: {e}");
                EntrypointResponse::failure(
                    ErrorKind::UnknownFailure,
                    format!("Entrypoint crashed: {e}"),
                )
            }
        }),
        _ = signal => {
            warn!("Interrupted, aborting run");
            task.abort();
            Err(Interrupted)
        }
    }
}

/// The entrypoint's own exit status mirrors the result.
pub fn exit_code(response: &EntrypointResponse) -> i32 {
    if response.success {
        0
    } else {
        1
    }
}

/// Reads the whole request document, giving up after `grace`.
pub async fn read_request<R>(input: R, grace: Duration) -> Result<EntrypointRequest, Failure>
where
    R: AsyncRead + Unpin,
{
    let mut raw = String::new();
    tokio::time::timeout(grace, input.take(MAX_REQUEST_BYTES).read_to_string(&mut raw))
        .await
        .map_err(|_| Failure::new(ErrorKind::InvalidInput, "Timeout reading stdin"))?
        .map_err(|e| Failure::new(ErrorKind::InvalidInput, format!("Failed to read stdin: {e}")))?;

    serde_json::from_str(&raw).map_err(|e| {
        Failure::new(
            ErrorKind::InvalidInput,
            format!("Invalid request document: {e}"),
        )
    })
}

async fn run_request<R>(input: R, settings: &EntrypointSettings) -> Result<EntrypointResponse, Failure>
where
    R: AsyncRead + Unpin,
{
    let request = read_request(input, settings.stdin_grace).await?;
    let timeout = request
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(settings.default_timeout);

    if !request.packages.is_empty() {
        validate::validate_packages(&request.packages)
            .map_err(|r| Failure::new(ErrorKind::PackageRejected, r.to_string()))?;
        install::install_packages(
            &settings.npm,
            &settings.work_dir,
            &request.packages,
            settings.install_timeout,
        )
        .await
        .map_err(|e| {
            Failure::new(
                ErrorKind::InstallFailure,
                format!("Package installation failed: {e}"),
            )
        })?;
    }

    // Removed when dropped at the end of this call
    let code_file = tempfile::Builder::new()
        .prefix("user-code-")
        .suffix(".js")
        .tempfile_in(&settings.tmp_dir)
        .map_err(|e| Failure::new(ErrorKind::UnknownFailure, format!("Failed to create code file: {e}")))?;
    tokio::fs::write(code_file.path(), request.code.as_bytes())
        .await
        .map_err(|e| Failure::new(ErrorKind::UnknownFailure, format!("Failed to write code file: {e}")))?;

    let mut cmd = Command::new(&settings.interpreter);
    cmd.arg(code_file.path())
        .current_dir(&settings.work_dir)
        .env("NODE_ENV", "sandbox");

    info!(
        "Running code ({} chars, timeout {}ms)",
        request.code.chars().count(),
        timeout.as_millis()
    );
    let started = Instant::now();
    let outcome = capture::run_capped(cmd, timeout, settings.capture)
        .await
        .map_err(|e| {
            Failure::new(
                ErrorKind::UnknownFailure,
                format!("Failed to start {}: {e}", settings.interpreter),
            )
        })?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    Ok(respond(outcome, timeout, elapsed_ms, settings.report))
}

fn respond(
    outcome: ChildOutcome,
    timeout: Duration,
    elapsed_ms: u64,
    report: OutputCaps,
) -> EntrypointResponse {
    let text = |bytes: &[u8], cap: usize| truncate_chars(&String::from_utf8_lossy(bytes), cap);

    match outcome {
        ChildOutcome::Exited {
            code,
            stdout,
            stderr,
        } => {
            // Killed by a signal (e.g. the memory ceiling)
            let (error, error_kind) = match code {
                Some(_) => (None, None),
                None => (
                    Some("Process terminated by signal".to_string()),
                    Some(ErrorKind::UnknownFailure),
                ),
            };
            EntrypointResponse {
                success: code == Some(0),
                exit_code: code,
                stdout: text(&stdout, report.stdout),
                stderr: text(&stderr, report.stderr),
                execution_time_ms: elapsed_ms,
                error,
                error_kind,
            }
        }
        ChildOutcome::TimedOut { stdout, .. } => EntrypointResponse {
            success: false,
            exit_code: None,
            stdout: text(&stdout, report.stdout),
            stderr: "Process killed due to timeout".to_string(),
            execution_time_ms: timeout.as_millis() as u64,
            error: Some(ErrorKind::ExecutionTimeout.message().to_string()),
            error_kind: Some(ErrorKind::ExecutionTimeout),
        },
        ChildOutcome::LimitExceeded {
            stream,
            stdout,
            stderr,
        } => EntrypointResponse {
            success: false,
            exit_code: None,
            stdout: text(&stdout, report.stdout),
            stderr: text(&stderr, report.stderr),
            execution_time_ms: elapsed_ms,
            error: Some(
                match stream {
                    Stream::Stdout => "Output size limit exceeded",
                    Stream::Stderr => "Error output size limit exceeded",
                }
                .to_string(),
            ),
            error_kind: Some(ErrorKind::OutputLimitExceeded),
        },
    }
}
