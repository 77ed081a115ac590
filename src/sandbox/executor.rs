//! Isolation lifecycle manager.
//!
//! Each call to [`SandboxExecutor::execute`] owns one registry entry and
//! one container instance. The call registers the entry, spawns the
//! instance, pipes the request document in, then races instance exit
//! against the timeout. Whatever the outcome, the instance is removed
//! and the entry deregistered before the call returns.

use std::collections::HashMap;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::normalize;
use super::policy::IsolationPolicy;
use super::runtime::RuntimeCli;
use super::types::{
    EntrypointRequest, ErrorKind, ExecutionRequest, ExecutionResult, OutputCaps,
    RunningExecution,
};
use super::validate;
use crate::config::SandboxConfig;

/// Host-side ceiling on what is kept from each runtime stream. The
/// entrypoint already caps its own output; this bounds a misbehaving image.
const HOST_CAPTURE_LIMIT: usize = 1024 * 1024;

/// How long to wait for the output readers once the instance is gone.
const COLLECT_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on kill/remove while a call is returning. Slower
/// housekeeping finishes in the background.
const CLEANUP_GRACE: Duration = Duration::from_secs(2);

// ── Registry ─────────────────────────────────────────────

/// In-flight executions keyed by id. Append, remove, list; nothing else.
#[derive(Debug, Default)]
struct Registry {
    entries: Mutex<HashMap<Uuid, RunningExecution>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunningExecution>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, entry: RunningExecution) {
        self.lock().insert(entry.id, entry);
    }

    fn remove(&self, id: &Uuid) -> Option<RunningExecution> {
        self.lock().remove(id)
    }

    fn snapshot(&self) -> Vec<RunningExecution> {
        let mut entries: Vec<RunningExecution> = self.lock().values().cloned().collect();
        entries.sort_by_key(|e| e.started_at);
        entries
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Deregisters its entry when dropped. If the owning call is abandoned
/// before cleanup ran, it also schedules removal of the instance.
struct Registration {
    registry: Arc<Registry>,
    runtime: RuntimeCli,
    id: Uuid,
    name: String,
    cleaned: bool,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);

        if self.cleaned {
            return;
        }
        warn!("Execution {} abandoned, scheduling instance removal", self.name);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let runtime = self.runtime.clone();
            let name = std::mem::take(&mut self.name);
            handle.spawn(async move {
                let _ = runtime.kill(&name).await;
                let _ = runtime.remove(&name).await;
            });
        }
    }
}

/// How the race between instance exit, timeout and cancellation ended.
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

// ── SandboxExecutor ──────────────────────────────────────

/// Runs validated requests in isolated container instances.
pub struct SandboxExecutor {
    config: SandboxConfig,
    runtime: RuntimeCli,
    registry: Arc<Registry>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let runtime = RuntimeCli::new(&config);
        Self {
            config,
            runtime,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Extra time allowed on top of the request timeout for instance startup.
    pub fn startup_overhead(&self) -> Duration {
        Duration::from_millis(self.config.startup_overhead_ms)
    }

    /// The container runtime CLI in use.
    pub fn runtime_program(&self) -> &str {
        self.runtime.program()
    }

    /// Currently registered executions, oldest first.
    pub fn running(&self) -> Vec<RunningExecution> {
        self.registry.snapshot()
    }

    /// Runs one request to completion. Never fails: every failure mode is
    /// encoded in the returned result.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_until(request, std::future::pending::<()>())
            .await
    }

    /// Like [`execute`](Self::execute), but hard-kills the instance and
    /// returns a `Cancelled` result if `cancel` completes first.
    pub async fn execute_until<F>(&self, request: &ExecutionRequest, cancel: F) -> ExecutionResult
    where
        F: Future<Output = ()>,
    {
        // Callers that skip the allow-list still get format and denylist checks
        if let Err(rejection) = validate::validate_packages(&request.packages) {
            warn!("Rejected before spawn: {rejection}");
            return normalize::rejection(&rejection);
        }

        let id = Uuid::new_v4();
        let name = format!("code-{id}");
        let started = Instant::now();

        self.registry.insert(RunningExecution {
            id,
            name: name.clone(),
            started_at: Utc::now(),
            timeout: request.timeout,
        });
        let mut registration = Registration {
            registry: self.registry.clone(),
            runtime: self.runtime.clone(),
            id,
            name: name.clone(),
            cleaned: false,
        };

        let policy = IsolationPolicy::build(&name, request, &self.config);
        info!(
            "Starting {name} (timeout: {}ms, memory: {}MB, network: {}, packages: {})",
            request.timeout.as_millis(),
            request.memory_mb,
            if request.allow_network { "on" } else { "off" },
            request.packages.len(),
        );

        let result = self.run_instance(&policy, request, started, cancel).await;

        // Best-effort: `--rm` usually removed it already
        match tokio::time::timeout(CLEANUP_GRACE, self.runtime.remove(&name)).await {
            Ok(Ok(())) => registration.cleaned = true,
            Ok(Err(e)) => {
                debug!("Instance {name} already gone: {e}");
                registration.cleaned = true;
            }
            // The registration schedules removal when dropped
            Err(_) => warn!("Removing {name} exceeded {}ms", CLEANUP_GRACE.as_millis()),
        }
        drop(registration);

        info!(
            "Finished {name}: success={} error={} ({}ms)",
            result.success,
            result.error.as_deref().unwrap_or("none"),
            result.execution_time_ms,
        );
        result
    }

    async fn run_instance<F>(
        &self,
        policy: &IsolationPolicy,
        request: &ExecutionRequest,
        started: Instant,
        cancel: F,
    ) -> ExecutionResult
    where
        F: Future<Output = ()>,
    {
        let caps = OutputCaps::REPORT;
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let payload = match serde_json::to_vec(&EntrypointRequest {
            code: request.code.clone(),
            packages: request.packages.clone(),
            timeout_ms: Some(request.timeout.as_millis() as u64),
        }) {
            Ok(p) => p,
            Err(e) => {
                return normalize::failure(
                    ErrorKind::UnknownFailure,
                    "",
                    &format!("Failed to encode request: {e}"),
                    elapsed_ms(),
                    caps,
                )
            }
        };

        let mut cmd = self.runtime.command();
        cmd.args(policy.run_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {} for {}: {e}", self.runtime.program(), policy.name);
                return normalize::failure(
                    ErrorKind::SpawnFailure,
                    "",
                    &format!("Failed to start {}: {e}", self.runtime.program()),
                    elapsed_ms(),
                    caps,
                );
            }
        };
        debug!("Spawned {} (pid {:?})", policy.name, child.id());

        // Written from a task: a runtime that never reads stdin must not
        // block the timeout race.
        if let Some(mut stdin) = child.stdin.take() {
            let name = policy.name.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Writing request to {name} failed: {e}");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let deadline = request.timeout + self.startup_overhead();
        tokio::pin!(cancel);

        // Exactly one branch completes the call.
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(deadline) => Outcome::TimedOut,
            _ = &mut cancel => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(Ok(status)) => {
                let (stdout, stderr) = tokio::join!(collect(stdout_task), collect(stderr_task));
                debug!(
                    "{} exited ({status}): stdout={}B stderr={}B",
                    policy.name,
                    stdout.len(),
                    stderr.len()
                );
                normalize::from_instance_exit(status.code(), &stdout, &stderr, elapsed_ms(), caps)
            }
            Outcome::Exited(Err(e)) => {
                warn!("Waiting for {} failed: {e}", policy.name);
                self.terminate(&policy.name, &mut child).await;
                normalize::failure(
                    ErrorKind::UnknownFailure,
                    "",
                    &format!("Failed waiting for container: {e}"),
                    elapsed_ms(),
                    caps,
                )
            }
            Outcome::TimedOut => {
                warn!(
                    "{} timed out after {}ms (+{}ms overhead), killing",
                    policy.name,
                    request.timeout.as_millis(),
                    self.config.startup_overhead_ms
                );
                let (_, stdout, stderr) = tokio::join!(
                    self.terminate(&policy.name, &mut child),
                    collect(stdout_task),
                    collect(stderr_task),
                );
                let stderr = format!("{}\nExecution timed out", String::from_utf8_lossy(&stderr));
                normalize::failure(
                    ErrorKind::ExecutionTimeout,
                    &String::from_utf8_lossy(&stdout),
                    &stderr,
                    request.timeout.as_millis() as u64,
                    caps,
                )
            }
            Outcome::Cancelled => {
                info!("{} cancelled, killing", policy.name);
                let (_, stdout, stderr) = tokio::join!(
                    self.terminate(&policy.name, &mut child),
                    collect(stdout_task),
                    collect(stderr_task),
                );
                let stderr = format!("{}\nExecution cancelled", String::from_utf8_lossy(&stderr));
                normalize::failure(
                    ErrorKind::Cancelled,
                    &String::from_utf8_lossy(&stdout),
                    &stderr,
                    elapsed_ms(),
                    caps,
                )
            }
        }
    }

    /// Hard-kills the instance and the runtime client process, waiting
    /// at most [`CLEANUP_GRACE`] for the runtime.
    async fn terminate(&self, name: &str, child: &mut tokio::process::Child) {
        let (instance, client) = tokio::join!(
            tokio::time::timeout(CLEANUP_GRACE, self.runtime.kill(name)),
            child.kill(),
        );
        match instance {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Kill {name}: {e}"),
            Err(_) => warn!("Kill {name} exceeded {}ms", CLEANUP_GRACE.as_millis()),
        }
        if let Err(e) = client {
            debug!("Kill runtime client for {name}: {e}");
        }
    }

    /// Kills and removes every registered instance, then empties the
    /// registry. A no-op when nothing is registered.
    pub async fn kill_all(&self) {
        let entries = self.registry.snapshot();
        if entries.is_empty() {
            debug!("Kill-all sweep: nothing registered");
            return;
        }

        info!("Kill-all sweep: {} instance(s)", entries.len());
        join_all(entries.iter().map(|entry| async move {
            if let Err(e) = self.runtime.kill(&entry.name).await {
                debug!("Kill {}: {e}", entry.name);
            }
            if let Err(e) = self.runtime.remove(&entry.name).await {
                debug!("Remove {}: {e}", entry.name);
            }
        }))
        .await;

        self.registry.clear();
    }

    /// Host shutdown hook: no instance may outlive the host process.
    pub async fn shutdown(&self) {
        info!("Sandbox executor shutting down");
        self.kill_all().await;
    }
}

/// One runtime stream being read in the background. Bytes land in
/// `kept` as they arrive, so they survive a reader that never sees EOF
/// (a descendant of the runtime still holding the pipe open).
struct Capture {
    kept: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

fn spawn_reader<R>(stream: Option<R>) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let kept = Arc::new(Mutex::new(Vec::new()));
    let sink = kept.clone();
    let task = tokio::spawn(async move {
        if let Some(stream) = stream {
            read_bounded(stream, HOST_CAPTURE_LIMIT, &sink).await;
        }
    });
    Capture { kept, task }
}

fn lock_bytes(bytes: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    bytes.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reads to EOF, keeping at most `limit` bytes in `sink` and discarding
/// the rest so the writer never blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(mut stream: R, limit: usize, sink: &Mutex<Vec<u8>>) {
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut kept = lock_bytes(sink);
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                debug!("Output stream read failed: {e}");
                break;
            }
        }
    }
}

/// Waits up to [`COLLECT_GRACE`] for EOF, then returns whatever was read.
async fn collect(capture: Capture) -> Vec<u8> {
    let Capture { kept, mut task } = capture;
    match tokio::time::timeout(COLLECT_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Output reader failed: {e}"),
        Err(_) => {
            task.abort();
            debug!(
                "Output stream still open after {}ms, keeping what was read",
                COLLECT_GRACE.as_millis()
            );
        }
    }
    let bytes = std::mem::take(&mut *lock_bytes(&kept));
    bytes
}
