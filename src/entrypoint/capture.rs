//! Runs a child process under a timeout while enforcing hard output caps.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::sandbox::types::OutputCaps;

/// Which stream crossed its capture cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub enum ChildOutcome {
    Exited {
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The child was killed as soon as `stream` exceeded its cap.
    LimitExceeded {
        stream: Stream,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

/// Spawns `cmd` and collects its output incrementally.
///
/// Crossing a capture cap or the timeout kills the child immediately;
/// nothing past the cap is buffered. Spawn errors are returned as-is.
pub async fn run_capped(
    mut cmd: Command,
    timeout: Duration,
    caps: OutputCaps,
) -> std::io::Result<ChildOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let mut out = child.stdout.take();
    let mut err = child.stderr.take();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while out.is_some() || err.is_some() {
        tokio::select! {
            read = read_some(&mut out, &mut out_buf), if out.is_some() => {
                match read {
                    Some(n) => {
                        stdout.extend_from_slice(&out_buf[..n]);
                        if stdout.len() > caps.stdout {
                            warn!("Child stdout exceeded {} bytes, killing", caps.stdout);
                            kill(&mut child).await;
                            return Ok(ChildOutcome::LimitExceeded { stream: Stream::Stdout, stdout, stderr });
                        }
                    }
                    None => out = None,
                }
            }
            read = read_some(&mut err, &mut err_buf), if err.is_some() => {
                match read {
                    Some(n) => {
                        stderr.extend_from_slice(&err_buf[..n]);
                        if stderr.len() > caps.stderr {
                            warn!("Child stderr exceeded {} bytes, killing", caps.stderr);
                            kill(&mut child).await;
                            return Ok(ChildOutcome::LimitExceeded { stream: Stream::Stderr, stdout, stderr });
                        }
                    }
                    None => err = None,
                }
            }
            _ = &mut deadline => {
                warn!("Child exceeded {}ms, killing", timeout.as_millis());
                kill(&mut child).await;
                return Ok(ChildOutcome::TimedOut { stdout, stderr });
            }
        }
    }

    // Both streams closed; the exit itself is still bounded by the deadline.
    tokio::select! {
        status = child.wait() => {
            let status = status?;
            debug!("Child exited ({status})");
            Ok(ChildOutcome::Exited { code: status.code(), stdout, stderr })
        }
        _ = &mut deadline => {
            kill(&mut child).await;
            Ok(ChildOutcome::TimedOut { stdout, stderr })
        }
    }
}

/// Reads one chunk. `None` means EOF or a read error (treated as closed).
async fn read_some<R>(stream: &mut Option<R>, buf: &mut [u8]) -> Option<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let stream = stream.as_mut()?;
    match stream.read(buf).await {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
            debug!("Child stream read failed: {e}");
            None
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Kill child: {e}");
    }
}
