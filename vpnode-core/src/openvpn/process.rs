//! Tunnel binary process wrapper
//!
//! Spawns the binary, drains its output into the log and records the exit
//! outcome so any number of callers can wait for it.

use crate::error::ProcessError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

type ExitOutcome = Option<Result<(), ProcessError>>;

/// A single run of the tunnel binary
pub struct TunnelProcess {
    binary: PathBuf,
    args: Vec<String>,
    pid: Mutex<Option<u32>>,
    started: AtomicBool,
    stop_requested: AtomicBool,
    exit: watch::Sender<ExitOutcome>,
}

impl TunnelProcess {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            binary: binary.into(),
            args,
            pid: Mutex::new(None),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            exit,
        }
    }

    /// Spawn the binary
    ///
    /// Must be called from within a tokio runtime, and only once.
    pub fn start(&self) -> Result<(), ProcessError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed {
                reason: "process already started".to_string(),
            });
        }

        debug!("Spawning {} {}", self.binary.display(), self.args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed {
                reason: format!("Failed to spawn {}: {}", self.binary.display(), e),
            })?;

        let pid = child.id();
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
        info!("Tunnel process spawned with PID: {:?}", pid);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, true));
        }

        let exit = self.exit.clone();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) if status.success() => {
                    info!("Tunnel process exited");
                    Ok(())
                }
                Ok(status) => {
                    warn!("Tunnel process exited with {}", status);
                    Err(ProcessError::Exited {
                        status: status.to_string(),
                    })
                }
                Err(e) => Err(ProcessError::Exited {
                    status: format!("unknown ({})", e),
                }),
            };
            exit.send_replace(Some(outcome));
        });

        Ok(())
    }

    /// Ask the process to terminate with SIGTERM
    ///
    /// Only the first call signals; later calls and calls after exit are no-ops.
    pub fn stop(&self) -> Result<(), ProcessError> {
        let pid = (*self.pid.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or(ProcessError::NotRunning)?;

        if self.exit.borrow().is_some() || self.stop_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Sending SIGTERM to tunnel process {}", pid);
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| ProcessError::SignalFailed {
            reason: e.to_string(),
        })
    }

    /// Wait for the process to exit
    pub async fn wait(&self) -> Result<(), ProcessError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ProcessError::NotRunning);
        }

        let mut rx = self.exit.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProcessError::NotRunning)?;
        outcome.clone().unwrap_or(Err(ProcessError::NotRunning))
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain_output<R: AsyncRead + Unpin>(output: R, is_stderr: bool) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("Tunnel stderr: {}", line);
        } else {
            trace!("Tunnel stdout: {}", line);
        }
    }
}
