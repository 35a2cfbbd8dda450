//! Relay process launching.
//!
//! The supervisor talks to processes through the [`RelayLauncher`] trait so
//! tests can script process behavior without an ffmpeg binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{Error, Result};

/// Capacity of the stderr line channel per process.
const STDERR_CHANNEL_CAPACITY: usize = 64;

/// A spawned relay process as seen by the supervisor.
pub struct RelayChild {
    /// Lines from the process's diagnostic stream. ffmpeg writes progress
    /// and errors to stderr, not stdout.
    pub stderr: mpsc::Receiver<String>,
    /// Resolves with the exit code once the process is fully gone.
    /// `None` means the process was terminated by a signal.
    pub exit: oneshot::Receiver<Option<i32>>,
    /// Cancel to kill the process.
    pub kill: CancellationToken,
}

/// Spawns relay processes.
#[async_trait]
pub trait RelayLauncher: Send + Sync {
    async fn launch(&self, args: &[String]) -> Result<RelayChild>;

    /// Whether the underlying binary is usable.
    fn is_available(&self) -> bool {
        true
    }
}

/// ffmpeg-backed launcher.
pub struct FfmpegLauncher {
    binary: String,
    /// Cached version string, detected at construction.
    version: Option<String>,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        let version = Self::detect_version(&binary);
        Self { binary, version }
    }

    /// Detect the ffmpeg version.
    fn detect_version(path: &str) -> Option<String> {
        std::process::Command::new(path)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

#[async_trait]
impl RelayLauncher for FfmpegLauncher {
    async fn launch(&self, args: &[String]) -> Result<RelayChild> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .env("LC_ALL", "C") // Force consistent output
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn {}: {}", self.binary, e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("failed to capture relay stderr"))?;

        let (line_tx, line_rx) = mpsc::channel(STDERR_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Error reading relay stderr: {}", e);
                        break;
                    }
                }
            }
        });

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill_token = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                _ = kill_token.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        debug!("Relay process already gone on kill: {}", e);
                    }
                    child.wait().await
                }
                status = child.wait() => status,
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("Error waiting for relay process: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(RelayChild {
            stderr: line_rx,
            exit: exit_rx,
            kill,
        })
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }
}
