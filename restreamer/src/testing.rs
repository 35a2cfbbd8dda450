//! Shared test support: in-memory database and a scripted relay launcher.
//!
//! Used by unit tests and the integration suite; not part of the public API
//! surface proper.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::database::DbPool;
use crate::relay::{RelayChild, RelayLauncher};
use crate::{Error, Result};

/// In-memory SQLite pool with migrations applied.
///
/// Uses a single connection so that every query and transaction sees the
/// same in-memory database.
pub async fn memory_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid sqlite url")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to create in-memory pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

/// One scripted process lifetime for [`ScriptedLauncher`].
#[derive(Debug, Clone)]
pub struct ProcessScript {
    /// Lines emitted on stderr right after spawn.
    pub stderr_lines: Vec<String>,
    /// Exit code sent once the lines are consumed. Ignored when
    /// `run_until_killed` is set.
    pub exit_code: Option<i32>,
    /// Keep the process alive until the supervisor kills it.
    pub run_until_killed: bool,
}

impl ProcessScript {
    /// A healthy relay: reports a stream mapping and runs until killed.
    pub fn healthy() -> Self {
        Self {
            stderr_lines: vec![
                "Stream mapping:".to_string(),
                "frame=  100 fps=30".to_string(),
            ],
            exit_code: None,
            run_until_killed: true,
        }
    }

    /// A relay that dies immediately with the given exit code.
    pub fn crash(exit_code: i32) -> Self {
        Self {
            stderr_lines: vec!["Error: connection refused".to_string()],
            exit_code: Some(exit_code),
            run_until_killed: false,
        }
    }

    /// A relay that exits cleanly right away.
    pub fn clean_exit() -> Self {
        Self {
            stderr_lines: vec!["Stream mapping:".to_string()],
            exit_code: Some(0),
            run_until_killed: false,
        }
    }
}

/// Relay launcher that plays back scripted process lifetimes instead of
/// spawning ffmpeg.
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<ProcessScript>>,
    /// Script used when the queue is empty.
    fallback: ProcessScript,
    launches: AtomicUsize,
    recorded_args: Mutex<Vec<Vec<String>>>,
    fail_to_spawn: bool,
}

impl ScriptedLauncher {
    pub fn new(fallback: ProcessScript) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            launches: AtomicUsize::new(0),
            recorded_args: Mutex::new(Vec::new()),
            fail_to_spawn: false,
        })
    }

    /// Launcher whose every launch fails at spawn time.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: ProcessScript::healthy(),
            launches: AtomicUsize::new(0),
            recorded_args: Mutex::new(Vec::new()),
            fail_to_spawn: true,
        })
    }

    /// Queue a script for the next launch.
    pub fn push_script(&self, script: ProcessScript) {
        self.scripts.lock().push_back(script);
    }

    /// Number of launches performed so far.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Argument lists of every launch, in order.
    pub fn recorded_args(&self) -> Vec<Vec<String>> {
        self.recorded_args.lock().clone()
    }
}

#[async_trait]
impl RelayLauncher for ScriptedLauncher {
    async fn launch(&self, args: &[String]) -> Result<RelayChild> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.recorded_args.lock().push(args.to_vec());

        if self.fail_to_spawn {
            return Err(Error::process("scripted spawn failure"));
        }

        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (line_tx, line_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let kill_token = kill.clone();

        tokio::spawn(async move {
            for line in script.stderr_lines {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }

            if script.run_until_killed {
                // stderr stays open while the process lives, as with a real
                // child process.
                kill_token.cancelled().await;
                drop(line_tx);
                let _ = exit_tx.send(None);
            } else {
                // Closing the line channel signals EOF to the supervisor.
                drop(line_tx);
                let _ = exit_tx.send(script.exit_code);
            }
        });

        Ok(RelayChild {
            stderr: line_rx,
            exit: exit_rx,
            kill,
        })
    }
}
