//! Graceful restart and forced shutdown of the agent process

use crate::connector::SessionControl;
use crate::error::{AgentError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

static BOOT_ARGS: OnceLock<Vec<String>> = OnceLock::new();

/// Capture the process arguments (without the program name) once.
///
/// Later calls return the first capture.
pub fn capture_boot_args() -> &'static [String] {
    BOOT_ARGS.get_or_init(|| std::env::args().skip(1).collect())
}

/// Exit code asking an external supervisor to restart the agent
pub const SUPERVISOR_EXIT_CODE: i32 = 1;

/// Process-level operations the orchestrator needs
pub trait ProcessControl: Send + Sync {
    /// Path of the running executable
    fn current_exe(&self) -> io::Result<PathBuf>;

    /// Start a detached copy of `exe` with inherited stdio
    fn spawn(&self, exe: &Path, args: &[String]) -> io::Result<()>;

    /// Terminate the process
    fn exit(&self, code: i32);
}

/// Real process control
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn current_exe(&self) -> io::Result<PathBuf> {
        std::env::current_exe()
    }

    fn spawn(&self, exe: &Path, args: &[String]) -> io::Result<()> {
        std::process::Command::new(exe)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map(|child| info!("Spawned replacement process {}", child.id()))
    }

    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// What the orchestrator was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Close and exit
    Offline,
    /// Close, respawn, exit
    Restart,
}

/// Runs offline and restart sequences, at most one per process
pub struct Orchestrator {
    process: Arc<dyn ProcessControl>,
    boot_args: Vec<String>,
    grace_period: Duration,
    exit_delay: Duration,
    session: OnceLock<Weak<dyn SessionControl>>,
    terminating: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        process: Arc<dyn ProcessControl>,
        boot_args: Vec<String>,
        grace_period: Duration,
        exit_delay: Duration,
    ) -> Self {
        Self {
            process,
            boot_args,
            grace_period,
            exit_delay,
            session: OnceLock::new(),
            terminating: AtomicBool::new(false),
        }
    }

    /// Bind the session closed before exiting; allowed once
    pub fn bind(&self, session: Weak<dyn SessionControl>) -> Result<()> {
        self.session
            .set(session)
            .map_err(|_| AgentError::AlreadyWired("orchestrator"))
    }

    /// Whether a termination sequence has started
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Schedule close and exit after the grace period
    pub fn schedule_offline(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.schedule(Termination::Offline)
    }

    /// Schedule close, respawn and exit after the grace period
    pub fn schedule_restart(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.schedule(Termination::Restart)
    }

    fn schedule(self: &Arc<Self>, kind: Termination) -> Option<JoinHandle<()>> {
        if self.terminating.swap(true, Ordering::AcqRel) {
            info!("Already terminating, ignoring {:?}", kind);
            return None;
        }
        info!("{:?} scheduled in {:?}", kind, self.grace_period);

        let orchestrator = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(orchestrator.grace_period).await;
            orchestrator.close_session().await;
            match kind {
                Termination::Offline => {
                    info!("Agent going offline");
                    orchestrator.process.exit(0);
                }
                Termination::Restart => orchestrator.restart().await,
            }
        }))
    }

    async fn close_session(&self) {
        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            warn!("No session bound, skipping close");
            return;
        };
        if let Err(e) = session.close().await {
            warn!("Failed to close connection: {}", e);
        }
    }

    async fn restart(&self) {
        let exe = match self.process.current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                error!("Cannot locate executable, deferring to supervisor: {}", e);
                self.process.exit(SUPERVISOR_EXIT_CODE);
                return;
            }
        };

        match self.process.spawn(&exe, &self.boot_args) {
            Ok(()) => {
                info!("Restarting via {}", exe.display());
                tokio::time::sleep(self.exit_delay).await;
                self.process.exit(0);
            }
            Err(e) => {
                error!("Failed to spawn {}, deferring to supervisor: {}", exe.display(), e);
                self.process.exit(SUPERVISOR_EXIT_CODE);
            }
        }
    }
}
