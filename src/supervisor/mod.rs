//! Daemon supervision.
//!
//! The supervisor owns the daemon lifecycle: a single instance per PID file,
//! a foreground mode that runs the service in-process until a termination
//! signal arrives, and a background mode that re-executes the binary as a
//! detached child and waits for its one-byte start-up report.

use std::env;
use std::ffi::OsString;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::Signal;
use nix::unistd::geteuid;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

mod error;
mod handshake;
mod pidfile;
mod signals;

pub use error::SupervisorError;
pub use handshake::{HANDSHAKE_FAILURE, HANDSHAKE_SUCCESS, HandshakeClient, HandshakeListener};
pub use pidfile::{PidFile, PidFileGuard, process_alive, send_signal};
pub use signals::{ShutdownSignal, ShutdownSignals};

use crate::config::DaemonConfig;
use crate::service::Service;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How `start` runs the daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartMode {
    /// Run in the current process until a signal arrives.
    Foreground,
    /// Launch a detached child and wait for its start-up report.
    Background,
    /// Foreground run that reports its start-up outcome to `socket`.
    Child {
        /// Handshake socket opened by the launching process.
        socket: Utf8PathBuf,
    },
}

/// Result of a successful `start`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartOutcome {
    /// The daemon ran in this process and has shut down.
    Finished,
    /// A detached daemon reported a successful start.
    Detached {
        /// PID recorded by the child, when readable.
        pid: Option<i32>,
    },
}

/// Daemon state as reported by `status`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DaemonStatus {
    /// A PID file exists. The PID is `None` when the file is unreadable.
    Running {
        /// Recorded process identifier.
        pid: Option<i32>,
    },
    /// No PID file exists.
    Stopped,
}

/// Lifecycle states of a foreground daemon.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SupervisorState {
    /// Not running.
    Stopped,
    /// Service initialisation in progress.
    Starting,
    /// Initialised and waiting for a signal.
    Running,
    /// Shutdown requested.
    Stopping,
}

impl SupervisorState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

fn enter(state: SupervisorState) {
    info!(state = state.as_str(), "daemon state changed");
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "service task failed");
    }
}

async fn report(client: Option<HandshakeClient>, success: bool) {
    if let Some(handshake) = client
        && let Err(err) = handshake.report(success).await
    {
        warn!(error = %err, "failed to report start-up status");
    }
}

enum Ending {
    Signal(ShutdownSignal),
    ServiceExited(Result<(), JoinError>),
}

/// Runs `service` until `shutdown` resolves or the service ends by itself.
///
/// Initialisation errors are drained from the init channel until the service
/// drops its sender. The outcome is then reported over `client`, if any.
/// Exactly one shutdown signal is forwarded to the service.
///
/// # Errors
///
/// Returns [`SupervisorError::Initialization`] carrying every reported
/// error when initialisation failed.
pub async fn supervise<F>(
    service: Box<dyn Service>,
    client: Option<HandshakeClient>,
    shutdown: F,
) -> Result<StartOutcome, SupervisorError>
where
    F: Future<Output = ShutdownSignal>,
{
    enter(SupervisorState::Starting);
    let (init_tx, mut init_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut task = tokio::spawn(service.run(init_tx, stop_rx));

    let mut errors = Vec::new();
    while let Some(err) = init_rx.recv().await {
        error!(error = %err, "service initialisation error");
        errors.push(err.to_string());
    }
    report(client, errors.is_empty()).await;

    if !errors.is_empty() {
        enter(SupervisorState::Stopping);
        drop(stop_tx);
        log_join(task.await);
        enter(SupervisorState::Stopped);
        return Err(SupervisorError::Initialization { errors });
    }

    enter(SupervisorState::Running);
    let ending = tokio::select! {
        received = shutdown => Ending::Signal(received),
        joined = &mut task => Ending::ServiceExited(joined),
    };
    match ending {
        Ending::Signal(received) => {
            enter(SupervisorState::Stopping);
            if stop_tx.send(received).is_err() {
                debug!("service stopped before the signal was forwarded");
            }
            log_join(task.await);
        }
        Ending::ServiceExited(joined) => {
            warn!("service exited before a shutdown signal");
            log_join(joined);
        }
    }
    enter(SupervisorState::Stopped);
    Ok(StartOutcome::Finished)
}

/// Starts, stops and inspects the daemon.
#[derive(Clone, Debug)]
pub struct Supervisor {
    pid_file: PidFile,
    require_root: bool,
    handshake_timeout: Option<Duration>,
    stop_timeout: Duration,
    socket_dir: Utf8PathBuf,
    child_args: Vec<OsString>,
}

impl Supervisor {
    /// Creates a supervisor from daemon configuration.
    #[must_use]
    pub fn new(config: &DaemonConfig) -> Self {
        let socket_dir = Utf8PathBuf::from_path_buf(env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
        Self {
            pid_file: PidFile::new(config.pid_file_path()),
            require_root: config.require_root,
            handshake_timeout: config.handshake_timeout(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            socket_dir,
            child_args: Vec::new(),
        }
    }

    /// Extra arguments appended to the detached child's `start` command.
    #[must_use]
    pub fn with_child_args(mut self, args: Vec<OsString>) -> Self {
        self.child_args = args;
        self
    }

    /// Directory holding background handshake sockets.
    #[must_use]
    pub fn with_socket_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// How long `restart` waits for the previous instance to exit.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The PID file this supervisor guards.
    #[must_use]
    pub const fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    fn check_permitted(&self, operation: &'static str) -> Result<(), SupervisorError> {
        if self.require_root && !geteuid().is_root() {
            return Err(SupervisorError::NotPermitted { operation });
        }
        Ok(())
    }

    /// Fails when a live process holds the PID file and removes a stale one.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] for a live PID, or a PID
    /// file error when the file cannot be read or removed.
    pub fn ensure_single_instance(&self) -> Result<(), SupervisorError> {
        if !self.pid_file.exists()? {
            return Ok(());
        }
        let pid = self.pid_file.read()?;
        if process_alive(pid) {
            return Err(SupervisorError::AlreadyRunning { pid });
        }
        warn!(pid, path = %self.pid_file.path(), "removing stale pid file");
        self.pid_file.remove()
    }

    /// Starts the daemon in `mode`.
    ///
    /// Background mode does not run `service` in this process; the detached
    /// child builds its own.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotPermitted`] without privileges,
    /// [`SupervisorError::AlreadyRunning`] when another instance is live,
    /// and the start-up failure otherwise.
    pub async fn start(
        &self,
        mode: StartMode,
        service: Box<dyn Service>,
    ) -> Result<StartOutcome, SupervisorError> {
        self.check_permitted("started")?;
        self.ensure_single_instance()?;
        match mode {
            StartMode::Foreground => self.run_foreground(service, None).await,
            StartMode::Child { socket } => {
                let client = HandshakeClient::connect(&socket).await?;
                self.run_foreground(service, Some(client)).await
            }
            StartMode::Background => self.launch_background().await,
        }
    }

    async fn run_foreground(
        &self,
        service: Box<dyn Service>,
        client: Option<HandshakeClient>,
    ) -> Result<StartOutcome, SupervisorError> {
        let guard = match self.pid_file.write_current() {
            Ok(guard) => guard,
            Err(err) => {
                report(client, false).await;
                return Err(err);
            }
        };
        info!(pid = std::process::id(), path = %self.pid_file.path(), "created pid file");

        let mut signals = match ShutdownSignals::install() {
            Ok(signals) => signals,
            Err(err) => {
                report(client, false).await;
                return Err(err);
            }
        };
        let outcome = supervise(service, client, async move { signals.recv().await }).await;
        drop(guard);
        outcome
    }

    async fn launch_background(&self) -> Result<StartOutcome, SupervisorError> {
        let listener = HandshakeListener::bind_in(&self.socket_dir)?;
        let program = env::current_exe().map_err(|err| SupervisorError::Spawn {
            program: String::from("current executable"),
            message: err.to_string(),
        })?;

        let mut command = Command::new(&program);
        command
            .arg("start")
            .arg(format!("--client={}", listener.path()))
            .args(&self.child_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0);
        let mut child = command.spawn().map_err(|err| SupervisorError::Spawn {
            program: program.display().to_string(),
            message: err.to_string(),
        })?;
        debug!(pid = child.id(), socket = %listener.path(), "spawned daemon");

        let exited = async {
            child
                .wait()
                .await
                .map_or_else(|err| err.to_string(), |code| code.to_string())
        };
        let status = listener
            .receive_unless_exited(self.handshake_timeout, exited)
            .await?;

        if status != HANDSHAKE_SUCCESS {
            return Err(SupervisorError::ChildFailed { status });
        }
        let pid = self.pid_file.read().ok();
        info!(pid, "daemon started in background");
        Ok(StartOutcome::Detached { pid })
    }

    /// Sends `SIGTERM` to the recorded PID without waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyStopped`] when no PID file exists.
    pub fn stop(&self) -> Result<i32, SupervisorError> {
        self.check_permitted("stopped")?;
        if !self.pid_file.exists()? {
            return Err(SupervisorError::AlreadyStopped);
        }
        let pid = self.pid_file.read()?;
        send_signal(pid, Signal::SIGTERM)?;
        info!(pid, "sent SIGTERM");
        Ok(pid)
    }

    /// Reports the daemon state from the PID file alone.
    ///
    /// # Errors
    ///
    /// Returns a PID file error when its directory cannot be inspected.
    pub fn status(&self) -> Result<DaemonStatus, SupervisorError> {
        if self.pid_file.exists()? {
            Ok(DaemonStatus::Running {
                pid: self.pid_file.read().ok(),
            })
        } else {
            Ok(DaemonStatus::Stopped)
        }
    }

    /// Stops a running daemon, waits for it to release the PID file, then
    /// starts again in `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::StopTimeout`] when the previous instance
    /// outlives the stop timeout, or any `start` error.
    pub async fn restart(
        &self,
        mode: StartMode,
        service: Box<dyn Service>,
    ) -> Result<StartOutcome, SupervisorError> {
        self.check_permitted("restarted")?;
        if self.pid_file.exists()? {
            match self.stop() {
                Ok(pid) => self.wait_for_exit(pid).await?,
                Err(SupervisorError::Kill { pid, message }) => {
                    warn!(pid, error = %message, "previous instance unreachable");
                }
                Err(err) => return Err(err),
            }
        }
        self.start(mode, service).await
    }

    async fn wait_for_exit(&self, pid: i32) -> Result<(), SupervisorError> {
        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while self.pid_file.exists()? && process_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::StopTimeout {
                    pid,
                    seconds: self.stop_timeout.as_secs(),
                });
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Socket directory used by background starts.
    #[must_use]
    pub fn socket_dir(&self) -> &Utf8Path {
        &self.socket_dir
    }
}
