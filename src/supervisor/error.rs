//! Errors raised by the daemon supervisor.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while starting, stopping or inspecting the daemon.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SupervisorError {
    /// The caller lacks the privileges the operation requires.
    #[error("hostvol can only be {operation} by root")]
    NotPermitted {
        /// Past-tense operation, for example `started`.
        operation: &'static str,
    },
    /// A live process already holds the PID file.
    #[error("hostvol already running at PID {pid}")]
    AlreadyRunning {
        /// Recorded process identifier.
        pid: i32,
    },
    /// No PID file exists.
    #[error("hostvol is already stopped")]
    AlreadyStopped,
    /// The PID file could not be read, written or removed.
    #[error("pid file {path}: {message}")]
    PidFile {
        /// PID file path.
        path: Utf8PathBuf,
        /// Failure detail.
        message: String,
    },
    /// The PID file exists but does not hold a positive decimal PID.
    #[error("pid file {path} holds an invalid PID: {contents:?}")]
    InvalidPid {
        /// PID file path.
        path: Utf8PathBuf,
        /// Trimmed file contents.
        contents: String,
    },
    /// The service reported initialisation errors.
    #[error("service initialisation failed: {}", .errors.join("; "))]
    Initialization {
        /// Every reported error, in emission order.
        errors: Vec<String>,
    },
    /// The background handshake failed.
    #[error("startup handshake failed: {0}")]
    Handshake(String),
    /// The detached child reported a failed start.
    #[error("daemon failed to start (status byte {status})")]
    ChildFailed {
        /// Byte reported over the handshake socket.
        status: u8,
    },
    /// Spawning the detached child failed.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Executable path.
        program: String,
        /// Failure detail.
        message: String,
    },
    /// Installing a signal handler failed.
    #[error("failed to install {signal} handler: {message}")]
    Signal {
        /// Signal name.
        signal: &'static str,
        /// Failure detail.
        message: String,
    },
    /// Delivering a signal to the recorded PID failed.
    #[error("failed to signal PID {pid}: {message}")]
    Kill {
        /// Target process.
        pid: i32,
        /// Failure detail.
        message: String,
    },
    /// The previous instance did not release its PID file in time.
    #[error("hostvol at PID {pid} did not stop within {seconds}s")]
    StopTimeout {
        /// Process that was asked to stop.
        pid: i32,
        /// Seconds waited.
        seconds: u64,
    },
}

impl SupervisorError {
    pub(crate) fn pid_file(path: impl Into<Utf8PathBuf>, err: &std::io::Error) -> Self {
        Self::PidFile {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
