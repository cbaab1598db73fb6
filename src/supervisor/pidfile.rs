//! PID file ownership and liveness checks.
//!
//! The file holds one line: the decimal PID followed by a newline. Only the
//! foreground daemon writes it, and the [`PidFileGuard`] it holds removes the
//! file on every exit path.

use std::io;
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::SupervisorError;

/// Location of the daemon's PID file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PidFile {
    path: Utf8PathBuf,
}

impl PidFile {
    /// Wraps `path` without touching the filesystem.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the PID file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn parent(&self) -> &Utf8Path {
        self.path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."))
    }

    fn file_name(&self) -> Result<&str, SupervisorError> {
        self.path.file_name().ok_or_else(|| SupervisorError::PidFile {
            path: self.path.clone(),
            message: String::from("path is missing a file name"),
        })
    }

    fn open_parent(&self) -> Result<Dir, SupervisorError> {
        Dir::open_ambient_dir(self.parent(), ambient_authority())
            .map_err(|err| SupervisorError::pid_file(self.parent(), &err))
    }

    /// Whether the PID file is present.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::PidFile`] when the parent directory cannot
    /// be inspected.
    pub fn exists(&self) -> Result<bool, SupervisorError> {
        let file_name = self.file_name()?;
        match Dir::open_ambient_dir(self.parent(), ambient_authority()) {
            Ok(dir) => dir
                .try_exists(file_name)
                .map_err(|err| SupervisorError::pid_file(&self.path, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SupervisorError::pid_file(self.parent(), &err)),
        }
    }

    /// Reads the recorded PID.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::PidFile`] when the file cannot be read and
    /// [`SupervisorError::InvalidPid`] when it does not hold a positive PID.
    pub fn read(&self) -> Result<i32, SupervisorError> {
        let file_name = self.file_name()?;
        let contents = self
            .open_parent()?
            .read_to_string(file_name)
            .map_err(|err| SupervisorError::pid_file(&self.path, &err))?;
        let trimmed = contents.trim();
        trimmed
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| SupervisorError::InvalidPid {
                path: self.path.clone(),
                contents: trimmed.to_owned(),
            })
    }

    /// Records the current process, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::PidFile`] when the file cannot be written.
    pub fn write_current(&self) -> Result<PidFileGuard, SupervisorError> {
        let file_name = self.file_name()?;
        Dir::create_ambient_dir_all(self.parent(), ambient_authority())
            .map_err(|err| SupervisorError::pid_file(self.parent(), &err))?;
        let pid = process::id();
        self.open_parent()?
            .write(file_name, format!("{pid}\n"))
            .map_err(|err| SupervisorError::pid_file(&self.path, &err))?;
        debug!(pid, path = %self.path, "created pid file");
        Ok(PidFileGuard {
            pid_file: self.clone(),
        })
    }

    /// Deletes the PID file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::PidFile`] when removal fails.
    pub fn remove(&self) -> Result<(), SupervisorError> {
        let file_name = self.file_name()?;
        let dir = match Dir::open_ambient_dir(self.parent(), ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(SupervisorError::pid_file(self.parent(), &err)),
        };
        match dir.remove_file(file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SupervisorError::pid_file(&self.path, &err)),
        }
    }
}

/// Removes the PID file when dropped.
#[derive(Debug)]
pub struct PidFileGuard {
    pid_file: PidFile,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match self.pid_file.remove() {
            Ok(()) => debug!(path = %self.pid_file.path, "removed pid file"),
            Err(err) => warn!(error = %err, "failed to remove pid file"),
        }
    }
}

/// Whether a process with `pid` exists. A process owned by another user
/// still counts as alive.
#[must_use]
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Sends `signal` to `pid`.
///
/// # Errors
///
/// Returns [`SupervisorError::Kill`] when delivery fails.
pub fn send_signal(pid: i32, signal: Signal) -> Result<(), SupervisorError> {
    kill(Pid::from_raw(pid), signal).map_err(|errno| SupervisorError::Kill {
        pid,
        message: errno.desc().to_owned(),
    })
}
