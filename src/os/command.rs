//! Subprocess seam used by the OS driver.

use std::ffi::OsString;
use std::process::Command;

use shell_escape::unix::escape;
use tracing::debug;

use crate::driver::DriverError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, DriverError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, DriverError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| DriverError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Renders a command line with shell quoting, for logs and error messages.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        let text = arg.to_string_lossy();
        rendered.push_str(escape(text).as_ref());
    }
    rendered
}

/// Runs a command and converts a non-zero exit into
/// [`DriverError::CommandFailure`].
///
/// # Errors
///
/// Returns [`DriverError::Spawn`] or [`DriverError::CommandFailure`].
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[OsString],
) -> Result<CommandOutput, DriverError> {
    let command = render_command(program, args);
    debug!(command = %command, "running command");
    let output = runner.run(program, args)?;
    if output.is_success() {
        return Ok(output);
    }
    Err(DriverError::CommandFailure {
        command,
        code: output.code,
        stderr: output.stderr.trim().to_owned(),
    })
}
