//! Termination signals that end the daemon.

use std::fmt;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::info;

use super::SupervisorError;

/// The signal that asked the daemon to shut down.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownSignal {
    /// `SIGHUP`
    Hangup,
    /// `SIGINT`
    Interrupt,
    /// `SIGTERM`
    Terminate,
    /// `SIGQUIT`
    Quit,
}

impl ShutdownSignal {
    /// Conventional signal name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit => "SIGQUIT",
        }
    }

    const fn kind(self) -> SignalKind {
        match self {
            Self::Hangup => SignalKind::hangup(),
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Quit => SignalKind::quit(),
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn install(which: ShutdownSignal) -> Result<Signal, SupervisorError> {
    signal(which.kind()).map_err(|err| SupervisorError::Signal {
        signal: which.as_str(),
        message: err.to_string(),
    })
}

/// Installed handlers for `SIGHUP`, `SIGINT`, `SIGTERM` and `SIGQUIT`.
///
/// Once installed, these signals no longer terminate the process by default;
/// the supervisor decides what happens.
#[derive(Debug)]
pub struct ShutdownSignals {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
}

impl ShutdownSignals {
    /// Installs the handlers. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Signal`] when registration fails.
    pub fn install() -> Result<Self, SupervisorError> {
        Ok(Self {
            hangup: install(ShutdownSignal::Hangup)?,
            interrupt: install(ShutdownSignal::Interrupt)?,
            terminate: install(ShutdownSignal::Terminate)?,
            quit: install(ShutdownSignal::Quit)?,
        })
    }

    /// Waits for the first of the handled signals.
    pub async fn recv(&mut self) -> ShutdownSignal {
        let received = tokio::select! {
            _ = self.hangup.recv() => ShutdownSignal::Hangup,
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.quit.recv() => ShutdownSignal::Quit,
        };
        info!(signal = %received, "received shutdown signal");
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ShutdownSignal::Hangup, "SIGHUP")]
    #[case(ShutdownSignal::Interrupt, "SIGINT")]
    #[case(ShutdownSignal::Terminate, "SIGTERM")]
    #[case(ShutdownSignal::Quit, "SIGQUIT")]
    fn signals_display_conventional_names(#[case] which: ShutdownSignal, #[case] name: &str) {
        assert_eq!(which.to_string(), name);
    }
}
