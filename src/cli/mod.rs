//! Command-line interface definitions for the `hostvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `hostvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hostvol",
    about = "Host-resident storage orchestration daemon",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log filter directive, for example `info` or `hostvol=debug`.
    ///
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, value_name = "FILTER", default_value = "info")]
    pub(crate) log_level: String,
    /// Daemon operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Daemon operations.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Start the daemon.
    #[command(name = "start", about = "Start the daemon")]
    Start(StartArgs),
    /// Stop the running daemon.
    #[command(name = "stop", about = "Stop the running daemon")]
    Stop,
    /// Report whether the daemon is running.
    #[command(name = "status", about = "Report whether the daemon is running")]
    Status,
    /// Stop the daemon if it is running, then start it.
    #[command(name = "restart", about = "Stop the daemon if it is running, then start it")]
    Restart(StartArgs),
}

/// Arguments shared by `start` and `restart`.
#[derive(Debug, Args)]
pub(crate) struct StartArgs {
    /// Run in the foreground instead of detaching.
    #[arg(long, short = 'f', conflicts_with = "background")]
    pub(crate) foreground: bool,
    /// Detach from the terminal. This is the default.
    #[arg(long, short = 'b')]
    pub(crate) background: bool,
    /// Handshake socket of the launching process.
    #[arg(long, value_name = "SOCKET", hide = true)]
    pub(crate) client: Option<String>,
}
