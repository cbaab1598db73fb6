//! Binary entry point for the `hostvol` daemon.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hostvol::{
    ConfigError, DaemonConfig, DaemonStatus, Settings, StartMode, StartOutcome, Supervisor,
    SupervisorError, VolumeService,
};

mod cli;

use cli::{Cli, Command, StartArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let child_args = vec![OsString::from(format!("--log-level={}", cli.log_level))];
    match cli.command {
        Command::Start(args) => {
            let settings = Settings::load_without_cli_args()?;
            let supervisor = Supervisor::new(&settings.daemon).with_child_args(child_args);
            let service = Box::new(VolumeService::new(settings));
            let outcome = supervisor.start(start_mode(&args), service).await?;
            write_stdout(&render_outcome(outcome));
            Ok(())
        }
        Command::Restart(args) => {
            let settings = Settings::load_without_cli_args()?;
            let supervisor = Supervisor::new(&settings.daemon).with_child_args(child_args);
            let service = Box::new(VolumeService::new(settings));
            let outcome = supervisor.restart(start_mode(&args), service).await?;
            write_stdout(&render_outcome(outcome));
            Ok(())
        }
        Command::Stop => {
            let pid = daemon_supervisor()?.stop()?;
            write_stdout(&format!("sent SIGTERM to hostvol at PID {pid}"));
            Ok(())
        }
        Command::Status => {
            let status = daemon_supervisor()?.status()?;
            write_stdout(&render_status(status));
            Ok(())
        }
    }
}

fn daemon_supervisor() -> Result<Supervisor, CliError> {
    let config = DaemonConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(Supervisor::new(&config))
}

fn start_mode(args: &StartArgs) -> StartMode {
    match &args.client {
        Some(socket) => StartMode::Child {
            socket: Utf8PathBuf::from(socket),
        },
        None if args.foreground && !args.background => StartMode::Foreground,
        None => StartMode::Background,
    }
}

fn render_outcome(outcome: StartOutcome) -> String {
    match outcome {
        StartOutcome::Finished => String::from("hostvol stopped"),
        StartOutcome::Detached { pid: Some(pid) } => format!("hostvol started at PID {pid}"),
        StartOutcome::Detached { pid: None } => String::from("hostvol started"),
    }
}

fn render_status(status: DaemonStatus) -> String {
    match status {
        DaemonStatus::Running { pid: Some(pid) } => format!("hostvol is running at PID {pid}"),
        DaemonStatus::Running { pid: None } => {
            String::from("hostvol is running (PID file unreadable)")
        }
        DaemonStatus::Stopped => String::from("hostvol is stopped"),
    }
}

fn write_stdout(message: &str) {
    writeln!(io::stdout(), "{message}").ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn args(foreground: bool, background: bool, client: Option<&str>) -> StartArgs {
        StartArgs {
            foreground,
            background,
            client: client.map(str::to_owned),
        }
    }

    #[rstest]
    #[case(args(false, false, None), StartMode::Background)]
    #[case(args(false, true, None), StartMode::Background)]
    #[case(args(true, false, None), StartMode::Foreground)]
    #[case(
        args(false, false, Some("/tmp/x.sock")),
        StartMode::Child { socket: Utf8PathBuf::from("/tmp/x.sock") }
    )]
    fn start_mode_follows_flags(#[case] input: StartArgs, #[case] expected: StartMode) {
        assert_eq!(start_mode(&input), expected);
    }

    #[test]
    fn client_flag_is_hidden_but_parsed() {
        let cli = Cli::try_parse_from(["hostvol", "start", "--client=/tmp/a.sock", "--log-level=debug"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(cli.log_level, "debug");
        let Command::Start(start) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(start.client.as_deref(), Some("/tmp/a.sock"));
    }

    #[test]
    fn background_flag_selects_detached_start() {
        let cli = Cli::try_parse_from(["hostvol", "restart", "-b"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        let Command::Restart(restart) = cli.command else {
            panic!("expected restart");
        };
        assert_eq!(start_mode(&restart), StartMode::Background);
    }

    #[test]
    fn foreground_and_background_conflict() {
        assert!(Cli::try_parse_from(["hostvol", "start", "-f", "-b"]).is_err());
    }

    #[rstest]
    #[case(DaemonStatus::Running { pid: Some(42) }, "hostvol is running at PID 42")]
    #[case(DaemonStatus::Running { pid: None }, "hostvol is running (PID file unreadable)")]
    #[case(DaemonStatus::Stopped, "hostvol is stopped")]
    fn status_lines(#[case] status: DaemonStatus, #[case] expected: &str) {
        assert_eq!(render_status(status), expected);
    }

    #[test]
    fn write_error_renders_supervisor_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Supervisor(SupervisorError::AlreadyStopped));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "hostvol is already stopped\n");
    }
}
