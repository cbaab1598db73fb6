//! Behavioural tests for daemon supervision: single-instance enforcement,
//! init error relay, signal forwarding and the start-up handshake.

#[path = "common/scratch.rs"]
mod scratch_dir;

use std::future;
use std::os::unix::process::ExitStatusExt;
use std::process::{self, Command};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostvol::config::DaemonConfig;
use hostvol::driver::DriverError;
use hostvol::service::{Service, ServiceError, ServiceFuture};
use hostvol::supervisor::{
    DaemonStatus, HANDSHAKE_FAILURE, HANDSHAKE_SUCCESS, HandshakeClient, HandshakeListener,
    ShutdownSignal, StartMode, StartOutcome, Supervisor, SupervisorError, supervise,
};
use rstest::{fixture, rstest};
use tokio::sync::{mpsc, oneshot};

use scratch_dir::Scratch;

/// Service double whose behaviour is fixed at construction.
struct ScriptedService {
    init_errors: Vec<ServiceError>,
    wait_for_stop: bool,
    received: Arc<Mutex<Option<ShutdownSignal>>>,
}

impl ScriptedService {
    fn healthy(received: &Arc<Mutex<Option<ShutdownSignal>>>) -> Box<Self> {
        Box::new(Self {
            init_errors: Vec::new(),
            wait_for_stop: true,
            received: Arc::clone(received),
        })
    }

    fn failing(messages: &[&str]) -> Box<Self> {
        Box::new(Self {
            init_errors: messages
                .iter()
                .map(|message| ServiceError::Init {
                    driver: String::from("isilon"),
                    source: Box::new(DriverError::Config((*message).to_owned())),
                })
                .collect(),
            wait_for_stop: true,
            received: Arc::new(Mutex::new(None)),
        })
    }

    fn short_lived() -> Box<Self> {
        Box::new(Self {
            init_errors: Vec::new(),
            wait_for_stop: false,
            received: Arc::new(Mutex::new(None)),
        })
    }
}

impl Service for ScriptedService {
    fn run(
        self: Box<Self>,
        init: mpsc::UnboundedSender<ServiceError>,
        stop: oneshot::Receiver<ShutdownSignal>,
    ) -> ServiceFuture {
        let Self {
            init_errors,
            wait_for_stop,
            received,
        } = *self;
        Box::pin(async move {
            for err in init_errors {
                init.send(err).unwrap_or_else(|_| panic!("init receiver dropped"));
            }
            drop(init);
            if wait_for_stop && let Ok(signal) = stop.await {
                *received.lock().unwrap_or_else(|err| panic!("lock: {err}")) = Some(signal);
            }
        })
    }
}

fn own_pid() -> i32 {
    i32::try_from(process::id()).unwrap_or_else(|err| panic!("pid: {err}"))
}

fn exited_pid() -> i32 {
    let mut child = Command::new("true")
        .spawn()
        .unwrap_or_else(|err| panic!("spawn true: {err}"));
    let pid = i32::try_from(child.id()).unwrap_or_else(|err| panic!("pid: {err}"));
    child.wait().unwrap_or_else(|err| panic!("wait: {err}"));
    pid
}

fn write_pid(scratch: &Scratch, pid: i32) {
    let path = scratch.pid_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create run dir: {err}"));
    }
    std::fs::write(&path, format!("{pid}\n")).unwrap_or_else(|err| panic!("write pid: {err}"));
}

#[fixture]
fn scratch() -> Scratch {
    Scratch::new()
}

fn supervisor(scratch: &Scratch) -> Supervisor {
    let config = DaemonConfig {
        pid_file: scratch.pid_file().to_string(),
        os_driver: String::from("linux"),
        storage_drivers: String::from("isilon"),
        handshake_timeout_secs: Some(5),
        require_root: false,
    };
    Supervisor::new(&config)
        .with_socket_dir(scratch.root.clone())
        .with_stop_timeout(Duration::from_secs(2))
}

#[rstest]
#[tokio::test]
async fn live_pid_blocks_second_start(scratch: Scratch) {
    write_pid(&scratch, own_pid());
    let daemon = supervisor(&scratch);

    let err = daemon
        .start(StartMode::Foreground, ScriptedService::short_lived())
        .await
        .expect_err("second instance must be rejected");

    assert_eq!(err, SupervisorError::AlreadyRunning { pid: own_pid() });
    assert!(scratch.pid_file().exists());
}

#[rstest]
fn stale_pid_file_is_removed(scratch: Scratch) {
    write_pid(&scratch, exited_pid());
    let daemon = supervisor(&scratch);

    daemon
        .ensure_single_instance()
        .unwrap_or_else(|err| panic!("stale pid should be cleared: {err}"));
    assert!(!scratch.pid_file().exists());
}

#[rstest]
#[tokio::test]
async fn init_failure_stops_and_removes_pid_file(scratch: Scratch) {
    let daemon = supervisor(&scratch);

    let err = daemon
        .start(StartMode::Foreground, ScriptedService::failing(&["first", "second"]))
        .await
        .expect_err("init errors must fail the start");

    let SupervisorError::Initialization { errors } = err else {
        panic!("expected Initialization error, got {err:?}");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors.first().is_some_and(|e| e.contains("first")));
    assert!(errors.get(1).is_some_and(|e| e.contains("second")));
    assert!(!scratch.pid_file().exists());
}

#[tokio::test]
async fn shutdown_signal_is_forwarded_once() {
    let received = Arc::new(Mutex::new(None));

    let outcome = supervise(ScriptedService::healthy(&received), None, async {
        ShutdownSignal::Interrupt
    })
    .await
    .unwrap_or_else(|err| panic!("supervise: {err}"));

    assert_eq!(outcome, StartOutcome::Finished);
    assert_eq!(
        *received.lock().unwrap_or_else(|err| panic!("lock: {err}")),
        Some(ShutdownSignal::Interrupt)
    );
}

#[tokio::test]
async fn service_exit_ends_supervision_without_signal() {
    let outcome = supervise(ScriptedService::short_lived(), None, future::pending())
        .await
        .unwrap_or_else(|err| panic!("supervise: {err}"));
    assert_eq!(outcome, StartOutcome::Finished);
}

#[rstest]
#[tokio::test]
async fn handshake_reports_init_outcome(scratch: Scratch) {
    let listener =
        HandshakeListener::bind_in(&scratch.root).unwrap_or_else(|err| panic!("bind: {err}"));
    let client = HandshakeClient::connect(listener.path())
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    let (status, result) = tokio::join!(
        listener.receive(Some(Duration::from_secs(5))),
        supervise(
            ScriptedService::failing(&["unreachable"]),
            Some(client),
            future::pending()
        )
    );

    assert_eq!(status, Ok(HANDSHAKE_FAILURE));
    assert!(matches!(result, Err(SupervisorError::Initialization { .. })));
}

#[rstest]
#[tokio::test]
async fn healthy_child_reports_success(scratch: Scratch) {
    let listener =
        HandshakeListener::bind_in(&scratch.root).unwrap_or_else(|err| panic!("bind: {err}"));
    let client = HandshakeClient::connect(listener.path())
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    let (status, result) = tokio::join!(
        listener.receive(Some(Duration::from_secs(5))),
        supervise(ScriptedService::short_lived(), Some(client), future::pending())
    );

    assert_eq!(status, Ok(HANDSHAKE_SUCCESS));
    assert_eq!(result, Ok(StartOutcome::Finished));
}

#[rstest]
fn status_follows_pid_file_presence(scratch: Scratch) {
    let daemon = supervisor(&scratch);
    assert_eq!(daemon.status(), Ok(DaemonStatus::Stopped));

    write_pid(&scratch, exited_pid());
    let pid = daemon.pid_file().read().ok();
    assert_eq!(daemon.status(), Ok(DaemonStatus::Running { pid }));

    std::fs::write(scratch.pid_file(), "garbage")
        .unwrap_or_else(|err| panic!("overwrite pid: {err}"));
    assert_eq!(daemon.status(), Ok(DaemonStatus::Running { pid: None }));
}

#[rstest]
fn stop_without_pid_file_reports_already_stopped(scratch: Scratch) {
    assert_eq!(
        supervisor(&scratch).stop(),
        Err(SupervisorError::AlreadyStopped)
    );
}

#[rstest]
fn stop_sends_sigterm_to_recorded_pid(scratch: Scratch) {
    let mut child = Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap_or_else(|err| panic!("spawn sleep: {err}"));
    let pid = i32::try_from(child.id()).unwrap_or_else(|err| panic!("pid: {err}"));
    write_pid(&scratch, pid);

    let signalled = supervisor(&scratch)
        .stop()
        .unwrap_or_else(|err| panic!("stop: {err}"));
    let status = child.wait().unwrap_or_else(|err| panic!("wait: {err}"));

    assert_eq!(signalled, pid);
    assert_eq!(status.signal(), Some(15));
    assert!(scratch.pid_file().exists(), "stop must not remove the pid file");
}

#[rstest]
#[tokio::test]
async fn restart_waits_for_previous_instance(scratch: Scratch) {
    let mut child = Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap_or_else(|err| panic!("spawn sleep: {err}"));
    let pid = i32::try_from(child.id()).unwrap_or_else(|err| panic!("pid: {err}"));
    write_pid(&scratch, pid);
    let reaper = std::thread::spawn(move || child.wait());

    let err = supervisor(&scratch)
        .restart(
            StartMode::Foreground,
            ScriptedService::failing(&["after restart"]),
        )
        .await
        .expect_err("restarted service fails init");

    reaper
        .join()
        .unwrap_or_else(|_| panic!("reaper panicked"))
        .unwrap_or_else(|err| panic!("wait: {err}"));
    assert!(matches!(err, SupervisorError::Initialization { .. }));
    assert!(!scratch.pid_file().exists());
}
