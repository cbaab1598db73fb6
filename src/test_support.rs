//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::driver::DriverError;
use crate::isilon::{ClientError, ClientFuture, NasClient, NasExport, NasQuota, NasVolume};
use crate::os::command::{CommandOutput, CommandRunner};
use crate::os::mounts::{MountEntry, filter_mounts};
use crate::os::OsDriver;

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same script and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, DriverError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| DriverError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug, Default)]
struct NasState {
    volumes: BTreeSet<String>,
    exports: BTreeMap<String, (u64, Vec<String>)>,
    quotas: BTreeMap<String, u64>,
    next_export_id: u64,
    failures: BTreeMap<&'static str, ClientError>,
    calls: Vec<String>,
}

impl NasState {
    fn enter(&mut self, operation: &'static str) -> Result<(), ClientError> {
        self.calls.push(operation.to_owned());
        self.failures.get(operation).cloned().map_or(Ok(()), Err)
    }

    fn export_mut(&mut self, name: &str) -> Result<&mut (u64, Vec<String>), ClientError> {
        self.exports
            .get_mut(name)
            .ok_or_else(|| not_found("export", name))
    }
}

fn not_found(resource: &'static str, name: &str) -> ClientError {
    ClientError::NotFound {
        resource,
        name: name.to_owned(),
    }
}

fn respond<'a, T: Send + 'a>(result: Result<T, ClientError>) -> ClientFuture<'a, T> {
    Box::pin(future::ready(result))
}

/// In-memory [`NasClient`] with failure injection.
///
/// Clones share state, so a test can keep a handle for assertions after
/// moving one into a driver.
#[derive(Clone, Debug)]
pub struct MemoryNasClient {
    state: Arc<StdMutex<NasState>>,
    volume_path: String,
}

impl Default for MemoryNasClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNasClient {
    /// Creates an empty backend rooted at `/ifs/volumes`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(NasState::default())),
            volume_path: String::from("/ifs/volumes"),
        }
    }

    /// Adds a volume.
    #[must_use]
    pub fn with_volume(self, name: &str) -> Self {
        lock(&self.state).volumes.insert(name.to_owned());
        self
    }

    /// Adds a quota in bytes.
    #[must_use]
    pub fn with_quota(self, name: &str, size_bytes: u64) -> Self {
        lock(&self.state).quotas.insert(name.to_owned(), size_bytes);
        self
    }

    /// Exports a volume to `clients`.
    #[must_use]
    pub fn with_export(self, name: &str, clients: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            state.next_export_id += 1;
            let id = state.next_export_id;
            state.exports.insert(
                name.to_owned(),
                (id, clients.iter().map(|c| (*c).to_owned()).collect()),
            );
        }
        self
    }

    /// Makes every call to `operation` fail with `error`.
    pub fn fail(&self, operation: &'static str, error: ClientError) {
        lock(&self.state).failures.insert(operation, error);
    }

    /// Operation names invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Current client list of a volume's export.
    #[must_use]
    pub fn clients_of(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.state)
            .exports
            .get(name)
            .map(|(_, clients)| clients.clone())
    }

    /// Whether the volume exists.
    #[must_use]
    pub fn has_volume(&self, name: &str) -> bool {
        lock(&self.state).volumes.contains(name)
    }

    /// Current quota of a volume in bytes.
    #[must_use]
    pub fn quota_of(&self, name: &str) -> Option<u64> {
        lock(&self.state).quotas.get(name).copied()
    }
}

impl NasClient for MemoryNasClient {
    fn volumes(&self) -> ClientFuture<'_, Vec<NasVolume>> {
        let mut state = lock(&self.state);
        let result = state.enter("volumes").map(|()| {
            state
                .volumes
                .iter()
                .map(|name| NasVolume { name: name.clone() })
                .collect()
        });
        respond(result)
    }

    fn volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume> {
        let mut state = lock(&self.state);
        let result = state.enter("volume").and_then(|()| {
            if state.volumes.contains(name) {
                Ok(NasVolume {
                    name: name.to_owned(),
                })
            } else {
                Err(not_found("volume", name))
            }
        });
        respond(result)
    }

    fn create_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume> {
        let mut state = lock(&self.state);
        let result = state.enter("create_volume").map(|()| {
            state.volumes.insert(name.to_owned());
            NasVolume {
                name: name.to_owned(),
            }
        });
        respond(result)
    }

    fn delete_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("delete_volume").and_then(|()| {
            if state.volumes.remove(name) {
                state.exports.remove(name);
                Ok(())
            } else {
                Err(not_found("volume", name))
            }
        });
        respond(result)
    }

    fn volume_path(&self, name: &str) -> String {
        format!("{}/{name}", self.volume_path)
    }

    fn exports(&self) -> ClientFuture<'_, Vec<NasExport>> {
        let mut state = lock(&self.state);
        let result = state.enter("exports").map(|()| {
            state
                .exports
                .iter()
                .map(|(name, (id, clients))| NasExport {
                    id: *id,
                    volume: name.clone(),
                    path: self.volume_path(name),
                    clients: clients.clone(),
                })
                .collect()
        });
        respond(result)
    }

    fn export_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("export_volume").and_then(|()| {
            if !state.volumes.contains(name) {
                return Err(not_found("volume", name));
            }
            if !state.exports.contains_key(name) {
                state.next_export_id += 1;
                let id = state.next_export_id;
                state.exports.insert(name.to_owned(), (id, Vec::new()));
            }
            Ok(())
        });
        respond(result)
    }

    fn unexport_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("unexport_volume").and_then(|()| {
            state
                .exports
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("export", name))
        });
        respond(result)
    }

    fn export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Vec<String>> {
        let mut state = lock(&self.state);
        let result = state
            .enter("export_clients")
            .and_then(|()| state.export_mut(name).map(|(_, clients)| clients.clone()));
        respond(result)
    }

    fn set_export_clients<'a>(
        &'a self,
        name: &'a str,
        clients: &'a [String],
    ) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("set_export_clients").and_then(|()| {
            let export = state.export_mut(name)?;
            export.1 = clients.to_vec();
            Ok(())
        });
        respond(result)
    }

    fn clear_export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("clear_export_clients").and_then(|()| {
            state.export_mut(name)?.1.clear();
            Ok(())
        });
        respond(result)
    }

    fn quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasQuota> {
        let mut state = lock(&self.state);
        let result = state.enter("quota").and_then(|()| {
            state
                .quotas
                .get(name)
                .map(|bytes| NasQuota {
                    path: self.volume_path(name),
                    hard_threshold: Some(*bytes),
                })
                .ok_or_else(|| not_found("quota", name))
        });
        respond(result)
    }

    fn set_quota<'a>(&'a self, name: &'a str, size_bytes: u64) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("set_quota").map(|()| {
            state.quotas.insert(name.to_owned(), size_bytes);
        });
        respond(result)
    }

    fn clear_quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = state.enter("clear_quota").and_then(|()| {
            state
                .quotas
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("quota", name))
        });
        respond(result)
    }
}

/// OS driver double holding an in-memory mount table.
#[derive(Clone, Debug)]
pub struct FakeOsDriver {
    mounts: Arc<StdMutex<Vec<MountEntry>>>,
    calls: Arc<StdMutex<Vec<String>>>,
    network_mounts: bool,
}

impl Default for FakeOsDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOsDriver {
    /// Creates a driver with an empty mount table and NFS support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts: Arc::new(StdMutex::new(Vec::new())),
            calls: Arc::new(StdMutex::new(Vec::new())),
            network_mounts: true,
        }
    }

    /// Reports the NFS mount helper as missing.
    #[must_use]
    pub const fn without_network_mounts(mut self) -> Self {
        self.network_mounts = false;
        self
    }

    /// Adds a mount table row.
    #[must_use]
    pub fn with_mount(self, source: &str, mount_point: &str) -> Self {
        lock(&self.mounts).push(MountEntry::new(source, mount_point, "nfs"));
        self
    }

    /// Operations invoked so far, rendered as `op arg...`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl OsDriver for FakeOsDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn mounts(&self, device: &str, mount_point: &str) -> Result<Vec<MountEntry>, DriverError> {
        filter_mounts(lock(&self.mounts).clone(), device, mount_point)
    }

    fn unmount(&self, mount_point: &str) -> Result<(), DriverError> {
        lock(&self.calls).push(format!("unmount {mount_point}"));
        lock(&self.mounts).retain(|entry| entry.mount_point != mount_point);
        Ok(())
    }

    fn mount(
        &self,
        device: &str,
        target: &str,
        _options: &str,
        _label: &str,
    ) -> Result<(), DriverError> {
        lock(&self.calls).push(format!("mount {device} {target}"));
        lock(&self.mounts).push(MountEntry::new(device, target, "nfs"));
        Ok(())
    }

    fn format(&self, device: &str, kind: &str, overwrite: bool) -> Result<(), DriverError> {
        lock(&self.calls).push(format!("format {device} {kind} {overwrite}"));
        Ok(())
    }

    fn network_mounts_supported(&self) -> bool {
        self.network_mounts
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
