//! The service run under the supervisor.
//!
//! [`VolumeService`] resolves the configured OS driver and storage drivers
//! through their registries, initialises each storage driver and reports
//! every failure on the init channel. Dropping the sender tells the
//! supervisor that initialisation is complete.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::Settings;
use crate::driver::{DriverContext, DriverError, StorageDriver};
use crate::isilon;
use crate::os::{self, OsDriver};
use crate::registry::{Registry, RegistryBuilder, RegistryError};
use crate::supervisor::ShutdownSignal;

/// Future returned by [`Service::run`].
pub type ServiceFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors reported on the init channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ServiceError {
    /// Building a registry or resolving a driver failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A storage driver failed its start-up checks.
    #[error("{driver} driver failed to initialise: {source}")]
    Init {
        /// Storage driver name.
        driver: String,
        /// Underlying failure.
        #[source]
        source: Box<DriverError>,
    },
}

/// A long-running service the supervisor can start and stop.
pub trait Service: Send {
    /// Runs the service.
    ///
    /// Implementations report initialisation failures on `init` and drop it
    /// once initialisation has finished, then run until `stop` yields.
    fn run(
        self: Box<Self>,
        init: mpsc::UnboundedSender<ServiceError>,
        stop: oneshot::Receiver<ShutdownSignal>,
    ) -> ServiceFuture;
}

/// Builds the OS driver registry.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] when two drivers share a name.
pub fn os_registry() -> Result<Registry<dyn OsDriver, Settings>, RegistryError> {
    let mut builder = RegistryBuilder::new("os");
    os::register(&mut builder)?;
    Ok(builder.build())
}

/// Builds the storage driver registry.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] when two drivers share a name.
pub fn storage_registry() -> Result<Registry<dyn StorageDriver, DriverContext>, RegistryError> {
    let mut builder = RegistryBuilder::new("storage");
    isilon::register(&mut builder)?;
    Ok(builder.build())
}

/// The host volume service.
#[derive(Debug)]
pub struct VolumeService {
    settings: Settings,
}

impl VolumeService {
    /// Creates the service from loaded settings.
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn os_driver(&self) -> Result<Arc<dyn OsDriver>, ServiceError> {
        let driver = os_registry()?.lookup(&self.settings.daemon.os_driver, &self.settings)?;
        Ok(Arc::from(driver))
    }

    async fn initialise(
        &self,
        init: &mpsc::UnboundedSender<ServiceError>,
    ) -> Vec<Box<dyn StorageDriver>> {
        let report = |err: ServiceError| {
            if init.send(err).is_err() {
                debug!("init channel closed before error was reported");
            }
        };

        let os = match self.os_driver() {
            Ok(os) => os,
            Err(err) => {
                report(err);
                return Vec::new();
            }
        };
        info!(driver = os.name(), "os driver ready");

        let registry = match storage_registry() {
            Ok(registry) => registry,
            Err(err) => {
                report(ServiceError::Registry(err));
                return Vec::new();
            }
        };
        let context = DriverContext {
            settings: self.settings.clone(),
            os,
        };

        let mut drivers = Vec::new();
        for name in self.settings.daemon.storage_driver_names() {
            let driver = match registry.lookup(&name, &context) {
                Ok(driver) => driver,
                Err(err) => {
                    report(ServiceError::Registry(err));
                    continue;
                }
            };
            match driver.init().await {
                Ok(()) => drivers.push(driver),
                Err(source) => report(ServiceError::Init {
                    driver: name,
                    source: Box::new(source),
                }),
            }
        }
        drivers
    }
}

impl Service for VolumeService {
    fn run(
        self: Box<Self>,
        init: mpsc::UnboundedSender<ServiceError>,
        stop: oneshot::Receiver<ShutdownSignal>,
    ) -> ServiceFuture {
        Box::pin(async move {
            let drivers = self.initialise(&init).await;
            drop(init);
            info!(storage_drivers = drivers.len(), "service initialised");

            match stop.await {
                Ok(signal) => info!(signal = %signal, "service stopping"),
                Err(_) => debug!("stop channel closed, service stopping"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DaemonConfig, IsilonConfig, LinuxConfig};

    fn settings(os_driver: &str, storage_drivers: &str) -> Settings {
        Settings {
            daemon: DaemonConfig {
                pid_file: String::from("/tmp/hostvol-test.pid"),
                os_driver: os_driver.to_owned(),
                storage_drivers: storage_drivers.to_owned(),
                handshake_timeout_secs: None,
                require_root: false,
            },
            linux: LinuxConfig::builtin(),
            isilon: IsilonConfig {
                endpoint: String::new(),
                insecure: false,
                user_name: String::new(),
                password: String::new(),
                volume_path: String::from("/ifs/volumes"),
                nfs_host: String::new(),
                subnet: None,
            },
        }
    }

    async fn init_errors(settings: Settings) -> Vec<ServiceError> {
        let (init_tx, mut init_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Box::new(VolumeService::new(settings)).run(init_tx, stop_rx));

        let mut errors = Vec::new();
        while let Some(err) = init_rx.recv().await {
            errors.push(err);
        }
        stop_tx
            .send(ShutdownSignal::Terminate)
            .unwrap_or_else(|_| panic!("service dropped stop receiver"));
        handle.await.unwrap_or_else(|err| panic!("join: {err}"));
        errors
    }

    #[test]
    fn registries_hold_builtin_drivers() {
        let os = os_registry().unwrap_or_else(|err| panic!("os registry: {err}"));
        let storage = storage_registry().unwrap_or_else(|err| panic!("storage registry: {err}"));
        assert_eq!(os.names(), vec!["linux"]);
        assert_eq!(storage.names(), vec!["isilon"]);
    }

    #[tokio::test]
    async fn unknown_os_driver_is_reported() {
        let errors = init_errors(settings("solaris", "isilon")).await;
        assert_eq!(
            errors,
            vec![ServiceError::Registry(RegistryError::NotFound {
                kind: "os",
                name: String::from("solaris"),
            })]
        );
    }

    #[tokio::test]
    async fn every_storage_failure_is_reported_in_order() {
        let errors = init_errors(settings("linux", "isilon,ceph")).await;
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors.first(),
            Some(ServiceError::Registry(RegistryError::Driver { name, .. })) if name == "isilon"
        ));
        assert!(matches!(
            errors.get(1),
            Some(ServiceError::Registry(RegistryError::NotFound { name, .. })) if name == "ceph"
        ));
    }
}
