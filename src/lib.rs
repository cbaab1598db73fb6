//! Core library for the `hostvol` storage orchestration daemon.
//!
//! The crate provides a registry of pluggable drivers, an OS driver that
//! mounts, probes and formats local devices, an NFS export storage driver
//! for Isilon clusters whose volume views are reconciled against observed
//! exports, and a supervisor that runs the whole thing as a single-instance
//! daemon.

pub mod config;
pub mod driver;
pub mod isilon;
pub mod os;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod test_support;

pub use config::{ConfigError, DaemonConfig, IsilonConfig, LinuxConfig, Settings};
pub use driver::{
    BlockDevice, DriverContext, DriverError, Instance, Snapshot, StorageDriver, Volume,
    VolumeAttachment, VolumeRequest,
};
pub use isilon::{IsilonDriver, NasClient, PapiClient};
pub use os::{LinuxDriver, OsDriver};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use service::{Service, ServiceError, VolumeService};
pub use supervisor::{
    DaemonStatus, ShutdownSignal, StartMode, StartOutcome, Supervisor, SupervisorError,
};
