//! Storage driver capability contract.
//!
//! A storage driver adapts one backend to the volume lifecycle: discovery,
//! creation, removal and the attach/detach protocol. Every method returns a
//! boxed future so drivers can be stored behind `Box<dyn StorageDriver>` and
//! selected by name at start-up. Capabilities a backend lacks resolve to
//! [`DriverError::NotImplemented`] through the provided defaults.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::Settings;
use crate::os::OsDriver;

mod error;
pub mod instance;
mod types;

pub use error::DriverError;
pub use instance::{create_instance_id, parse_instance_id};
pub use types::{BlockDevice, Instance, Snapshot, Volume, VolumeAttachment, VolumeRequest};

/// Boxed future returned by storage driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Collaborators handed to storage driver constructors.
#[derive(Clone)]
pub struct DriverContext {
    /// Loaded daemon settings, including per-driver sections.
    pub settings: Settings,
    /// The OS driver selected for this host.
    pub os: Arc<dyn OsDriver>,
}

fn unsupported<'a, T: Send + 'a>(provider: &str, operation: &str) -> DriverFuture<'a, T> {
    let err = DriverError::not_implemented(provider, operation);
    Box::pin(async move { Err(err) })
}

/// Operations every storage backend exposes to the daemon.
pub trait StorageDriver: Send + Sync {
    /// Lowercase provider name used for registry lookups.
    fn name(&self) -> &str;

    /// Verifies the local attachment medium and backend connectivity.
    fn init(&self) -> DriverFuture<'_, ()>;

    /// Derives the identity of this host as seen by the backend.
    fn instance(&self) -> DriverFuture<'_, Instance>;

    /// Maps current backend exports to devices, with their holders.
    fn volume_mapping(&self) -> DriverFuture<'_, Vec<BlockDevice>>;

    /// Returns the volume matching `volume_id` or `volume_name`, or every
    /// volume when both are empty. A missing volume yields an empty list.
    fn volumes<'a>(&'a self, volume_id: &'a str, volume_name: &'a str)
    -> DriverFuture<'a, Vec<Volume>>;

    /// Creates a volume and returns its reconciled view.
    fn create_volume<'a>(&'a self, request: &'a VolumeRequest) -> DriverFuture<'a, Volume>;

    /// Clears the volume's quota and deletes it.
    fn remove_volume<'a>(&'a self, volume_id: &'a str) -> DriverFuture<'a, ()>;

    /// Lists attachments of `volume_id`, restricted to `instance_id` when it
    /// is non-empty.
    fn volume_attachments<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> DriverFuture<'a, Vec<VolumeAttachment>>;

    /// Grants `instance_id` access to `volume_id`. Existing holders are
    /// replaced only when `force` is set.
    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, Vec<VolumeAttachment>>;

    /// Revokes access to `volume_id`.
    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, ()>;

    /// Lists snapshots by volume, identifier or name.
    fn snapshots<'a>(
        &'a self,
        _volume_id: &'a str,
        _snapshot_id: &'a str,
        _snapshot_name: &'a str,
    ) -> DriverFuture<'a, Vec<Snapshot>> {
        unsupported(self.name(), "snapshots")
    }

    /// Takes a snapshot of a volume.
    fn create_snapshot<'a>(
        &'a self,
        _volume_id: &'a str,
        _snapshot_name: &'a str,
        _description: &'a str,
    ) -> DriverFuture<'a, Vec<Snapshot>> {
        unsupported(self.name(), "create_snapshot")
    }

    /// Deletes a snapshot.
    fn remove_snapshot<'a>(&'a self, _snapshot_id: &'a str) -> DriverFuture<'a, ()> {
        unsupported(self.name(), "remove_snapshot")
    }

    /// Copies a snapshot, possibly to another region.
    fn copy_snapshot<'a>(
        &'a self,
        _snapshot_id: &'a str,
        _destination_name: &'a str,
        _destination_region: &'a str,
    ) -> DriverFuture<'a, Snapshot> {
        unsupported(self.name(), "copy_snapshot")
    }

    /// Returns the next free local device name.
    fn next_device(&self) -> DriverFuture<'_, String> {
        unsupported(self.name(), "next_device")
    }
}
