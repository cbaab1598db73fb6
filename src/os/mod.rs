//! Local operating-system driver contract.
//!
//! OS drivers act only on the host they run on: they read the mount table,
//! mount and unmount devices or network exports, and format block devices.

pub mod command;
mod linux;
pub mod mounts;
pub mod probe;

pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use linux::{LINUX_DRIVER_NAME, LinuxDriver, register};
pub use mounts::{MountEntry, MountTable, ProcMountTable};
pub use probe::FilesystemKind;

use crate::driver::DriverError;

/// Operations an OS driver provides to storage drivers and the service.
pub trait OsDriver: Send + Sync {
    /// Lowercase driver name used for registry lookups.
    fn name(&self) -> &str;

    /// Lists mounts, optionally restricted to one source `device` or one
    /// `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ConflictingMountFilters`] when both filters are
    /// set, or an I/O error when the mount table cannot be read.
    fn mounts(&self, device: &str, mount_point: &str) -> Result<Vec<MountEntry>, DriverError>;

    /// Returns `true` when something is mounted on `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the mount table cannot be read.
    fn is_mounted(&self, mount_point: &str) -> Result<bool, DriverError> {
        Ok(!self.mounts("", mount_point)?.is_empty())
    }

    /// Unmounts `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CommandFailure`] when `umount` fails.
    fn unmount(&self, mount_point: &str) -> Result<(), DriverError>;

    /// Mounts `device` on `target`. Devices of the form `host:/path` are
    /// mounted as network exports.
    ///
    /// # Errors
    ///
    /// Returns probe, subprocess or I/O errors.
    fn mount(
        &self,
        device: &str,
        target: &str,
        options: &str,
        label: &str,
    ) -> Result<(), DriverError>;

    /// Formats `device` as `kind` when `overwrite` is set or no filesystem
    /// is present.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnsupportedFileSystem`] for kinds without a
    /// creation command, probe I/O errors, and subprocess failures.
    fn format(&self, device: &str, kind: &str, overwrite: bool) -> Result<(), DriverError>;

    /// Returns `true` when the host can mount network exports.
    fn network_mounts_supported(&self) -> bool;
}
