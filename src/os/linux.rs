//! Linux OS driver.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::{Permissions, PermissionsExt};
use cap_std::fs_utf8::Dir;
use tracing::{debug, info};

use super::command::{CommandRunner, ProcessCommandRunner, run_checked};
use super::mounts::{MountEntry, MountTable, ProcMountTable, filter_mounts};
use super::OsDriver;
use super::probe::{FilesystemKind, probe_filesystem};
use crate::config::{LinuxConfig, Settings};
use crate::driver::DriverError;
use crate::registry::{RegistryBuilder, RegistryError};

/// Registry name of the Linux OS driver.
pub const LINUX_DRIVER_NAME: &str = "linux";

const NFS_MOUNT_HELPER: &str = "mount.nfs";

/// Registers the Linux OS driver.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] when the name is already taken.
pub fn register(
    builder: &mut RegistryBuilder<dyn OsDriver, Settings>,
) -> Result<(), RegistryError> {
    builder.register(LINUX_DRIVER_NAME, construct)
}

fn construct(settings: &Settings) -> Result<Box<dyn OsDriver>, DriverError> {
    let driver = LinuxDriver::from_config(settings.linux.clone())?;
    Ok(Box::new(driver))
}

/// OS driver for Linux hosts. Mounting and formatting shell out through a
/// [`CommandRunner`]; the mount table comes from a [`MountTable`].
pub struct LinuxDriver<R = ProcessCommandRunner, T = ProcMountTable> {
    config: LinuxConfig,
    runner: R,
    table: T,
    nfs_helper: String,
}

impl LinuxDriver {
    /// Creates a driver backed by real processes and `/proc`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownOs`] when not running on Linux.
    pub fn from_config(config: LinuxConfig) -> Result<Self, DriverError> {
        if !cfg!(target_os = "linux") {
            return Err(DriverError::UnknownOs {
                os: std::env::consts::OS.to_owned(),
            });
        }
        Ok(Self::with_parts(config, ProcessCommandRunner, ProcMountTable))
    }
}

impl<R: CommandRunner, T: MountTable> LinuxDriver<R, T> {
    /// Creates a driver from explicit collaborators.
    #[must_use]
    pub fn with_parts(config: LinuxConfig, runner: R, table: T) -> Self {
        Self {
            config,
            runner,
            table,
            nfs_helper: NFS_MOUNT_HELPER.to_owned(),
        }
    }

    /// Overrides the program whose presence signals NFS support.
    #[must_use]
    pub fn nfs_helper(mut self, program: impl Into<String>) -> Self {
        self.nfs_helper = program.into();
        self
    }

    fn mount_args(
        fs: FilesystemKind,
        device: &str,
        target: &str,
        options: &str,
        label: &str,
    ) -> Vec<OsString> {
        let mut opts: Vec<String> = options
            .split(',')
            .map(str::trim)
            .filter(|opt| !opt.is_empty())
            .map(str::to_owned)
            .collect();
        if !label.is_empty() {
            opts.push(format!("context=\"{label}\""));
        }
        if fs == FilesystemKind::Xfs {
            opts.push(String::from("nouuid"));
        }

        let mut args = vec![OsString::from("-t"), OsString::from(fs.as_str())];
        if !opts.is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(opts.join(",")));
        }
        args.push(OsString::from(device));
        args.push(OsString::from(target));
        args
    }

    fn network_mount_args(device: &str, target: &str, options: &str) -> Vec<OsString> {
        let mut args = Vec::with_capacity(4);
        if !options.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(options.trim()));
        }
        args.push(OsString::from(device));
        args.push(OsString::from(target));
        args
    }

    fn prepare_volume_root(&self, target: &str) -> Result<(), DriverError> {
        let relative = self.config.volume_root_path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(());
        }
        let root: Utf8PathBuf = Utf8Path::new(target).join(relative);
        let mounted = Dir::open_ambient_dir(target, ambient_authority())
            .map_err(|err| DriverError::io(target, &err))?;
        mounted
            .create_dir_all(relative)
            .map_err(|err| DriverError::io(root.as_str(), &err))?;
        mounted
            .set_permissions(relative, Permissions::from_mode(self.config.volume_file_mode))
            .map_err(|err| DriverError::io(root.as_str(), &err))?;
        debug!(
            path = %root,
            mode = %format!("{:o}", self.config.volume_file_mode),
            "prepared volume root"
        );
        Ok(())
    }
}

impl<R: CommandRunner, T: MountTable> OsDriver for LinuxDriver<R, T> {
    fn name(&self) -> &str {
        LINUX_DRIVER_NAME
    }

    fn mounts(&self, device: &str, mount_point: &str) -> Result<Vec<MountEntry>, DriverError> {
        filter_mounts(self.table.entries()?, device, mount_point)
    }

    fn unmount(&self, mount_point: &str) -> Result<(), DriverError> {
        run_checked(&self.runner, "umount", &[OsString::from(mount_point)])?;
        info!(mount_point, "unmounted");
        Ok(())
    }

    fn mount(
        &self,
        device: &str,
        target: &str,
        options: &str,
        label: &str,
    ) -> Result<(), DriverError> {
        if device.contains(':') {
            let args = Self::network_mount_args(device, target, options);
            run_checked(&self.runner, "mount", &args)?;
        } else {
            let fs = probe_filesystem(Utf8Path::new(device))?;
            let args = Self::mount_args(fs, device, target, options, label);
            run_checked(&self.runner, "mount", &args)?;
        }
        self.prepare_volume_root(target)?;
        info!(device, target, "mounted");
        Ok(())
    }

    fn format(&self, device: &str, kind: &str, overwrite: bool) -> Result<(), DriverError> {
        if !overwrite {
            match probe_filesystem(Utf8Path::new(device)) {
                Ok(existing) => {
                    info!(device, existing = %existing, "filesystem present, not formatting");
                    return Ok(());
                }
                Err(DriverError::UnknownFileSystem { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        let Some((program, flags)) =
            FilesystemKind::parse(kind).and_then(FilesystemKind::mkfs_command)
        else {
            return Err(DriverError::UnsupportedFileSystem {
                kind: kind.to_owned(),
            });
        };

        let mut args: Vec<OsString> = flags.iter().map(OsString::from).collect();
        args.push(OsString::from(device));
        run_checked(&self.runner, program, &args)?;
        info!(device, kind, "formatted");
        Ok(())
    }

    fn network_mounts_supported(&self) -> bool {
        which::which(&self.nfs_helper).is_ok()
    }
}
