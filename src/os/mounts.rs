//! Mount table access.

use procfs::process::Process;
use serde::Serialize;

use crate::driver::DriverError;

/// Path of the mount table the kernel exposes for this process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One row of the mount table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountEntry {
    /// Mounted device or remote export.
    pub source: String,
    /// Directory the source is mounted on.
    pub mount_point: String,
    /// Filesystem type.
    pub fs_type: String,
}

impl MountEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        mount_point: impl Into<String>,
        fs_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            mount_point: mount_point.into(),
            fs_type: fs_type.into(),
        }
    }
}

/// Source of mount table rows.
pub trait MountTable: Send + Sync {
    /// Returns every current mount.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] when the table cannot be read.
    fn entries(&self) -> Result<Vec<MountEntry>, DriverError>;
}

/// Reads the kernel's mount table through `procfs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcMountTable;

impl MountTable for ProcMountTable {
    fn entries(&self) -> Result<Vec<MountEntry>, DriverError> {
        let to_io = |err: procfs::ProcError| DriverError::Io {
            path: MOUNTINFO_PATH.to_owned(),
            message: err.to_string(),
        };
        let infos = Process::myself().and_then(|me| me.mountinfo()).map_err(to_io)?;
        Ok(infos
            .into_iter()
            .map(|info| MountEntry {
                source: info.mount_source.unwrap_or_default(),
                mount_point: info.mount_point.to_string_lossy().into_owned(),
                fs_type: info.fs_type,
            })
            .collect())
    }
}

impl MountTable for Vec<MountEntry> {
    fn entries(&self) -> Result<Vec<MountEntry>, DriverError> {
        Ok(self.clone())
    }
}

/// Selects mounts by source device or by mount point. Both filters empty
/// selects everything.
///
/// # Errors
///
/// Returns [`DriverError::ConflictingMountFilters`] when both filters are
/// given.
pub fn filter_mounts(
    entries: Vec<MountEntry>,
    device: &str,
    mount_point: &str,
) -> Result<Vec<MountEntry>, DriverError> {
    match (device.is_empty(), mount_point.is_empty()) {
        (true, true) => Ok(entries),
        (false, false) => Err(DriverError::ConflictingMountFilters {
            device: device.to_owned(),
            mount_point: mount_point.to_owned(),
        }),
        (false, true) => Ok(entries
            .into_iter()
            .filter(|entry| entry.source == device)
            .collect()),
        (true, false) => Ok(entries
            .into_iter()
            .filter(|entry| entry.mount_point == mount_point)
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn table() -> Vec<MountEntry> {
        vec![
            MountEntry::new("/dev/sda1", "/", "ext4"),
            MountEntry::new("nas:/ifs/volumes/v1", "/mnt/v1", "nfs"),
            MountEntry::new("/dev/sdb", "/mnt/data", "xfs"),
        ]
    }

    #[rstest]
    fn empty_filters_select_everything(table: Vec<MountEntry>) {
        let selected = filter_mounts(table.clone(), "", "").expect("filter");
        assert_eq!(selected, table);
    }

    #[rstest]
    fn device_filter_matches_source(table: Vec<MountEntry>) {
        let selected = filter_mounts(table, "nas:/ifs/volumes/v1", "").expect("filter");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.first().map(|e| e.mount_point.as_str()), Some("/mnt/v1"));
    }

    #[rstest]
    fn mount_point_filter_matches_target(table: Vec<MountEntry>) {
        let selected = filter_mounts(table, "", "/mnt/data").expect("filter");
        assert_eq!(selected.first().map(|e| e.source.as_str()), Some("/dev/sdb"));
    }

    #[rstest]
    fn both_filters_conflict(table: Vec<MountEntry>) {
        let err = filter_mounts(table, "/dev/sdb", "/mnt/data").expect_err("conflict");
        assert!(matches!(err, DriverError::ConflictingMountFilters { .. }));
    }
}
