//! Filesystem detection by on-disk signature.

use std::fmt;
use std::io::Read;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::driver::DriverError;

/// Filesystems the prober recognises.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FilesystemKind {
    /// B-tree filesystem.
    Btrfs,
    /// Fourth extended filesystem.
    Ext4,
    /// XFS.
    Xfs,
}

impl FilesystemKind {
    /// Name as passed to `mount -t`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Btrfs => "btrfs",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
        }
    }

    /// Parses a filesystem name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "btrfs" => Some(Self::Btrfs),
            "ext4" => Some(Self::Ext4),
            "xfs" => Some(Self::Xfs),
            _ => None,
        }
    }

    /// Creation command for this kind, if the daemon can format it.
    #[must_use]
    pub const fn mkfs_command(self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            Self::Ext4 => Some(("mkfs.ext4", &["-F"])),
            Self::Xfs => Some(("mkfs.xfs", &["-f"])),
            Self::Btrfs => None,
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Signature {
    kind: FilesystemKind,
    offset: usize,
    magic: &'static [u8],
}

const SIGNATURES: [Signature; 3] = [
    Signature {
        kind: FilesystemKind::Btrfs,
        offset: 0x1_0040,
        magic: b"_BHRfS_M",
    },
    Signature {
        kind: FilesystemKind::Ext4,
        offset: 0x438,
        magic: &[0x53, 0xEF],
    },
    Signature {
        kind: FilesystemKind::Xfs,
        offset: 0,
        magic: b"XFSB",
    },
];

/// Number of leading bytes every probe reads.
#[must_use]
pub fn probe_window() -> usize {
    SIGNATURES
        .iter()
        .map(|sig| sig.offset + sig.magic.len())
        .max()
        .unwrap_or_default()
}

/// Matches `bytes`, read from the start of `device`, against the signature
/// table.
///
/// # Errors
///
/// Returns [`DriverError::ShortRead`] when fewer than [`probe_window`]
/// bytes are supplied and [`DriverError::UnknownFileSystem`] when nothing
/// matches.
pub fn probe_bytes(device: &str, bytes: &[u8]) -> Result<FilesystemKind, DriverError> {
    let window = probe_window();
    if bytes.len() < window {
        return Err(DriverError::ShortRead {
            device: device.to_owned(),
            expected: window,
            actual: bytes.len(),
        });
    }
    SIGNATURES
        .iter()
        .find(|sig| bytes.get(sig.offset..sig.offset + sig.magic.len()) == Some(sig.magic))
        .map(|sig| sig.kind)
        .ok_or_else(|| DriverError::UnknownFileSystem {
            device: device.to_owned(),
        })
}

/// Reads the probe window from `device` and identifies its filesystem.
///
/// # Errors
///
/// Returns [`DriverError::Io`] when the device cannot be opened or read,
/// plus the [`probe_bytes`] errors.
pub fn probe_filesystem(device: &Utf8Path) -> Result<FilesystemKind, DriverError> {
    let (Some(parent), Some(name)) = (device.parent(), device.file_name()) else {
        return Err(DriverError::Io {
            path: device.to_string(),
            message: String::from("device path has no file name"),
        });
    };
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| DriverError::io(device.as_str(), &err))?;
    let file = dir
        .open(name)
        .map_err(|err| DriverError::io(device.as_str(), &err))?;

    let window = probe_window();
    let limit = u64::try_from(window).unwrap_or(u64::MAX);
    let mut bytes = Vec::with_capacity(window);
    file.take(limit)
        .read_to_end(&mut bytes)
        .map_err(|err| DriverError::io(device.as_str(), &err))?;
    probe_bytes(device.as_str(), &bytes)
}
