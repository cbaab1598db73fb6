//! Error taxonomy shared by OS and storage drivers.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by OS drivers, storage drivers and the reconciliation
/// helpers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when an operation needs a volume identifier and none was given.
    #[error("missing volume id")]
    MissingVolumeId,
    /// Raised when an operation needs an instance identifier and none was given.
    #[error("missing instance id")]
    MissingInstanceId,
    /// Raised when the addressed volume does not exist on the backend.
    #[error("no volumes returned for {volume_id}")]
    NoVolumesReturned {
        /// Identifier that matched nothing.
        volume_id: String,
    },
    /// Raised when no known filesystem signature matches the device.
    #[error("unknown filesystem on {device}")]
    UnknownFileSystem {
        /// Device that was probed.
        device: String,
    },
    /// Raised when the OS driver does not support the running platform.
    #[error("unsupported operating system: {os}")]
    UnknownOs {
        /// Platform the process is running on.
        os: String,
    },
    /// Raised when a backend lacks a capability.
    #[error("{provider} does not implement {operation}")]
    NotImplemented {
        /// Provider that was asked.
        provider: String,
        /// Operation that is unavailable.
        operation: String,
    },
    /// Raised when another host already holds the volume and force was not set.
    #[error("volume {volume_id} is already attached to another host ({clients})")]
    AlreadyAttached {
        /// Volume the caller tried to attach.
        volume_id: String,
        /// Current holders, comma separated.
        clients: String,
    },
    /// Raised when formatting is requested for a kind without a creation command.
    #[error("unsupported filesystem: {kind}")]
    UnsupportedFileSystem {
        /// Requested filesystem kind.
        kind: String,
    },
    /// Raised when both mount filters are given at once.
    #[error("filter by device ({device}) or mount point ({mount_point}), not both")]
    ConflictingMountFilters {
        /// Device filter.
        device: String,
        /// Mount point filter.
        mount_point: String,
    },
    /// Raised when a device is shorter than the probe window.
    #[error("short read on {device}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Device that was probed.
        device: String,
        /// Bytes required by the signature table.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },
    /// Wraps local filesystem failures.
    #[error("i/o error on {path}: {message}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a subprocess cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a subprocess exits unsuccessfully.
    #[error("{command} exited with status {code:?}: {stderr}")]
    CommandFailure {
        /// Rendered command line.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Wraps opaque backend transport or API failures with context.
    #[error("{provider} {operation} failed for {target}: {message}")]
    Backend {
        /// Provider name.
        provider: String,
        /// Operation that failed.
        operation: String,
        /// Volume or export being addressed.
        target: String,
        /// Backend error message.
        message: String,
    },
    /// Raised when driver configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the configured subnet cannot be parsed.
    #[error("invalid subnet {subnet}: {message}")]
    InvalidSubnet {
        /// Configured CIDR.
        subnet: String,
        /// Parser message.
        message: String,
    },
    /// Raised when local interfaces cannot be enumerated.
    #[error("failed to enumerate network interfaces: {0}")]
    NetworkEnumeration(String),
    /// Raised when no usable local address identifies this host.
    #[error("no non-loopback IPv4 address found (subnet filter: {subnet})")]
    NoLocalAddress {
        /// Subnet restriction in force, or `none`.
        subnet: String,
    },
    /// Raised when the local medium a driver attaches through is absent.
    #[error("{provider} requires {medium}, which was not found on this host")]
    AttachmentMediumMissing {
        /// Provider name.
        provider: String,
        /// Missing medium, for example the NFS mount helper.
        medium: String,
    },
    /// Raised when a requested size cannot be represented in bytes.
    #[error("volume size {size_gb} GiB is out of range")]
    InvalidSize {
        /// Requested size in gigabytes.
        size_gb: u64,
    },
}

impl DriverError {
    /// Builds a [`DriverError::NotImplemented`] for `operation`.
    #[must_use]
    pub fn not_implemented(provider: &str, operation: &str) -> Self {
        Self::NotImplemented {
            provider: provider.to_owned(),
            operation: operation.to_owned(),
        }
    }

    /// Builds a [`DriverError::Io`] from a standard I/O error.
    #[must_use]
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for DriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
