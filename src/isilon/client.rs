//! Backend boundary of the Isilon driver.
//!
//! The driver only needs volume containers, NFS exports with their client
//! lists, and directory quotas. [`NasClient`] captures exactly that surface
//! so the attach protocol can be exercised against an in-memory backend.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by [`NasClient`] operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Errors raised by the backend client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// The addressed object does not exist.
    #[error("{resource} {name} not found")]
    NotFound {
        /// Kind of object, for example `volume` or `quota`.
        resource: &'static str,
        /// Name that was looked up.
        name: String,
    },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend rejected the request.
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Returns `true` for [`ClientError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A volume container on the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NasVolume {
    /// Container name, which doubles as the volume identifier.
    pub name: String,
}

/// An NFS export of one volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NasExport {
    /// Backend export identifier.
    pub id: u64,
    /// Volume the export belongs to.
    pub volume: String,
    /// Exported cluster path.
    pub path: String,
    /// Client addresses allowed to mount the export.
    pub clients: Vec<String>,
}

/// A directory quota.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NasQuota {
    /// Cluster path the quota applies to.
    pub path: String,
    /// Hard threshold in bytes.
    pub hard_threshold: Option<u64>,
}

/// Operations the Isilon driver performs against the cluster.
pub trait NasClient: Send + Sync {
    /// Lists every volume under the configured volume path.
    fn volumes(&self) -> ClientFuture<'_, Vec<NasVolume>>;

    /// Fetches one volume; [`ClientError::NotFound`] when absent.
    fn volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume>;

    /// Creates a volume container.
    fn create_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume>;

    /// Deletes a volume container and its contents.
    fn delete_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Cluster path of the named volume.
    fn volume_path(&self, name: &str) -> String;

    /// Lists exports of volumes under the configured volume path.
    fn exports(&self) -> ClientFuture<'_, Vec<NasExport>>;

    /// Exports a volume. Exporting an exported volume is a no-op.
    fn export_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Removes a volume's export; [`ClientError::NotFound`] when absent.
    fn unexport_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Client addresses of a volume's export.
    fn export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Vec<String>>;

    /// Replaces the client list of a volume's export.
    fn set_export_clients<'a>(
        &'a self,
        name: &'a str,
        clients: &'a [String],
    ) -> ClientFuture<'a, ()>;

    /// Empties the client list of a volume's export.
    fn clear_export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Fetches the quota of a volume; [`ClientError::NotFound`] when unset.
    fn quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasQuota>;

    /// Sets a hard quota of `size_bytes` on a volume.
    fn set_quota<'a>(&'a self, name: &'a str, size_bytes: u64) -> ClientFuture<'a, ()>;

    /// Removes the quota of a volume; [`ClientError::NotFound`] when unset.
    fn clear_quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;
}
