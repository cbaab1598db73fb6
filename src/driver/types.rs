//! Data model exchanged between drivers and their callers.

use serde::{Deserialize, Serialize};

/// A backend-managed storage unit.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Human-friendly name.
    pub name: String,
    /// Backend-unique identifier.
    pub volume_id: String,
    /// Capacity in gigabytes; zero when no quota is set.
    pub size_gb: u64,
    /// Availability zone, when the backend has one.
    pub availability_zone: String,
    /// Network-reachable path of the volume.
    pub network_name: String,
    /// Attachments observed during the same reconciliation pass.
    pub attachments: Vec<VolumeAttachment>,
}

/// One export or device as seen from the backend and the local OS.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    /// Provider that produced the record.
    pub provider_name: String,
    /// Instance identifier of the current holders.
    pub instance_id: String,
    /// Region, when the backend has one.
    pub region: String,
    /// Name used to mount the device, for example `host:/ifs/volumes/v1`.
    pub device_name: String,
    /// Volume the device belongs to.
    pub volume_id: String,
    /// Backend network path.
    pub network_name: String,
    /// Backend-reported status.
    pub status: String,
    /// Local mount point, when the device is mounted on this host.
    pub mount_point: Option<String>,
}

/// Association between a volume and an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    /// Attached volume.
    pub volume_id: String,
    /// Holder of the attachment.
    pub instance_id: String,
    /// Device name the holder mounts.
    pub device_name: String,
    /// `mounted` or `exported`.
    pub status: String,
}

/// A compute node as identified by a storage driver.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Provider that derived the identity.
    pub provider_name: String,
    /// Identifier, possibly a delimited list of addresses.
    pub instance_id: String,
    /// Region, when known.
    pub region: String,
    /// Display name.
    pub name: String,
}

/// A point-in-time copy of a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Backend snapshot identifier.
    pub snapshot_id: String,
    /// Source volume.
    pub volume_id: String,
    /// Snapshot name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

/// Parameters required to create a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Volume name.
    pub name: String,
    /// Requested size in gigabytes.
    pub size_gb: u64,
    /// Target availability zone.
    pub availability_zone: Option<String>,
    /// Backend volume type.
    pub volume_type: Option<String>,
    /// Provisioned IOPS.
    pub iops: Option<u64>,
    /// Snapshot to restore from.
    pub snapshot_id: Option<String>,
}

impl VolumeRequest {
    /// Creates a new request, trimming the name.
    #[must_use]
    pub fn new(name: impl Into<String>, size_gb: u64) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            size_gb,
            ..Self::default()
        }
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn availability_zone(mut self, value: impl Into<String>) -> Self {
        self.availability_zone = Some(value.into().trim().to_owned());
        self
    }

    /// Sets the backend volume type.
    #[must_use]
    pub fn volume_type(mut self, value: impl Into<String>) -> Self {
        self.volume_type = Some(value.into().trim().to_owned());
        self
    }

    /// Sets provisioned IOPS.
    #[must_use]
    pub const fn iops(mut self, value: u64) -> Self {
        self.iops = Some(value);
        self
    }

    /// Sets the snapshot to restore from.
    #[must_use]
    pub fn snapshot_id(mut self, value: impl Into<String>) -> Self {
        self.snapshot_id = Some(value.into().trim().to_owned());
        self
    }
}
