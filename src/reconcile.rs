//! Joins backend volume records with observed devices.
//!
//! Attachments are never stored. Each pass derives them from the devices
//! observed in that same pass, so an export that vanished on the backend
//! disappears from every volume's attachment list immediately.

use std::collections::BTreeMap;

use crate::driver::instance::same_instance;
use crate::driver::{BlockDevice, Volume, VolumeAttachment};

/// Bytes in one gigabyte as used for volume sizes.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Status of an attachment whose device is mounted on this host.
pub const STATUS_MOUNTED: &str = "mounted";

/// Status of an attachment that is exported but not mounted locally.
pub const STATUS_EXPORTED: &str = "exported";

/// Backend view of a volume before reconciliation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeRecord {
    /// Human-friendly name.
    pub name: String,
    /// Backend identifier.
    pub volume_id: String,
    /// Quota hard limit in bytes, when one is set.
    pub size_bytes: Option<u64>,
    /// Availability zone.
    pub availability_zone: String,
    /// Network-reachable path.
    pub network_name: String,
}

/// Converts bytes to whole gigabytes, rounding down.
#[must_use]
pub const fn size_in_gb(bytes: u64) -> u64 {
    bytes.div_euclid(BYTES_PER_GB)
}

/// Converts gigabytes to bytes, or `None` on overflow.
#[must_use]
pub const fn size_in_bytes(size_gb: u64) -> Option<u64> {
    size_gb.checked_mul(BYTES_PER_GB)
}

/// Groups devices by volume identifier, preserving observation order.
#[must_use]
pub fn index_devices(devices: &[BlockDevice]) -> BTreeMap<&str, Vec<&BlockDevice>> {
    let mut index: BTreeMap<&str, Vec<&BlockDevice>> = BTreeMap::new();
    for device in devices {
        index
            .entry(device.volume_id.as_str())
            .or_default()
            .push(device);
    }
    index
}

fn attachment_from(device: &BlockDevice) -> VolumeAttachment {
    let status = if device.mount_point.is_some() {
        STATUS_MOUNTED
    } else {
        STATUS_EXPORTED
    };
    VolumeAttachment {
        volume_id: device.volume_id.clone(),
        instance_id: device.instance_id.clone(),
        device_name: device.device_name.clone(),
        status: status.to_owned(),
    }
}

/// Attachments of `volume_id` according to `index`.
#[must_use]
pub fn attachments_for(
    volume_id: &str,
    index: &BTreeMap<&str, Vec<&BlockDevice>>,
) -> Vec<VolumeAttachment> {
    index
        .get(volume_id)
        .map(|devices| devices.iter().map(|device| attachment_from(device)).collect())
        .unwrap_or_default()
}

/// Produces volumes with sizes normalised to gigabytes and attachments
/// joined from `devices`.
#[must_use]
pub fn reconcile(records: Vec<VolumeRecord>, devices: &[BlockDevice]) -> Vec<Volume> {
    let index = index_devices(devices);
    records
        .into_iter()
        .map(|record| Volume {
            attachments: attachments_for(&record.volume_id, &index),
            size_gb: record.size_bytes.map_or(0, size_in_gb),
            name: record.name,
            volume_id: record.volume_id,
            availability_zone: record.availability_zone,
            network_name: record.network_name,
        })
        .collect()
}

/// Keeps attachments held by `instance_id`. An empty identifier keeps all.
#[must_use]
pub fn filter_by_instance(
    attachments: Vec<VolumeAttachment>,
    instance_id: &str,
) -> Vec<VolumeAttachment> {
    if instance_id.is_empty() {
        return attachments;
    }
    attachments
        .into_iter()
        .filter(|attachment| same_instance(&attachment.instance_id, instance_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn device(volume_id: &str, instance_id: &str, mounted: bool) -> BlockDevice {
        BlockDevice {
            provider_name: String::from("isilon"),
            instance_id: instance_id.to_owned(),
            device_name: format!("nas:/ifs/volumes/{volume_id}"),
            volume_id: volume_id.to_owned(),
            network_name: format!("/ifs/volumes/{volume_id}"),
            mount_point: mounted.then(|| format!("/mnt/{volume_id}")),
            ..BlockDevice::default()
        }
    }

    fn record(volume_id: &str, size_bytes: Option<u64>) -> VolumeRecord {
        VolumeRecord {
            name: volume_id.to_owned(),
            volume_id: volume_id.to_owned(),
            size_bytes,
            ..VolumeRecord::default()
        }
    }

    #[fixture]
    fn devices() -> Vec<BlockDevice> {
        vec![
            device("v1", "10.0.0.1", true),
            device("v2", "10.0.0.2", false),
        ]
    }

    #[rstest]
    fn volumes_only_gain_attachments_for_observed_devices(devices: Vec<BlockDevice>) {
        let volumes = reconcile(
            vec![record("v1", None), record("v3", None)],
            &devices,
        );
        let v1 = volumes.first().expect("v1");
        let v3 = volumes.get(1).expect("v3");
        assert_eq!(v1.attachments.len(), 1);
        assert_eq!(
            v1.attachments.first().map(|a| a.status.as_str()),
            Some(STATUS_MOUNTED)
        );
        assert!(v3.attachments.is_empty());
    }

    #[rstest]
    fn unmounted_devices_are_exported(devices: Vec<BlockDevice>) {
        let index = index_devices(&devices);
        let attachments = attachments_for("v2", &index);
        assert_eq!(
            attachments.first().map(|a| a.status.as_str()),
            Some(STATUS_EXPORTED)
        );
    }

    #[rstest]
    #[case(None, 0)]
    #[case(Some(0), 0)]
    #[case(Some(BYTES_PER_GB - 1), 0)]
    #[case(Some(5 * BYTES_PER_GB), 5)]
    #[case(Some(5 * BYTES_PER_GB + 17), 5)]
    fn sizes_round_down_to_gigabytes(#[case] bytes: Option<u64>, #[case] expected: u64) {
        let volumes = reconcile(vec![record("v1", bytes)], &[]);
        assert_eq!(volumes.first().map(|v| v.size_gb), Some(expected));
    }

    #[rstest]
    #[case(1)]
    #[case(20)]
    #[case(1024)]
    fn size_round_trips_through_bytes(#[case] size_gb: u64) {
        let bytes = size_in_bytes(size_gb).expect("in range");
        assert_eq!(size_in_gb(bytes), size_gb);
    }

    #[test]
    fn oversized_request_overflows() {
        assert!(size_in_bytes(u64::MAX).is_none());
    }

    #[rstest]
    fn filter_by_instance_matches_address_sets() {
        let attachments = vec![
            attachment_from(&device("v1", "10.0.0.1,10.0.0.9", false)),
            attachment_from(&device("v1", "10.0.0.2", false)),
        ];
        let kept = filter_by_instance(attachments.clone(), "10.0.0.9,10.0.0.1");
        assert_eq!(kept.len(), 1);
        assert!(filter_by_instance(attachments.clone(), "10.0.0.3").is_empty());
        assert_eq!(filter_by_instance(attachments, "").len(), 2);
    }
}
