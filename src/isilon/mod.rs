//! NFS export storage driver for Isilon clusters.
//!
//! A volume is a directory container on the cluster. Attaching a volume
//! exports it over NFS and sets the export's client list to the addresses
//! that make up the caller's instance identifier. Volume size is the hard
//! threshold of a directory quota.

use std::sync::Arc;

use tracing::{debug, info, warn};

mod client;
mod papi;

pub use client::{ClientError, ClientFuture, NasClient, NasExport, NasQuota, NasVolume};
pub use papi::PapiClient;

use crate::config::IsilonConfig;
use crate::driver::instance::{local_instance, parse_instance_id, same_instance};
use crate::driver::{
    BlockDevice, DriverContext, DriverError, DriverFuture, Instance, StorageDriver, Volume,
    VolumeAttachment, VolumeRequest, create_instance_id,
};
use crate::os::OsDriver;
use crate::reconcile::{VolumeRecord, filter_by_instance, reconcile, size_in_bytes};
use crate::registry::{RegistryBuilder, RegistryError};

/// Registry name of the Isilon driver.
pub const ISILON_DRIVER_NAME: &str = "isilon";

const EXPORT_STATUS: &str = "exported";
const NFS_MEDIUM: &str = "an NFS mount helper";

/// Registers the Isilon driver.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] when the name is already taken.
pub fn register(
    builder: &mut RegistryBuilder<dyn StorageDriver, DriverContext>,
) -> Result<(), RegistryError> {
    builder.register(ISILON_DRIVER_NAME, construct)
}

fn construct(context: &DriverContext) -> Result<Box<dyn StorageDriver>, DriverError> {
    let config = context.settings.isilon.clone();
    config.validate()?;
    let client = PapiClient::new(&config).map_err(|err| DriverError::Config(err.to_string()))?;
    Ok(Box::new(IsilonDriver::new(
        config,
        client,
        Arc::clone(&context.os),
    )))
}

/// Storage driver backed by an Isilon cluster's NFS exports.
pub struct IsilonDriver<C> {
    config: IsilonConfig,
    client: C,
    os: Arc<dyn OsDriver>,
}

impl<C: NasClient> IsilonDriver<C> {
    /// Creates a driver over `client`, using `os` for local mount state.
    #[must_use]
    pub fn new(config: IsilonConfig, client: C, os: Arc<dyn OsDriver>) -> Self {
        Self { config, client, os }
    }

    fn backend_error(operation: &str, target: &str, err: &ClientError) -> DriverError {
        DriverError::Backend {
            provider: ISILON_DRIVER_NAME.to_owned(),
            operation: operation.to_owned(),
            target: target.to_owned(),
            message: err.to_string(),
        }
    }

    fn device_name(&self, export_path: &str) -> String {
        format!("{}:{export_path}", self.config.nfs_host)
    }

    async fn records(
        &self,
        volume_id: &str,
        volume_name: &str,
    ) -> Result<Vec<VolumeRecord>, DriverError> {
        let selector = if volume_id.is_empty() {
            volume_name
        } else {
            volume_id
        };

        let volumes = if selector.is_empty() {
            self.client
                .volumes()
                .await
                .map_err(|err| Self::backend_error("list volumes", "*", &err))?
        } else {
            match self.client.volume(selector).await {
                Ok(volume) => vec![volume],
                Err(err) if err.is_not_found() => {
                    debug!(volume_id = selector, "volume not found");
                    Vec::new()
                }
                Err(err) => return Err(Self::backend_error("get volume", selector, &err)),
            }
        };

        let mut records = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let size_bytes = self.quota_bytes(&volume.name).await;
            records.push(VolumeRecord {
                network_name: self.client.volume_path(&volume.name),
                volume_id: volume.name.clone(),
                name: volume.name,
                size_bytes,
                availability_zone: String::new(),
            });
        }
        Ok(records)
    }

    async fn quota_bytes(&self, name: &str) -> Option<u64> {
        match self.client.quota(name).await {
            Ok(quota) => quota.hard_threshold,
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                warn!(volume_id = name, error = %err, "failed to read quota, reporting size 0");
                None
            }
        }
    }

    async fn mapping(&self) -> Result<Vec<BlockDevice>, DriverError> {
        let exports = self
            .client
            .exports()
            .await
            .map_err(|err| Self::backend_error("list exports", "*", &err))?;

        let mut devices = Vec::new();
        for export in exports {
            if export.clients.is_empty() {
                debug!(volume_id = %export.volume, "export has no clients");
            }
            let device_name = self.device_name(&export.path);
            let mount_point = self
                .os
                .mounts(&device_name, "")?
                .into_iter()
                .next()
                .map(|entry| entry.mount_point);
            devices.push(BlockDevice {
                provider_name: ISILON_DRIVER_NAME.to_owned(),
                instance_id: create_instance_id(&export.clients),
                region: String::new(),
                device_name,
                volume_id: export.volume,
                network_name: export.path,
                status: EXPORT_STATUS.to_owned(),
                mount_point,
            });
        }
        Ok(devices)
    }

    async fn reconciled(
        &self,
        volume_id: &str,
        volume_name: &str,
    ) -> Result<Vec<Volume>, DriverError> {
        let records = self.records(volume_id, volume_name).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let devices = self.mapping().await?;
        Ok(reconcile(records, &devices))
    }

    async fn existing_volume(&self, volume_id: &str) -> Result<Volume, DriverError> {
        self.reconciled(volume_id, "")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NoVolumesReturned {
                volume_id: volume_id.to_owned(),
            })
    }

    async fn attachments(
        &self,
        volume_id: &str,
        instance_id: &str,
    ) -> Result<Vec<VolumeAttachment>, DriverError> {
        if volume_id.is_empty() {
            return Err(DriverError::MissingVolumeId);
        }
        let volume = self.existing_volume(volume_id).await?;
        Ok(filter_by_instance(volume.attachments, instance_id))
    }

    async fn create(&self, request: &VolumeRequest) -> Result<Volume, DriverError> {
        if request.name.is_empty() {
            return Err(DriverError::MissingVolumeId);
        }
        let size_bytes = size_in_bytes(request.size_gb).ok_or(DriverError::InvalidSize {
            size_gb: request.size_gb,
        })?;

        self.client
            .create_volume(&request.name)
            .await
            .map_err(|err| Self::backend_error("create volume", &request.name, &err))?;
        info!(volume_id = %request.name, size_gb = request.size_gb, "created volume");

        if request.size_gb > 0
            && let Err(err) = self.client.set_quota(&request.name, size_bytes).await
        {
            warn!(
                volume_id = %request.name,
                error = %err,
                "failed to set quota; volume kept without capacity limit"
            );
        }

        self.existing_volume(&request.name).await
    }

    async fn remove(&self, volume_id: &str) -> Result<(), DriverError> {
        if volume_id.is_empty() {
            return Err(DriverError::MissingVolumeId);
        }
        match self.client.clear_quota(volume_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => debug!(volume_id, "no quota to clear"),
            Err(err) => return Err(Self::backend_error("clear quota", volume_id, &err)),
        }
        self.client
            .delete_volume(volume_id)
            .await
            .map_err(|err| match err {
                ClientError::NotFound { .. } => DriverError::NoVolumesReturned {
                    volume_id: volume_id.to_owned(),
                },
                other => Self::backend_error("delete volume", volume_id, &other),
            })?;
        info!(volume_id, "removed volume");
        Ok(())
    }

    async fn attach(
        &self,
        volume_id: &str,
        instance_id: &str,
        force: bool,
    ) -> Result<Vec<VolumeAttachment>, DriverError> {
        if volume_id.is_empty() {
            return Err(DriverError::MissingVolumeId);
        }
        if instance_id.is_empty() {
            return Err(DriverError::MissingInstanceId);
        }
        self.existing_volume(volume_id).await?;

        self.client
            .export_volume(volume_id)
            .await
            .map_err(|err| Self::backend_error("export volume", volume_id, &err))?;
        let clients = self
            .client
            .export_clients(volume_id)
            .await
            .map_err(|err| Self::backend_error("get export clients", volume_id, &err))?;

        if !clients.is_empty() {
            let holders = create_instance_id(&clients);
            if same_instance(&holders, instance_id) {
                debug!(volume_id, instance_id, "volume already attached to caller");
                return self.attachments(volume_id, instance_id).await;
            }
            if !force {
                return Err(DriverError::AlreadyAttached {
                    volume_id: volume_id.to_owned(),
                    clients: holders,
                });
            }
            warn!(volume_id, previous = %holders, instance_id, "force attach revoking existing clients");
            self.client
                .clear_export_clients(volume_id)
                .await
                .map_err(|err| Self::backend_error("clear export clients", volume_id, &err))?;
        }

        let addresses = parse_instance_id(instance_id);
        self.client
            .set_export_clients(volume_id, &addresses)
            .await
            .map_err(|err| Self::backend_error("set export clients", volume_id, &err))?;
        info!(volume_id, instance_id, force, "attached volume");

        self.attachments(volume_id, instance_id).await
    }

    async fn detach(&self, volume_id: &str) -> Result<(), DriverError> {
        if volume_id.is_empty() {
            return Err(DriverError::MissingVolumeId);
        }
        self.existing_volume(volume_id).await?;
        match self.client.unexport_volume(volume_id).await {
            Ok(()) => info!(volume_id, "detached volume"),
            Err(err) if err.is_not_found() => debug!(volume_id, "volume was not exported"),
            Err(err) => return Err(Self::backend_error("unexport volume", volume_id, &err)),
        }
        Ok(())
    }
}

impl<C: NasClient> StorageDriver for IsilonDriver<C> {
    fn name(&self) -> &str {
        ISILON_DRIVER_NAME
    }

    fn init(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            if !self.os.network_mounts_supported() {
                return Err(DriverError::AttachmentMediumMissing {
                    provider: ISILON_DRIVER_NAME.to_owned(),
                    medium: NFS_MEDIUM.to_owned(),
                });
            }
            self.client
                .volumes()
                .await
                .map_err(|err| Self::backend_error("connect", &self.config.endpoint, &err))?;
            info!(
                provider = ISILON_DRIVER_NAME,
                endpoint = %self.config.endpoint,
                volume_path = %self.config.volume_path,
                "storage driver initialized"
            );
            Ok(())
        })
    }

    fn instance(&self) -> DriverFuture<'_, Instance> {
        Box::pin(async move { local_instance(ISILON_DRIVER_NAME, self.config.subnet.as_deref()) })
    }

    fn volume_mapping(&self) -> DriverFuture<'_, Vec<BlockDevice>> {
        Box::pin(self.mapping())
    }

    fn volumes<'a>(
        &'a self,
        volume_id: &'a str,
        volume_name: &'a str,
    ) -> DriverFuture<'a, Vec<Volume>> {
        Box::pin(self.reconciled(volume_id, volume_name))
    }

    fn create_volume<'a>(&'a self, request: &'a VolumeRequest) -> DriverFuture<'a, Volume> {
        Box::pin(self.create(request))
    }

    fn remove_volume<'a>(&'a self, volume_id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.remove(volume_id))
    }

    fn volume_attachments<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> DriverFuture<'a, Vec<VolumeAttachment>> {
        Box::pin(self.attachments(volume_id, instance_id))
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, Vec<VolumeAttachment>> {
        Box::pin(self.attach(volume_id, instance_id, force))
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        _instance_id: &'a str,
        _force: bool,
    ) -> DriverFuture<'a, ()> {
        Box::pin(self.detach(volume_id))
    }
}
