//! OneFS Platform API client.
//!
//! Volumes are directories under the configured volume path, managed through
//! the namespace API. Exports and quotas use the platform API.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{ClientError, ClientFuture, NasClient, NasExport, NasQuota, NasVolume};
use crate::config::IsilonConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const EXPORTS_PATH: &str = "/platform/1/protocols/nfs/exports";
const QUOTAS_PATH: &str = "/platform/1/quota/quotas";
const NAMESPACE_PREFIX: &str = "/namespace";
const NO_CLIENTS: &[String] = &[];

/// HTTP implementation of [`NasClient`].
#[derive(Clone)]
pub struct PapiClient {
    http: reqwest::Client,
    endpoint: String,
    user_name: String,
    password: String,
    volume_path: String,
}

#[derive(Deserialize)]
struct NamespaceListing {
    #[serde(default)]
    children: Vec<NamespaceChild>,
}

#[derive(Deserialize)]
struct NamespaceChild {
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ExportList {
    #[serde(default)]
    exports: Vec<ExportRecord>,
}

#[derive(Deserialize)]
struct ExportRecord {
    id: u64,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    clients: Vec<String>,
}

#[derive(Serialize)]
struct CreateExport<'a> {
    paths: [&'a str; 1],
}

#[derive(Serialize)]
struct UpdateClients<'a> {
    clients: &'a [String],
}

#[derive(Deserialize)]
struct QuotaList {
    #[serde(default)]
    quotas: Vec<QuotaRecord>,
}

#[derive(Deserialize)]
struct QuotaRecord {
    path: String,
    #[serde(default)]
    thresholds: QuotaThresholds,
}

#[derive(Default, Deserialize, Serialize)]
struct QuotaThresholds {
    hard: Option<u64>,
}

#[derive(Serialize)]
struct CreateQuota<'a> {
    path: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    include_snapshots: bool,
    thresholds_include_overhead: bool,
    enforced: bool,
    thresholds: QuotaThresholds,
}

impl PapiClient {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: &IsilonConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            user_name: config.user_name.clone(),
            password: config.password.clone(),
            volume_path: normalise_volume_path(&config.volume_path),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.endpoint);
        debug!(%method, url = %url, "isilon request");
        self.http
            .request(method, url)
            .basic_auth(&self.user_name, Some(&self.password))
    }

    fn namespace_path(&self, name: &str) -> String {
        format!("{NAMESPACE_PREFIX}{}", self.volume_path(name))
    }

    async fn send(
        request: RequestBuilder,
        resource: &'static str,
        name: &str,
    ) -> Result<Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                resource,
                name: name.to_owned(),
            });
        }
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        response
            .json::<T>()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    async fn export_for(&self, name: &str) -> Result<NasExport, ClientError> {
        let exports = self.exports().await?;
        exports
            .into_iter()
            .find(|export| export.volume == name)
            .ok_or_else(|| ClientError::NotFound {
                resource: "export",
                name: name.to_owned(),
            })
    }

    async fn update_clients(&self, name: &str, clients: &[String]) -> Result<(), ClientError> {
        let export = self.export_for(name).await?;
        let request = self
            .request(Method::PUT, &format!("{EXPORTS_PATH}/{}", export.id))
            .json(&UpdateClients { clients });
        Self::send(request, "export", name).await?;
        Ok(())
    }
}

fn normalise_volume_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Maps an exported cluster path back to the volume under `volume_path`.
fn volume_for_path(volume_path: &str, path: &str) -> Option<String> {
    let name = path.strip_prefix(volume_path)?.strip_prefix('/')?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name.to_owned())
}

fn exports_from(volume_path: &str, records: Vec<ExportRecord>) -> Vec<NasExport> {
    records
        .into_iter()
        .filter_map(|record| {
            let (path, volume) = record
                .paths
                .iter()
                .find_map(|path| volume_for_path(volume_path, path).map(|v| (path.clone(), v)))?;
            Some(NasExport {
                id: record.id,
                volume,
                path,
                clients: record.clients,
            })
        })
        .collect()
}

impl NasClient for PapiClient {
    fn volumes(&self) -> ClientFuture<'_, Vec<NasVolume>> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("{NAMESPACE_PREFIX}{}?detail=type", self.volume_path),
            );
            let response = Self::send(request, "volume path", &self.volume_path).await?;
            let listing: NamespaceListing = Self::decode(response).await?;
            Ok(listing
                .children
                .into_iter()
                .filter(|child| child.kind.as_deref().is_none_or(|kind| kind == "container"))
                .map(|child| NasVolume { name: child.name })
                .collect())
        })
    }

    fn volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("{}?metadata", self.namespace_path(name)),
            );
            Self::send(request, "volume", name).await?;
            Ok(NasVolume {
                name: name.to_owned(),
            })
        })
    }

    fn create_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasVolume> {
        Box::pin(async move {
            let request = self
                .request(Method::PUT, &self.namespace_path(name))
                .header("x-isi-ifs-target-type", "container")
                .header("x-isi-ifs-access-control", "0777");
            Self::send(request, "volume", name).await?;
            Ok(NasVolume {
                name: name.to_owned(),
            })
        })
    }

    fn delete_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(
                Method::DELETE,
                &format!("{}?recursive=true", self.namespace_path(name)),
            );
            Self::send(request, "volume", name).await?;
            Ok(())
        })
    }

    fn volume_path(&self, name: &str) -> String {
        format!("{}/{name}", self.volume_path)
    }

    fn exports(&self) -> ClientFuture<'_, Vec<NasExport>> {
        Box::pin(async move {
            let request = self.request(Method::GET, EXPORTS_PATH);
            let response = Self::send(request, "exports", EXPORTS_PATH).await?;
            let list: ExportList = Self::decode(response).await?;
            Ok(exports_from(&self.volume_path, list.exports))
        })
    }

    fn export_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            match self.export_for(name).await {
                Ok(_) => return Ok(()),
                Err(ClientError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
            let path = self.volume_path(name);
            let request = self
                .request(Method::POST, EXPORTS_PATH)
                .json(&CreateExport {
                    paths: [path.as_str()],
                });
            Self::send(request, "export", name).await?;
            Ok(())
        })
    }

    fn unexport_volume<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let export = self.export_for(name).await?;
            let request = self.request(Method::DELETE, &format!("{EXPORTS_PATH}/{}", export.id));
            Self::send(request, "export", name).await?;
            Ok(())
        })
    }

    fn export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.export_for(name).await?.clients) })
    }

    fn set_export_clients<'a>(
        &'a self,
        name: &'a str,
        clients: &'a [String],
    ) -> ClientFuture<'a, ()> {
        Box::pin(self.update_clients(name, clients))
    }

    fn clear_export_clients<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.update_clients(name, NO_CLIENTS))
    }

    fn quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NasQuota> {
        Box::pin(async move {
            let path = self.volume_path(name);
            let request = self
                .request(Method::GET, QUOTAS_PATH)
                .query(&[("path", path.as_str())]);
            let response = Self::send(request, "quota", name).await?;
            let list: QuotaList = Self::decode(response).await?;
            list.quotas
                .into_iter()
                .find(|quota| quota.path == path)
                .map(|quota| NasQuota {
                    path: quota.path,
                    hard_threshold: quota.thresholds.hard,
                })
                .ok_or_else(|| ClientError::NotFound {
                    resource: "quota",
                    name: name.to_owned(),
                })
        })
    }

    fn set_quota<'a>(&'a self, name: &'a str, size_bytes: u64) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = self.volume_path(name);
            let body = CreateQuota {
                path: &path,
                kind: "directory",
                include_snapshots: false,
                thresholds_include_overhead: false,
                enforced: true,
                thresholds: QuotaThresholds {
                    hard: Some(size_bytes),
                },
            };
            let request = self.request(Method::POST, QUOTAS_PATH).json(&body);
            Self::send(request, "quota", name).await?;
            Ok(())
        })
    }

    fn clear_quota<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let path = self.volume_path(name);
            let request = self
                .request(Method::DELETE, QUOTAS_PATH)
                .query(&[("path", path.as_str())]);
            Self::send(request, "quota", name).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/ifs/volumes", "/ifs/volumes")]
    #[case("ifs/volumes/", "/ifs/volumes")]
    #[case(" /ifs/volumes// ", "/ifs/volumes")]
    fn volume_path_is_normalised(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalise_volume_path(input), expected);
    }

    #[rstest]
    #[case("/ifs/volumes/v1", Some("v1"))]
    #[case("/ifs/volumes", None)]
    #[case("/ifs/volumes/v1/nested", None)]
    #[case("/ifs/other/v1", None)]
    #[case("/ifs/volumesX/v1", None)]
    fn export_paths_map_to_volumes(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            volume_for_path("/ifs/volumes", path).as_deref(),
            expected
        );
    }

    #[test]
    fn exports_outside_volume_path_are_dropped() {
        let records: ExportList = serde_json::from_str(
            r#"{"exports":[
                {"id":1,"paths":["/ifs/volumes/v1"],"clients":["10.0.0.1"]},
                {"id":2,"paths":["/ifs/home"],"clients":[]},
                {"id":3,"paths":["/ifs/volumes/v2"]}
            ]}"#,
        )
        .expect("decode exports");
        let exports = exports_from("/ifs/volumes", records.exports);
        assert_eq!(
            exports,
            vec![
                NasExport {
                    id: 1,
                    volume: String::from("v1"),
                    path: String::from("/ifs/volumes/v1"),
                    clients: vec![String::from("10.0.0.1")],
                },
                NasExport {
                    id: 3,
                    volume: String::from("v2"),
                    path: String::from("/ifs/volumes/v2"),
                    clients: Vec::new(),
                },
            ]
        );
    }

    #[test]
    fn quota_body_uses_directory_type() {
        let body = CreateQuota {
            path: "/ifs/volumes/v1",
            kind: "directory",
            include_snapshots: false,
            thresholds_include_overhead: false,
            enforced: true,
            thresholds: QuotaThresholds { hard: Some(1024) },
        };
        let json = serde_json::to_value(&body).expect("encode quota");
        assert_eq!(json["type"], "directory");
        assert_eq!(json["thresholds"]["hard"], 1024);
    }
}
