use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ControllerRequestError {
    #[error("Controller returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Controller request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to build archive: {0}")]
    Archive(#[from] std::io::Error),
}

impl ControllerRequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ControllerRequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResources {
    pub cpu_cores: f64,
    pub memory_total_gb: f64,
    pub memory_available_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthContainers {
    pub running: i32,
    pub max_allowed: i32,
}

/// `GET /health` payload: the controller's self-reported capacity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerHealth {
    pub status: String,
    pub resources: HealthResources,
    pub containers: HealthContainers,
    pub load_percentage: f64,
    pub server_type: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub environment: HashMap<String, String>,
    /// `"7860/tcp"` -> host port.
    pub ports: HashMap<String, u16>,
    pub volumes: HashMap<String, String>,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub restart_policy: String,
    pub labels: HashMap<String, String>,
    pub auto_remove: bool,
    pub detach: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContainerResponse {
    pub container_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub ports: serde_json::Value,
    #[serde(default)]
    pub network: serde_json::Value,
    #[serde(default)]
    pub resource_limits: serde_json::Value,
    #[serde(default)]
    pub mounts: serde_json::Value,
    #[serde(default)]
    pub env: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub cpu: serde_json::Value,
    #[serde(default)]
    pub memory: serde_json::Value,
    #[serde(default)]
    pub network: serde_json::Value,
    #[serde(default)]
    pub block_io: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsResponse {
    pub logs: String,
    pub lines: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullImageRequest<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a RegistryAuth>,
}

#[derive(Debug, Serialize)]
struct CopyArchiveRequest<'a> {
    path: &'a str,
    /// base64-encoded tar archive, extracted remotely into `path`.
    archive: String,
    remove_existing: bool,
}

/// Typed client for one controller's container-management HTTP API.
///
/// Every call is a single bounded request/response; retry and backoff
/// policy belongs to the caller.
pub struct ControllerClient {
    id: String,
    base_url: String,
    http: reqwest::Client,
}

impl ControllerClient {
    pub fn new(id: &str, base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Hostname of the worker node, for composing externally reachable
    /// service URLs.
    pub fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health_check(&self) -> Result<ControllerHealth, ControllerRequestError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn create_container(
        &self,
        config: &CreateContainerRequest,
    ) -> Result<String, ControllerRequestError> {
        debug!("Creating container {} on controller {}", config.name, self.id);
        let resp = self
            .http
            .post(self.url("/containers/"))
            .json(config)
            .send()
            .await?;
        let body: CreateContainerResponse = expect_ok(resp).await?.json().await?;
        Ok(body.container_id)
    }

    pub async fn start_container(&self, container_id: &str) -> Result<OpResponse, ControllerRequestError> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{container_id}/start")))
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn stop_container(
        &self,
        container_id: &str,
        timeout_secs: u64,
    ) -> Result<OpResponse, ControllerRequestError> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{container_id}/stop")))
            .query(&[("timeout", timeout_secs)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
    ) -> Result<OpResponse, ControllerRequestError> {
        let resp = self
            .http
            .delete(self.url(&format!("/containers/{container_id}")))
            .query(&[("force", force)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn get_container_info(
        &self,
        container_id: &str,
    ) -> Result<ContainerInfo, ControllerRequestError> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{container_id}")))
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn get_container_stats(
        &self,
        container_id: &str,
    ) -> Result<ContainerStats, ControllerRequestError> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{container_id}/stats")))
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn get_container_logs(
        &self,
        container_id: &str,
        lines: u32,
    ) -> Result<LogsResponse, ControllerRequestError> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{container_id}/logs")))
            .query(&[("lines", lines)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn list_containers(
        &self,
        all: bool,
    ) -> Result<Vec<ContainerSummary>, ControllerRequestError> {
        let resp = self
            .http
            .get(self.url("/containers/"))
            .query(&[("all", all)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<OpResponse, ControllerRequestError> {
        let resp = self
            .http
            .post(self.url("/images/pull"))
            .json(&PullImageRequest { image, auth })
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn list_images(&self) -> Result<Vec<serde_json::Value>, ControllerRequestError> {
        let resp = self.http.get(self.url("/images/")).send().await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn remove_image(
        &self,
        image: &str,
        force: bool,
    ) -> Result<OpResponse, ControllerRequestError> {
        let resp = self
            .http
            .delete(self.url(&format!("/images/{image}")))
            .query(&[("force", force)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn get_image_info(
        &self,
        image: &str,
    ) -> Result<serde_json::Value, ControllerRequestError> {
        let resp = self
            .http
            .get(self.url(&format!("/images/{image}")))
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn prune_images(&self) -> Result<OpResponse, ControllerRequestError> {
        let resp = self.http.post(self.url("/images/prune")).send().await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    /// Inject a single file into a running container. The file is wrapped in
    /// a one-entry tar archive and base64-encoded on the wire.
    pub async fn copy_file_to_container(
        &self,
        container_id: &str,
        dest_path: &str,
        content: &[u8],
        filename: &str,
    ) -> Result<OpResponse, ControllerRequestError> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, filename, content)?;
        let archive = builder.into_inner()?;

        self.send_archive(container_id, dest_path, &archive, false).await
    }

    /// Replace a directory inside a container with the given tar archive.
    /// The remote side extracts into `dest_path`, removing the existing path
    /// first when asked, and will auto-start a stopped container to do so.
    pub async fn copy_directory_to_container(
        &self,
        container_id: &str,
        dest_path: &str,
        tar_content: &[u8],
        remove_existing: bool,
    ) -> Result<OpResponse, ControllerRequestError> {
        self.send_archive(container_id, dest_path, tar_content, remove_existing)
            .await
    }

    async fn send_archive(
        &self,
        container_id: &str,
        path: &str,
        archive: &[u8],
        remove_existing: bool,
    ) -> Result<OpResponse, ControllerRequestError> {
        let body = CopyArchiveRequest {
            path,
            archive: base64::engine::general_purpose::STANDARD.encode(archive),
            remove_existing,
        };
        let resp = self
            .http
            .post(self.url(&format!("/containers/{container_id}/archive")))
            .json(&body)
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }
}

async fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, ControllerRequestError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(ControllerRequestError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_payload_deserializes() {
        let raw = r#"{
            "status": "ok",
            "resources": {"cpu_cores": 16.0, "memory_total_gb": 64.0, "memory_available_gb": 40.5},
            "containers": {"running": 3, "max_allowed": 20},
            "load_percentage": 35.0,
            "server_type": "gpu",
            "capabilities": {"gpu": true, "max_memory_gb": 64}
        }"#;
        let health: ControllerHealth = serde_json::from_str(raw).unwrap();
        assert_eq!(health.resources.cpu_cores, 16.0);
        assert_eq!(health.containers.max_allowed, 20);
        assert_eq!(health.capabilities["gpu"], serde_json::json!(true));
    }

    #[test]
    fn create_request_serializes_ports_as_proto_keys() {
        let mut req = CreateContainerRequest {
            name: "space-demo".to_string(),
            image: "registry/demo:latest".to_string(),
            memory_limit: "512Mi".to_string(),
            cpu_limit: "0.5".to_string(),
            restart_policy: "on-failure".to_string(),
            detach: true,
            ..Default::default()
        };
        req.ports.insert("7860/tcp".to_string(), 7861);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["ports"]["7860/tcp"], serde_json::json!(7861));
        assert!(json.get("command").is_none());
        assert_eq!(json["detach"], serde_json::json!(true));
    }

    #[test]
    fn host_is_extracted_from_base_url() {
        let client =
            ControllerClient::new("node-1", "http://10.0.0.5:8000/", Duration::from_secs(30))
                .unwrap();
        assert_eq!(client.host(), "10.0.0.5");
        assert_eq!(client.base_url(), "http://10.0.0.5:8000");
    }

    #[test]
    fn not_found_is_distinguishable() {
        let err = ControllerRequestError::Http {
            status: 404,
            body: "no such container".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
    }
}
