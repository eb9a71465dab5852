//! HTTP client for the Docker engine's control socket
//!
//! The proxy's own queries (container, exec and image inspection) are pinned
//! to API version 1.15, the oldest engine weave supports, so that response
//! shapes stay stable across engine upgrades. Forwarded client traffic keeps
//! whatever version the client asked for.

use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::debug;

/// Default location of the Docker engine socket.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// API version used for the proxy's own requests.
pub const API_VERSION: &str = "1.15";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Container details returned by `GET /containers/{id}/json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerMetadata {
    // Exec inspection nests the container under `ID`
    #[serde(rename = "Id", alias = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub config: Option<ContainerConfig>,
    pub host_config: Option<HostConfig>,
    pub network_settings: Option<NetworkSettings>,
    pub volumes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub env: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub network_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(rename = "IPAddress")]
    pub ip_address: Option<String>,
}

impl ContainerMetadata {
    pub fn network_mode(&self) -> &str {
        self.host_config
            .as_ref()
            .and_then(|hc| hc.network_mode.as_deref())
            .unwrap_or_default()
    }

    pub fn env(&self) -> &[String] {
        self.config
            .as_ref()
            .and_then(|c| c.env.as_deref())
            .unwrap_or_default()
    }

    /// Host path backing a container volume, if it is mounted.
    pub fn volume(&self, container_path: &str) -> Option<&str> {
        self.volumes
            .as_ref()
            .and_then(|v| v.get(container_path))
            .map(String::as_str)
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.network_settings
            .as_ref()
            .and_then(|ns| ns.ip_address.as_deref())
            .filter(|ip| !ip.is_empty())
    }
}

/// Exec instance details returned by `GET /exec/{id}/json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecMetadata {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub running: bool,
    pub container: Option<ContainerMetadata>,
}

/// Image details returned by `GET /images/{name}/json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageMetadata {
    pub config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
}

impl ImageMetadata {
    pub fn entrypoint(&self) -> &[String] {
        self.config
            .as_ref()
            .and_then(|c| c.entrypoint.as_deref())
            .unwrap_or_default()
    }

    pub fn cmd(&self) -> &[String] {
        self.config
            .as_ref()
            .and_then(|c| c.cmd.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct EngineMessage {
    message: String,
}

/// Client for the Docker engine's Unix socket
///
/// Each call opens a fresh connection, so the client can be shared freely
/// between connection tasks.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
}

impl DockerClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request to the engine and return its response unbuffered.
    pub async fn send<B>(&self, req: Request<B>) -> Result<Response<Incoming>>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ProxyError::EngineConnect {
                path: self.socket_path.clone(),
                source,
            })?;
        send_request(stream, req).await
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerMetadata> {
        self.get_json(&format!("/containers/{id}/json"))
            .await?
            .ok_or_else(|| ProxyError::NoSuchContainer { id: id.to_string() })
    }

    pub async fn inspect_exec(&self, id: &str) -> Result<ExecMetadata> {
        self.get_json(&format!("/exec/{id}/json"))
            .await?
            .ok_or_else(|| ProxyError::NoSuchExec { id: id.to_string() })
    }

    pub async fn inspect_image(&self, name: &str) -> Result<ImageMetadata> {
        self.get_json(&format!("/images/{name}/json"))
            .await?
            .ok_or_else(|| ProxyError::NoSuchImage {
                name: name.to_string(),
            })
    }

    /// GET a versioned endpoint; `None` when the engine answers 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("/v{API_VERSION}{path}"))
            .header(header::HOST, HeaderValue::from_static("localhost"))
            .body(Empty::<Bytes>::new())?;

        let response = self.send(req).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProxyError::Engine {
                status,
                message: engine_message(&body),
            });
        }

        Ok(Some(serde_json::from_slice(&body)?))
    }
}

/// Run one HTTP/1.1 exchange over an already connected stream.
///
/// The connection is driven on its own task with upgrades enabled so that
/// hijacked endpoints (attach, exec start) keep working after the response.
pub(crate) async fn send_request<S, B>(stream: S, req: Request<B>) -> Result<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let (mut sender, conn) = http1::Builder::new()
        .handshake(TokioIo::new(stream))
        .await?;

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("Engine connection closed: {}", e);
        }
    });

    Ok(sender.send_request(req).await?)
}

fn engine_message(body: &[u8]) -> String {
    serde_json::from_slice::<EngineMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}
