use super::listener::{self, BoundListener};
use super::tls;
use crate::cidr::{weave_cidrs, CidrDecision};
use crate::config::ProxyConfig;
use crate::docker::{self, ContainerMetadata, DockerClient};
use crate::error::{ProxyError, Result};
use crate::intercept::{empty_body, full_body, ProxyBody, Router, WAIT_VOLUME_PATH};
use crate::weave::{call_weave, WeaveOutput, WeaveRunner};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use hyper::upgrade::OnUpgrade;
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use regex::Regex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Port on which the weave router answers status queries.
const WEAVE_HTTP_PORT: u16 = 6784;

/// Name of the container running the weave router.
const WEAVE_CONTAINER: &str = "weave";

/// The intercepting Docker API proxy
///
/// Everything here is settled in [`Proxy::new`] and read-only while serving,
/// so one instance is shared by every connection task.
pub struct Proxy {
    config: ProxyConfig,
    client: DockerClient,
    weave: Arc<dyn WeaveRunner>,
    docker_bridge_ip: String,
    hostname_match: Regex,
    wait_volume: String,
    router: Router,
    tls: Option<TlsAcceptor>,
    weave_http_port: u16,
}

impl Proxy {
    /// Build the proxy, failing if anything it depends on is unavailable.
    pub async fn new(config: ProxyConfig, weave: Arc<dyn WeaveRunner>) -> Result<Self> {
        let tls = tls::load_acceptor(&config.tls)?;
        let client = DockerClient::new(&config.docker_socket);

        let docker_bridge_ip = if config.without_dns {
            String::new()
        } else {
            let output = call_weave(&weave, vec!["docker-bridge-ip".to_string()]).await?;
            output.stdout.trim().to_string()
        };
        if config.with_dns {
            debug!("--with-dns is the default; ignoring");
        }

        let hostname_match =
            Regex::new(&config.hostname_match).map_err(|source| ProxyError::HostnameMatch {
                pattern: config.hostname_match.clone(),
                source,
            })?;

        let wait_volume = find_wait_volume(&client, &config.container_name).await?;
        debug!("Using weavewait volume {}", wait_volume);

        Ok(Self {
            config,
            client,
            weave,
            docker_bridge_ip,
            hostname_match,
            wait_volume,
            router: Router::new(),
            tls,
            weave_http_port: WEAVE_HTTP_PORT,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn client(&self) -> &DockerClient {
        &self.client
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Address of the docker bridge, empty when DNS integration is off.
    pub fn docker_bridge_ip(&self) -> &str {
        &self.docker_bridge_ip
    }

    /// Host path of the weavewait volume to bind into new containers.
    pub fn wait_volume(&self) -> &str {
        &self.wait_volume
    }

    /// Apply the configured hostname rewrite to a container name.
    pub fn rewrite_hostname(&self, name: &str) -> String {
        self.hostname_match
            .replace_all(name, self.config.hostname_replacement.as_str())
            .into_owned()
    }

    pub fn weave_cidrs(&self, container: &ContainerMetadata) -> CidrDecision {
        weave_cidrs(
            container.network_mode(),
            container.env(),
            self.config.no_default_ipam,
        )
    }

    pub async fn weave(&self, args: Vec<String>) -> Result<WeaveOutput> {
        call_weave(&self.weave, args).await
    }

    /// Inspect the container named in a `/containers/{id}/...` path.
    pub async fn inspect_container_in_path(&self, path: &str) -> Result<ContainerMetadata> {
        let id = self
            .router
            .container_id(path)
            .ok_or_else(|| ProxyError::NoContainerInPath {
                path: path.to_string(),
            })?;
        self.client.inspect_container(id).await
    }

    /// DNS domain served by weaveDNS, if it is running and reachable.
    pub async fn dns_domain(&self) -> Option<String> {
        if self.config.without_dns {
            return None;
        }

        let weave = match self.client.inspect_container(WEAVE_CONTAINER).await {
            Ok(container) => container,
            Err(e) => {
                debug!("No DNS domain: {}", e);
                return None;
            }
        };
        let ip = weave.ip_address()?;

        match fetch_domain(ip, self.weave_http_port).await {
            Ok(domain) if !domain.is_empty() => Some(domain),
            Ok(_) => None,
            Err(e) => {
                debug!("No DNS domain from {}: {}", ip, e);
                None
            }
        }
    }

    /// Serve one client request: intercept, forward, intercept the response.
    pub async fn handle(&self, mut req: Request<ProxyBody>) -> Response<ProxyBody> {
        info!("{} {}", req.method(), req.uri());

        let path = req.uri().path().to_string();
        let interceptor = self.router.route(&path).interceptor(self);

        if let Err(e) = interceptor.intercept_request(&mut req).await {
            warn!("Error intercepting request {}: {}", path, e);
            return error_response(e.status_code(), &e);
        }

        let client_upgrade = wants_upgrade(&req).then(|| hyper::upgrade::on(&mut req));

        let mut resp = match self.forward(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Error forwarding {}: {}", path, e);
                return error_response(StatusCode::BAD_GATEWAY, &e);
            }
        };

        if let Err(e) = interceptor.intercept_response(&path, &mut resp).await {
            warn!("Error intercepting response {}: {}", path, e);
        }

        if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let engine_upgrade = hyper::upgrade::on(&mut resp);
                tokio::spawn(bridge_upgraded(client_upgrade, engine_upgrade));
                *resp.body_mut() = empty_body();
            }
        }

        resp
    }

    /// Pass a request on to the engine unchanged apart from its URI.
    async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());

        let mut outgoing = Request::builder()
            .method(parts.method)
            .uri(path_and_query)
            .body(body)?;
        *outgoing.headers_mut() = parts.headers;
        outgoing
            .headers_mut()
            .entry(HOST)
            .or_insert(HeaderValue::from_static("localhost"));

        let response = self.client.send(outgoing).await?;
        Ok(response.map(|body| body.boxed()))
    }

    /// Bind every configured address. Nothing is served until all succeed.
    pub async fn bind_listeners(&self) -> Result<Vec<BoundListener>> {
        let mut bound = Vec::with_capacity(self.config.listen_addrs.len());
        for addr in &self.config.listen_addrs {
            bound.push(
                listener::listen(addr, self.tls.as_ref(), &self.config.docker_socket).await?,
            );
        }
        Ok(bound)
    }

    /// Bind all listeners and serve them until one of them fails.
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let listeners = self.bind_listeners().await?;
        for bound in &listeners {
            info!("proxy listening on {}", bound.addr);
        }

        let mut tasks = JoinSet::new();
        for bound in listeners {
            tasks.spawn(bound.listener.serve(self.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            result.map_err(|e| ProxyError::Io(std::io::Error::other(e)))??;
        }
        Ok(())
    }
}

async fn find_wait_volume(client: &DockerClient, container_name: &str) -> Result<String> {
    let container = client
        .inspect_container(container_name)
        .await
        .map_err(|e| ProxyError::WaitVolume(e.to_string()))?;

    container
        .volume(WAIT_VOLUME_PATH)
        .map(str::to_string)
        .ok_or_else(|| {
            ProxyError::WaitVolume(format!(
                "container {container_name} has no {WAIT_VOLUME_PATH} volume"
            ))
        })
}

async fn fetch_domain(ip: &str, port: u16) -> Result<String> {
    let authority = format!("{ip}:{port}");
    let stream = TcpStream::connect(&authority).await?;

    let req = Request::builder()
        .method(Method::GET)
        .uri("/domain")
        .header(HOST, authority.as_str())
        .body(Empty::<Bytes>::new())?;
    let response = docker::send_request(stream, req).await?;

    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    if status != StatusCode::OK {
        return Err(ProxyError::Engine {
            status,
            message: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&body).trim().to_string())
}

fn wants_upgrade<B>(req: &Request<B>) -> bool {
    req.headers().contains_key(UPGRADE)
        && req
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
}

async fn bridge_upgraded(client: OnUpgrade, engine: OnUpgrade) {
    let (client, engine) = match tokio::try_join!(client, engine) {
        Ok(pair) => pair,
        Err(e) => {
            debug!("Upgrade failed: {}", e);
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut engine = TokioIo::new(engine);
    match tokio::io::copy_bidirectional(&mut client, &mut engine).await {
        Ok((up, down)) => debug!("Upgraded stream closed ({} bytes up, {} down)", up, down),
        Err(e) => debug!("Upgraded stream error: {}", e),
    }
}

/// Answer locally with a Docker-style JSON error.
fn error_response(status: StatusCode, err: &ProxyError) -> Response<ProxyBody> {
    let body = serde_json::json!({ "message": err.to_string() }).to_string();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
