//! Prepare new containers for weave before the engine creates them
//!
//! Containers that will be attached get the weavewait volume bound in and
//! their entrypoint wrapped so the process blocks until the weave interface
//! is up. When weaveDNS is running the hostname and resolver settings are
//! pointed at it as well.

use super::{read_json, write_json, Interceptor, ProxyBody, WAIT_ENTRYPOINT, WAIT_VOLUME_PATH};
use crate::cidr::{weave_cidrs, CidrDecision};
use crate::error::Result;
use crate::json::{string_array_value, JsonObject, JsonObjectExt};
use crate::proxy::Proxy;
use async_trait::async_trait;
use hyper::{Request, Response};
use serde_json::Value;
use tracing::{info, warn};

/// Docker rejects hostnames longer than this.
const MAX_HOSTNAME_LEN: usize = 64;

pub struct CreateContainerInterceptor<'p> {
    proxy: &'p Proxy,
}

impl<'p> CreateContainerInterceptor<'p> {
    pub fn new(proxy: &'p Proxy) -> Self {
        Self { proxy }
    }

    /// Prefix the entrypoint with weavewait, filling it in from the image if
    /// the request leaves it to the image.
    async fn set_wait_entrypoint(&self, container: &mut JsonObject) -> Result<()> {
        let mut entrypoint = container.string_array("Entrypoint")?;
        let mut cmd = container.string_array("Cmd")?;

        if entrypoint.is_empty() {
            let image = container.string("Image")?;
            let image = self.proxy.client().inspect_image(&image).await?;
            entrypoint = image.entrypoint().to_vec();
            if cmd.is_empty() {
                cmd = image.cmd().to_vec();
            }
        }

        if entrypoint.first().map(String::as_str) == Some(WAIT_ENTRYPOINT[0]) {
            return Ok(());
        }

        let wrapped = WAIT_ENTRYPOINT
            .iter()
            .copied()
            .chain(entrypoint.iter().map(String::as_str));
        container.insert("Entrypoint".into(), string_array_value(wrapped));
        if !cmd.is_empty() {
            container.insert("Cmd".into(), string_array_value(cmd));
        }
        Ok(())
    }

    /// Hostname from `?name=`, or the configured label, after rewriting.
    fn hostname(&self, query: Option<&str>, container: &mut JsonObject) -> Result<String> {
        let mut name = container_name(query);

        if let Some(label) = self.proxy.config().hostname_from_label.as_deref() {
            let labels = container.object("Labels")?;
            if labels.contains_key(label) {
                name = labels.string(label)?;
            }
        }

        Ok(self.proxy.rewrite_hostname(&name))
    }
}

#[async_trait]
impl<'p> Interceptor for CreateContainerInterceptor<'p> {
    async fn intercept_request(&self, req: &mut Request<ProxyBody>) -> Result<()> {
        let Some(mut container) = read_json(req).await? else {
            return Ok(());
        };

        let network_mode = container.object("HostConfig")?.string("NetworkMode")?;
        let env = container.string_array("Env")?;
        let cidrs = match weave_cidrs(&network_mode, &env, self.proxy.config().no_default_ipam) {
            CidrDecision::Attach(cidrs) => cidrs,
            CidrDecision::Skip(reason) => {
                info!("Leaving container alone because {}", reason);
                return Ok(());
            }
        };
        info!("Creating container with WEAVE_CIDR \"{}\"", cidrs.join(" "));

        add_wait_volume(container.object("HostConfig")?, self.proxy.wait_volume())?;
        self.set_wait_entrypoint(&mut container).await?;

        let hostname = self.hostname(req.uri().query(), &mut container)?;
        if let Some(domain) = self.proxy.dns_domain().await {
            set_hostname(&mut container, &hostname, &domain)?;
            set_weave_dns(&mut container, self.proxy.docker_bridge_ip(), &domain)?;
        }

        write_json(req, &container)
    }

    async fn intercept_response(&self, _path: &str, _resp: &mut Response<ProxyBody>) -> Result<()> {
        Ok(())
    }
}

/// The `name` query parameter without Docker's leading slash.
fn container_name(query: Option<&str>) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "name")
                .map(|(_, value)| value.trim_start_matches('/').to_string())
        })
        .unwrap_or_default()
}

/// Bind the weavewait volume read-only at `/w`, replacing any earlier bind there.
fn add_wait_volume(host_config: &mut JsonObject, volume: &str) -> Result<()> {
    let mut binds: Vec<String> = host_config
        .string_array("Binds")?
        .into_iter()
        .filter(|bind| bind.split(':').nth(1) != Some(WAIT_VOLUME_PATH))
        .collect();
    binds.push(format!("{volume}:{WAIT_VOLUME_PATH}:ro"));
    host_config.insert("Binds".into(), string_array_value(binds));
    Ok(())
}

fn set_hostname(container: &mut JsonObject, name: &str, domain: &str) -> Result<()> {
    if name.is_empty() || !container.string("Hostname")?.is_empty() {
        return Ok(());
    }

    let domain = domain.trim_end_matches('.');
    if name.len() + 1 + domain.len() > MAX_HOSTNAME_LEN {
        warn!("Container name [{}] too long to be used as hostname", name);
        return Ok(());
    }

    container.insert("Hostname".into(), Value::String(name.to_string()));
    container.insert("Domainname".into(), Value::String(domain.to_string()));
    Ok(())
}

/// Resolve through weaveDNS on the docker bridge.
fn set_weave_dns(container: &mut JsonObject, bridge_ip: &str, domain: &str) -> Result<()> {
    let has_hostname = !container.string("Hostname")?.is_empty();
    let host_config = container.object("HostConfig")?;

    let mut dns = host_config.string_array("Dns")?;
    dns.push(bridge_ip.to_string());
    host_config.insert("Dns".into(), string_array_value(dns));

    if host_config.string_array("DnsSearch")?.is_empty() {
        let search = if has_hostname { "." } else { domain };
        host_config.insert("DnsSearch".into(), string_array_value([search]));
    }
    Ok(())
}
