//! Run exec'd processes under weavewait too

use super::{read_json, write_json, Interceptor, ProxyBody, WAIT_ENTRYPOINT, WAIT_VOLUME_PATH};
use crate::cidr::CidrDecision;
use crate::error::Result;
use crate::json::{string_array_value, JsonObjectExt};
use crate::proxy::Proxy;
use async_trait::async_trait;
use hyper::{Request, Response};
use tracing::info;

pub struct CreateExecInterceptor<'p> {
    proxy: &'p Proxy,
}

impl<'p> CreateExecInterceptor<'p> {
    pub fn new(proxy: &'p Proxy) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl<'p> Interceptor for CreateExecInterceptor<'p> {
    async fn intercept_request(&self, req: &mut Request<ProxyBody>) -> Result<()> {
        let Some(mut options) = read_json(req).await? else {
            return Ok(());
        };

        let container = self
            .proxy
            .inspect_container_in_path(req.uri().path())
            .await?;

        // Not created through the proxy
        if container.volume(WAIT_VOLUME_PATH).is_none() {
            return Ok(());
        }

        let cidrs = match self.proxy.weave_cidrs(&container) {
            CidrDecision::Attach(cidrs) => cidrs,
            CidrDecision::Skip(reason) => {
                info!("Leaving container {} alone because {}", container.id, reason);
                return Ok(());
            }
        };
        info!(
            "Exec in container {} with WEAVE_CIDR \"{}\"",
            container.id,
            cidrs.join(" ")
        );

        let cmd = options.string_array("Cmd")?;
        let wrapped = WAIT_ENTRYPOINT
            .iter()
            .copied()
            .chain(["-s"])
            .chain(cmd.iter().map(String::as_str));
        options.insert("Cmd".into(), string_array_value(wrapped));

        write_json(req, &options)
    }

    async fn intercept_response(&self, _path: &str, _resp: &mut Response<ProxyBody>) -> Result<()> {
        Ok(())
    }
}
