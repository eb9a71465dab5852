//! Attach containers to the weave network once the engine has started them

use super::{Interceptor, ProxyBody};
use crate::cidr::CidrDecision;
use crate::error::Result;
use crate::proxy::Proxy;
use async_trait::async_trait;
use hyper::{Request, Response};
use tracing::{info, warn};

pub struct StartContainerInterceptor<'p> {
    proxy: &'p Proxy,
}

impl<'p> StartContainerInterceptor<'p> {
    pub fn new(proxy: &'p Proxy) -> Self {
        Self { proxy }
    }
}

/// Arguments for `weave attach`.
pub fn attach_args(cidrs: &[String], rewrite_hosts: bool, container_id: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(cidrs.len() + 4);
    args.push("attach".to_string());
    args.extend(cidrs.iter().cloned());
    if rewrite_hosts {
        args.push("--rewrite-hosts".to_string());
    }
    args.push("--or-die".to_string());
    args.push(container_id.to_string());
    args
}

#[async_trait]
impl<'p> Interceptor for StartContainerInterceptor<'p> {
    async fn intercept_request(&self, _req: &mut Request<ProxyBody>) -> Result<()> {
        Ok(())
    }

    async fn intercept_response(&self, path: &str, resp: &mut Response<ProxyBody>) -> Result<()> {
        // Docker didn't do the start
        if !resp.status().is_success() {
            return Ok(());
        }

        let container = self.proxy.inspect_container_in_path(path).await?;

        let cidrs = match self.proxy.weave_cidrs(&container) {
            CidrDecision::Attach(cidrs) => cidrs,
            CidrDecision::Skip(reason) => {
                info!("Leaving container {} alone because {}", container.id, reason);
                return Ok(());
            }
        };

        info!(
            "Attaching container {} with WEAVE_CIDR \"{}\" to weave network",
            container.id,
            cidrs.join(" ")
        );
        let args = attach_args(
            &cidrs,
            !self.proxy.config().no_rewrite_hosts,
            &container.id,
        );

        match self.proxy.weave(args).await {
            Ok(output) => {
                if !output.stderr.is_empty() {
                    warn!(
                        "Attaching container {} to weave network: {}",
                        container.id, output.stderr
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Attaching container {} to weave network failed: {}",
                    container.id, e
                );
                Err(e)
            }
        }
    }
}
