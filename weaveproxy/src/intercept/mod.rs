//! Per-endpoint request and response rewriting
//!
//! Every proxied request gets exactly one [`Interceptor`], chosen by the
//! [`Router`] from the request path. The proxy calls
//! [`Interceptor::intercept_request`] before forwarding to the engine and
//! [`Interceptor::intercept_response`] before handing the engine's answer back
//! to the client.

mod body;
mod create_container;
mod create_exec;
mod inspect;
mod router;
mod start_container;

pub use body::{empty_body, full_body, read_json, write_json, HttpMessage, ProxyBody};
pub use create_container::CreateContainerInterceptor;
pub use create_exec::CreateExecInterceptor;
pub use inspect::{InspectContainerInterceptor, InspectExecInterceptor};
pub use router::{Route, Router};
pub use start_container::{attach_args, StartContainerInterceptor};

use crate::error::Result;
use async_trait::async_trait;
use hyper::{Request, Response};

/// Container path of the weavewait volume.
pub const WAIT_VOLUME_PATH: &str = "/w";

/// Entrypoint prefix that holds the container until it is attached.
pub const WAIT_ENTRYPOINT: [&str; 1] = ["/w/w"];

/// Two-phase rewriting hook bound to one API endpoint
///
/// A failure in the request phase stops the request from reaching the
/// engine. A failure in the response phase is logged and the engine's
/// response is returned unchanged.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept_request(&self, req: &mut Request<ProxyBody>) -> Result<()>;

    /// `path` is the path of the request that produced `resp`.
    async fn intercept_response(&self, path: &str, resp: &mut Response<ProxyBody>) -> Result<()>;
}

/// Pass-through for endpoints the proxy does not care about
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInterceptor;

#[async_trait]
impl Interceptor for NullInterceptor {
    async fn intercept_request(&self, _req: &mut Request<ProxyBody>) -> Result<()> {
        Ok(())
    }

    async fn intercept_response(&self, _path: &str, _resp: &mut Response<ProxyBody>) -> Result<()> {
        Ok(())
    }
}
