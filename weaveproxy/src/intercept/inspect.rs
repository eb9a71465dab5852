//! Report weave addresses in `docker inspect` output

use super::{read_json, write_json, Interceptor, ProxyBody};
use crate::error::{ProxyError, Result};
use crate::json::{JsonObject, JsonObjectExt};
use crate::proxy::Proxy;
use async_trait::async_trait;
use hyper::{Request, Response};
use ipnet::IpNet;
use serde_json::Value;

pub struct InspectContainerInterceptor<'p> {
    proxy: &'p Proxy,
}

impl<'p> InspectContainerInterceptor<'p> {
    pub fn new(proxy: &'p Proxy) -> Self {
        Self { proxy }
    }
}

pub struct InspectExecInterceptor<'p> {
    proxy: &'p Proxy,
}

impl<'p> InspectExecInterceptor<'p> {
    pub fn new(proxy: &'p Proxy) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl<'p> Interceptor for InspectContainerInterceptor<'p> {
    async fn intercept_request(&self, _req: &mut Request<ProxyBody>) -> Result<()> {
        Ok(())
    }

    async fn intercept_response(&self, _path: &str, resp: &mut Response<ProxyBody>) -> Result<()> {
        if !self.proxy.config().rewrite_inspect || !resp.status().is_success() {
            return Ok(());
        }
        let Some(mut container) = read_json(resp).await? else {
            return Ok(());
        };

        if update_network_settings(self.proxy, &mut container).await? {
            write_json(resp, &container)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<'p> Interceptor for InspectExecInterceptor<'p> {
    async fn intercept_request(&self, _req: &mut Request<ProxyBody>) -> Result<()> {
        Ok(())
    }

    async fn intercept_response(&self, _path: &str, resp: &mut Response<ProxyBody>) -> Result<()> {
        if !self.proxy.config().rewrite_inspect || !resp.status().is_success() {
            return Ok(());
        }
        let Some(mut exec) = read_json(resp).await? else {
            return Ok(());
        };

        if update_network_settings(self.proxy, exec.object("Container")?).await? {
            write_json(resp, &exec)?;
        }
        Ok(())
    }
}

/// Overwrite `NetworkSettings` with the container's first weave address.
///
/// Returns whether anything changed.
async fn update_network_settings(proxy: &Proxy, container: &mut JsonObject) -> Result<bool> {
    let mut id = container.string("Id")?;
    if id.is_empty() {
        id = container.string("ID")?;
    }
    if id.is_empty() {
        return Ok(false);
    }

    let output = proxy.weave(vec!["ps".to_string(), id]).await?;
    if !output.stderr.is_empty() {
        return Err(ProxyError::Weave {
            stderr: output.stderr,
        });
    }

    let Some((mac, nets)) = parse_ps_output(&output.stdout)? else {
        return Ok(false);
    };
    let Some(net) = nets.first() else {
        return Ok(false);
    };

    let settings = container.object("NetworkSettings")?;
    settings.insert("MacAddress".into(), Value::String(mac));
    settings.insert("IPAddress".into(), Value::String(net.addr().to_string()));
    settings.insert("IPPrefixLen".into(), Value::from(net.prefix_len()));
    Ok(true)
}

/// Parse `weave ps` output: `<id> <mac> <cidr>...`.
fn parse_ps_output(stdout: &str) -> Result<Option<(String, Vec<IpNet>)>> {
    let mut fields = stdout.split_whitespace();
    let (Some(_id), Some(mac)) = (fields.next(), fields.next()) else {
        return Ok(None);
    };

    let nets = fields
        .map(|cidr| {
            cidr.parse::<IpNet>().map_err(|source| ProxyError::InvalidCidr {
                cidr: cidr.to_string(),
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some((mac.to_string(), nets)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::testing::FakeEngine;
    use crate::proxy::testing::{proxy_with, request, response_json};
    use crate::weave::testing::ScriptedWeave;
    use hyper::{Method, StatusCode};
    use serde_json::json;

    const PS: &str = "abc123 02:42:0a:20:00:01 10.32.0.1/12 10.40.0.1/16\n";

    fn container() -> Value {
        json!({
            "Id": "abc123",
            "NetworkSettings": {"IPAddress": "172.17.0.2", "IPPrefixLen": 16, "MacAddress": "02:42:ac:11:00:02"}
        })
    }

    #[test]
    fn test_parse_ps_output() {
        let (mac, nets) = parse_ps_output(PS).unwrap().unwrap();
        assert_eq!(mac, "02:42:0a:20:00:01");
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].addr().to_string(), "10.32.0.1");
        assert_eq!(nets[0].prefix_len(), 12);

        let (_, none) = parse_ps_output("abc123 02:42:0a:20:00:01\n").unwrap().unwrap();
        assert!(none.is_empty());
        assert!(parse_ps_output("").unwrap().is_none());
        assert!(matches!(
            parse_ps_output("abc 02:42:0a:20:00:01 10.32.0.1"),
            Err(ProxyError::InvalidCidr { .. })
        ));
    }

    #[tokio::test]
    async fn test_inspect_container_rewritten() {
        let engine = FakeEngine::start().await;
        engine.route("/v1.41/containers/web/json", StatusCode::OK, container());
        let weave = ScriptedWeave::new();
        weave.reply(true, PS, "");
        let proxy = proxy_with(&engine, weave.clone(), |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/v1.41/containers/web/json", None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(
            body["NetworkSettings"],
            json!({"IPAddress": "10.32.0.1", "IPPrefixLen": 12, "MacAddress": "02:42:0a:20:00:01"})
        );
        assert_eq!(weave.calls(), vec![vec!["ps".to_string(), "abc123".to_string()]]);
    }

    #[tokio::test]
    async fn test_inspect_untouched_without_flag() {
        let engine = FakeEngine::start().await;
        engine.route("/containers/web/json", StatusCode::OK, container());
        let weave = ScriptedWeave::new();
        let proxy = proxy_with(&engine, weave.clone(), |_| {}).await;

        let resp = proxy
            .handle(request(Method::GET, "/containers/web/json", None))
            .await;
        assert_eq!(response_json(resp).await, container());
        assert!(weave.calls().is_empty());
    }

    #[tokio::test]
    async fn test_container_not_on_weave_untouched() {
        let engine = FakeEngine::start().await;
        engine.route("/containers/web/json", StatusCode::OK, container());
        let weave = ScriptedWeave::new();
        weave.reply(true, "abc123 02:42:0a:20:00:01\n", "");
        let proxy = proxy_with(&engine, weave, |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/containers/web/json", None))
            .await;
        assert_eq!(response_json(resp).await, container());
    }

    #[tokio::test]
    async fn test_ps_stderr_keeps_engine_response() {
        let engine = FakeEngine::start().await;
        engine.route("/containers/web/json", StatusCode::OK, container());
        let weave = ScriptedWeave::new();
        weave.reply(true, PS, "weave is not running");
        let proxy = proxy_with(&engine, weave, |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/containers/web/json", None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(response_json(resp).await, container());
    }

    #[tokio::test]
    async fn test_missing_container_not_rewritten() {
        let engine = FakeEngine::start().await;
        let weave = ScriptedWeave::new();
        let proxy = proxy_with(&engine, weave.clone(), |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/containers/nope/json", None))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(weave.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inspect_exec_without_container_runs_nothing() {
        let engine = FakeEngine::start().await;
        engine.route(
            "/v1.41/exec/e1/json",
            StatusCode::OK,
            json!({"ID": "e1", "Running": false}),
        );
        let weave = ScriptedWeave::new();
        weave.reply(true, PS, "");
        let proxy = proxy_with(&engine, weave.clone(), |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/v1.41/exec/e1/json", None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(response_json(resp).await, json!({"ID": "e1", "Running": false}));
        assert!(weave.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inspect_exec_rewrites_container() {
        let engine = FakeEngine::start().await;
        engine.route(
            "/v1.41/exec/e1/json",
            StatusCode::OK,
            json!({"ID": "e1", "Running": true, "Container": {"ID": "abc123", "NetworkSettings": {}}}),
        );
        let weave = ScriptedWeave::new();
        weave.reply(true, PS, "");
        let proxy = proxy_with(&engine, weave.clone(), |c| c.rewrite_inspect = true).await;

        let resp = proxy
            .handle(request(Method::GET, "/v1.41/exec/e1/json", None))
            .await;
        let body = response_json(resp).await;
        assert_eq!(body["ID"], "e1");
        assert_eq!(body["Container"]["NetworkSettings"]["IPAddress"], "10.32.0.1");
        assert_eq!(body["Container"]["NetworkSettings"]["IPPrefixLen"], 12);
        assert_eq!(weave.calls(), vec![vec!["ps".to_string(), "abc123".to_string()]]);
    }
}
