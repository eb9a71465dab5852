//! Drive the proxy through real listeners against a fake Docker engine.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use weaveproxy::{Proxy, ProxyConfig, TlsConfig, WeaveOutput, WeaveRunner};

const WAIT_VOLUME: &str = "/var/lib/weave/weavewait";

#[derive(Default)]
struct EngineState {
    routes: HashMap<String, (StatusCode, Value)>,
    bodies: HashMap<String, Bytes>,
}

/// Docker engine stand-in answering canned JSON on a Unix socket.
struct Engine {
    state: Arc<Mutex<EngineState>>,
}

impl Engine {
    fn start(socket: &Path) -> Self {
        let listener = UnixListener::bind(socket).unwrap();
        let state = Arc::new(Mutex::new(EngineState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| answer(state.clone(), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { state }
    }

    fn route(&self, path: &str, status: StatusCode, body: Value) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), (status, body));
    }

    fn body(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .bodies
            .get(path)
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
    }
}

async fn answer(
    state: Arc<Mutex<EngineState>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes();

    let mut state = state.lock().unwrap();
    state.bodies.insert(path.clone(), body);
    let (status, value) = state
        .routes
        .get(&path)
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, json!({"message": "not found"})));

    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    Ok(response)
}

#[derive(Default)]
struct RecordingWeave {
    calls: Mutex<Vec<Vec<String>>>,
}

impl WeaveRunner for RecordingWeave {
    fn run(&self, args: &[String]) -> std::io::Result<WeaveOutput> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok(WeaveOutput {
            success: true,
            ..Default::default()
        })
    }
}

struct Harness {
    dir: TempDir,
    engine: Engine,
    weave: Arc<RecordingWeave>,
    config: ProxyConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine_socket = dir.path().join("docker.sock");
        let engine = Engine::start(&engine_socket);
        engine.route(
            "/v1.15/containers/weaveproxy/json",
            StatusCode::OK,
            json!({"Id": "proxy", "Volumes": {"/w": WAIT_VOLUME}}),
        );

        let config = ProxyConfig {
            docker_socket: engine_socket,
            without_dns: true,
            ..Default::default()
        };

        Self {
            dir,
            engine,
            weave: Arc::new(RecordingWeave::default()),
            config,
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    async fn proxy(&self) -> Arc<Proxy> {
        let proxy = Proxy::new(self.config.clone(), self.weave.clone())
            .await
            .unwrap();
        Arc::new(proxy)
    }
}

async fn send<S>(stream: S, method: Method, uri: &str, body: Value) -> (StatusCode, Value)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let body = body.to_string();
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Full::new(Bytes::from(body)))
        .unwrap();

    let response = sender.send_request(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn connect_unix(path: &Path) -> UnixStream {
    for _ in 0..100 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("proxy never started listening on {}", path.display());
}

#[tokio::test]
async fn test_create_and_start_over_unix_socket() {
    let mut harness = Harness::new();
    let socket = harness.path("weave.sock");
    harness.config.listen_addrs = vec![format!("unix://{}", socket.display())];

    harness
        .engine
        .route("/v1.41/containers/create", StatusCode::CREATED, json!({"Id": "abc123"}));
    harness
        .engine
        .route("/v1.41/containers/web/start", StatusCode::OK, json!({}));
    harness.engine.route(
        "/v1.15/containers/web/json",
        StatusCode::OK,
        json!({
            "Id": "abc123",
            "Config": {"Env": ["WEAVE_CIDR=10.2.1.7/24"]},
            "HostConfig": {"NetworkMode": "default"},
            "Volumes": {"/w": WAIT_VOLUME}
        }),
    );

    let proxy = harness.proxy().await;
    tokio::spawn(proxy.listen_and_serve());

    let (status, created) = send(
        connect_unix(&socket).await,
        Method::POST,
        "/v1.41/containers/create?name=web",
        json!({"Image": "busybox", "Entrypoint": ["/bin/sh"], "Env": ["WEAVE_CIDR=10.2.1.7/24"]}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created, json!({"Id": "abc123"}));

    let forwarded = harness.engine.body("/v1.41/containers/create").unwrap();
    assert_eq!(forwarded["Entrypoint"], json!(["/w/w", "/bin/sh"]));
    assert_eq!(
        forwarded["HostConfig"]["Binds"],
        json!([format!("{WAIT_VOLUME}:/w:ro")])
    );

    let (status, _) = send(
        connect_unix(&socket).await,
        Method::POST,
        "/v1.41/containers/web/start",
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let calls = harness.weave.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![vec![
            "attach".to_string(),
            "10.2.1.7/24".to_string(),
            "--rewrite-hosts".to_string(),
            "--or-die".to_string(),
            "abc123".to_string(),
        ]]
    );
}

#[tokio::test]
async fn test_tls_listener_serves_api() {
    let mut harness = Harness::new();
    harness.engine.route("/_ping", StatusCode::OK, json!("OK"));

    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(harness.path("cert.pem"), cert.pem()).unwrap();
    std::fs::write(harness.path("key.pem"), key_pair.serialize_pem()).unwrap();
    harness.config.tls = TlsConfig {
        tls: true,
        cert: Some(harness.path("cert.pem")),
        key: Some(harness.path("key.pem")),
        ..Default::default()
    };
    harness.config.listen_addrs = vec!["tcp://127.0.0.1:0".to_string()];

    let proxy = harness.proxy().await;
    let mut bound = proxy.bind_listeners().await.unwrap();
    let bound = bound.remove(0);
    assert!(bound.listener.is_tls());
    let addr = bound.addr.trim_start_matches("tcp://").to_string();
    tokio::spawn(bound.listener.serve(proxy.clone()));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let tcp = TcpStream::connect(&addr).await.unwrap();
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let tls = connector.connect(server_name, tcp).await.unwrap();

    let (status, body) = send(tls, Method::GET, "/_ping", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}
