//! Listening sockets for the proxy
//!
//! Each configured address becomes one bound listener. Unix sockets take on
//! the mode and ownership of the Docker socket, so anyone who could talk to
//! Docker can talk to the proxy and nobody else can.

use super::server::Proxy;
use crate::error::{ProxyError, Result, ValidationError};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

/// A bound socket ready to be served
pub enum Listener {
    Tcp {
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    },
    Unix(UnixListener),
}

/// A listener together with its normalised `proto://addr` form
pub struct BoundListener {
    pub listener: Listener,
    pub addr: String,
}

/// Split a listen address into protocol and address.
///
/// `proto://addr` is taken as given, an absolute path means `unix`, and
/// anything else is a TCP `host:port`.
pub fn split_listen_addr(spec: &str) -> (&str, &str) {
    if let Some((proto, addr)) = spec.split_once("://") {
        (proto, addr)
    } else if spec.starts_with('/') {
        ("unix", spec)
    } else {
        ("tcp", spec)
    }
}

/// Bind one listen address.
///
/// `engine_socket` is the Docker socket whose permissions Unix listeners copy.
pub async fn listen(
    spec: &str,
    tls: Option<&TlsAcceptor>,
    engine_socket: &Path,
) -> Result<BoundListener> {
    let (proto, addr) = split_listen_addr(spec);
    let listen_err = |source: io::Error| ProxyError::Listen {
        addr: spec.to_string(),
        source,
    };

    match proto {
        "tcp" => {
            let listener = TcpListener::bind(addr).await.map_err(listen_err)?;
            let local = listener.local_addr().map_err(listen_err)?;
            Ok(BoundListener {
                listener: Listener::Tcp {
                    listener,
                    tls: tls.cloned(),
                },
                addr: format!("tcp://{local}"),
            })
        }
        "unix" => {
            // Remove socket from last invocation
            match fs::remove_file(addr) {
                Ok(()) => debug!("Removed stale socket {}", addr),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(listen_err(e)),
            }
            let listener = UnixListener::bind(addr).map_err(listen_err)?;
            copy_owner_and_permissions(engine_socket, Path::new(addr)).map_err(listen_err)?;
            Ok(BoundListener {
                listener: Listener::Unix(listener),
                addr: format!("unix://{addr}"),
            })
        }
        other => Err(ValidationError::InvalidProtocol {
            proto: other.to_string(),
        }
        .into()),
    }
}

/// Give `to` the mode, owner and group of `from`.
pub fn copy_owner_and_permissions(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::metadata(from)?;
    fs::set_permissions(to, metadata.permissions())?;
    std::os::unix::fs::chown(to, Some(metadata.uid()), Some(metadata.gid()))
}

impl Listener {
    pub fn is_tls(&self) -> bool {
        matches!(self, Listener::Tcp { tls: Some(_), .. })
    }

    /// Accept connections until the listener fails, one task per connection.
    ///
    /// Transient accept errors such as running out of file descriptors are
    /// retried after a growing delay. Anything else ends the loop.
    pub async fn serve(self, proxy: Arc<Proxy>) -> io::Result<()> {
        let mut backoff = AcceptBackoff::default();
        match self {
            Listener::Tcp { listener, tls } => loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        backoff.wait(e).await?;
                        continue;
                    }
                };
                backoff.reset();
                debug!("Accepted connection from {}", peer);

                let proxy = proxy.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, proxy).await,
                            Err(e) => debug!("TLS handshake with {} failed: {}", peer, e),
                        },
                        None => serve_connection(stream, proxy).await,
                    }
                });
            },
            Listener::Unix(listener) => loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        backoff.wait(e).await?;
                        continue;
                    }
                };
                backoff.reset();
                debug!("Accepted connection on Unix socket");

                tokio::spawn(serve_connection(stream, proxy.clone()));
            },
        }
    }
}

// Linux errno values for resource exhaustion during accept
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;
const ENOBUFS: i32 = 105;

const MIN_ACCEPT_DELAY: Duration = Duration::from_millis(5);
const MAX_ACCEPT_DELAY: Duration = Duration::from_secs(1);

/// Whether a failed accept is worth retrying.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(e.raw_os_error(), Some(ENOMEM | ENFILE | EMFILE | ENOBUFS))
}

/// Retry delay after accept errors: starts at 5ms and doubles up to 1s
#[derive(Debug, Default)]
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self
            .delay
            .map_or(MIN_ACCEPT_DELAY, |d| (d * 2).min(MAX_ACCEPT_DELAY));
        self.delay = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.delay = None;
    }

    /// Sleep before the next accept, or hand back a fatal error.
    async fn wait(&mut self, e: io::Error) -> io::Result<()> {
        if !is_transient_accept_error(&e) {
            error!("Serve failed: {}", e);
            return Err(e);
        }
        let delay = self.next_delay();
        warn!("Failed to accept connection: {}; retrying in {:?}", e, delay);
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

async fn serve_connection<S>(stream: S, proxy: Arc<Proxy>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let proxy = proxy.clone();
        async move { Ok::<_, Infallible>(proxy.handle(req.map(|body| body.boxed())).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("Connection closed: {}", e);
    }
}
