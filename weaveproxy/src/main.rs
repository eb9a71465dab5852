use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use weaveproxy::{ConfigLoader, ConfigValidator, Proxy, ProxyConfig, WeaveCommand};

const DEFAULT_LISTEN_ADDR: &str = "tcp://0.0.0.0:12375";

#[derive(Parser, Debug)]
#[command(name = "weaveproxy")]
#[command(about = "Docker API proxy that attaches containers to the weave network")]
#[command(version)]
struct Args {
    /// Address to listen on (tcp://host:port, unix:///path); repeatable
    #[arg(long = "host", short = 'H')]
    listen_addrs: Vec<String>,

    /// Take the hostname from this container label instead of the name
    #[arg(long)]
    hostname_from_label: Option<String>,

    /// Regex matched against the hostname
    #[arg(long)]
    hostname_match: Option<String>,

    /// Replacement for --hostname-match, may use $1 style group references
    #[arg(long)]
    hostname_replacement: Option<String>,

    /// Show weave addresses in docker inspect output
    #[arg(long)]
    rewrite_inspect: bool,

    /// Only attach containers started with -e WEAVE_CIDR=...
    #[arg(long = "no-default-ipalloc")]
    no_default_ipam: bool,

    /// Do not rewrite /etc/hosts in attached containers
    #[arg(long)]
    no_rewrite_hosts: bool,

    /// Use weaveDNS (the default)
    #[arg(long)]
    with_dns: bool,

    /// Do not use weaveDNS
    #[arg(long)]
    without_dns: bool,

    /// Serve TCP listeners over TLS
    #[arg(long)]
    tls: bool,

    /// Serve TLS and require verified client certificates
    #[arg(long = "tlsverify")]
    tls_verify: bool,

    /// Trust client certificates signed by this CA
    #[arg(long = "tlscacert")]
    tls_ca_cert: Option<PathBuf>,

    /// TLS certificate file
    #[arg(long = "tlscert")]
    tls_cert: Option<PathBuf>,

    /// TLS key file
    #[arg(long = "tlskey")]
    tls_key: Option<PathBuf>,

    /// Docker engine socket
    #[arg(long, env = "DOCKER_SOCKET")]
    docker_socket: Option<PathBuf>,

    /// Path to the weave script
    #[arg(long, env = "WEAVE_PATH")]
    weave_path: Option<PathBuf>,

    /// Name of the container the proxy runs in
    #[arg(long)]
    container_name: Option<String>,

    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Args {
    /// Overlay command line flags on the file configuration.
    fn apply(self, config: &mut ProxyConfig) {
        if !self.listen_addrs.is_empty() {
            config.listen_addrs = self.listen_addrs;
        }
        if config.listen_addrs.is_empty() {
            config.listen_addrs.push(DEFAULT_LISTEN_ADDR.to_string());
        }

        if let Some(label) = self.hostname_from_label {
            config.hostname_from_label = Some(label);
        }
        if let Some(pattern) = self.hostname_match {
            config.hostname_match = pattern;
        }
        if let Some(replacement) = self.hostname_replacement {
            config.hostname_replacement = replacement;
        }

        config.rewrite_inspect |= self.rewrite_inspect;
        config.no_default_ipam |= self.no_default_ipam;
        config.no_rewrite_hosts |= self.no_rewrite_hosts;
        config.with_dns |= self.with_dns;
        config.without_dns |= self.without_dns;

        config.tls.tls |= self.tls;
        config.tls.tls_verify |= self.tls_verify;
        if self.tls_ca_cert.is_some() {
            config.tls.ca_cert = self.tls_ca_cert;
        }
        if self.tls_cert.is_some() {
            config.tls.cert = self.tls_cert;
        }
        if self.tls_key.is_some() {
            config.tls.key = self.tls_key;
        }

        if let Some(socket) = self.docker_socket {
            config.docker_socket = socket;
        }
        if let Some(path) = self.weave_path {
            config.weave_path = path;
        }
        if let Some(name) = self.container_name {
            config.container_name = name;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = if args.verbose {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = ConfigLoader::load_or_default(args.config.clone())?;
    args.apply(&mut config);
    ConfigValidator::validate(&config)?;

    info!("weave proxy {}", config.version);

    let weave = Arc::new(WeaveCommand::new(&config.weave_path));
    let proxy = Proxy::new(config, weave)
        .await
        .context("Could not start proxy")?;

    Arc::new(proxy).listen_and_serve().await?;
    Ok(())
}
