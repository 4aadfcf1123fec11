//! Cluster gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   flags / env / TOML ──▶ Config ──▶ Resolver::to_server
//!                                       │
//!            ┌──────────────────────────┼──────────────────────────┐
//!            ▼                          ▼                          ▼
//!     ClientConfig            AuthMiddleware (disabled /      start hooks
//!     (unthrottled)           webhook / local fallback)      (wrap + start)
//!            └──────────────────────────┼──────────────────────────┘
//!                                       ▼
//!                               ServerDescriptor
//!                                       │
//!                                       ▼
//!     Server: run hooks ─▶ auth layer ─▶ /healthz, /dashboard, /api, /apis ─▶ cluster
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use cluster_gateway::config::{self, watcher::ConfigWatcher, Config, LogFormat};
use cluster_gateway::http::{Listeners, Server};
use cluster_gateway::lifecycle::cancel_on_signal;
use cluster_gateway::net::tls::{install_crypto_provider, load_tls_config};
use cluster_gateway::observability::{logging, metrics};
use cluster_gateway::Resolver;

#[derive(Parser)]
#[command(name = "cluster-gateway", version)]
#[command(about = "Authenticating gateway in front of a Kubernetes cluster", long_about = None)]
struct Cli {
    /// TOML file replacing the flag values; watched for changes.
    #[arg(long = "config", env = "GATEWAY_CONFIG")]
    config_file: Option<PathBuf>,

    /// PEM certificate for the HTTPS listener.
    #[arg(long, requires = "tls_key_file")]
    tls_cert_file: Option<PathBuf>,

    /// PEM private key for the HTTPS listener.
    #[arg(long, requires = "tls_cert_file")]
    tls_key_file: Option<PathBuf>,

    /// Address of the Prometheus scrape endpoint.
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);
    install_crypto_provider();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cluster-gateway starting");

    let config = match &cli.config_file {
        Some(path) => config::load_config(path)?,
        None => cli.config.clone(),
    };
    tracing::info!(
        kubeconfig = if config.kubeconfig.is_empty() { "<ambient>" } else { config.kubeconfig.as_str() },
        https_listen_port = config.https_listen_port,
        http_listen_port = config.http_listen_port,
        authentication = config.authentication,
        "Configuration loaded"
    );

    let shared = config::shared(config.clone());
    let _watcher = match &cli.config_file {
        Some(path) => Some(ConfigWatcher::new(path, shared.clone()).run()?),
        None => None,
    };

    if let Some(addr) = cli.metrics_address {
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
    }

    let lifetime = CancellationToken::new();
    tokio::spawn(cancel_on_signal(lifetime.clone()));

    let descriptor = Resolver::new(shared)
        .to_server(&lifetime)
        .await
        .context("failed to resolve server")?;

    let https = match (&cli.tls_cert_file, &cli.tls_key_file) {
        (Some(cert), Some(key)) => {
            let tls = load_tls_config(cert, key).await.context("failed to load TLS certificate")?;
            Some((SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.https_listen_port)), tls))
        }
        _ => None,
    };
    let listeners = Listeners {
        http: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.http_listen_port)),
        https,
    };

    let result = Server::new(descriptor)?.run(listeners, lifetime.clone()).await;
    lifetime.cancel();
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}
