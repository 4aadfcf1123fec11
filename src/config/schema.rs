//! Configuration schema definitions.
//!
//! Every field is bindable from the command line (clap) and from a TOML
//! file (serde). Missing file keys fall back to the flag defaults.

use clap::{ArgAction, Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// Dashboard served when no other URL is configured.
pub const DEFAULT_DASHBOARD_URL: &str = "https://releases.rancher.com/dashboard/latest/index.html";

pub const DEFAULT_HTTPS_LISTEN_PORT: u16 = 9443;
pub const DEFAULT_HTTP_LISTEN_PORT: u16 = 9080;

/// Root configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Args, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Kubeconfig for the backing cluster; empty discovers ambient credentials.
    #[arg(long, env = "KUBECONFIG", default_value = "")]
    pub kubeconfig: String,

    /// Port of the TLS listener.
    #[arg(long, default_value_t = DEFAULT_HTTPS_LISTEN_PORT)]
    pub https_listen_port: u16,

    /// Port of the plain HTTP listener.
    #[arg(long, default_value_t = DEFAULT_HTTP_LISTEN_PORT)]
    pub http_listen_port: u16,

    /// Location of the dashboard UI index page.
    #[arg(long, default_value = DEFAULT_DASHBOARD_URL)]
    pub dashboard_url: String,

    /// Authenticate requests (`--authentication=false` to disable).
    #[arg(
        long,
        action = ArgAction::Set,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub authentication: bool,

    #[command(flatten)]
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: String::new(),
            https_listen_port: DEFAULT_HTTPS_LISTEN_PORT,
            http_listen_port: DEFAULT_HTTP_LISTEN_PORT,
            dashboard_url: DEFAULT_DASHBOARD_URL.to_string(),
            authentication: true,
            webhook: WebhookConfig::default(),
        }
    }
}

/// External token-review webhook settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WebhookConfig {
    /// Delegate authentication to a token-review webhook.
    #[arg(long = "webhook-auth", env = "WEBHOOK_AUTH")]
    pub webhook_authentication: bool,

    /// Kubeconfig describing the webhook endpoint.
    #[arg(long, env = "WEBHOOK_KUBECONFIG", default_value = "")]
    pub webhook_kubeconfig: String,

    /// Webhook endpoint URL, used when no webhook kubeconfig is given.
    #[arg(long, env = "WEBHOOK_URL", default_value = "")]
    pub webhook_url: String,

    /// Seconds to cache webhook decisions; 0 disables the cache.
    #[arg(long, env = "WEBHOOK_CACHE_TTL", default_value_t = 0)]
    pub webhook_cache_ttl: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
