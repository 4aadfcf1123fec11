//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command-line flags / env vars ──┐
//! optional TOML file (loader.rs) ─┴→ Config (immutable snapshot)
//!     → SharedConfig (ArcSwap)
//!     → resolution pass reads one snapshot
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → atomic swap of the snapshot
//! ```
//!
//! # Design Decisions
//! - Config is never mutated in place; reloads swap whole snapshots
//! - Ports and the dashboard URL are opaque to the gateway core

pub mod loader;
pub mod schema;
pub mod watcher;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use loader::{load_config, ConfigError};
pub use schema::{Config, LogFormat, WebhookConfig};

/// Config snapshot shared between the resolver and lazy readers.
pub type SharedConfig = Arc<ArcSwap<Config>>;

/// Wrap a config for sharing.
pub fn shared(config: Config) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}
