//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! http_listen_port  → plain TCP listener ─┐
//! https_listen_port → tls.rs (rustls)    ─┴→ HTTP layer (same router)
//! ```
//!
//! # Design Decisions
//! - The secure listener only starts when a certificate and key are supplied

pub mod tls;
