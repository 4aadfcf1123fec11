//! TLS configuration and certificate loading for the secure listener.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    // Both ring and aws-lc-rs are compiled in, so rustls cannot pick one itself.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Load TLS configuration from PEM certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("certificate file not found: {}", cert_path.display()),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("private key file not found: {}", key_path.display()),
        ));
    }

    install_crypto_provider();
    RustlsConfig::from_pem_file(cert_path, key_path).await
}
