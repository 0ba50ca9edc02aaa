use std::sync::Arc;

use reqwest::Client;
use rustls::ClientConfig;
use rustls::crypto::aws_lc_rs;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, warn};

use crate::{DownloadError, DownloaderConfig};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if config.danger_accept_invalid_certs {
        // reqwest ignores this flag on a preconfigured TLS config, so it builds its own
        // and needs a process wide provider. An already installed one is fine.
        let _ = aws_lc_rs::default_provider().install_default();
        warn!("TLS certificate verification is disabled");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    } else {
        let provider = Arc::new(aws_lc_rs::default_provider());

        // Platform default TLS configuration
        let tls_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| DownloadError::TlsError(e.to_string()))?
            .with_platform_verifier()
            .map_err(|e| DownloadError::TlsError(e.to_string()))?
            .with_no_client_auth();
        client_builder = client_builder.use_preconfigured_tls(tls_config);
    }

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    debug!(
        timeout = ?config.timeout,
        connect_timeout = ?config.connect_timeout,
        read_timeout = ?config.read_timeout,
        insecure = config.danger_accept_invalid_certs,
        "Creating HTTP client"
    );

    client_builder.build().map_err(DownloadError::from)
}
