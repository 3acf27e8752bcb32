//! Shared HTTP client construction.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::MonitorError;

pub const USER_AGENT: &str = concat!("gatewatch/", env!("CARGO_PKG_VERSION"));

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client for the long-lived camera stream.
///
/// There is no overall request timeout since a session is meant to stay open
/// until refresh; `timeout` bounds connection setup and the gap between reads.
pub fn stream_client(timeout: Duration) -> Result<Client, MonitorError> {
    install_rustls_provider();
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()?;
    Ok(client)
}

/// Client for short request/response calls (classifier, alert relay).
pub fn request_client(timeout: Duration) -> Result<Client, MonitorError> {
    install_rustls_provider();
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}
