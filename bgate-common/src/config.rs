//! Runtime settings shared by service bootstrap code.
//!
//! The external configuration loader stays out of scope; embedders populate this struct and
//! hand it to the web engine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Settings recognized by one web service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSettings {
    /// Listen endpoint for the service.
    pub listen: SocketAddr,
    /// Optional static content root; must exist when set.
    pub web_root: Option<PathBuf>,
    /// Whitelist of origins allowed to complete a WebSocket handshake.
    ///
    /// An empty list admits every origin.
    pub web_origins: Vec<String>,
    /// Optional CA certificate used to verify client certificates.
    pub web_ca_certificate: Option<PathBuf>,
    /// Server certificate chain in PEM form.
    pub web_server_certificate: Option<PathBuf>,
    /// Server private key in PEM form.
    pub web_server_private_key: Option<PathBuf>,
    /// Advisory I/O thread priority.
    pub web_priority: Option<i32>,
    /// Idle disconnect threshold; zero disables the idle sweep.
    pub idle_timeout: Duration,
}

impl WebSettings {
    /// True when any TLS material is configured at all.
    #[must_use]
    pub fn tls_requested(&self) -> bool {
        self.web_server_certificate.is_some() || self.web_server_private_key.is_some()
    }

    /// True when the certificate/key pair required to terminate TLS is configured.
    ///
    /// A missing certificate and missing key together mean the secure service is simply not
    /// enabled; the plain service stays available.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.web_server_certificate.is_some() && self.web_server_private_key.is_some()
    }
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9071)),
            web_root: None,
            web_origins: Vec::new(),
            web_ca_certificate: None,
            web_server_certificate: None,
            web_server_private_key: None,
            web_priority: None,
            idle_timeout: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WebSettings;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    fn tls_is_enabled_only_with_certificate_and_key() {
        let mut settings = WebSettings::default();
        assert_that!(settings.tls_requested(), eq(false));
        assert_that!(settings.tls_enabled(), eq(false));

        settings.web_server_certificate = Some(PathBuf::from("server.crt"));
        assert_that!(settings.tls_requested(), eq(true));
        assert_that!(settings.tls_enabled(), eq(false));

        settings.web_server_private_key = Some(PathBuf::from("server.key"));
        assert_that!(settings.tls_enabled(), eq(true));
    }
}
