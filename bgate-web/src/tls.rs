//! TLS server-configuration loading from PEM material.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use bgate_common::config::WebSettings;
use bgate_common::error::{GateError, GateResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tracing::info;

/// Builds the rustls server configuration described by `settings`.
///
/// A certificate and key that are both absent simply disable TLS (the plain service stays
/// available); configuring only one of the two is an error.
///
/// # Errors
///
/// Returns `GateError::InvalidConfig` for a half-configured pair and `GateError::Tls` when any
/// PEM file fails to load or the configuration is rejected by rustls.
pub fn load_server_config(settings: &WebSettings) -> GateResult<Option<Arc<ServerConfig>>> {
    let (Some(certificate_path), Some(key_path)) = (
        settings.web_server_certificate.as_deref(),
        settings.web_server_private_key.as_deref(),
    ) else {
        if settings.tls_requested() {
            return Err(GateError::InvalidConfig(
                "tls requires both web_server_certificate and web_server_private_key",
            ));
        }
        return Ok(None);
    };

    let certificates = load_certificates(certificate_path)?;
    let key = load_private_key(key_path)?;

    let builder = ServerConfig::builder();
    let config = match settings.web_ca_certificate.as_deref() {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for certificate in load_certificates(ca_path)? {
                roots.add(certificate).map_err(|error| {
                    GateError::Tls(format!(
                        "adding CA certificate from '{}' failed: {error}",
                        ca_path.display()
                    ))
                })?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|error| {
                    GateError::Tls(format!("building client verifier failed: {error}"))
                })?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certificates, key)
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certificates, key),
    }
    .map_err(|error| GateError::Tls(format!("building server tls config failed: {error}")))?;

    info!(
        certificate = %certificate_path.display(),
        "tls termination enabled"
    );
    Ok(Some(Arc::new(config)))
}

fn load_certificates(path: &Path) -> GateResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|error| {
        GateError::Tls(format!(
            "opening certificate file '{}' failed: {error}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| {
            GateError::Tls(format!(
                "reading certificates from '{}' failed: {error}",
                path.display()
            ))
        })?;
    if certificates.is_empty() {
        return Err(GateError::Tls(format!(
            "no certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certificates)
}

fn load_private_key(path: &Path) -> GateResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|error| {
        GateError::Tls(format!(
            "opening private key file '{}' failed: {error}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|error| {
            GateError::Tls(format!(
                "reading private key from '{}' failed: {error}",
                path.display()
            ))
        })?
        .ok_or_else(|| GateError::Tls(format!("no private key found in '{}'", path.display())))
}

#[cfg(test)]
mod tests {
    use super::load_server_config;
    use bgate_common::config::WebSettings;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    fn absent_material_disables_tls() {
        let settings = WebSettings::default();
        let config = load_server_config(&settings).expect("absent material should be accepted");
        assert_that!(config.is_none(), eq(true));
    }

    #[rstest]
    fn half_configured_pair_is_rejected() {
        let settings = WebSettings {
            web_server_certificate: Some(PathBuf::from("only.crt")),
            ..WebSettings::default()
        };
        assert_that!(load_server_config(&settings).is_err(), eq(true));
    }

    #[rstest]
    fn missing_certificate_file_is_rejected() {
        let settings = WebSettings {
            web_server_certificate: Some(PathBuf::from("/nonexistent/server.crt")),
            web_server_private_key: Some(PathBuf::from("/nonexistent/server.key")),
            ..WebSettings::default()
        };
        assert_that!(load_server_config(&settings).is_err(), eq(true));
    }
}
