//! HTTP client construction for the SCEP transport.
//!
//! SCEP runs over plain HTTP as often as HTTPS; message integrity comes from
//! the CMS layer. When the server URL is HTTPS, the trust anchors below
//! decide how its certificate is verified.

use crate::config::{ScepClientConfig, TrustAnchors};
use crate::error::{Result, ScepError};

/// Build a reqwest Client with the appropriate TLS configuration.
pub fn build_http_client(config: &ScepClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(bundles) => {
            builder = builder.tls_built_in_root_certs(false);
            for bundle in bundles {
                for der in parse_pem_certificates(bundle)? {
                    let cert = reqwest::Certificate::from_der(&der).map_err(|e| {
                        ScepError::tls(format!("Failed to parse CA certificate: {}", e))
                    })?;
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.additional_headers {
        let name = reqwest::header::HeaderName::try_from(name.as_str())
            .map_err(|e| ScepError::config(format!("Invalid header name {:?}: {}", name, e)))?;
        let value = reqwest::header::HeaderValue::try_from(value.as_str())
            .map_err(|e| ScepError::config(format!("Invalid value for header {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    builder = builder.default_headers(headers);

    builder
        .build()
        .map_err(|e| ScepError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Split a PEM bundle into DER certificates.
///
/// A bundle without any certificate is an error.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ScepError::tls(format!("Failed to read PEM bundle: {}", e)))?;

    if certs.is_empty() {
        return Err(ScepError::tls("No certificates found in PEM data"));
    }

    Ok(certs)
}
