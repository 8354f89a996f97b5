// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SCEP HTTP transport (RFC 8894 section 4).
//!
//! All operations share one CGI endpoint and are selected with the
//! `operation` query parameter.

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::ScepClientConfig;
use crate::error::{Result, ScepError};
use crate::tls::build_http_client;
use crate::types::{CaCaps, content_types, operations, parse_certs_only};

/// The three SCEP operations the enrollment client needs.
#[async_trait]
pub trait ScepTransport: Send + Sync {
    /// Fetch the server's capability list.
    async fn get_ca_caps(&self) -> Result<CaCaps>;

    /// Fetch the CA certificate(s).
    ///
    /// Returns the raw body and the number of certificates it holds. A count
    /// greater than one means the body is a certs-only PKCS#7.
    async fn get_ca_cert(&self, message: &str) -> Result<(Vec<u8>, usize)>;

    /// Submit a DER-encoded PKI message and return the raw reply.
    async fn pki_operation(&self, raw: &[u8]) -> Result<Vec<u8>>;
}

/// [`ScepTransport`] over HTTP(S).
#[derive(Debug)]
pub struct HttpTransport {
    config: ScepClientConfig,
    http: reqwest::Client,
    caps: OnceCell<CaCaps>,
}

impl HttpTransport {
    /// Create a transport for the configured server.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub fn new(config: &ScepClientConfig) -> Result<Self> {
        let http = build_http_client(config)?;
        Ok(Self::with_http_client(config.clone(), http))
    }

    /// Create a transport around an existing HTTP client.
    pub fn with_http_client(config: ScepClientConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            caps: OnceCell::new(),
        }
    }

    /// The server URL.
    pub fn server_url(&self) -> &Url {
        &self.config.server_url
    }

    async fn fetch_ca_caps(&self) -> Result<CaCaps> {
        let url = self.config.operation_url(operations::GET_CA_CAPS, None);
        tracing::debug!("GET {}", url);

        let response = self.http.get(url).send().await?;
        let response = self.handle_error_response(response).await?;

        let body = response.text().await?;
        let caps = CaCaps::parse(&body);
        tracing::debug!(caps = ?caps.iter().collect::<Vec<_>>(), "CA capabilities");
        Ok(caps)
    }

    /// Handle error responses from the server.
    async fn handle_error_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(ScepError::server_error(status.as_u16(), message))
    }
}

#[async_trait]
impl ScepTransport for HttpTransport {
    async fn get_ca_caps(&self) -> Result<CaCaps> {
        self.caps
            .get_or_try_init(|| self.fetch_ca_caps())
            .await
            .cloned()
    }

    async fn get_ca_cert(&self, message: &str) -> Result<(Vec<u8>, usize)> {
        let url = self
            .config
            .operation_url(operations::GET_CA_CERT, Some(message));
        tracing::debug!("GET {}", url);

        let response = self.http.get(url).send().await?;
        let response = self.handle_error_response(response).await?;

        let content_type = media_type(&response);
        let body = response.bytes().await?.to_vec();

        match content_type.as_str() {
            content_types::CA_CERT => Ok((body, 1)),
            content_types::CA_RA_CERT => {
                let count = parse_certs_only(&body)?.len();
                Ok((body, count))
            }
            other => Err(ScepError::invalid_content_type(
                format!("{} or {}", content_types::CA_CERT, content_types::CA_RA_CERT),
                other,
            )),
        }
    }

    async fn pki_operation(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let caps = match self.get_ca_caps().await {
            Ok(caps) => caps,
            Err(e) => {
                tracing::warn!("GetCACaps failed, falling back to GET: {}", e);
                CaCaps::default()
            }
        };

        let request = if caps.supports_post() {
            let url = self.config.operation_url(operations::PKI_OPERATION, None);
            tracing::debug!("POST {}", url);
            self.http
                .post(url)
                .header(CONTENT_TYPE, content_types::PKI_MESSAGE)
                .body(raw.to_vec())
        } else {
            let message = BASE64_STANDARD.encode(raw);
            let url = self
                .config
                .operation_url(operations::PKI_OPERATION, Some(&message));
            tracing::debug!("GET {}", self.config.operation_url(operations::PKI_OPERATION, None));
            self.http.get(url)
        };

        let response = request.send().await?;
        let response = self.handle_error_response(response).await?;

        let content_type = media_type(&response);
        if content_type != content_types::PKI_MESSAGE {
            tracing::warn!(
                "PKIOperation response has content-type '{}', expected '{}'",
                content_type,
                content_types::PKI_MESSAGE
            );
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// The response media type, lowercased and without parameters.
fn media_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}
