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

//! Configuration types.
//!
//! [`ScepClientConfig`] configures a single enrollment client. It is built
//! per issuer from the issuer's URL, its challenge secret and the
//! process-wide [`ControllerConfig`], which is loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ScepError};
use crate::logging::LogConfig;

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait between submissions while the CA reports Pending.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between issuer health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a SCEP client.
#[derive(Clone)]
pub struct ScepClientConfig {
    /// SCEP server URL, including the CGI path (e.g. "https://ca.example.com/scep").
    pub server_url: Url,

    /// Challenge password injected into every CSR. `None` sends the CSR unmodified.
    pub challenge: Option<String>,

    /// Trust anchor configuration for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// Request timeout duration.
    pub timeout: Duration,

    /// Wait between resubmissions while the CA reports Pending.
    pub poll_interval: Duration,

    /// Upper bound on the duration of one enrollment, polling included.
    pub enrollment_deadline: Option<Duration>,

    /// Reject a CSR whose public key does not match the re-signing key.
    pub verify_key_pairing: bool,

    /// Value of the `message` parameter sent with GetCACert.
    pub ca_identifier: String,

    /// Additional HTTP headers to include in requests.
    pub additional_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for ScepClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScepClientConfig")
            .field("server_url", &self.server_url)
            .field("challenge", &self.challenge.as_ref().map(|_| "[REDACTED]"))
            .field("trust_anchors", &self.trust_anchors)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("enrollment_deadline", &self.enrollment_deadline)
            .field("verify_key_pairing", &self.verify_key_pairing)
            .field("ca_identifier", &self.ca_identifier)
            .finish()
    }
}

impl ScepClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ScepClientConfigBuilder {
        ScepClientConfigBuilder::new()
    }

    /// Build the URL for a SCEP operation.
    pub fn operation_url(&self, operation: &str, message: Option<&str>) -> Url {
        let mut url = self.server_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("operation", operation);
            if let Some(message) = message {
                query.append_pair("message", message);
            }
        }
        url
    }
}

/// Builder for [`ScepClientConfig`].
#[derive(Default)]
pub struct ScepClientConfigBuilder {
    server_url: Option<Url>,
    challenge: Option<String>,
    trust_anchors: Option<TrustAnchors>,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    enrollment_deadline: Option<Duration>,
    verify_key_pairing: bool,
    ca_identifier: String,
    additional_headers: Vec<(String, String)>,
}

impl ScepClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SCEP server URL.
    pub fn server_url(
        mut self,
        url: impl AsRef<str>,
    ) -> std::result::Result<Self, url::ParseError> {
        self.server_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the SCEP server URL from a pre-parsed URL.
    pub fn server_url_parsed(mut self, url: Url) -> Self {
        self.server_url = Some(url);
        self
    }

    /// Set the challenge password. An empty string disables injection.
    pub fn challenge(mut self, challenge: impl Into<String>) -> Self {
        let challenge = challenge.into();
        self.challenge = (!challenge.is_empty()).then_some(challenge);
        self
    }

    /// Use Mozilla's root CA store for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates (PEM-encoded) for server verification.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the wait between resubmissions while the CA reports Pending.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Bound the total duration of one enrollment.
    pub fn enrollment_deadline(mut self, deadline: Duration) -> Self {
        self.enrollment_deadline = Some(deadline);
        self
    }

    /// Reject CSRs whose public key does not match the re-signing key.
    pub fn verify_key_pairing(mut self, verify: bool) -> Self {
        self.verify_key_pairing = verify;
        self
    }

    /// Set the CA identifier sent with GetCACert.
    pub fn ca_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.ca_identifier = identifier.into();
        self
    }

    /// Add an additional HTTP header to all requests.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is not set.
    pub fn build(self) -> std::result::Result<ScepClientConfig, &'static str> {
        let server_url = self.server_url.ok_or("server_url is required")?;

        Ok(ScepClientConfig {
            server_url,
            challenge: self.challenge,
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            enrollment_deadline: self.enrollment_deadline,
            verify_key_pairing: self.verify_key_pairing,
            ca_identifier: self.ca_identifier,
            additional_headers: self.additional_headers,
        })
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use Mozilla's root CA store.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// Process-wide controller configuration, loaded from TOML.
///
/// ```toml
/// [controller]
/// cluster_resource_namespace = "scep-issuer"
/// health_check_interval_secs = 60
///
/// [enrollment]
/// poll_interval_secs = 30
/// timeout_secs = 30
/// deadline_secs = 3600
/// verify_key_pairing = false
/// ca_bundle_path = "/etc/scep-issuer/ca.pem"
///
/// [logging]
/// level = "info"
/// json = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Reconciliation settings.
    #[serde(default)]
    pub controller: ReconcileConfig,

    /// Settings applied to every enrollment client.
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LogConfig,
}

/// `[controller]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Namespace holding secrets referenced by cluster-scoped issuers.
    #[serde(default = "default_cluster_resource_namespace")]
    pub cluster_resource_namespace: String,

    /// Seconds between health checks of a ready issuer.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cluster_resource_namespace: default_cluster_resource_namespace(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

impl ReconcileConfig {
    /// Health check interval as a duration.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

fn default_cluster_resource_namespace() -> String {
    "scep-issuer".to_string()
}

fn default_health_check_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL.as_secs()
}

/// `[enrollment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentConfig {
    /// Seconds between resubmissions while the CA reports Pending.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Upper bound in seconds on one enrollment. Unbounded when absent.
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Reject CSRs whose public key does not match the re-signing key.
    #[serde(default)]
    pub verify_key_pairing: bool,

    /// Disable server certificate verification (testing only).
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// PEM bundle of CA certificates trusted for the SCEP server's TLS.
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            deadline_secs: None,
            verify_key_pairing: false,
            insecure_skip_verify: false,
            ca_bundle_path: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl ControllerConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ScepError::config(format!("Invalid TOML: {e}")))
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScepError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ScepError::config(format!("TOML serialize: {e}")))
    }

    /// Validate the configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.controller.cluster_resource_namespace.trim().is_empty() {
            errors.push("controller.cluster_resource_namespace must not be empty".to_string());
        }
        if self.controller.health_check_interval_secs == 0 {
            errors.push("controller.health_check_interval_secs must be > 0".to_string());
        }

        if self.enrollment.poll_interval_secs == 0 {
            errors.push("enrollment.poll_interval_secs must be > 0".to_string());
        }
        if self.enrollment.timeout_secs == 0 {
            errors.push("enrollment.timeout_secs must be > 0".to_string());
        }
        if self.enrollment.deadline_secs == Some(0) {
            errors.push("enrollment.deadline_secs must be > 0 when set".to_string());
        }
        if self.enrollment.insecure_skip_verify && self.enrollment.ca_bundle_path.is_some() {
            errors.push(
                "enrollment.insecure_skip_verify and enrollment.ca_bundle_path are mutually exclusive"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScepError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Build the client configuration for one issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the CA bundle cannot be read.
    pub fn client_config(&self, server_url: &str, challenge: &str) -> Result<ScepClientConfig> {
        let enrollment = &self.enrollment;

        let mut builder = ScepClientConfigBuilder::new()
            .server_url(server_url)
            .map_err(|e| ScepError::config(format!("Invalid server URL {server_url:?}: {e}")))?
            .challenge(challenge)
            .timeout(Duration::from_secs(enrollment.timeout_secs))
            .poll_interval(Duration::from_secs(enrollment.poll_interval_secs))
            .verify_key_pairing(enrollment.verify_key_pairing);

        if let Some(deadline) = enrollment.deadline_secs {
            builder = builder.enrollment_deadline(Duration::from_secs(deadline));
        }

        if enrollment.insecure_skip_verify {
            builder = builder.trust_any_insecure();
        } else if let Some(path) = &enrollment.ca_bundle_path {
            let pem = std::fs::read(path).map_err(|e| {
                ScepError::config(format!("Failed to read CA bundle {}: {e}", path.display()))
            })?;
            builder = builder.trust_explicit(vec![pem]);
        }

        builder.build().map_err(ScepError::config)
    }
}
