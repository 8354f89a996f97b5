//! Error types for the SCEP issuer.
//!
//! This module defines all error types that can occur while enrolling with
//! a SCEP server and while reconciling issuer resources, from malformed CSRs
//! through transport failures to server-reported enrollment failures.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::FailInfo;

/// Result type alias using [`ScepError`].
pub type Result<T> = std::result::Result<T, ScepError>;

/// Phase of an enrollment attempt, attached to errors for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Generating the ephemeral signer identity.
    Identity,
    /// Re-signing the CSR with the challenge password.
    ChallengeInjection,
    /// Fetching the CA certificate(s).
    CaFetch,
    /// Building the PKCSReq message.
    MessageBuild,
    /// Submitting the message to the PKIOperation endpoint.
    Submit,
    /// Parsing and validating the CertRep response.
    Parse,
    /// Decrypting the response envelope.
    Decrypt,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "ephemeral identity",
            Self::ChallengeInjection => "challenge injection",
            Self::CaFetch => "CA certificate fetch",
            Self::MessageBuild => "message build",
            Self::Submit => "submit",
            Self::Parse => "response parse",
            Self::Decrypt => "envelope decryption",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during SCEP enrollment and issuer reconciliation.
#[derive(Debug, Error)]
pub enum ScepError {
    /// The CSR could not be parsed as a PKCS#10 request.
    #[error("malformed CSR: {0}")]
    MalformedCsr(String),

    /// The CSR already carries a challenge-password attribute.
    #[error("challenge password already present in CSR")]
    ChallengeAlreadyPresent,

    /// The re-signed CSR did not carry the requested challenge.
    #[error("challenge password not injected into CSR")]
    ChallengeInjectionVerificationFailed,

    /// The signing key does not match the public key in the CSR.
    #[error("private key does not match the CSR public key")]
    KeyPairMismatch,

    /// A private key could not be parsed or is unsuitable.
    #[error("invalid private key: {0}")]
    PrivateKey(String),

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate or CSR encoding failed.
    #[error("certificate encoding failed: {0}")]
    CertificateEncoding(String),

    /// Failed to parse X.509 certificate.
    #[error("certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Failed to parse a CMS/PKCS#7 structure.
    #[error("CMS/PKCS#7 parsing error: {0}")]
    CmsParsing(String),

    /// Failed to build a PKI message.
    #[error("failed to build PKI message: {0}")]
    MessageBuild(String),

    /// A PKI message was structurally valid CMS but not a valid SCEP message.
    #[error("invalid PKI message: {0}")]
    InvalidPkiMessage(String),

    /// The PKI message signature did not verify.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// The SCEP server rejected the request.
    #[error("PKCSReq request failed, failInfo: {fail_info}")]
    EnrollmentFailed {
        /// Failure reason reported by the server.
        fail_info: FailInfo,
    },

    /// The response envelope could not be decrypted.
    #[error("decrypt pkiEnvelope failed: {0}")]
    EnvelopeDecryptionFailed(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SCEP server returned an error response.
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// Response Content-Type header does not match expected value.
    #[error("invalid content-type: expected '{expected}', got '{actual}'")]
    InvalidContentType {
        /// Expected content-type.
        expected: String,
        /// Actual content-type received.
        actual: String,
    },

    /// The enrollment was cancelled by the caller.
    #[error("enrollment cancelled")]
    Cancelled,

    /// The enrollment did not finish within the configured deadline.
    #[error("enrollment did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The issuer credentials secret could not be read.
    #[error("{0}")]
    Secret(String),

    /// The resource store failed.
    #[error("store error: {0}")]
    Store(String),

    /// The issuer health check failed.
    #[error("healthcheck failed: {0}")]
    HealthCheck(String),

    /// The issuer is not ready to sign.
    #[error("issuer {0} is not ready")]
    NotReady(String),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error annotated with the enrollment phase it occurred in.
    #[error("{phase}: {source}")]
    Phase {
        /// Phase that failed.
        phase: Phase,
        /// Underlying error.
        #[source]
        source: Box<ScepError>,
    },

    /// Several errors that occurred together.
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<ScepError>),
}

fn format_aggregate(errors: &[ScepError]) -> String {
    match errors {
        [single] => single.to_string(),
        many => {
            let joined = many
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{joined}]")
        }
    }
}

impl ScepError {
    /// Create a malformed CSR error with the given message.
    pub fn malformed_csr(msg: impl Into<String>) -> Self {
        Self::MalformedCsr(msg.into())
    }

    /// Create a private key error with the given message.
    pub fn private_key(msg: impl Into<String>) -> Self {
        Self::PrivateKey(msg.into())
    }

    /// Create a certificate encoding error with the given message.
    pub fn certificate_encoding(msg: impl Into<String>) -> Self {
        Self::CertificateEncoding(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create a CMS parsing error with the given message.
    pub fn cms_parsing(msg: impl Into<String>) -> Self {
        Self::CmsParsing(msg.into())
    }

    /// Create a message build error with the given message.
    pub fn message_build(msg: impl Into<String>) -> Self {
        Self::MessageBuild(msg.into())
    }

    /// Create an invalid PKI message error with the given message.
    pub fn invalid_pki_message(msg: impl Into<String>) -> Self {
        Self::InvalidPkiMessage(msg.into())
    }

    /// Create a signature verification error with the given message.
    pub fn signature_verification(msg: impl Into<String>) -> Self {
        Self::SignatureVerification(msg.into())
    }

    /// Create an envelope decryption error with the given message.
    pub fn envelope_decryption(msg: impl Into<String>) -> Self {
        Self::EnvelopeDecryptionFailed(msg.into())
    }

    /// Create a server error with status and message.
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid content-type error.
    pub fn invalid_content_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidContentType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store error with the given message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Combine errors, flattening nested aggregates.
    pub fn aggregate(errors: impl IntoIterator<Item = ScepError>) -> Self {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                Self::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::Aggregate(flat)
    }

    /// Returns the phase this error was annotated with, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Returns the innermost error, skipping phase annotations.
    pub fn root(&self) -> &ScepError {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if retrying the operation on a later pass may succeed.
    ///
    /// Only transport failures qualify. Protocol failures and input errors
    /// are terminal for the attempt.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Http(_) | Self::Tls(_) | Self::Io(_) => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Extension trait for annotating results with an enrollment [`Phase`].
pub trait ResultExt<T> {
    /// Wrap the error, if any, with the given phase.
    fn phase(self, phase: Phase) -> Result<T>;
}

impl<T, E: Into<ScepError>> ResultExt<T> for std::result::Result<T, E> {
    fn phase(self, phase: Phase) -> Result<T> {
        self.map_err(|e| ScepError::Phase {
            phase,
            source: Box::new(e.into()),
        })
    }
}
