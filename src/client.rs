//! SCEP enrollment client.
//!
//! This module provides the `ScepClient` struct, which turns a CSR into an
//! issued certificate by running one PKCSReq transaction against a SCEP
//! server, polling while the CA reports the request as pending.

use der::Encode;
use rsa::RsaPrivateKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use x509_cert::request::CertReq;

use crate::config::ScepClientConfig;
use crate::csr;
use crate::enveloped::EncryptionAlgorithm;
use crate::error::{Phase, Result, ResultExt, ScepError};
use crate::identity::EphemeralIdentity;
use crate::message::{PkiMessage, new_csr_request};
use crate::transport::{HttpTransport, ScepTransport};
use crate::types::{CaCaps, CaCertificates, FailInfo, PkiStatus, certificate_to_pem};

/// SCEP client for certificate enrollment.
///
/// Each call to [`sign`](Self::sign) is an independent transaction with its
/// own ephemeral identity; nothing is shared between calls except the
/// transport's capability cache.
///
/// # Example
///
/// ```no_run
/// use scep_issuer::{ScepClient, ScepClientConfig};
///
/// # async fn example(csr_pem: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ScepClientConfig::builder()
///     .server_url("https://ca.example.com/scep")?
///     .challenge("secret")
///     .build()?;
///
/// let client = ScepClient::new(config).await?;
/// let certificate_pem = client.sign(csr_pem).await?;
/// println!("{}", certificate_pem);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ScepClient<T: ScepTransport = HttpTransport> {
    config: ScepClientConfig,
    transport: T,
}

impl ScepClient<HttpTransport> {
    /// Create a new SCEP client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub async fn new(config: ScepClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self { config, transport })
    }
}

/// Progress of the submit/poll loop.
enum EnrollmentState {
    /// The request is about to be (re)submitted.
    Submit { attempt: u32 },
    /// The CA answered Pending; wait before resubmitting.
    Pending { attempt: u32 },
    /// The CA answered Success.
    Issued(PkiMessage),
}

impl<T: ScepTransport> ScepClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: ScepClientConfig, transport: T) -> Self {
        Self { config, transport }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ScepClientConfig {
        &self.config
    }

    /// Get the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch the CA capabilities. A server that cannot answer is treated as
    /// advertising nothing.
    pub async fn get_ca_caps(&self) -> CaCaps {
        match self.transport.get_ca_caps().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!("GetCACaps failed, assuming no capabilities: {}", e);
                CaCaps::default()
            }
        }
    }

    /// Retrieve and parse the CA certificates.
    pub async fn get_ca_certs(&self) -> Result<CaCertificates> {
        let (raw, count) = self.transport.get_ca_cert(&self.config.ca_identifier).await?;
        CaCertificates::from_response(&raw, count)
    }

    /// Health check: the CA certificates can be fetched and parsed.
    pub async fn check(&self) -> Result<()> {
        let cas = self
            .get_ca_certs()
            .await
            .map_err(|e| ScepError::HealthCheck(e.to_string()))?;
        debug!(certificates = cas.len(), "SCEP server healthy");
        Ok(())
    }

    /// Enroll `csr_pem` and return the issued certificate as PEM.
    ///
    /// When a challenge is configured the CSR is rebound to the ephemeral
    /// key: its public key is replaced and it is re-signed with that key, so
    /// the issued certificate certifies the ephemeral key. Use
    /// [`sign_with_private_key`](Self::sign_with_private_key) to keep the
    /// CSR public key.
    ///
    /// Runs until the CA answers Success or Failure, or the configured
    /// deadline passes.
    pub async fn sign(&self, csr_pem: &[u8]) -> Result<String> {
        self.sign_with_cancel(csr_pem, &CancellationToken::new()).await
    }

    /// Like [`sign`](Self::sign), abandoning the enrollment when `cancel` fires.
    pub async fn sign_with_cancel(
        &self,
        csr_pem: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.run(csr_pem, None, cancel).await
    }

    /// Enroll `csr_pem`, re-signing it with `key` after challenge injection.
    ///
    /// `key` must be the private half of the CSR public key for the CA to
    /// accept the request. With `verify_key_pairing` set this is checked
    /// locally first.
    pub async fn sign_with_private_key(
        &self,
        csr_pem: &[u8],
        key: &RsaPrivateKey,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.run(csr_pem, Some(key), cancel).await
    }

    async fn run(
        &self,
        csr_pem: &[u8],
        key: Option<&RsaPrivateKey>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let enrollment = async {
            match self.config.enrollment_deadline {
                Some(deadline) => tokio::time::timeout(deadline, self.enroll(csr_pem, key))
                    .await
                    .map_err(|_| ScepError::DeadlineExceeded(deadline))?,
                None => self.enroll(csr_pem, key).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScepError::Cancelled),
            result = enrollment => result,
        }
    }

    async fn enroll(&self, csr_pem: &[u8], key: Option<&RsaPrivateKey>) -> Result<String> {
        let original = csr::decode_csr(csr_pem)?;
        let organizations = csr::organizations(&original);

        let identity =
            tokio::task::spawn_blocking(move || EphemeralIdentity::generate(&organizations))
                .await
                .map_err(|e| ScepError::KeyGeneration(e.to_string()))
                .and_then(|identity| identity)
                .phase(Phase::Identity)?;

        let challenge = self.config.challenge.as_deref();
        let csr_der = match challenge {
            Some(challenge) => {
                let pem = match key {
                    Some(key) => self
                        .check_key_pairing(&original, key)
                        .and_then(|()| csr::inject_challenge(csr_pem, challenge, key)),
                    None => {
                        csr::inject_challenge_for_key(csr_pem, challenge, identity.private_key())
                    }
                }
                .phase(Phase::ChallengeInjection)?;
                csr::decode_csr(pem.as_bytes())
                    .and_then(|csr| Ok(csr.to_der()?))
                    .phase(Phase::ChallengeInjection)?
            }
            None => original.to_der()?,
        };

        let cas = self.get_ca_certs().await.phase(Phase::CaFetch)?;
        let algorithm = EncryptionAlgorithm::for_caps(&self.get_ca_caps().await);

        let request = new_csr_request(&csr_der, &cas, &identity, challenge, algorithm)
            .phase(Phase::MessageBuild)?;
        debug!(
            transaction_id = %request.transaction_id,
            algorithm = algorithm.as_str(),
            recipients = cas.recipients().len(),
            "built PKCSReq"
        );

        let mut state = EnrollmentState::Submit { attempt: 1 };
        loop {
            state = match state {
                EnrollmentState::Submit { attempt } => {
                    self.submit(&request, &cas, attempt).await?
                }
                EnrollmentState::Pending { attempt } => {
                    warn!(
                        transaction_id = %request.transaction_id,
                        attempt,
                        "certificate request pending, retrying in {:?}",
                        self.config.poll_interval
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                    EnrollmentState::Submit {
                        attempt: attempt + 1,
                    }
                }
                EnrollmentState::Issued(reply) => {
                    let certificate = reply
                        .issued_certificate(&identity)
                        .phase(Phase::Decrypt)?;
                    info!(
                        transaction_id = %request.transaction_id,
                        subject = %certificate.tbs_certificate.subject,
                        "certificate issued"
                    );
                    return certificate_to_pem(&certificate);
                }
            };
        }
    }

    async fn submit(
        &self,
        request: &PkiMessage,
        cas: &CaCertificates,
        attempt: u32,
    ) -> Result<EnrollmentState> {
        debug!(transaction_id = %request.transaction_id, attempt, "submitting PKCSReq");
        let raw = self
            .transport
            .pki_operation(request.raw())
            .await
            .phase(Phase::Submit)?;

        let reply = PkiMessage::parse(&raw, Some(cas)).phase(Phase::Parse)?;
        reply.validate_reply(request).phase(Phase::Parse)?;

        match reply.pki_status {
            Some(PkiStatus::Success) => Ok(EnrollmentState::Issued(reply)),
            Some(PkiStatus::Pending) => Ok(EnrollmentState::Pending { attempt }),
            Some(PkiStatus::Failure) => Err(ScepError::EnrollmentFailed {
                fail_info: reply
                    .fail_info
                    .unwrap_or_else(|| FailInfo::Other("missing".to_string())),
            }),
            None => Err(ScepError::invalid_pki_message("CertRep without pkiStatus"))
                .phase(Phase::Parse),
        }
    }

    fn check_key_pairing(&self, csr: &CertReq, key: &RsaPrivateKey) -> Result<()> {
        match csr::verify_key_pairing(csr, key) {
            Ok(()) => Ok(()),
            Err(e) if self.config.verify_key_pairing => Err(e),
            Err(_) => {
                warn!("CSR is re-signed with a key that does not match its public key");
                Ok(())
            }
        }
    }
}
