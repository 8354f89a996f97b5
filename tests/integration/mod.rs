//! Integration test utilities and helpers
//!
//! This module provides common test infrastructure for SCEP client integration tests,
//! including a mock certificate authority, a mock SCEP server and a scripted transport.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use der::Encode;
use der::asn1::BitString;
use scep_issuer::enveloped::{self, EncryptionAlgorithm};
use scep_issuer::identity::EphemeralIdentity;
use scep_issuer::message::{PkiMessage, PkiMessageBuilder};
use scep_issuer::signature::{sha256_with_rsa_identifier, sign_sha256};
use scep_issuer::types::{certs_only, content_types};
use scep_issuer::{CaCaps, CaCertificates, Certificate, FailInfo, MessageType, PkiStatus};
use scep_issuer::{ScepTransport, csr};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;

/// Path the mock SCEP server is mounted under.
pub const SCEP_PATH: &str = "/scep";

/// What the mock CA answers to a PKCSReq.
#[derive(Debug, Clone)]
pub enum CaOutcome {
    /// Issue a certificate for the CSR.
    Issue,
    /// Report the request as pending.
    Pending,
    /// Reject the request.
    Reject(FailInfo),
}

/// A certificate authority that answers PKI messages.
pub struct MockCa {
    identity: EphemeralIdentity,
    serial: AtomicUsize,
    received: Mutex<Vec<Vec<u8>>>,
}

impl MockCa {
    /// A CA with a fresh RSA key and self-signed certificate.
    pub fn new() -> Self {
        Self {
            identity: EphemeralIdentity::generate(&["Mock CA".to_string()]).unwrap(),
            serial: AtomicUsize::new(1),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn certificate(&self) -> &Certificate {
        self.identity.certificate()
    }

    pub fn certificate_der(&self) -> Vec<u8> {
        self.certificate().to_der().unwrap()
    }

    pub fn cas(&self) -> CaCertificates {
        CaCertificates::new(vec![self.certificate().clone()])
    }

    /// DER encoding of every CSR the CA has decrypted.
    pub fn received_csrs(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    /// Build the CertRep for a raw PKCSReq.
    pub fn reply(&self, raw: &[u8], outcome: &CaOutcome) -> Vec<u8> {
        let request = PkiMessage::parse(raw, None).unwrap();
        assert_eq!(request.message_type, MessageType::PkcsReq);

        let mut reply = PkiMessageBuilder::new(MessageType::CertRep, request.transaction_id.clone())
            .recipient_nonce(request.sender_nonce.clone().unwrap_or_default());

        reply = match outcome {
            CaOutcome::Issue => {
                let csr_der = request
                    .decrypt_envelope(self.identity.private_key(), self.certificate())
                    .unwrap();
                let issued = self.issue(&csr_der);
                self.received.lock().unwrap().push(csr_der);

                match issued {
                    Some(issued) => {
                        let content = certs_only(&[issued]).unwrap();
                        let envelope = enveloped::seal(
                            &content,
                            &[&request.signer_certificate],
                            EncryptionAlgorithm::Aes128Cbc,
                        )
                        .unwrap();
                        reply.pki_status(PkiStatus::Success).envelope(envelope)
                    }
                    None => reply
                        .pki_status(PkiStatus::Failure)
                        .fail_info(FailInfo::BadMessageCheck),
                }
            }
            CaOutcome::Pending => reply.pki_status(PkiStatus::Pending),
            CaOutcome::Reject(fail_info) => reply
                .pki_status(PkiStatus::Failure)
                .fail_info(fail_info.clone()),
        };

        reply
            .sign(self.identity.private_key(), self.certificate())
            .unwrap()
    }

    /// Issue a certificate carrying the CSR subject and public key.
    ///
    /// Returns `None` when the CSR signature does not verify against its own
    /// public key.
    fn issue(&self, csr_der: &[u8]) -> Option<Certificate> {
        let request = csr::decode_csr(csr_der).unwrap();
        csr::verify_signature(&request).ok()?;
        let serial = (self.serial.fetch_add(1, Ordering::SeqCst) % 120 + 1) as u8;

        let tbs_certificate = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&[serial]).unwrap(),
            signature: sha256_with_rsa_identifier().unwrap(),
            issuer: self.certificate().tbs_certificate.subject.clone(),
            validity: Validity::from_now(Duration::from_secs(24 * 3600)).unwrap(),
            subject: request.info.subject.clone(),
            subject_public_key_info: request.info.public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: None,
        };
        let signature =
            sign_sha256(self.identity.private_key(), &tbs_certificate.to_der().unwrap()).unwrap();

        Some(Certificate {
            tbs_certificate,
            signature_algorithm: sha256_with_rsa_identifier().unwrap(),
            signature: BitString::from_bytes(&signature).unwrap(),
        })
    }
}

/// Answers PKIOperation requests sent by POST or by GET.
struct PkiOperationResponder {
    ca: std::sync::Arc<MockCa>,
    outcome: CaOutcome,
}

impl Respond for PkiOperationResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let raw = if request.body.is_empty() {
            let message = request
                .url
                .query_pairs()
                .find(|(name, _)| name == "message")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            match BASE64_STANDARD.decode(message) {
                Ok(raw) => raw,
                Err(_) => return ResponseTemplate::new(400),
            }
        } else {
            request.body.clone()
        };

        ResponseTemplate::new(200)
            .set_body_raw(self.ca.reply(&raw, &self.outcome), content_types::PKI_MESSAGE)
    }
}

/// Mock SCEP server builder for integration tests
pub struct MockScepServer {
    server: MockServer,
}

impl MockScepServer {
    /// Create a new mock SCEP server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// The SCEP endpoint URL
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), SCEP_PATH)
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock a GetCACaps response
    pub async fn mock_ca_caps(&self, caps: &str) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACaps"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(caps)
                    .insert_header("Content-Type", content_types::TEXT_PLAIN),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock a single-certificate GetCACert response
    pub async fn mock_ca_cert(&self, ca: &MockCa) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(ca.certificate_der(), content_types::CA_CERT),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock a GetCACert failure
    pub async fn mock_ca_cert_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(SCEP_PATH))
            .and(query_param("operation", "GetCACert"))
            .respond_with(ResponseTemplate::new(status).set_body_string("CA unavailable"))
            .mount(&self.server)
            .await;
    }

    /// Answer PKIOperation requests, by POST or GET, from the mock CA
    pub async fn mock_pki_operation(&self, ca: std::sync::Arc<MockCa>, outcome: CaOutcome) {
        Mock::given(path(SCEP_PATH))
            .and(query_param("operation", "PKIOperation"))
            .respond_with(PkiOperationResponder { ca, outcome })
            .mount(&self.server)
            .await;
    }
}

/// In-process transport replaying a script of CA outcomes.
///
/// Once the script is exhausted the last outcome repeats.
pub struct ScriptedTransport {
    ca: std::sync::Arc<MockCa>,
    reply_signer: Option<std::sync::Arc<MockCa>>,
    caps: CaCaps,
    script: Mutex<VecDeque<CaOutcome>>,
    last: Mutex<CaOutcome>,
    submits: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(ca: std::sync::Arc<MockCa>, script: impl IntoIterator<Item = CaOutcome>) -> Self {
        Self {
            ca,
            reply_signer: None,
            caps: CaCaps::parse("POSTPKIOperation\nAES\nSHA-256\n"),
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(CaOutcome::Pending),
            submits: AtomicUsize::new(0),
        }
    }

    /// Sign replies with a different CA than the one GetCACert returns.
    pub fn with_reply_signer(mut self, signer: std::sync::Arc<MockCa>) -> Self {
        self.reply_signer = Some(signer);
        self
    }

    /// Number of PKIOperation submissions so far.
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> CaOutcome {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

#[async_trait]
impl ScepTransport for ScriptedTransport {
    async fn get_ca_caps(&self) -> scep_issuer::Result<CaCaps> {
        Ok(self.caps.clone())
    }

    async fn get_ca_cert(&self, _message: &str) -> scep_issuer::Result<(Vec<u8>, usize)> {
        Ok((self.ca.certificate_der(), 1))
    }

    async fn pki_operation(&self, raw: &[u8]) -> scep_issuer::Result<Vec<u8>> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();
        let signer = self.reply_signer.as_ref().unwrap_or(&self.ca);
        Ok(signer.reply(raw, &outcome))
    }
}

/// Test fixture helpers
pub mod fixtures {
    use der::DecodePem;
    use rsa::RsaPrivateKey;
    use scep_issuer::Certificate;
    use scep_issuer::csr::CsrBuilder;

    /// Common name used by the enrollment fixtures.
    pub const COMMON_NAME: &str = "www.example.com";

    /// Challenge password used by the enrollment fixtures.
    pub const CHALLENGE: &str = "secret";

    /// A fresh CSR for `CN=www.example.com` and its key.
    pub fn csr() -> (String, RsaPrivateKey) {
        CsrBuilder::new()
            .common_name(COMMON_NAME)
            .organization("Example Org")
            .san_dns(COMMON_NAME)
            .build()
            .expect("Failed to generate CSR")
    }

    /// Parse a PEM certificate returned by the client.
    pub fn parse_certificate(pem: &str) -> Certificate {
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"), "{pem}");
        Certificate::from_pem(pem.as_bytes()).expect("Valid certificate PEM")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Decode;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockScepServer::start().await;
        assert!(mock_server.url().starts_with("http://"));
        assert!(mock_server.url().ends_with(SCEP_PATH));
    }

    #[test]
    fn test_mock_ca_issues_for_csr_subject() {
        let ca = MockCa::new();
        let (csr_pem, _) = fixtures::csr();
        let csr_der = csr::decode_csr(csr_pem.as_bytes()).unwrap().to_der().unwrap();

        let issued = ca.issue(&csr_der).expect("self-signed CSR is accepted");
        assert_eq!(
            issued.tbs_certificate.issuer,
            ca.certificate().tbs_certificate.subject
        );
        assert!(
            issued
                .tbs_certificate
                .subject
                .to_string()
                .contains("CN=www.example.com")
        );
        assert_eq!(Certificate::from_der(&issued.to_der().unwrap()).unwrap(), issued);
    }

    #[test]
    fn test_mock_ca_refuses_csr_signed_by_another_key() {
        let ca = MockCa::new();
        let (csr_pem, _) = fixtures::csr();
        let (_, other_key) = fixtures::csr();

        let forged = csr::inject_challenge(csr_pem.as_bytes(), fixtures::CHALLENGE, &other_key)
            .unwrap();
        let csr_der = csr::decode_csr(forged.as_bytes()).unwrap().to_der().unwrap();

        assert!(ca.issue(&csr_der).is_none());
    }
}
