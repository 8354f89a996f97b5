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

//! Integration tests for PKCSReq enrollment over HTTP

use std::sync::Arc;

use der::Encode;
use scep_issuer::csr;
use scep_issuer::{FailInfo, ScepClient, ScepClientConfig, ScepError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};

use crate::integration::fixtures::{self, CHALLENGE, COMMON_NAME};
use crate::integration::{CaOutcome, MockCa, MockScepServer};

async fn mock_ca(caps: Option<&str>, outcome: CaOutcome) -> (MockScepServer, Arc<MockCa>) {
    let mock = MockScepServer::start().await;
    let ca = Arc::new(MockCa::new());

    if let Some(caps) = caps {
        mock.mock_ca_caps(caps).await;
    }
    mock.mock_ca_cert(&ca).await;
    mock.mock_pki_operation(ca.clone(), outcome).await;

    (mock, ca)
}

async fn client(mock: &MockScepServer, challenge: &str) -> ScepClient {
    let config = ScepClientConfig::builder()
        .server_url(mock.url())
        .expect("Valid URL")
        .challenge(challenge)
        .build()
        .expect("Valid config");

    ScepClient::new(config).await.expect("Client creation failed")
}

#[tokio::test]
async fn test_enroll_over_post() {
    let (mock, ca) = mock_ca(Some("POSTPKIOperation\nAES\nSHA-256\n"), CaOutcome::Issue).await;
    let client = client(&mock, CHALLENGE).await;
    let (csr_pem, key) = fixtures::csr();

    let result = client
        .sign_with_private_key(csr_pem.as_bytes(), &key, &CancellationToken::new())
        .await;
    assert!(result.is_ok(), "enrollment failed: {:?}", result.err());

    let issued = fixtures::parse_certificate(&result.unwrap());
    let subject = issued.tbs_certificate.subject.to_string();
    assert!(subject.contains(&format!("CN={}", COMMON_NAME)), "{subject}");
    assert_eq!(
        issued.tbs_certificate.issuer,
        ca.certificate().tbs_certificate.subject
    );

    // The CA saw the CSR with the challenge and the original public key,
    // correctly signed by the CSR key.
    let received = ca.received_csrs();
    assert_eq!(received.len(), 1);
    assert_eq!(
        csr::parse_challenge_password(&received[0]).unwrap().as_deref(),
        Some(CHALLENGE)
    );
    let sent = csr::decode_csr(&received[0]).unwrap();
    let original = csr::decode_csr(csr_pem.as_bytes()).unwrap();
    assert_eq!(sent.info.public_key, original.info.public_key);
    assert!(csr::verify_signature(&sent).is_ok());

    let requests = mock.inner().received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .any(|r| r.method.as_str() == "POST" && !r.body.is_empty()),
        "PKIOperation should be sent by POST"
    );
}

#[tokio::test]
async fn test_enroll_over_get_without_caps() {
    // No GetCACaps mock: the client falls back to GET and 3DES.
    let (mock, ca) = mock_ca(None, CaOutcome::Issue).await;
    let client = client(&mock, CHALLENGE).await;
    let (csr_pem, key) = fixtures::csr();

    let pem = client
        .sign_with_private_key(csr_pem.as_bytes(), &key, &CancellationToken::new())
        .await
        .expect("enrollment failed");

    let issued = fixtures::parse_certificate(&pem);
    assert!(
        issued
            .tbs_certificate
            .subject
            .to_string()
            .contains("CN=www.example.com")
    );
    assert_eq!(ca.received_csrs().len(), 1);

    let get_operations = mock
        .inner()
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| {
            r.method.as_str() == "GET"
                && r.url
                    .query_pairs()
                    .any(|(name, value)| name == "operation" && value == "PKIOperation")
        })
        .count();
    assert_eq!(get_operations, 1);
}

#[tokio::test]
async fn test_enroll_with_ephemeral_key_sends_verifiable_csr() {
    let (mock, ca) = mock_ca(Some("POSTPKIOperation\nAES\n"), CaOutcome::Issue).await;
    let client = client(&mock, CHALLENGE).await;
    let (csr_pem, _) = fixtures::csr();

    let pem = client.sign(csr_pem.as_bytes()).await.expect("enrollment failed");
    let issued = fixtures::parse_certificate(&pem);

    // The CSR is rebound to the ephemeral key, so its signature verifies
    // and the certificate is issued for that key.
    let sent = csr::decode_csr(&ca.received_csrs()[0]).unwrap();
    let original = csr::decode_csr(csr_pem.as_bytes()).unwrap();
    csr::verify_signature(&sent).expect("CSR signature verifies");
    assert_ne!(sent.info.public_key, original.info.public_key);
    assert_eq!(sent.info.subject, original.info.subject);
    assert_eq!(
        issued.tbs_certificate.subject_public_key_info,
        sent.info.public_key
    );
    assert_eq!(
        csr::challenge_password(&sent).unwrap().as_deref(),
        Some(CHALLENGE)
    );
}

#[tokio::test]
async fn test_enroll_with_mismatched_key_is_refused_by_ca() {
    let (mock, ca) = mock_ca(Some("POSTPKIOperation\nAES\n"), CaOutcome::Issue).await;
    let client = client(&mock, CHALLENGE).await;
    let (csr_pem, _) = fixtures::csr();
    let (_, other_key) = fixtures::csr();

    let err = client
        .sign_with_private_key(csr_pem.as_bytes(), &other_key, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err.root(),
            ScepError::EnrollmentFailed {
                fail_info: FailInfo::BadMessageCheck
            }
        ),
        "{err:?}"
    );
    assert_eq!(ca.received_csrs().len(), 1);
}

#[tokio::test]
async fn test_enroll_without_challenge_sends_csr_unchanged() {
    let (mock, ca) = mock_ca(Some("POSTPKIOperation\nAES\n"), CaOutcome::Issue).await;
    let client = client(&mock, "").await;
    let (csr_pem, _) = fixtures::csr();

    client.sign(csr_pem.as_bytes()).await.expect("enrollment failed");

    let original = csr::decode_csr(csr_pem.as_bytes()).unwrap().to_der().unwrap();
    assert_eq!(ca.received_csrs(), vec![original]);
}

#[tokio::test]
async fn test_enroll_rejected() {
    let (mock, _ca) = mock_ca(
        Some("POSTPKIOperation\nAES\n"),
        CaOutcome::Reject(FailInfo::BadRequest),
    )
    .await;
    let client = client(&mock, CHALLENGE).await;
    let (csr_pem, key) = fixtures::csr();

    let err = client
        .sign_with_private_key(csr_pem.as_bytes(), &key, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ScepError::EnrollmentFailed {
                fail_info: FailInfo::BadRequest
            }
        ),
        "Wrong error type: {:?}",
        err
    );
}

#[tokio::test]
async fn test_enroll_fails_when_pki_operation_unavailable() {
    let mock = MockScepServer::start().await;
    let ca = MockCa::new();
    mock.mock_ca_caps("POSTPKIOperation\n").await;
    mock.mock_ca_cert(&ca).await;
    wiremock::Mock::given(method("POST"))
        .and(query_param("operation", "PKIOperation"))
        .respond_with(wiremock::ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(mock.inner())
        .await;

    let client = client(&mock, "").await;
    let (csr_pem, _) = fixtures::csr();
    let err = client.sign(csr_pem.as_bytes()).await.unwrap_err();

    assert_eq!(err.phase(), Some(scep_issuer::Phase::Submit));
    assert!(matches!(
        err.root(),
        ScepError::ServerError { status: 500, .. }
    ));
    assert!(err.is_retryable());
}
