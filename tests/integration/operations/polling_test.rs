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

//! Integration tests for Pending polling, cancellation and deadlines

use std::sync::Arc;
use std::time::Duration;

use scep_issuer::{FailInfo, Phase, ScepClient, ScepClientConfig, ScepError};
use tokio_util::sync::CancellationToken;

use crate::integration::fixtures;
use crate::integration::{CaOutcome, MockCa, ScriptedTransport};

const POLL_INTERVAL: Duration = Duration::from_secs(30);

fn config() -> scep_issuer::ScepClientConfigBuilder {
    ScepClientConfig::builder()
        .server_url("http://ca.invalid/scep")
        .expect("Valid URL")
        .challenge(fixtures::CHALLENGE)
        .poll_interval(POLL_INTERVAL)
}

fn scripted(
    config: ScepClientConfig,
    script: impl IntoIterator<Item = CaOutcome>,
) -> ScepClient<ScriptedTransport> {
    let ca = Arc::new(MockCa::new());
    ScepClient::with_transport(config, ScriptedTransport::new(ca, script))
}

#[tokio::test(start_paused = true)]
async fn test_single_pending_then_issued() {
    let client = scripted(config().build().unwrap(), [CaOutcome::Pending, CaOutcome::Issue]);
    let (csr_pem, _) = fixtures::csr();

    let started = tokio::time::Instant::now();
    let pem = client.sign(csr_pem.as_bytes()).await.expect("enrollment failed");

    fixtures::parse_certificate(&pem);
    assert_eq!(client.transport().submits(), 2);
    assert!(started.elapsed() >= POLL_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_pending_then_issued() {
    let client = scripted(
        config().build().unwrap(),
        [CaOutcome::Pending, CaOutcome::Pending, CaOutcome::Issue],
    );
    let (csr_pem, key) = fixtures::csr();

    let started = tokio::time::Instant::now();
    let pem = client
        .sign_with_private_key(csr_pem.as_bytes(), &key, &CancellationToken::new())
        .await
        .expect("enrollment failed");

    fixtures::parse_certificate(&pem);
    assert_eq!(client.transport().submits(), 3);
    assert!(started.elapsed() >= POLL_INTERVAL * 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_not_retried() {
    let client = scripted(
        config().build().unwrap(),
        [CaOutcome::Reject(FailInfo::BadMessageCheck)],
    );
    let (csr_pem, _) = fixtures::csr();

    let err = client.sign(csr_pem.as_bytes()).await.unwrap_err();

    assert!(
        matches!(
            err,
            ScepError::EnrollmentFailed {
                fail_info: FailInfo::BadMessageCheck
            }
        ),
        "{:?}",
        err
    );
    assert_eq!(client.transport().submits(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_without_deadline_polls_indefinitely() {
    let client = scripted(config().build().unwrap(), [CaOutcome::Pending]);
    let (csr_pem, _) = fixtures::csr();

    let result =
        tokio::time::timeout(Duration::from_secs(600), client.sign(csr_pem.as_bytes())).await;

    assert!(result.is_err(), "enrollment should still be polling");
    assert!(client.transport().submits() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_enrollment_deadline() {
    let deadline = Duration::from_secs(100);
    let client = scripted(
        config().enrollment_deadline(deadline).build().unwrap(),
        [CaOutcome::Pending],
    );
    let (csr_pem, _) = fixtures::csr();

    let err = client.sign(csr_pem.as_bytes()).await.unwrap_err();

    assert!(
        matches!(err, ScepError::DeadlineExceeded(d) if d == deadline),
        "{:?}",
        err
    );
    assert!(client.transport().submits() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_pending() {
    let client = scripted(config().build().unwrap(), [CaOutcome::Pending]);
    let (csr_pem, _) = fixtures::csr();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        trigger.cancel();
    });

    let err = client
        .sign_with_cancel(csr_pem.as_bytes(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ScepError::Cancelled), "{:?}", err);
    assert!(client.transport().submits() >= 1);
}

#[tokio::test]
async fn test_cancelled_before_start_submits_nothing() {
    let client = scripted(config().build().unwrap(), [CaOutcome::Issue]);
    let (csr_pem, _) = fixtures::csr();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .sign_with_cancel(csr_pem.as_bytes(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ScepError::Cancelled));
    assert_eq!(client.transport().submits(), 0);
}

#[tokio::test]
async fn test_reply_from_unknown_signer_rejected() {
    let ca = Arc::new(MockCa::new());
    let impostor = Arc::new(MockCa::new());
    let transport =
        ScriptedTransport::new(ca, [CaOutcome::Pending]).with_reply_signer(impostor);
    let client = ScepClient::with_transport(config().build().unwrap(), transport);
    let (csr_pem, _) = fixtures::csr();

    let err = client.sign(csr_pem.as_bytes()).await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Parse));
    assert!(
        matches!(err.root(), ScepError::SignatureVerification(_)),
        "{:?}",
        err
    );
    assert_eq!(client.transport().submits(), 1);
}
