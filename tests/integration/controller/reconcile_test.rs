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

//! Integration tests for issuer reconciliation against a mock SCEP server

use std::sync::Arc;
use std::time::Duration;

use scep_issuer::csr;
use scep_issuer::issuer::NamespacedName;
use scep_issuer::store::{IssuerStore, MemoryIssuerStore, MemorySecretStore};
use scep_issuer::{
    Action, ConditionStatus, ControllerConfig, IssuerKey, IssuerReconciler, IssuerSpec,
    ScepError, ScepIssuer,
};
use tokio_util::sync::CancellationToken;

use crate::integration::fixtures::{self, CHALLENGE};
use crate::integration::{CaOutcome, MockCa, MockScepServer};

const SECRET_NAME: &str = "scep-credentials";

struct Harness {
    issuers: Arc<MemoryIssuerStore>,
    secrets: Arc<MemorySecretStore>,
    reconciler: IssuerReconciler,
}

fn harness(config: &ControllerConfig) -> Harness {
    let issuers = Arc::new(MemoryIssuerStore::new());
    let secrets = Arc::new(MemorySecretStore::new());
    let reconciler = IssuerReconciler::new(issuers.clone(), secrets.clone(), config);
    Harness {
        issuers,
        secrets,
        reconciler,
    }
}

fn spec(mock: &MockScepServer) -> IssuerSpec {
    IssuerSpec {
        url: mock.url(),
        auth_secret_name: SECRET_NAME.to_string(),
    }
}

async fn ready_status(h: &Harness, key: &IssuerKey) -> (ConditionStatus, String) {
    let issuer = h.issuers.get(key).await.unwrap().unwrap();
    let ready = issuer.status.ready_condition().expect("Ready condition");
    (ready.status, ready.message.clone())
}

#[tokio::test]
async fn test_issuer_becomes_ready_and_signs() {
    let mock = MockScepServer::start().await;
    let ca = Arc::new(MockCa::new());
    mock.mock_ca_caps("POSTPKIOperation\nAES\nSHA-256\n").await;
    mock.mock_ca_cert(&ca).await;
    mock.mock_pki_operation(ca.clone(), CaOutcome::Issue).await;

    let h = harness(&ControllerConfig::default());
    h.issuers
        .insert(ScepIssuer::namespaced("team-a", "issuer", spec(&mock)))
        .await;
    h.secrets
        .insert_challenge(NamespacedName::new("team-a", SECRET_NAME), CHALLENGE)
        .await;
    let key = IssuerKey::issuer("team-a", "issuer");

    let action = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::ZERO));
    assert_eq!(
        ready_status(&h, &key).await,
        (ConditionStatus::Unknown, "First seen".to_string())
    );

    let action = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::from_secs(60)));
    assert_eq!(
        ready_status(&h, &key).await,
        (ConditionStatus::True, "Success".to_string())
    );

    let (csr_pem, _) = fixtures::csr();
    let pem = h
        .reconciler
        .sign_certificate_request(&key, csr_pem.as_bytes(), &CancellationToken::new())
        .await
        .expect("signing failed");
    fixtures::parse_certificate(&pem);

    let received = ca.received_csrs();
    assert_eq!(received.len(), 1);
    assert_eq!(
        csr::parse_challenge_password(&received[0]).unwrap().as_deref(),
        Some(CHALLENGE)
    );
}

#[tokio::test]
async fn test_cluster_issuer_reads_secret_from_cluster_namespace() {
    let mock = MockScepServer::start().await;
    let ca = MockCa::new();
    mock.mock_ca_cert(&ca).await;

    let mut config = ControllerConfig::default();
    config.controller.cluster_resource_namespace = "pki".to_string();
    let h = harness(&config);

    h.issuers.insert(ScepIssuer::cluster("root", spec(&mock))).await;
    h.secrets
        .insert_challenge(NamespacedName::new("pki", SECRET_NAME), CHALLENGE)
        .await;
    let key = IssuerKey::cluster_issuer("root");

    h.reconciler.reconcile(&key).await.unwrap();
    h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(ready_status(&h, &key).await.0, ConditionStatus::True);
}

#[tokio::test]
async fn test_ca_outage_marks_issuer_not_ready() {
    let mock = MockScepServer::start().await;
    mock.mock_ca_cert_error(503).await;

    let h = harness(&ControllerConfig::default());
    h.issuers
        .insert(ScepIssuer::namespaced("team-a", "issuer", spec(&mock)))
        .await;
    h.secrets
        .insert_challenge(NamespacedName::new("team-a", SECRET_NAME), CHALLENGE)
        .await;
    let key = IssuerKey::issuer("team-a", "issuer");

    h.reconciler.reconcile(&key).await.unwrap();
    let err = h.reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ScepError::HealthCheck(_)), "{:?}", err);

    let (status, message) = ready_status(&h, &key).await;
    assert_eq!(status, ConditionStatus::False);
    assert!(message.starts_with("healthcheck failed: "), "{message}");

    let (csr_pem, _) = fixtures::csr();
    let err = h
        .reconciler
        .sign_certificate_request(&key, csr_pem.as_bytes(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScepError::NotReady(_)), "{:?}", err);
}

#[tokio::test]
async fn test_ready_status_serialization() {
    let mock = MockScepServer::start().await;
    let ca = MockCa::new();
    mock.mock_ca_cert(&ca).await;

    let h = harness(&ControllerConfig::default());
    h.issuers
        .insert(ScepIssuer::namespaced("team-a", "issuer", spec(&mock)))
        .await;
    h.secrets
        .insert_challenge(NamespacedName::new("team-a", SECRET_NAME), CHALLENGE)
        .await;
    let key = IssuerKey::issuer("team-a", "issuer");

    h.reconciler.reconcile(&key).await.unwrap();
    h.reconciler.reconcile(&key).await.unwrap();

    let issuer = h.issuers.get(&key).await.unwrap().unwrap();
    let json = serde_json::to_value(&issuer).unwrap();
    let condition = &json["status"]["conditions"][0];
    assert_eq!(json["kind"], "SCEPIssuer");
    assert_eq!(json["spec"]["authSecretName"], SECRET_NAME);
    assert_eq!(condition["type"], "Ready");
    assert_eq!(condition["status"], "True");
    assert_eq!(condition["reason"], "ScepIssuerController.Reconcile");
    assert!(condition["lastTransitionTime"].is_string());

    let restored: ScepIssuer = serde_json::from_value(json).unwrap();
    assert_eq!(restored, issuer);
}
