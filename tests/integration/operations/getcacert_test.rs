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

//! Integration tests for GetCACert and GetCACaps

use crate::integration::{MockCa, MockScepServer};
use scep_issuer::{ScepClient, ScepClientConfig, ScepError};

async fn client(mock: &MockScepServer) -> ScepClient {
    let config = ScepClientConfig::builder()
        .server_url(mock.url())
        .expect("Valid URL")
        .build()
        .expect("Valid config");

    ScepClient::new(config).await.expect("Client creation failed")
}

#[tokio::test]
async fn test_successful_ca_cert_retrieval() {
    let mock = MockScepServer::start().await;
    let ca = MockCa::new();
    mock.mock_ca_cert(&ca).await;

    let client = client(&mock).await;
    let result = client.get_ca_certs().await;

    assert!(result.is_ok(), "get_ca_certs failed: {:?}", result.err());
    let cas = result.unwrap();
    assert_eq!(cas.len(), 1);
    assert_eq!(cas.iter().next(), Some(ca.certificate()));
}

#[tokio::test]
async fn test_ca_cert_server_error() {
    let mock = MockScepServer::start().await;
    mock.mock_ca_cert_error(500).await;

    let client = client(&mock).await;
    let err = client.get_ca_certs().await.unwrap_err();

    assert!(
        matches!(err, ScepError::ServerError { status: 500, .. }),
        "Wrong error type: {:?}",
        err
    );
}

#[tokio::test]
async fn test_ca_caps_retrieval() {
    let mock = MockScepServer::start().await;
    mock.mock_ca_caps("POSTPKIOperation\nSHA-256\nAES\n").await;

    let client = client(&mock).await;
    let caps = client.get_ca_caps().await;

    assert!(caps.supports_post());
    assert!(caps.supports_aes());
    assert!(caps.has("SHA-256"));
}

#[tokio::test]
async fn test_ca_caps_unavailable_is_empty() {
    // Nothing mounted: the server answers 404.
    let mock = MockScepServer::start().await;

    let client = client(&mock).await;
    let caps = client.get_ca_caps().await;

    assert!(caps.is_empty());
    assert!(!caps.supports_post());
}

#[tokio::test]
async fn test_health_check() {
    let mock = MockScepServer::start().await;
    let ca = MockCa::new();
    mock.mock_ca_cert(&ca).await;

    let client = client(&mock).await;
    assert!(client.check().await.is_ok());
}

#[tokio::test]
async fn test_health_check_fails_when_ca_unavailable() {
    let mock = MockScepServer::start().await;
    mock.mock_ca_cert_error(503).await;

    let client = client(&mock).await;
    let err = client.check().await.unwrap_err();

    assert!(matches!(err, ScepError::HealthCheck(_)), "{:?}", err);
    assert!(err.to_string().starts_with("healthcheck failed: "));
}
