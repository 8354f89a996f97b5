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

//! Integration tests for loading controller configuration files

use std::io::Write;
use std::time::Duration;

use scep_issuer::identity::EphemeralIdentity;
use scep_issuer::logging::LogLevel;
use scep_issuer::types::certificate_to_pem;
use scep_issuer::{ControllerConfig, ScepError, TrustAnchors};

fn write_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

#[test]
fn test_load_config_file() {
    let identity = EphemeralIdentity::generate(&[]).unwrap();
    let bundle = write_file(&certificate_to_pem(identity.certificate()).unwrap());

    let config_file = write_file(&format!(
        r#"
[controller]
cluster_resource_namespace = "pki"
health_check_interval_secs = 120

[enrollment]
poll_interval_secs = 10
deadline_secs = 600
verify_key_pairing = true
ca_bundle_path = "{}"

[logging]
level = "debug"
json = true
"#,
        bundle.path().display()
    ));

    let config = ControllerConfig::from_file(config_file.path()).expect("valid config");
    assert_eq!(config.controller.cluster_resource_namespace, "pki");
    assert_eq!(
        config.controller.health_check_interval(),
        Duration::from_secs(120)
    );
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert!(config.logging.json);

    let client = config
        .client_config("https://ca.example.com/scep", "secret")
        .unwrap();
    assert_eq!(client.poll_interval, Duration::from_secs(10));
    assert_eq!(client.enrollment_deadline, Some(Duration::from_secs(600)));
    assert!(client.verify_key_pairing);
    assert_eq!(client.challenge.as_deref(), Some("secret"));
    assert!(matches!(client.trust_anchors, TrustAnchors::Explicit(ref pems) if pems.len() == 1));
}

#[test]
fn test_empty_file_uses_defaults() {
    let config_file = write_file("");
    let config = ControllerConfig::from_file(config_file.path()).unwrap();

    assert_eq!(config.controller.cluster_resource_namespace, "scep-issuer");
    assert_eq!(config.enrollment.poll_interval_secs, 30);
    assert_eq!(config.enrollment.deadline_secs, None);
}

#[test]
fn test_invalid_file_rejected() {
    let config_file = write_file(
        r#"
[enrollment]
poll_interval_secs = 0
"#,
    );

    let err = ControllerConfig::from_file(config_file.path()).unwrap_err();
    assert!(matches!(err, ScepError::Config(_)));
    assert!(err.to_string().contains("poll_interval_secs"));
}

#[test]
fn test_unknown_key_rejected() {
    let config_file = write_file("[enrollment]\npoll_intervall_secs = 5\n");
    assert!(ControllerConfig::from_file(config_file.path()).is_err());
}

#[test]
fn test_missing_ca_bundle_reported() {
    let config = ControllerConfig::from_toml(
        r#"
[enrollment]
ca_bundle_path = "/nonexistent/ca.pem"
"#,
    )
    .unwrap();

    let err = config
        .client_config("https://ca.example.com/scep", "")
        .unwrap_err();
    assert!(err.to_string().contains("/nonexistent/ca.pem"));
}
