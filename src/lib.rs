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

//! # scep-issuer
//!
//! Certificate issuance through SCEP (RFC 8894) for cluster certificate
//! issuers.
//!
//! The crate has two halves:
//!
//! - **Enrollment**: [`ScepClient::sign`] turns a CSR into a certificate. It
//!   injects the issuer's challenge password into the CSR, addresses the
//!   request with a throwaway signer identity, submits it to the CA and
//!   polls while the CA reports the request as pending.
//! - **Readiness**: [`controller::IssuerReconciler`] health-checks each
//!   issuer's CA and tracks the result in the issuer's `Ready` condition,
//!   which gates signing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scep_issuer::{ScepClient, ScepClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScepClientConfig::builder()
//!         .server_url("https://ca.example.com/scep")?
//!         .challenge("secret")
//!         .build()?;
//!
//!     let client = ScepClient::new(config).await?;
//!
//!     let ca_certs = client.get_ca_certs().await?;
//!     println!("Retrieved {} CA certificates", ca_certs.len());
//!
//!     let csr = std::fs::read("request.csr")?;
//!     let certificate = client.sign(&csr).await?;
//!     println!("{}", certificate);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Cancellation
//!
//! A CA with manual approval can keep a request pending for hours. Use
//! [`ScepClient::sign_with_cancel`] with a
//! [`CancellationToken`](tokio_util::sync::CancellationToken), or set
//! [`ScepClientConfigBuilder::enrollment_deadline`], to bound the wait.
//!
//! ## RFC 8894 Coverage
//!
//! - Section 3.2: PKCSReq and CertRep messages ([`message`])
//! - Section 3.3: CertRep status handling (Success, Failure, Pending)
//! - Section 3.5.1: GetCACert, single and RA bundle responses
//! - Section 3.5.2: GetCACaps, used to select AES and POST
//! - Section 4.3: PKIOperation by GET or POST ([`transport`])

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod condition;
pub mod config;
pub mod controller;
pub mod csr;
pub mod enveloped;
pub mod error;
pub mod identity;
pub mod issuer;
pub mod logging;
pub mod message;
pub mod oids;
pub mod signature;
pub mod store;
pub mod tls;
pub mod transport;
pub mod types;

// Re-export main types at crate root for convenience
pub use client::ScepClient;
pub use condition::{Condition, ConditionStatus, ConditionType, IssuerStatus};
pub use config::{ControllerConfig, ScepClientConfig, ScepClientConfigBuilder, TrustAnchors};
pub use controller::{Action, IssuerReconciler};
pub use error::{Phase, Result, ScepError};
pub use issuer::{IssuerKey, IssuerKind, IssuerScope, IssuerSpec, ScepIssuer};
pub use transport::{HttpTransport, ScepTransport};
pub use types::{CaCaps, CaCertificates, FailInfo, MessageType, PkiStatus};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("scep-issuer/", env!("CARGO_PKG_VERSION"));
