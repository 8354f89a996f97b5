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

//! SCEP message types and parsing utilities.
//!
//! This module provides the protocol enumerations carried in SCEP signed
//! attributes, the CA capability list, and PKCS#7 certificate containers.

mod caps;
mod pkcs7;

pub use caps::CaCaps;
pub use pkcs7::{
    CaCertificates, certificate_to_pem, certs_only, leaf_certificate, parse_certs_only,
    parse_der_certificates,
};
pub(crate) use pkcs7::extract_signed_data;

use std::fmt;

/// SCEP messageType attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Response to a certificate or CRL request.
    CertRep,
    /// PKCS#10 certificate request.
    PkcsReq,
    /// Certificate polling in manual enrolment.
    CertPoll,
}

impl MessageType {
    /// The decimal string carried on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CertRep => "3",
            Self::PkcsReq => "19",
            Self::CertPoll => "20",
        }
    }

    /// Parse the wire value.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "3" => Some(Self::CertRep),
            "19" => Some(Self::PkcsReq),
            "20" => Some(Self::CertPoll),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CertRep => "CertRep",
            Self::PkcsReq => "PKCSReq",
            Self::CertPoll => "CertPoll",
        };
        f.write_str(name)
    }
}

/// SCEP pkiStatus attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    /// Request granted.
    Success,
    /// Request rejected.
    Failure,
    /// Request pending for manual approval.
    Pending,
}

impl PkiStatus {
    /// The decimal string carried on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "0",
            Self::Failure => "2",
            Self::Pending => "3",
        }
    }

    /// Parse the wire value.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(Self::Success),
            "2" => Some(Self::Failure),
            "3" => Some(Self::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Pending => "PENDING",
        };
        f.write_str(name)
    }
}

/// SCEP failInfo attribute values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailInfo {
    /// Unrecognized or unsupported algorithm.
    BadAlg,
    /// Integrity check (signature verification) failed.
    BadMessageCheck,
    /// Transaction not permitted or supported.
    BadRequest,
    /// The signingTime attribute was not close enough to the system time.
    BadTime,
    /// No certificate could be identified matching the provided criteria.
    BadCertId,
    /// A value outside RFC 8894.
    Other(String),
}

impl FailInfo {
    /// The decimal string carried on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::BadAlg => "0",
            Self::BadMessageCheck => "1",
            Self::BadRequest => "2",
            Self::BadTime => "3",
            Self::BadCertId => "4",
            Self::Other(value) => value,
        }
    }

    /// Parse the wire value. Unknown values are preserved.
    pub fn from_wire(value: &str) -> Self {
        match value.trim() {
            "0" => Self::BadAlg,
            "1" => Self::BadMessageCheck,
            "2" => Self::BadRequest,
            "3" => Self::BadTime,
            "4" => Self::BadCertId,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAlg => f.write_str("badAlg"),
            Self::BadMessageCheck => f.write_str("badMessageCheck"),
            Self::BadRequest => f.write_str("badRequest"),
            Self::BadTime => f.write_str("badTime"),
            Self::BadCertId => f.write_str("badCertId"),
            Self::Other(value) => write!(f, "unknown ({value})"),
        }
    }
}

/// Content types used in the SCEP protocol.
pub mod content_types {
    /// Single CA certificate.
    pub const CA_CERT: &str = "application/x-x509-ca-cert";

    /// CA and RA certificates as a certs-only PKCS#7.
    pub const CA_RA_CERT: &str = "application/x-x509-ca-ra-cert";

    /// PKI message request and response.
    pub const PKI_MESSAGE: &str = "application/x-pki-message";

    /// Capability list.
    pub const TEXT_PLAIN: &str = "text/plain";
}

/// SCEP operation names.
pub mod operations {
    /// Capability discovery.
    pub const GET_CA_CAPS: &str = "GetCACaps";

    /// CA certificate distribution.
    pub const GET_CA_CERT: &str = "GetCACert";

    /// Certificate enrolment and polling.
    pub const PKI_OPERATION: &str = "PKIOperation";
}
