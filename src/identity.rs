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

//! Ephemeral enrollment identity.
//!
//! Every enrollment attempt signs its PKI message with a throwaway RSA key
//! and a self-signed certificate. The server encrypts its response to this
//! certificate, so the identity must live until the response is opened and
//! is dropped with the attempt.

use std::fmt;

use der::Decode;
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use time::{Duration, OffsetDateTime};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};

/// Subject common name of every ephemeral signer certificate.
pub const SIGNER_COMMON_NAME: &str = "SCEP SIGNER";

/// RSA modulus size of the ephemeral key.
pub const SIGNER_KEY_BITS: usize = 2048;

/// Validity window of the self-signed certificate.
pub const SIGNER_VALIDITY: Duration = Duration::hours(1);

/// A throwaway key pair and self-signed certificate.
pub struct EphemeralIdentity {
    key: RsaPrivateKey,
    certificate: Certificate,
}

impl EphemeralIdentity {
    /// Generate a fresh identity.
    ///
    /// `organizations` is copied from the CSR being enrolled; only the
    /// first entry is used.
    pub fn generate(organizations: &[String]) -> Result<Self> {
        let key = RsaPrivateKey::new(&mut OsRng, SIGNER_KEY_BITS)
            .map_err(|e| ScepError::KeyGeneration(e.to_string()))?;
        Self::from_key(key, organizations)
    }

    /// Build the self-signed certificate around an existing key.
    pub fn from_key(key: RsaPrivateKey, organizations: &[String]) -> Result<Self> {
        let pkcs8 = key
            .to_pkcs8_der()
            .map_err(|e| ScepError::KeyGeneration(e.to_string()))?;
        let key_pair = KeyPair::try_from(pkcs8.as_bytes())
            .map_err(|e| ScepError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.serial_number = Some(random_serial());
        params.distinguished_name.push(DnType::CommonName, SIGNER_COMMON_NAME);
        if let Some(org) = organizations.first() {
            params
                .distinguished_name
                .push(DnType::OrganizationName, org.as_str());
        }

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + SIGNER_VALIDITY;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.is_ca = IsCa::ExplicitNoCa;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| ScepError::certificate_encoding(e.to_string()))?;
        let certificate = Certificate::from_der(cert.der())
            .map_err(|e| ScepError::certificate_encoding(e.to_string()))?;

        Ok(Self { key, certificate })
    }

    /// The private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// The self-signed certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

impl fmt::Debug for EphemeralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralIdentity")
            .field("key", &"[REDACTED]")
            .field("serial", &self.certificate.tbs_certificate.serial_number)
            .finish()
    }
}

/// 128 random bits, top bit cleared so the INTEGER stays positive.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    if bytes[0] == 0 {
        bytes[0] = 0x01;
    }
    SerialNumber::from_slice(&bytes)
}
