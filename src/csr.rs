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

//! CSR (Certificate Signing Request) utilities.
//!
//! The centrepiece is [`inject_challenge`], which re-signs a PKCS#10 request
//! with a challenge-password attribute added. Subject, public key and all
//! other attributes (including the extension request) are preserved.
//! [`inject_challenge_for_key`] does the same but rebinds the request to the
//! signing key.
//!
//! A small RSA [`CsrBuilder`] is provided for tooling and tests.

use der::asn1::{BitString, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::pem::LineEnding;
use der::{Any, Decode, Encode, Tag, Tagged};
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DnType, KeyPair, SanType};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::attr::Attribute;
use x509_cert::request::CertReq;

use crate::error::{Result, ScepError};
use crate::oids;
use crate::signature::{self, DigestAlgorithm};

/// PEM label of a PKCS#10 request.
pub const CSR_PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// Decode a CSR given as PEM or DER.
pub fn decode_csr(input: &[u8]) -> Result<CertReq> {
    let der = csr_der(input)?;
    CertReq::from_der(&der).map_err(|e| ScepError::malformed_csr(e.to_string()))
}

/// Extract the DER bytes of a PEM or DER CSR without parsing it.
fn csr_der(input: &[u8]) -> Result<Vec<u8>> {
    if !input.trim_ascii_start().starts_with(b"-----BEGIN") {
        return Ok(input.to_vec());
    }

    let (label, der) = der::pem::decode_vec(input.trim_ascii())
        .map_err(|e| ScepError::malformed_csr(format!("invalid PEM: {}", e)))?;
    if label != CSR_PEM_LABEL && label != "NEW CERTIFICATE REQUEST" {
        return Err(ScepError::malformed_csr(format!(
            "PEM block type must be {}, got {}",
            CSR_PEM_LABEL, label
        )));
    }
    Ok(der)
}

/// Encode a CSR as PEM.
pub fn csr_to_pem(csr: &CertReq) -> Result<String> {
    let der = csr.to_der()?;
    der::pem::encode_string(CSR_PEM_LABEL, LineEnding::LF, &der)
        .map_err(|e| ScepError::certificate_encoding(e.to_string()))
}

/// Read the challenge password carried by a DER-encoded CSR.
///
/// Returns `Ok(None)` when the attribute is absent. An attribute with an
/// empty value still counts as present. Repeated or multi-valued
/// attributes are rejected.
pub fn parse_challenge_password(der: &[u8]) -> Result<Option<String>> {
    let csr = CertReq::from_der(der).map_err(|e| ScepError::malformed_csr(e.to_string()))?;
    challenge_password(&csr)
}

/// Read the challenge password from a parsed CSR.
pub fn challenge_password(csr: &CertReq) -> Result<Option<String>> {
    let mut found = csr
        .info
        .attributes
        .iter()
        .filter(|attr| attr.oid == oids::CHALLENGE_PASSWORD);

    let Some(attr) = found.next() else {
        return Ok(None);
    };
    if found.next().is_some() {
        return Err(ScepError::malformed_csr(
            "more than one challengePassword attribute",
        ));
    }

    let mut values = attr.values.iter();
    let (Some(value), None) = (values.next(), values.next()) else {
        return Err(ScepError::malformed_csr(
            "challengePassword attribute must have exactly one value",
        ));
    };

    directory_string(value)
        .map(Some)
        .ok_or_else(|| ScepError::malformed_csr("challengePassword is not a DirectoryString"))
}

/// Decode a DirectoryString-like value to text.
pub(crate) fn directory_string(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::PrintableString | Tag::Utf8String | Tag::Ia5String | Tag::TeletexString => {
            String::from_utf8(value.value().to_vec()).ok()
        }
        Tag::BmpString => {
            let units: Vec<u16> = value
                .value()
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
                .collect();
            String::from_utf16(&units).ok()
        }
        _ => None,
    }
}

fn challenge_value(challenge: &str) -> Result<Any> {
    let value = match PrintableStringRef::new(challenge) {
        Ok(printable) => Any::encode_from(&printable)?,
        Err(_) => Any::encode_from(&Utf8StringRef::new(challenge)?)?,
    };
    Ok(value)
}

/// Re-sign `csr` with a challenge-password attribute carrying `challenge`.
///
/// The request is signed with `key` using SHA-256. The key is expected to
/// match the CSR public key, which is not checked here (see
/// [`verify_key_pairing`]). The output is re-parsed and the injected value
/// compared before it is returned.
pub fn inject_challenge(csr: &[u8], challenge: &str, key: &RsaPrivateKey) -> Result<String> {
    augment(csr, challenge, key, None)
}

/// Like [`inject_challenge`], but the output carries the public half of
/// `key` in place of the CSR public key.
///
/// The result is always self-consistent: its signature verifies against
/// the public key it asserts.
pub fn inject_challenge_for_key(
    csr: &[u8],
    challenge: &str,
    key: &RsaPrivateKey,
) -> Result<String> {
    let public_key = signature::rsa_spki(&key.to_public_key())?;
    augment(csr, challenge, key, Some(public_key))
}

fn augment(
    csr: &[u8],
    challenge: &str,
    key: &RsaPrivateKey,
    public_key: Option<SubjectPublicKeyInfoOwned>,
) -> Result<String> {
    let original = decode_csr(csr)?;
    if challenge_password(&original)?.is_some() {
        return Err(ScepError::ChallengeAlreadyPresent);
    }

    let mut info = original.info.clone();
    if let Some(public_key) = public_key {
        info.public_key = public_key;
    }
    let mut attributes: Vec<Attribute> = info.attributes.iter().cloned().collect();
    attributes.push(Attribute {
        oid: oids::CHALLENGE_PASSWORD,
        values: SetOfVec::try_from(vec![challenge_value(challenge)?])?,
    });
    info.attributes = SetOfVec::try_from(attributes)?;

    let signature = signature::sign_sha256(key, &info.to_der()?)?;
    let augmented = CertReq {
        info,
        algorithm: signature::sha256_with_rsa_identifier()?,
        signature: BitString::from_bytes(&signature)?,
    };
    let der = augmented.to_der()?;

    match parse_challenge_password(&der)? {
        Some(injected) if injected == challenge => {}
        _ => return Err(ScepError::ChallengeInjectionVerificationFailed),
    }

    der::pem::encode_string(CSR_PEM_LABEL, LineEnding::LF, &der)
        .map_err(|e| ScepError::certificate_encoding(e.to_string()))
}

/// Check that `key` is the private half of the CSR public key.
pub fn verify_key_pairing(csr: &CertReq, key: &RsaPrivateKey) -> Result<()> {
    let csr_key = signature::rsa_public_key(&csr.info.public_key)
        .map_err(|_| ScepError::KeyPairMismatch)?;
    if csr_key != key.to_public_key() {
        return Err(ScepError::KeyPairMismatch);
    }
    Ok(())
}

/// Verify the CSR self-signature with its own public key.
pub fn verify_signature(csr: &CertReq) -> Result<()> {
    let alg = DigestAlgorithm::from_signature_oid(&csr.algorithm.oid).ok_or_else(|| {
        ScepError::signature_verification(format!(
            "unsupported CSR signature algorithm {}",
            csr.algorithm.oid
        ))
    })?;
    let public_key = signature::rsa_public_key(&csr.info.public_key)?;
    let signature = csr
        .signature
        .as_bytes()
        .ok_or_else(|| ScepError::signature_verification("CSR signature has unused bits"))?;

    signature::verify(&public_key, alg, &csr.info.to_der()?, signature)
}

/// Organization names of the CSR subject, in order.
pub fn organizations(csr: &CertReq) -> Vec<String> {
    csr.info
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|atv| atv.oid == const_oid::db::rfc4519::O)
        .filter_map(|atv| directory_string(&atv.value))
        .collect()
}

/// Parse an RSA private key from PEM, either PKCS#8 or PKCS#1.
///
/// The PEM label is not trusted; both encodings are tried.
pub fn parse_private_key_pem(pem: &[u8]) -> Result<RsaPrivateKey> {
    let (_, der) = der::pem::decode_vec(pem.trim_ascii())
        .map_err(|e| ScepError::private_key(format!("invalid PEM: {}", e)))?;

    RsaPrivateKey::from_pkcs8_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
        .map_err(|_| ScepError::private_key("not an RSA key in PKCS#8 or PKCS#1 form"))
}

/// Builder for RSA Certificate Signing Requests.
///
/// # Example
///
/// ```no_run
/// use scep_issuer::csr::CsrBuilder;
///
/// let (csr_pem, key) = CsrBuilder::new()
///     .common_name("www.example.com")
///     .san_dns("www.example.com")
///     .build()
///     .expect("Failed to generate CSR");
/// ```
pub struct CsrBuilder {
    params: CertificateParams,
    key_bits: usize,
}

impl Default for CsrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrBuilder {
    /// Create a new CSR builder for a 2048-bit RSA key.
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        Self {
            params,
            key_bits: 2048,
        }
    }

    /// Set the Common Name (CN) for the subject.
    pub fn common_name(mut self, cn: impl Into<String>) -> Self {
        self.params
            .distinguished_name
            .push(DnType::CommonName, cn.into());
        self
    }

    /// Set the Organization (O) for the subject.
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.params
            .distinguished_name
            .push(DnType::OrganizationName, org.into());
        self
    }

    /// Add a DNS Subject Alternative Name.
    pub fn san_dns(mut self, dns: impl Into<String>) -> Self {
        if let Ok(name) = dns.into().try_into() {
            self.params.subject_alt_names.push(SanType::DnsName(name));
        }
        self
    }

    /// Set the RSA modulus size.
    pub fn key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Generate the key and the PEM-encoded CSR.
    pub fn build(self) -> Result<(String, RsaPrivateKey)> {
        let key = RsaPrivateKey::new(&mut OsRng, self.key_bits)
            .map_err(|e| ScepError::KeyGeneration(e.to_string()))?;
        let pem = self.build_with_key(&key)?;
        Ok((pem, key))
    }

    /// Build a PEM-encoded CSR for an existing key.
    pub fn build_with_key(self, key: &RsaPrivateKey) -> Result<String> {
        let pkcs8 = key
            .to_pkcs8_der()
            .map_err(|e| ScepError::private_key(e.to_string()))?;
        let key_pair = KeyPair::try_from(pkcs8.as_bytes())
            .map_err(|e| ScepError::private_key(e.to_string()))?;

        let csr = self
            .params
            .serialize_request(&key_pair)
            .map_err(|e| ScepError::certificate_encoding(format!("Failed to create CSR: {}", e)))?;

        csr.pem()
            .map_err(|e| ScepError::certificate_encoding(format!("Failed to encode CSR: {}", e)))
    }
}
