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

//! SCEP PKI messages (RFC 8894 section 3).
//!
//! A PKI message is a CMS SignedData over id-data whose content is the
//! DER of a pkcsPKIEnvelope (an EnvelopedData). The SCEP fields travel as
//! authenticated attributes of the single SignerInfo.
//!
//! # Example
//!
//! ```no_run
//! use scep_issuer::enveloped::EncryptionAlgorithm;
//! use scep_issuer::identity::EphemeralIdentity;
//! use scep_issuer::message::{new_csr_request, PkiMessage};
//! use scep_issuer::types::CaCertificates;
//!
//! # fn example(csr_der: &[u8], cas: &CaCertificates, reply: &[u8]) -> scep_issuer::Result<()> {
//! let identity = EphemeralIdentity::generate(&[])?;
//! let request = new_csr_request(csr_der, cas, &identity, None, EncryptionAlgorithm::Aes128Cbc)?;
//!
//! // ... send request.raw() to the server ...
//!
//! let response = PkiMessage::parse(reply, Some(cas))?;
//! response.validate_reply(&request)?;
//! let certificate = response.issued_certificate(&identity)?;
//! # Ok(())
//! # }
//! ```

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use const_oid::ObjectIdentifier;
use der::asn1::{Null, OctetString, PrintableStringRef, SetOfVec};
use der::{Any, Decode, Encode, Tag, Tagged};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::attr::Attribute;

use crate::csr;
use crate::enveloped::{self, EncryptionAlgorithm};
use crate::error::{Result, ScepError};
use crate::identity::EphemeralIdentity;
use crate::oids;
use crate::signature::{self, DigestAlgorithm};
use crate::types::{
    CaCertificates, FailInfo, MessageType, PkiStatus, extract_signed_data, leaf_certificate,
    parse_certs_only,
};

/// Length in bytes of generated sender nonces.
pub const NONCE_LEN: usize = 16;

/// Generate a random sender nonce.
pub fn new_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Builder for signed PKI messages.
#[derive(Debug, Clone)]
pub struct PkiMessageBuilder {
    message_type: MessageType,
    transaction_id: String,
    sender_nonce: Option<Vec<u8>>,
    recipient_nonce: Option<Vec<u8>>,
    pki_status: Option<PkiStatus>,
    fail_info: Option<FailInfo>,
    envelope: Option<Vec<u8>>,
}

impl PkiMessageBuilder {
    /// Start a message of the given type within a transaction.
    pub fn new(message_type: MessageType, transaction_id: impl Into<String>) -> Self {
        Self {
            message_type,
            transaction_id: transaction_id.into(),
            sender_nonce: None,
            recipient_nonce: None,
            pki_status: None,
            fail_info: None,
            envelope: None,
        }
    }

    /// Set the sender nonce. A random one is generated otherwise.
    pub fn sender_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.sender_nonce = Some(nonce);
        self
    }

    /// Set the recipient nonce (replies echo the request's sender nonce).
    pub fn recipient_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.recipient_nonce = Some(nonce);
        self
    }

    /// Set the pkiStatus (CertRep only).
    pub fn pki_status(mut self, status: PkiStatus) -> Self {
        self.pki_status = Some(status);
        self
    }

    /// Set the failInfo (failed CertRep only).
    pub fn fail_info(mut self, fail_info: FailInfo) -> Self {
        self.fail_info = Some(fail_info);
        self
    }

    /// Set the DER-encoded pkcsPKIEnvelope carried as content.
    pub fn envelope(mut self, envelope: Vec<u8>) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Sign the message and return its DER encoding.
    pub fn sign(self, key: &RsaPrivateKey, cert: &Certificate) -> Result<Vec<u8>> {
        let content = self.envelope.as_deref().unwrap_or_default();
        let digest = Sha256::digest(content).to_vec();
        let sender_nonce = self.sender_nonce.unwrap_or_else(new_nonce);

        let mut attrs = vec![
            attribute(oids::CONTENT_TYPE, Any::encode_from(&oids::ID_DATA)?)?,
            attribute(oids::MESSAGE_DIGEST, octets(digest)?)?,
            attribute(oids::SCEP_MESSAGE_TYPE, printable(self.message_type.as_str())?)?,
            attribute(oids::SCEP_TRANSACTION_ID, printable(&self.transaction_id)?)?,
            attribute(oids::SCEP_SENDER_NONCE, octets(sender_nonce)?)?,
        ];
        if let Some(nonce) = self.recipient_nonce {
            attrs.push(attribute(oids::SCEP_RECIPIENT_NONCE, octets(nonce)?)?);
        }
        if let Some(status) = self.pki_status {
            attrs.push(attribute(oids::SCEP_PKI_STATUS, printable(status.as_str())?)?);
        }
        if let Some(fail_info) = &self.fail_info {
            attrs.push(attribute(oids::SCEP_FAIL_INFO, printable(fail_info.as_wire())?)?);
        }

        let signed_attrs = SetOfVec::try_from(attrs)
            .map_err(|e| ScepError::message_build(format!("Invalid signed attributes: {}", e)))?;
        let signature = signature::sign_sha256(key, &signed_attrs.to_der()?)?;

        let digest_alg = signature::digest_algorithm_identifier(DigestAlgorithm::Sha256);
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer.clone(),
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: oids::RSA_ENCRYPTION,
                parameters: Some(Any::encode_from(&Null)?),
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let econtent = match self.envelope {
            Some(envelope) => Some(octets(envelope)?),
            None => None,
        };

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: oids::ID_DATA,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(vec![
                CertificateChoices::Certificate(cert.clone()),
            ])?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };

        let content_info = ContentInfo {
            content_type: oids::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };

        debug!(
            "Built {} message for transaction {}",
            self.message_type, self.transaction_id
        );
        Ok(content_info.to_der()?)
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn printable(value: &str) -> Result<Any> {
    let value = PrintableStringRef::new(value)
        .map_err(|e| ScepError::message_build(format!("'{}' is not printable: {}", value, e)))?;
    Ok(Any::encode_from(&value)?)
}

fn octets(value: Vec<u8>) -> Result<Any> {
    Ok(Any::encode_from(&OctetString::new(value)?)?)
}

/// A parsed and signature-verified PKI message.
#[derive(Debug, Clone)]
pub struct PkiMessage {
    raw: Vec<u8>,
    /// The SCEP message type.
    pub message_type: MessageType,
    /// The transactionID attribute.
    pub transaction_id: String,
    /// The senderNonce attribute.
    pub sender_nonce: Option<Vec<u8>>,
    /// The recipientNonce attribute.
    pub recipient_nonce: Option<Vec<u8>>,
    /// The pkiStatus attribute (CertRep only).
    pub pki_status: Option<PkiStatus>,
    /// The failInfo attribute (failed CertRep only).
    pub fail_info: Option<FailInfo>,
    /// The certificate that signed the message.
    pub signer_certificate: Certificate,
    envelope: Option<Vec<u8>>,
}

impl PkiMessage {
    /// Parse and verify a DER-encoded PKI message.
    ///
    /// When `trusted` is given, the signer must be one of those
    /// certificates. Otherwise the signer certificate embedded in the
    /// message is used as is.
    pub fn parse(raw: &[u8], trusted: Option<&CaCertificates>) -> Result<Self> {
        let content_info = ContentInfo::from_der(raw)
            .map_err(|e| ScepError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;
        let signed_data = extract_signed_data(&content_info)?;

        let signer_info = match signed_data.signer_infos.0.as_slice() {
            [only] => only,
            [] => return Err(ScepError::invalid_pki_message("no SignerInfo")),
            _ => return Err(ScepError::invalid_pki_message("more than one SignerInfo")),
        };
        let signed_attrs = signer_info
            .signed_attrs
            .as_ref()
            .ok_or_else(|| ScepError::invalid_pki_message("SignerInfo has no signed attributes"))?;

        let signer_certificate = find_signer(&signed_data, &signer_info.sid, trusted)?;

        let envelope = match &signed_data.encap_content_info.econtent {
            Some(econtent) => Some(
                OctetString::from_der(&econtent.to_der()?)
                    .map_err(|e| {
                        ScepError::cms_parsing(format!("Content is not an OCTET STRING: {}", e))
                    })?
                    .into_bytes(),
            ),
            None => None,
        };

        let digest_alg =
            DigestAlgorithm::from_digest_oid(&signer_info.digest_alg.oid).ok_or_else(|| {
                ScepError::signature_verification(format!(
                    "unsupported digest algorithm {}",
                    signer_info.digest_alg.oid
                ))
            })?;

        let expected = digest_alg.digest(envelope.as_deref().unwrap_or_default());
        let message_digest = attr_octets(signed_attrs, oids::MESSAGE_DIGEST)?
            .ok_or_else(|| ScepError::invalid_pki_message("missing messageDigest attribute"))?;
        if message_digest != expected {
            return Err(ScepError::signature_verification("messageDigest mismatch"));
        }

        let public_key =
            signature::rsa_public_key(&signer_certificate.tbs_certificate.subject_public_key_info)?;
        signature::verify(
            &public_key,
            digest_alg,
            &signed_attrs.to_der()?,
            signer_info.signature.as_bytes(),
        )?;

        let message_type = attr_string(signed_attrs, oids::SCEP_MESSAGE_TYPE)?
            .ok_or_else(|| ScepError::invalid_pki_message("missing messageType attribute"))?;
        let message_type = MessageType::from_wire(&message_type).ok_or_else(|| {
            ScepError::invalid_pki_message(format!("unknown messageType {}", message_type))
        })?;
        let transaction_id = attr_string(signed_attrs, oids::SCEP_TRANSACTION_ID)?
            .ok_or_else(|| ScepError::invalid_pki_message("missing transactionID attribute"))?;

        let pki_status = match attr_string(signed_attrs, oids::SCEP_PKI_STATUS)? {
            Some(value) => Some(PkiStatus::from_wire(&value).ok_or_else(|| {
                ScepError::invalid_pki_message(format!("unknown pkiStatus {}", value))
            })?),
            None => None,
        };
        let fail_info = attr_string(signed_attrs, oids::SCEP_FAIL_INFO)?
            .map(|value| FailInfo::from_wire(&value));

        if message_type == MessageType::CertRep && pki_status.is_none() {
            return Err(ScepError::invalid_pki_message("CertRep without pkiStatus"));
        }

        Ok(Self {
            raw: raw.to_vec(),
            message_type,
            transaction_id,
            sender_nonce: attr_octets(signed_attrs, oids::SCEP_SENDER_NONCE)?,
            recipient_nonce: attr_octets(signed_attrs, oids::SCEP_RECIPIENT_NONCE)?,
            pki_status,
            fail_info,
            signer_certificate,
            envelope,
        })
    }

    /// The DER encoding of the message.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The DER-encoded pkcsPKIEnvelope, if the message carries one.
    pub fn envelope(&self) -> Option<&[u8]> {
        self.envelope.as_deref()
    }

    /// Check that this message is a CertRep answering `request`.
    pub fn validate_reply(&self, request: &PkiMessage) -> Result<()> {
        if self.message_type != MessageType::CertRep {
            return Err(ScepError::invalid_pki_message(format!(
                "expected CertRep, got {}",
                self.message_type
            )));
        }
        if self.transaction_id != request.transaction_id {
            return Err(ScepError::invalid_pki_message("transactionID mismatch"));
        }
        match (&self.recipient_nonce, &request.sender_nonce) {
            (Some(received), Some(sent)) if received != sent => {
                Err(ScepError::invalid_pki_message("recipientNonce mismatch"))
            }
            (None, _) => {
                warn!("CertRep carries no recipientNonce");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Decrypt the pkcsPKIEnvelope with the key the message was sealed for.
    pub fn decrypt_envelope(&self, key: &RsaPrivateKey, cert: &Certificate) -> Result<Vec<u8>> {
        let envelope = self
            .envelope
            .as_deref()
            .ok_or_else(|| ScepError::envelope_decryption("message has no pkcsPKIEnvelope"))?;
        enveloped::open(envelope, key, cert)
    }

    /// Decrypt a successful CertRep and return the issued certificate.
    pub fn issued_certificate(&self, identity: &EphemeralIdentity) -> Result<Certificate> {
        let content = self.decrypt_envelope(identity.private_key(), identity.certificate())?;
        let certs = parse_certs_only(&content)?;
        leaf_certificate(&certs)
            .cloned()
            .ok_or_else(|| ScepError::invalid_pki_message("CertRep contains no certificate"))
    }
}

fn find_signer(
    signed_data: &SignedData,
    sid: &SignerIdentifier,
    trusted: Option<&CaCertificates>,
) -> Result<Certificate> {
    let SignerIdentifier::IssuerAndSerialNumber(ias) = sid else {
        return Err(ScepError::invalid_pki_message(
            "signer identified by subject key identifier is not supported",
        ));
    };

    if let Some(trusted) = trusted {
        return trusted
            .find_by_issuer_serial(&ias.issuer, &ias.serial_number)
            .cloned()
            .ok_or_else(|| {
                ScepError::signature_verification("message signer is not a known CA certificate")
            });
    }

    signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .find_map(|choice| match choice {
            CertificateChoices::Certificate(cert)
                if cert.tbs_certificate.issuer == ias.issuer
                    && cert.tbs_certificate.serial_number == ias.serial_number =>
            {
                Some(cert.clone())
            }
            _ => None,
        })
        .ok_or_else(|| ScepError::invalid_pki_message("signer certificate not included"))
}

fn attr_value(attrs: &SetOfVec<Attribute>, oid: ObjectIdentifier) -> Result<Option<&Any>> {
    let Some(attr) = attrs.iter().find(|attr| attr.oid == oid) else {
        return Ok(None);
    };
    let mut values = attr.values.iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(Some(value)),
        _ => Err(ScepError::invalid_pki_message(format!(
            "attribute {} must have exactly one value",
            oid
        ))),
    }
}

fn attr_string(attrs: &SetOfVec<Attribute>, oid: ObjectIdentifier) -> Result<Option<String>> {
    match attr_value(attrs, oid)? {
        Some(value) => csr::directory_string(value).map(Some).ok_or_else(|| {
            ScepError::invalid_pki_message(format!("attribute {} is not a string", oid))
        }),
        None => Ok(None),
    }
}

fn attr_octets(attrs: &SetOfVec<Attribute>, oid: ObjectIdentifier) -> Result<Option<Vec<u8>>> {
    match attr_value(attrs, oid)? {
        Some(value) if value.tag() == Tag::OctetString => Ok(Some(value.value().to_vec())),
        Some(_) => Err(ScepError::invalid_pki_message(format!(
            "attribute {} is not an OCTET STRING",
            oid
        ))),
        None => Ok(None),
    }
}

/// Transaction ID for a CSR: hex SHA-256 of its SubjectPublicKeyInfo.
pub fn transaction_id(csr_der: &[u8]) -> Result<String> {
    let csr = csr::decode_csr(csr_der)?;
    let spki = csr.info.public_key.to_der()?;
    Ok(hex::encode(Sha256::digest(spki)))
}

/// Build a PKCSReq message enrolling `csr_der` with the given CA.
///
/// The CSR is sealed to the recipient certificates of `cas` and the message
/// is signed by `identity`. When `challenge` is given the CSR must already
/// carry exactly that challenge password.
pub fn new_csr_request(
    csr_der: &[u8],
    cas: &CaCertificates,
    identity: &EphemeralIdentity,
    challenge: Option<&str>,
    algorithm: EncryptionAlgorithm,
) -> Result<PkiMessage> {
    if let Some(challenge) = challenge {
        let carried = csr::parse_challenge_password(csr_der)?;
        if carried.as_deref() != Some(challenge) {
            return Err(ScepError::ChallengeInjectionVerificationFailed);
        }
    }

    let transaction_id = transaction_id(csr_der)?;
    let envelope = enveloped::seal(csr_der, &cas.recipients(), algorithm)?;

    let raw = PkiMessageBuilder::new(MessageType::PkcsReq, transaction_id)
        .envelope(envelope)
        .sign(identity.private_key(), identity.certificate())?;

    PkiMessage::parse(&raw, None)
}
