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

//! CMS EnvelopedData support for the SCEP pkcsPKIEnvelope.
//!
//! Requests are sealed to the CA (or RA) certificates returned by
//! GetCACert. Responses are sealed by the server to the certificate that
//! signed the request, so opening one needs the matching private key.
//!
//! Only key transport recipients (RSA PKCS#1 v1.5) addressed by issuer and
//! serial number are produced and understood.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cms::cert::IssuerAndSerialNumber;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use const_oid::ObjectIdentifier;
use der::asn1::{Null, OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use spki::AlgorithmIdentifierOwned;
use tracing::{debug, warn};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::oids;
use crate::types::CaCaps;

/// Supported content encryption algorithms for EnvelopedData.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// AES-128-CBC
    Aes128Cbc,
    /// AES-192-CBC
    Aes192Cbc,
    /// AES-256-CBC
    Aes256Cbc,
    /// Triple DES (3DES) CBC
    TripleDesCbc,
}

impl EncryptionAlgorithm {
    /// Choose the algorithm for a server with the given capabilities.
    ///
    /// AES-128 when the server advertises AES, otherwise 3DES, which every
    /// SCEP server is required to support.
    pub fn for_caps(caps: &CaCaps) -> Self {
        if caps.supports_aes() {
            Self::Aes128Cbc
        } else {
            Self::TripleDesCbc
        }
    }

    /// Get the key size in bytes for this algorithm.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
            Self::TripleDesCbc => 24,
        }
    }

    /// Get the block size in bytes for this algorithm.
    pub fn block_size(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::TripleDesCbc => 8,
        }
    }

    /// Get the algorithm name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes192Cbc => "AES-192-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
            Self::TripleDesCbc => "3DES-CBC",
        }
    }

    /// The algorithm's object identifier.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Aes128Cbc => oids::AES_128_CBC,
            Self::Aes192Cbc => oids::AES_192_CBC,
            Self::Aes256Cbc => oids::AES_256_CBC,
            Self::TripleDesCbc => oids::DES_EDE3_CBC,
        }
    }

    /// Look up an algorithm by object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            Self::Aes128Cbc,
            Self::Aes192Cbc,
            Self::Aes256Cbc,
            Self::TripleDesCbc,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
    }
}

/// Encrypt `content` for every RSA certificate in `recipients`.
///
/// Returns the DER-encoded ContentInfo wrapping the EnvelopedData.
pub fn seal(
    content: &[u8],
    recipients: &[&Certificate],
    algorithm: EncryptionAlgorithm,
) -> Result<Vec<u8>> {
    let mut key = vec![0u8; algorithm.key_size()];
    OsRng.fill_bytes(&mut key);
    let mut iv = vec![0u8; algorithm.block_size()];
    OsRng.fill_bytes(&mut iv);

    let mut infos = Vec::with_capacity(recipients.len());
    for cert in recipients {
        let spki = &cert.tbs_certificate.subject_public_key_info;
        if spki.algorithm.oid != oids::RSA_ENCRYPTION {
            warn!(
                "Skipping recipient with unsupported key algorithm {}",
                spki.algorithm.oid
            );
            continue;
        }

        let public_key = RsaPublicKey::from_public_key_der(&spki.to_der()?)
            .map_err(|e| ScepError::message_build(format!("Invalid recipient key: {}", e)))?;
        let encrypted_key = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &key)
            .map_err(|e| ScepError::message_build(format!("Key transport failed: {}", e)))?;

        infos.push(RecipientInfo::Ktri(KeyTransRecipientInfo {
            version: CmsVersion::V0,
            rid: RecipientIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer.clone(),
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
            key_enc_alg: AlgorithmIdentifierOwned {
                oid: oids::RSA_ENCRYPTION,
                parameters: Some(Any::encode_from(&Null)?),
            },
            enc_key: OctetString::new(encrypted_key)?,
        }));
    }

    if infos.is_empty() {
        return Err(ScepError::message_build(
            "No RSA recipient certificate available for pkcsPKIEnvelope",
        ));
    }

    let ciphertext = encrypt_content(content, &key, &iv, algorithm)?;
    debug!(
        "Sealed {} bytes with {} for {} recipient(s)",
        content.len(),
        algorithm.as_str(),
        infos.len()
    );

    let enveloped = EnvelopedData {
        version: CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos(
            SetOfVec::try_from(infos)
                .map_err(|e| ScepError::message_build(format!("Invalid recipients: {}", e)))?,
        ),
        encrypted_content: EncryptedContentInfo {
            content_type: oids::ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(Any::encode_from(&OctetString::new(iv)?)?),
            },
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    };

    let content_info = ContentInfo {
        content_type: oids::ID_ENVELOPED_DATA,
        content: Any::encode_from(&enveloped)?,
    };
    Ok(content_info.to_der()?)
}

/// Decrypt an EnvelopedData addressed to `cert` using `key`.
///
/// Every failure, including a missing recipient entry, is reported as
/// [`ScepError::EnvelopeDecryptionFailed`].
pub fn open(der: &[u8], key: &RsaPrivateKey, cert: &Certificate) -> Result<Vec<u8>> {
    let content_info = ContentInfo::from_der(der)
        .map_err(|e| ScepError::envelope_decryption(format!("invalid ContentInfo: {}", e)))?;
    if content_info.content_type != oids::ID_ENVELOPED_DATA {
        return Err(ScepError::envelope_decryption(format!(
            "expected EnvelopedData, got {}",
            content_info.content_type
        )));
    }

    let enveloped = content_info
        .content
        .to_der()
        .and_then(|inner| EnvelopedData::from_der(&inner))
        .map_err(|e| ScepError::envelope_decryption(format!("invalid EnvelopedData: {}", e)))?;

    let recipient = find_recipient(&enveloped, cert).ok_or_else(|| {
        ScepError::envelope_decryption("no recipient info addressed to signer certificate")
    })?;

    let content_key = key
        .decrypt(Pkcs1v15Encrypt, recipient.enc_key.as_bytes())
        .map_err(|_| ScepError::envelope_decryption("content key unwrap failed"))?;

    let info = &enveloped.encrypted_content;
    let algorithm = EncryptionAlgorithm::from_oid(&info.content_enc_alg.oid).ok_or_else(|| {
        ScepError::envelope_decryption(format!(
            "unsupported content encryption algorithm {}",
            info.content_enc_alg.oid
        ))
    })?;

    let iv = info
        .content_enc_alg
        .parameters
        .as_ref()
        .ok_or_else(|| ScepError::envelope_decryption("missing IV parameter"))?
        .to_der()
        .and_then(|param| OctetString::from_der(&param))
        .map_err(|e| ScepError::envelope_decryption(format!("invalid IV parameter: {}", e)))?;

    let ciphertext = info
        .encrypted_content
        .as_ref()
        .ok_or_else(|| ScepError::envelope_decryption("missing encrypted content"))?;

    decrypt_content(ciphertext.as_bytes(), &content_key, iv.as_bytes(), algorithm)
}

fn find_recipient<'a>(
    enveloped: &'a EnvelopedData,
    cert: &Certificate,
) -> Option<&'a KeyTransRecipientInfo> {
    enveloped.recip_infos.0.iter().find_map(|info| match info {
        RecipientInfo::Ktri(ktri) => match &ktri.rid {
            RecipientIdentifier::IssuerAndSerialNumber(ias)
                if ias.issuer == cert.tbs_certificate.issuer
                    && ias.serial_number == cert.tbs_certificate.serial_number =>
            {
                Some(ktri)
            }
            _ => None,
        },
        _ => None,
    })
}

fn check_iv(iv: &[u8], algorithm: EncryptionAlgorithm) -> Result<()> {
    if iv.len() != algorithm.block_size() {
        return Err(ScepError::envelope_decryption(format!(
            "invalid IV size: expected {}, got {}",
            algorithm.block_size(),
            iv.len()
        )));
    }
    Ok(())
}

fn encrypt_content(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
    algorithm: EncryptionAlgorithm,
) -> Result<Vec<u8>> {
    fn run<C: BlockEncryptMut + KeyIvInit>(
        plaintext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = C::new_from_slices(key, iv)
            .map_err(|e| ScepError::message_build(format!("Failed to create cipher: {}", e)))?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    match algorithm {
        EncryptionAlgorithm::Aes128Cbc => run::<cbc::Encryptor<aes::Aes128>>(plaintext, key, iv),
        EncryptionAlgorithm::Aes192Cbc => run::<cbc::Encryptor<aes::Aes192>>(plaintext, key, iv),
        EncryptionAlgorithm::Aes256Cbc => run::<cbc::Encryptor<aes::Aes256>>(plaintext, key, iv),
        EncryptionAlgorithm::TripleDesCbc => {
            run::<cbc::Encryptor<des::TdesEde3>>(plaintext, key, iv)
        }
    }
}

fn decrypt_content(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
    algorithm: EncryptionAlgorithm,
) -> Result<Vec<u8>> {
    fn run<C: BlockDecryptMut + KeyIvInit>(
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = C::new_from_slices(key, iv)
            .map_err(|_| ScepError::envelope_decryption("content key has the wrong length"))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| ScepError::envelope_decryption("bad padding"))
    }

    check_iv(iv, algorithm)?;

    match algorithm {
        EncryptionAlgorithm::Aes128Cbc => run::<cbc::Decryptor<aes::Aes128>>(ciphertext, key, iv),
        EncryptionAlgorithm::Aes192Cbc => run::<cbc::Decryptor<aes::Aes192>>(ciphertext, key, iv),
        EncryptionAlgorithm::Aes256Cbc => run::<cbc::Decryptor<aes::Aes256>>(ciphertext, key, iv),
        EncryptionAlgorithm::TripleDesCbc => {
            run::<cbc::Decryptor<des::TdesEde3>>(ciphertext, key, iv)
        }
    }
}
