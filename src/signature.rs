//! RSA PKCS#1 v1.5 signing and verification helpers.

use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use der::asn1::Null;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::error::{Result, ScepError};
use crate::oids;

/// Digest algorithms accepted on verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1, still used by older SCEP servers.
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Look up a digest by its own OID.
    pub fn from_digest_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            oids::SHA1 => Some(Self::Sha1),
            oids::SHA256 => Some(Self::Sha256),
            oids::SHA384 => Some(Self::Sha384),
            oids::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Look up the digest implied by a `*WithRSAEncryption` OID.
    pub fn from_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            oids::SHA1_WITH_RSA => Some(Self::Sha1),
            oids::SHA256_WITH_RSA => Some(Self::Sha256),
            oids::SHA384_WITH_RSA => Some(Self::Sha384),
            oids::SHA512_WITH_RSA => Some(Self::Sha512),
            _ => None,
        }
    }

    /// The digest OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => oids::SHA1,
            Self::Sha256 => oids::SHA256,
            Self::Sha384 => oids::SHA384,
            Self::Sha512 => oids::SHA512,
        }
    }

    /// Hash `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn padding(&self) -> Pkcs1v15Sign {
        match self {
            Self::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// AlgorithmIdentifier for a digest, with absent parameters.
pub fn digest_algorithm_identifier(alg: DigestAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: alg.oid(),
        parameters: None,
    }
}

/// AlgorithmIdentifier for sha256WithRSAEncryption, with NULL parameters.
pub fn sha256_with_rsa_identifier() -> Result<AlgorithmIdentifierOwned> {
    Ok(AlgorithmIdentifierOwned {
        oid: oids::SHA256_WITH_RSA,
        parameters: Some(der::Any::encode_from(&Null)?),
    })
}

/// Sign `message` with SHA-256 and PKCS#1 v1.5 padding.
pub fn sign_sha256(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>> {
    let hash = Sha256::digest(message);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &hash)
        .map_err(|e| ScepError::message_build(format!("RSA signing failed: {}", e)))
}

/// Verify a PKCS#1 v1.5 signature over `message`.
pub fn verify(
    public_key: &RsaPublicKey,
    alg: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let hash = alg.digest(message);
    public_key
        .verify(alg.padding(), &hash, signature)
        .map_err(|_| ScepError::signature_verification("RSA signature does not verify"))
}

/// Extract an RSA public key from a SubjectPublicKeyInfo.
pub fn rsa_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<RsaPublicKey> {
    if spki.algorithm.oid != oids::RSA_ENCRYPTION {
        return Err(ScepError::signature_verification(format!(
            "unsupported public key algorithm {}",
            spki.algorithm.oid
        )));
    }
    RsaPublicKey::from_public_key_der(&spki.to_der()?)
        .map_err(|e| ScepError::signature_verification(format!("invalid RSA public key: {}", e)))
}

/// Encode an RSA public key as a SubjectPublicKeyInfo.
pub fn rsa_spki(public_key: &RsaPublicKey) -> Result<SubjectPublicKeyInfoOwned> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| ScepError::certificate_encoding(format!("invalid RSA public key: {}", e)))?;
    Ok(SubjectPublicKeyInfoOwned::from_der(der.as_bytes())?)
}
