//! PKCS#7/CMS certificate container utilities.
//!
//! This module parses and builds the degenerate "certs-only" SignedData
//! structure used by SCEP servers for multi-certificate GetCACert responses
//! and for the certificate payload of a successful CertRep.

use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::SetOfVec;
use der::{Any, Decode, Encode, Reader, SliceReader};
use x509_cert::Certificate;
use x509_cert::ext::pkix::{KeyUsage, KeyUsages};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;

use crate::error::{Result, ScepError};
use crate::oids;

/// Collection of CA certificates returned from the GetCACert operation.
#[derive(Debug, Clone)]
pub struct CaCertificates {
    /// The CA (and RA) certificates.
    pub certificates: Vec<Certificate>,
}

impl CaCertificates {
    /// Create a new CA certificates collection.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Parse a GetCACert response body.
    ///
    /// A `count` greater than one means the server bundled its chain into a
    /// certs-only PKCS#7. Otherwise the body is DER, possibly several
    /// certificates concatenated.
    pub fn from_response(raw: &[u8], count: usize) -> Result<Self> {
        let certificates = if count > 1 {
            parse_certs_only(raw)?
        } else {
            parse_der_certificates(raw)?
        };

        if certificates.is_empty() {
            return Err(ScepError::certificate_parsing(
                "GetCACert response contains no certificates",
            ));
        }

        Ok(Self::new(certificates))
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Certificates usable as envelope recipients.
    ///
    /// Certificates whose key usage forbids key encipherment are skipped.
    /// When that leaves nothing, every certificate is returned.
    pub fn recipients(&self) -> Vec<&Certificate> {
        let usable: Vec<&Certificate> = self
            .certificates
            .iter()
            .filter(|cert| allows_key_encipherment(cert))
            .collect();

        if usable.is_empty() {
            self.certificates.iter().collect()
        } else {
            usable
        }
    }

    /// Find the certificate with the given issuer and serial number.
    pub fn find_by_issuer_serial(
        &self,
        issuer: &Name,
        serial: &SerialNumber,
    ) -> Option<&Certificate> {
        self.certificates.iter().find(|cert| {
            cert.tbs_certificate.issuer == *issuer && cert.tbs_certificate.serial_number == *serial
        })
    }
}

impl IntoIterator for CaCertificates {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.into_iter()
    }
}

impl<'a> IntoIterator for &'a CaCertificates {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}

fn allows_key_encipherment(cert: &Certificate) -> bool {
    match cert.tbs_certificate.get::<KeyUsage>() {
        Ok(Some((_, usage))) => usage.0.contains(KeyUsages::KeyEncipherment),
        // No (or unreadable) key usage extension places no restriction.
        _ => true,
    }
}

/// Parse a DER-encoded PKCS#7 certs-only SignedData.
pub fn parse_certs_only(der: &[u8]) -> Result<Vec<Certificate>> {
    let content_info = ContentInfo::from_der(der)
        .map_err(|e| ScepError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;

    let signed_data = extract_signed_data(&content_info)?;

    extract_certificates(&signed_data)
}

/// Parse one or more concatenated DER certificates.
pub fn parse_der_certificates(der: &[u8]) -> Result<Vec<Certificate>> {
    let mut reader = SliceReader::new(der)
        .map_err(|e| ScepError::certificate_parsing(format!("Invalid DER input: {}", e)))?;

    let mut certificates = Vec::new();
    while !reader.is_finished() {
        let cert = Certificate::decode(&mut reader).map_err(|e| {
            ScepError::certificate_parsing(format!("Failed to parse certificate: {}", e))
        })?;
        certificates.push(cert);
    }

    Ok(certificates)
}

/// Build a DER-encoded certs-only SignedData carrying `certs`.
pub fn certs_only(certs: &[Certificate]) -> Result<Vec<u8>> {
    let choices: Vec<CertificateChoices> = certs
        .iter()
        .cloned()
        .map(CertificateChoices::Certificate)
        .collect();
    let cert_set = SetOfVec::try_from(choices)
        .map_err(|e| ScepError::message_build(format!("Failed to build certificate set: {}", e)))?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(cert_set)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };

    Ok(content_info.to_der()?)
}

/// Extract SignedData from ContentInfo.
pub(crate) fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(ScepError::cms_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| ScepError::cms_parsing(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| ScepError::cms_parsing(format!("Failed to parse SignedData: {}", e)))
}

/// Extract certificates from SignedData.
pub(crate) fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let cert_set = match &signed_data.certificates {
        Some(certs) => certs,
        None => return Ok(Vec::new()),
    };

    let mut certificates = Vec::new();

    for cert_choice in cert_set.0.iter() {
        match cert_choice {
            CertificateChoices::Certificate(cert) => certificates.push(cert.clone()),
            _ => {
                tracing::warn!("Skipping non-X.509 certificate choice");
            }
        }
    }

    Ok(certificates)
}

/// Select the end-entity certificate from an issued chain.
///
/// The leaf is the certificate that did not issue any other certificate in
/// the set. Falls back to the first certificate.
pub fn leaf_certificate(certs: &[Certificate]) -> Option<&Certificate> {
    certs
        .iter()
        .find(|candidate| {
            let subject = &candidate.tbs_certificate.subject;
            !certs.iter().any(|other| {
                !std::ptr::eq(*candidate, other) && other.tbs_certificate.issuer == *subject
            })
        })
        .or_else(|| certs.first())
}

/// Encode a certificate as a PEM "CERTIFICATE" block.
pub fn certificate_to_pem(cert: &Certificate) -> Result<String> {
    use der::EncodePem;

    cert.to_pem(der::pem::LineEnding::LF)
        .map_err(|e| ScepError::certificate_encoding(format!("Failed to encode PEM: {}", e)))
}
