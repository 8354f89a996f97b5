//! GetCACaps capability list.

use std::collections::BTreeSet;

/// Capabilities advertised by a SCEP server (RFC 8894 section 3.5.2).
///
/// Keywords are compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaCaps {
    caps: BTreeSet<String>,
}

impl CaCaps {
    /// AES content encryption.
    pub const AES: &'static str = "AES";
    /// Triple DES content encryption.
    pub const DES3: &'static str = "DES3";
    /// PKIOperation by HTTP POST.
    pub const POST_PKI_OPERATION: &'static str = "POSTPKIOperation";
    /// The server implements RFC 8894 (implies AES, POST and SHA-256).
    pub const SCEP_STANDARD: &'static str = "SCEPStandard";
    /// SHA-256 digests.
    pub const SHA256: &'static str = "SHA-256";
    /// Renewal requests.
    pub const RENEWAL: &'static str = "Renewal";

    /// Parse a capability list, one keyword per line.
    pub fn parse(body: &str) -> Self {
        let caps = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        Self { caps }
    }

    /// Returns true if the named capability is advertised.
    pub fn has(&self, capability: &str) -> bool {
        self.caps.contains(&capability.to_ascii_lowercase())
    }

    /// Returns true if PKIOperation should be sent by POST.
    pub fn supports_post(&self) -> bool {
        self.has(Self::POST_PKI_OPERATION) || self.has(Self::SCEP_STANDARD)
    }

    /// Returns true if AES content encryption is available.
    pub fn supports_aes(&self) -> bool {
        self.has(Self::AES) || self.has(Self::SCEP_STANDARD)
    }

    /// Returns true if no capabilities were advertised.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Iterate over the advertised keywords (lowercased).
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.caps.iter().map(String::as_str)
    }
}
