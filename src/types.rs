use chrono::{DateTime, Utc};
use std::fmt;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// Identifier of the server identity `--init` creates.
pub const DEFAULT_SERVER_ID: &str = "vpnserver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum IdentityStatus {
    Active,
    Revoked,
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStatus::Active => f.pad("active"),
            IdentityStatus::Revoked => f.pad("revoked"),
        }
    }
}

/// One issued identity as recorded in the CA database.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Identity {
    pub id: String,
    pub status: IdentityStatus,
    /// Uppercase hex, as written to `index.txt`.
    pub serial: String,
    pub not_after: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

/// Rejects identifiers that could escape the store layout or break the
/// remote unit name `openvpn@<id>`.
pub fn validate_identifier(id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::InvalidInput(
            "identifier must not be empty".to_string(),
        ));
    }
    if id.starts_with('.') {
        return Err(crate::Error::InvalidInput(format!(
            "identifier '{}' must not start with '.'",
            id
        )));
    }
    if id
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(crate::Error::InvalidInput(format!(
            "identifier '{}' contains a path separator or whitespace",
            id
        )));
    }
    Ok(())
}

/// Splits a comma separated identifier list, dropping blank entries.
pub fn split_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertSigAlgo {
    Ed25519,
    EcdsaP256,
    EcdsaP384,
}

impl CertSigAlgo {
    pub fn to_rcgen(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            CertSigAlgo::Ed25519 => &rcgen::PKCS_ED25519,
            CertSigAlgo::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            CertSigAlgo::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }

    pub fn key_pair(&self) -> crate::Result<rcgen::KeyPair> {
        rcgen::KeyPair::generate(self.to_rcgen()).map_err(|e| crate::Error::CertGen(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertSigAlgo::Ed25519 => "Ed25519",
            CertSigAlgo::EcdsaP256 => "ECDSA P-256",
            CertSigAlgo::EcdsaP384 => "ECDSA P-384",
        }
    }
}

impl std::str::FromStr for CertSigAlgo {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ed25519" => Ok(CertSigAlgo::Ed25519),
            "ecdsa-p256" | "ecdsap256" | "p256" => Ok(CertSigAlgo::EcdsaP256),
            "ecdsa-p384" | "ecdsap384" | "p384" => Ok(CertSigAlgo::EcdsaP384),
            _ => Err(crate::Error::InvalidInput(format!(
                "unsupported algorithm: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistinguishedName {
    pub common_name: String,
    pub organization: Option<String>,
    pub country: Option<String>,
}

impl DistinguishedName {
    pub fn new(cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            organization: None,
            country: None,
        }
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn to_rcgen(&self) -> rcgen::DistinguishedName {
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, &self.common_name);

        if let Some(ref org) = self.organization {
            dn.push(rcgen::DnType::OrganizationName, org);
        }
        if let Some(ref country) = self.country {
            dn.push(rcgen::DnType::CountryName, country);
        }

        dn
    }
}

/// Revocation reasons as spelled in the OpenSSL CA database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CACompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
}

impl RevocationReason {
    pub fn to_rcgen(&self) -> rcgen::RevocationReason {
        match self {
            RevocationReason::Unspecified => rcgen::RevocationReason::Unspecified,
            RevocationReason::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
            RevocationReason::CACompromise => rcgen::RevocationReason::CaCompromise,
            RevocationReason::AffiliationChanged => rcgen::RevocationReason::AffiliationChanged,
            RevocationReason::Superseded => rcgen::RevocationReason::Superseded,
            RevocationReason::CessationOfOperation => {
                rcgen::RevocationReason::CessationOfOperation
            }
            RevocationReason::CertificateHold => rcgen::RevocationReason::CertificateHold,
        }
    }

    pub fn index_name(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CACompromise => "CACompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
        }
    }

    pub fn from_index_name(name: &str) -> Option<Self> {
        match name {
            "unspecified" => Some(RevocationReason::Unspecified),
            "keyCompromise" => Some(RevocationReason::KeyCompromise),
            "CACompromise" => Some(RevocationReason::CACompromise),
            "affiliationChanged" => Some(RevocationReason::AffiliationChanged),
            "superseded" => Some(RevocationReason::Superseded),
            "cessationOfOperation" => Some(RevocationReason::CessationOfOperation),
            "certificateHold" => Some(RevocationReason::CertificateHold),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("alice").is_ok());
        assert!(validate_identifier("vpn-server_01.example").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("../ca").is_err());
        assert!(validate_identifier(".hidden").is_err());
        assert!(validate_identifier("bob smith").is_err());
        assert!(validate_identifier("a/b").is_err());
    }

    #[test]
    fn test_split_identifiers() {
        assert_eq!(split_identifiers("bob,carol"), vec!["bob", "carol"]);
        assert_eq!(split_identifiers(" bob , ,carol,"), vec!["bob", "carol"]);
        assert_eq!(split_identifiers("alice"), vec!["alice"]);
        assert!(split_identifiers(",").is_empty());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert!(matches!(
            "ed25519".parse::<CertSigAlgo>(),
            Ok(CertSigAlgo::Ed25519)
        ));
        assert!(matches!(
            "ECDSA-P384".parse::<CertSigAlgo>(),
            Ok(CertSigAlgo::EcdsaP384)
        ));
        assert!("rsa4096".parse::<CertSigAlgo>().is_err());
    }

    #[test]
    fn test_reason_names_round_trip() {
        for reason in [
            RevocationReason::Unspecified,
            RevocationReason::KeyCompromise,
            RevocationReason::CessationOfOperation,
        ] {
            assert_eq!(
                RevocationReason::from_index_name(reason.index_name()),
                Some(reason)
            );
        }
        assert_eq!(RevocationReason::from_index_name("bogus"), None);
    }
}
