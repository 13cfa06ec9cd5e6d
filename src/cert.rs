use crate::error::{Error, Result};
use crate::types::{CertSigAlgo, DistinguishedName, Role};
use chrono::{DateTime, Duration, Utc};
use rcgen::{Certificate, CertificateParams, KeyPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertKind {
    Authority,
    Identity(Role),
}

/// Builds rcgen parameters for the CA and for VPN identities.
pub struct CertificateBuilder {
    subject: DistinguishedName,
    kind: CertKind,
    algorithm: CertSigAlgo,
    validity_days: u32,
    serial: Option<Vec<u8>>,
}

impl CertificateBuilder {
    pub fn authority(subject: DistinguishedName) -> Self {
        Self {
            subject,
            kind: CertKind::Authority,
            algorithm: CertSigAlgo::EcdsaP256,
            validity_days: 3650,
            serial: None,
        }
    }

    pub fn identity(id: impl Into<String>, role: Role) -> Self {
        Self {
            subject: DistinguishedName::new(id),
            kind: CertKind::Identity(role),
            algorithm: CertSigAlgo::EcdsaP256,
            validity_days: 825,
            serial: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: CertSigAlgo) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn with_serial(mut self, serial: Vec<u8>) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.validity_days as i64)
    }

    pub fn params(&self) -> Result<CertificateParams> {
        let mut params = CertificateParams::new(vec![]);
        params.distinguished_name = self.subject.to_rcgen();

        match self.kind {
            CertKind::Authority => {
                params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
                params.key_usages = vec![
                    rcgen::KeyUsagePurpose::DigitalSignature,
                    rcgen::KeyUsagePurpose::KeyCertSign,
                    rcgen::KeyUsagePurpose::CrlSign,
                ];
            }
            CertKind::Identity(role) => {
                params.is_ca = rcgen::IsCa::ExplicitNoCa;
                params.key_usages = vec![
                    rcgen::KeyUsagePurpose::DigitalSignature,
                    rcgen::KeyUsagePurpose::KeyEncipherment,
                ];
                params.use_authority_key_identifier_extension = true;
                match role {
                    Role::Server => {
                        params.extended_key_usages =
                            vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
                        params.subject_alt_names = self.subject_alt_names();
                    }
                    Role::Client => {
                        params.extended_key_usages =
                            vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
                    }
                }
            }
        }

        let not_before = Utc::now();
        let not_after = self.not_after();
        params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.timestamp())
            .map_err(|e| Error::CertGen(format!("Invalid timestamp: {}", e)))?;
        params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())
            .map_err(|e| Error::CertGen(format!("Invalid timestamp: {}", e)))?;

        params.alg = self.algorithm.to_rcgen();
        params.key_pair = Some(self.algorithm.key_pair()?);

        if let Some(ref serial) = self.serial {
            params.serial_number = Some(rcgen::SerialNumber::from_slice(serial));
        }

        Ok(params)
    }

    /// Parameters for the PKCS#10 request stored next to an issued
    /// certificate. A request carries only the subject, SANs and public
    /// key; rcgen rejects CSRs with serials, key usages or CA flags.
    pub fn request_params(&self, key_pem: &str) -> Result<CertificateParams> {
        let mut params = CertificateParams::new(vec![]);
        params.distinguished_name = self.subject.to_rcgen();
        params.subject_alt_names = self.subject_alt_names();
        params.alg = self.algorithm.to_rcgen();
        params.key_pair = Some(KeyPair::from_pem(key_pem)?);
        Ok(params)
    }

    fn subject_alt_names(&self) -> Vec<rcgen::SanType> {
        match self.kind {
            CertKind::Identity(Role::Server) => {
                vec![rcgen::SanType::DnsName(self.subject.common_name.clone())]
            }
            _ => Vec::new(),
        }
    }

    pub fn build(&self) -> Result<Certificate> {
        Ok(Certificate::from_params(self.params()?)?)
    }
}
