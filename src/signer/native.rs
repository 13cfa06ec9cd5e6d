use super::Signer;
use crate::cert::CertificateBuilder;
use crate::error::{Error, Result};
use crate::store::{decode_hex, CertificateStore, IndexRow};
use crate::types::{CertSigAlgo, DistinguishedName, IdentityStatus, RevocationReason, Role};
use chrono::Utc;
use rcgen::{Certificate, CertificateParams, KeyPair};

/// RFC 7919 ffdhe2048 group in PKCS#3 form.
const FFDHE2048_PEM: &str = "-----BEGIN DH PARAMETERS-----
MIIBCAKCAQEA//////////+t+FRYortKmq/cViAnPTzx2LnFg84tNpWp4TZBFGQz
+8yTnc4kmz75fS/jY2MMddj2gbICrsRhetPfHtXV/WVhJDP1H18GbtCFY2VVPe0a
87VXE15/V8k1mE8McODmi3fipona8+/och3xWKE2rec1MKzKT0g6eXq8CrGCsyT7
YdEIqUuyyOP7uWrat2DX9GgdT0Kj3jlN9K5W7edjcrsZCwenyO4KbXCeAvzhzffi
7MA0BM0oNC9hkXL+nOmFg/+OTxIy7vKBg8P+OxtMb61zO7X8vC7CIAXFjvGDfRaD
ssbzSibBsu/6iGtCOGEoXJf//////////wIBAg==
-----END DH PARAMETERS-----
";

/// In-process signer backed by rcgen.
#[derive(Debug, Clone)]
pub struct NativeSigner {
    ca_subject: DistinguishedName,
    algorithm: CertSigAlgo,
    ca_validity_days: u32,
    cert_validity_days: u32,
    crl_validity_days: u32,
}

impl Default for NativeSigner {
    fn default() -> Self {
        Self {
            ca_subject: DistinguishedName::new("vpntool CA"),
            algorithm: CertSigAlgo::EcdsaP256,
            ca_validity_days: 3650,
            cert_validity_days: 825,
            crl_validity_days: 180,
        }
    }
}

impl NativeSigner {
    pub fn new(algorithm: CertSigAlgo) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn with_ca_subject(mut self, subject: DistinguishedName) -> Self {
        self.ca_subject = subject;
        self
    }

    pub fn with_cert_validity_days(mut self, days: u32) -> Self {
        self.cert_validity_days = days;
        self
    }

    pub fn with_crl_validity_days(mut self, days: u32) -> Self {
        self.crl_validity_days = days;
        self
    }

    /// Rebuilds the CA signer from `ca.crt` and `private/ca.key`.
    fn load_ca(&self, store: &CertificateStore) -> Result<Certificate> {
        let cert_pem = store.read_ca()?;
        let key_pem = std::fs::read_to_string(store.ca_key_path()).map_err(|_| {
            Error::missing("ca", format!("CA key not found at {}", store.ca_key_path().display()))
        })?;

        let key_pair = KeyPair::from_pem(&key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair)?;
        Ok(Certificate::from_params(params)?)
    }
}

impl Signer for NativeSigner {
    fn init_authority(&self, store: &CertificateStore) -> Result<()> {
        store.create_layout()?;

        let ca = CertificateBuilder::authority(self.ca_subject.clone())
            .with_algorithm(self.algorithm)
            .with_validity_days(self.ca_validity_days)
            .build()?;

        store.write_secret(&store.ca_key_path(), &ca.serialize_private_key_pem())?;
        store.write_file(&store.ca_cert_path(), &ca.serialize_pem()?)?;

        log::info!(
            "created {} CA '{}' in {}",
            self.algorithm.name(),
            self.ca_subject.common_name,
            store.pki_path().display()
        );
        Ok(())
    }

    fn issue(&self, store: &CertificateStore, id: &str, role: Role) -> Result<()> {
        let ca = self.load_ca(store)?;
        let serial = store.next_serial()?;

        let builder = CertificateBuilder::identity(id, role)
            .with_algorithm(self.algorithm)
            .with_validity_days(self.cert_validity_days)
            .with_serial(decode_hex(&serial)?);
        let not_after = builder.not_after();
        let certificate = builder.build()?;

        let cert_pem = certificate.serialize_pem_with_signer(&ca)?;
        let key_pem = certificate.serialize_private_key_pem();
        let req_pem =
            Certificate::from_params(builder.request_params(&key_pem)?)?.serialize_request_pem()?;

        store.write_secret(&store.key_path(id), &key_pem)?;
        store.write_file(&store.req_path(id), &req_pem)?;
        store.write_file(&store.cert_path(id), &cert_pem)?;
        store.append_index(&IndexRow::active(serial.clone(), id, not_after))?;

        log::debug!("signed {} certificate '{}' serial {}", role, id, serial);
        Ok(())
    }

    fn revoke(&self, store: &CertificateStore, id: &str) -> Result<()> {
        let row = store.mark_revoked(id, Utc::now(), RevocationReason::Unspecified)?;
        log::debug!("marked '{}' serial {} revoked", id, row.serial);
        Ok(())
    }

    fn regenerate_crl(&self, store: &CertificateStore) -> Result<()> {
        let ca = self.load_ca(store)?;

        let mut revoked_certs = Vec::new();
        for row in store.index()? {
            if row.status != IdentityStatus::Revoked {
                continue;
            }
            let revoked_at = row.revoked_at.unwrap_or_else(Utc::now);
            let revocation_time = time::OffsetDateTime::from_unix_timestamp(revoked_at.timestamp())
                .map_err(|e| Error::CertGen(format!("Invalid timestamp: {}", e)))?;

            revoked_certs.push(rcgen::RevokedCertParams {
                serial_number: rcgen::SerialNumber::from_slice(&decode_hex(&row.serial)?),
                revocation_time,
                reason_code: row
                    .reason
                    .filter(|r| *r != RevocationReason::Unspecified)
                    .map(|r| r.to_rcgen()),
                invalidity_date: None,
            });
        }

        let crl_number = store.next_crl_number()?;
        let now = time::OffsetDateTime::now_utc();
        let params = rcgen::CertificateRevocationListParams {
            this_update: now,
            next_update: now + time::Duration::days(self.crl_validity_days as i64),
            crl_number: rcgen::SerialNumber::from_slice(&decode_hex(&crl_number)?),
            issuing_distribution_point: None,
            revoked_certs,
            alg: ca.get_params().alg,
            key_identifier_method: rcgen::KeyIdMethod::Sha256,
        };

        let count = params.revoked_certs.len();
        let crl = rcgen::CertificateRevocationList::from_params(params)?;
        store.write_file(&store.crl_path(), &crl.serialize_pem_with_signer(&ca)?)?;

        log::info!("wrote CRL #{} with {} revoked certificate(s)", crl_number, count);
        Ok(())
    }

    fn generate_dh_params(&self, store: &CertificateStore) -> Result<()> {
        std::fs::create_dir_all(store.pki_path())?;
        store.write_file(&store.dh_path(), FFDHE2048_PEM)?;
        log::info!("wrote ffdhe2048 DH parameters to {}", store.dh_path().display());
        Ok(())
    }
}
