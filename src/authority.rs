//! Certificate lifecycle: `nonexistent -> active -> revoked`.
//!
//! Every identifier is consumed on first issuance. Revoked identities keep
//! their row in the CA database and can never be re-issued.

use crate::error::{Error, Result};
use crate::signer::Signer;
use crate::store::{normalize_serial, CertificateStore};
use crate::types::{split_identifiers, validate_identifier, Identity, IdentityStatus, Role};
use std::collections::BTreeSet;

pub struct AuthorityManager<S> {
    store: CertificateStore,
    signer: S,
}

impl<S: Signer> AuthorityManager<S> {
    pub fn new(store: CertificateStore, signer: S) -> Self {
        Self { store, signer }
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Creates the CA and an initial empty CRL.
    pub fn initialize(&self) -> Result<()> {
        if self.store.ca_exists() {
            return Err(Error::AlreadyInitialized(self.store.root().to_path_buf()));
        }

        self.signer.init_authority(&self.store)?;
        self.signer.regenerate_crl(&self.store)?;

        log::info!("initialized authority in {}", self.store.root().display());
        Ok(())
    }

    pub fn issue_server(&self, id: &str) -> Result<Identity> {
        self.issue(id, Role::Server)
    }

    pub fn issue_client(&self, id: &str) -> Result<Identity> {
        self.issue(id, Role::Client)
    }

    /// Issues every client of a comma separated list, stopping at the first
    /// failure. Identities issued before the failure stay issued.
    pub fn issue_clients(&self, list: &str) -> Result<Vec<Identity>> {
        let ids = split_identifiers(list);
        if ids.is_empty() {
            return Err(Error::InvalidInput(format!("no client in '{}'", list)));
        }

        ids.iter().map(|id| self.issue_client(id)).collect()
    }

    pub fn issue(&self, id: &str, role: Role) -> Result<Identity> {
        validate_identifier(id)?;
        self.require_authority()?;

        if self.store.identity(id)?.is_some() || self.store.has_material(id) {
            return Err(Error::DuplicateIdentity(id.to_string()));
        }

        self.signer.issue(&self.store, id, role)?;

        let identity = self
            .store
            .identity(id)?
            .ok_or_else(|| Error::missing(id, "signer did not record the identity"))?;
        log::info!("issued {} '{}' (serial {})", role, id, identity.serial);
        Ok(identity)
    }

    /// Overwrites any previous parameters. Ordering relative to server
    /// issuance is not enforced.
    pub fn generate_dh_params(&self) -> Result<()> {
        self.signer.generate_dh_params(&self.store)
    }

    /// Revokes `id`, regenerates the CRL from the full revoked set and
    /// deletes the identity's key, certificate and request. A revocation
    /// that failed after the database was updated is finished by calling
    /// this again.
    pub fn revoke(&self, id: &str) -> Result<Identity> {
        validate_identifier(id)?;
        self.require_authority()?;

        let identity = self
            .store
            .identity(id)?
            .ok_or_else(|| Error::UnknownIdentity(id.to_string()))?;
        if identity.status == IdentityStatus::Revoked {
            if self.revocation_complete(&identity)? {
                return Err(Error::AlreadyRevoked(id.to_string()));
            }
            log::warn!("finishing interrupted revocation of '{}'", id);
        } else {
            self.signer.revoke(&self.store, id)?;
        }

        self.signer.regenerate_crl(&self.store)?;
        self.verify_crl()?;
        self.store.remove_material(id, Some(&identity.serial))?;

        let revoked = self
            .store
            .identity(id)?
            .ok_or_else(|| Error::UnknownIdentity(id.to_string()))?;
        log::info!("revoked '{}' (serial {})", id, revoked.serial);
        Ok(revoked)
    }

    pub fn status(&self, id: &str) -> Result<Option<IdentityStatus>> {
        self.store.status(id)
    }

    pub fn identities(&self) -> Result<Vec<Identity>> {
        self.store.identities()
    }

    /// Serials listed in `pki/crl.pem`, normalized.
    pub fn crl_serials(&self) -> Result<BTreeSet<String>> {
        let pem_text = self.store.read_crl()?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem_text.as_bytes())
            .map_err(|e| Error::CrlParse(e.to_string()))?;
        if pem.label != "X509 CRL" {
            return Err(Error::CrlParse(format!(
                "expected an X509 CRL block, found {}",
                pem.label
            )));
        }
        let (_, crl) = x509_parser::parse_x509_crl(&pem.contents)?;

        Ok(crl
            .iter_revoked_certificates()
            .map(|revoked| normalize_serial(&hex_string(revoked.raw_serial())))
            .collect())
    }

    /// Checks that the CRL lists every revoked identity and no active one.
    pub fn verify_crl(&self) -> Result<()> {
        let listed = self.crl_serials()?;

        for identity in self.store.identities()? {
            let serial = normalize_serial(&identity.serial);
            match identity.status {
                IdentityStatus::Revoked if !listed.contains(&serial) => {
                    return Err(Error::CrlMismatch(format!(
                        "revoked '{}' (serial {}) missing from CRL",
                        identity.id, identity.serial
                    )))
                }
                IdentityStatus::Active if listed.contains(&serial) => {
                    return Err(Error::CrlMismatch(format!(
                        "active '{}' (serial {}) listed in CRL",
                        identity.id, identity.serial
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Listed in the CRL with no material left behind.
    fn revocation_complete(&self, identity: &Identity) -> Result<bool> {
        if self.store.has_material(&identity.id) {
            return Ok(false);
        }
        match self.crl_serials() {
            Ok(listed) => Ok(listed.contains(&normalize_serial(&identity.serial))),
            Err(Error::MissingMaterial { .. }) | Err(Error::CrlParse(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn require_authority(&self) -> Result<()> {
        if self.store.ca_exists() {
            Ok(())
        } else {
            Err(Error::UnknownAuthority(self.store.root().to_path_buf()))
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
