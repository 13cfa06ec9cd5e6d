//! Signing backends.
//!
//! A [`Signer`] performs the cryptographic half of every authority
//! operation and keeps the CA database in the store current. The
//! [`AuthorityManager`](crate::authority::AuthorityManager) decides whether an
//! operation is allowed; the signer only carries it out.

mod easyrsa;
mod native;

pub use easyrsa::EasyRsaSigner;
pub use native::NativeSigner;

use crate::error::Result;
use crate::store::CertificateStore;
use crate::types::Role;

pub trait Signer {
    /// Creates CA key and certificate plus the bookkeeping files.
    fn init_authority(&self, store: &CertificateStore) -> Result<()>;

    /// Creates key, request and CA-signed certificate for `id`, and records
    /// it as valid in the CA database.
    fn issue(&self, store: &CertificateStore, id: &str, role: Role) -> Result<()>;

    /// Marks `id` revoked in the CA database. Does not touch the CRL.
    fn revoke(&self, store: &CertificateStore, id: &str) -> Result<()>;

    /// Rewrites `pki/crl.pem` from every revoked row of the CA database.
    fn regenerate_crl(&self, store: &CertificateStore) -> Result<()>;

    fn generate_dh_params(&self, store: &CertificateStore) -> Result<()>;
}

impl<S: Signer + ?Sized> Signer for Box<S> {
    fn init_authority(&self, store: &CertificateStore) -> Result<()> {
        (**self).init_authority(store)
    }

    fn issue(&self, store: &CertificateStore, id: &str, role: Role) -> Result<()> {
        (**self).issue(store, id, role)
    }

    fn revoke(&self, store: &CertificateStore, id: &str) -> Result<()> {
        (**self).revoke(store, id)
    }

    fn regenerate_crl(&self, store: &CertificateStore) -> Result<()> {
        (**self).regenerate_crl(store)
    }

    fn generate_dh_params(&self, store: &CertificateStore) -> Result<()> {
        (**self).generate_dh_params(store)
    }
}
