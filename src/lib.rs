//! vpntool - provision and operate a small OpenVPN deployment
//!
//! This library manages everything a certificate-based VPN needs:
//!
//! - A certificate authority and the server and client identities it signs
//! - Revocation, with a CRL regenerated from the full revoked set each time
//! - Rendering of inline OpenVPN profiles for every identity
//! - Deployment of profiles and CRLs to remote hosts over ssh
//!
//! The store layout is that of easy-rsa 3, and the signing step is pluggable:
//! [`NativeSigner`] signs in-process, [`EasyRsaSigner`] drives an installed
//! easy-rsa.
//!
//! # Examples
//!
//! ## Setting up a server
//!
//! ```no_run
//! use std::path::Path;
//! use vpntool::{AuthorityManager, CertificateStore, ConfigRenderer, NativeSigner};
//!
//! let authority = AuthorityManager::new(CertificateStore::new("pki"), NativeSigner::default());
//! authority.initialize().unwrap();
//! authority.issue_server("vpnserver").unwrap();
//! authority.generate_dh_params().unwrap();
//!
//! let renderer = ConfigRenderer::default();
//! renderer
//!     .render_server_config(authority.store(), Path::new("out"), true)
//!     .unwrap();
//! ```
//!
//! ## Adding and revoking clients
//!
//! ```no_run
//! use std::path::Path;
//! use vpntool::{AuthorityManager, CertificateStore, ConfigRenderer, Deployer, NativeSigner, SshRemote};
//!
//! let authority = AuthorityManager::new(CertificateStore::new("pki"), NativeSigner::default());
//! let renderer = ConfigRenderer::default();
//!
//! for client in authority.issue_clients("bob,carol").unwrap() {
//!     renderer
//!         .render_client_config(authority.store(), &client.id, "vpn.example.com", Path::new("out"))
//!         .unwrap();
//! }
//!
//! let deployer = Deployer::new(SshRemote::default());
//! deployer
//!     .revoke_and_propagate(&authority, Path::new("out"), "bob", "root@vpn.example.com")
//!     .unwrap();
//! ```

pub mod authority;
pub mod cert;
pub mod deploy;
pub mod error;
pub mod render;
pub mod signer;
pub mod store;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, Result};

pub use authority::AuthorityManager;
pub use cert::CertificateBuilder;
pub use deploy::{Deployer, RemoteLayout, RemoteOps, SshRemote};
pub use render::{ConfigRenderer, ConfigTemplates, NetworkConstants, Template};
pub use signer::{EasyRsaSigner, NativeSigner, Signer};
pub use store::CertificateStore;
pub use types::{
    CertSigAlgo, DistinguishedName, Identity, IdentityStatus, RevocationReason, Role,
    DEFAULT_SERVER_ID,
};
