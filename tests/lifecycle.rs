use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vpntool::render::inline_block;
use vpntool::store::normalize_serial;
use vpntool::{
    AuthorityManager, CertificateStore, ConfigRenderer, Deployer, Error, IdentityStatus,
    NativeSigner, RemoteOps, Signer,
};
use x509_parser::extensions::{ParsedExtension, X509Extension};

/// Records every call and keeps copied files in memory. Failures can be
/// scheduled for the next N copies or commands.
#[derive(Default)]
struct FakeRemote {
    calls: RefCell<Vec<String>>,
    files: RefCell<HashMap<String, String>>,
    failing_copies: Cell<usize>,
    failing_runs: Cell<usize>,
}

impl FakeRemote {
    fn fail_next_copies(&self, n: usize) {
        self.failing_copies.set(n);
    }

    fn fail_next_runs(&self, n: usize) {
        self.failing_runs.set(n);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn file(&self, host: &str, path: &str) -> Option<String> {
        self.files.borrow().get(&format!("{}:{}", host, path)).cloned()
    }
}

fn take_failure(counter: &Cell<usize>) -> bool {
    let left = counter.get();
    if left > 0 {
        counter.set(left - 1);
        true
    } else {
        false
    }
}

impl RemoteOps for FakeRemote {
    fn copy_file(&self, local: &Path, host: &str, remote_path: &str) -> vpntool::Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("copy {} {}", host, remote_path));
        if take_failure(&self.failing_copies) {
            return Err(Error::Remote {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let contents = fs::read_to_string(local)?;
        self.files
            .borrow_mut()
            .insert(format!("{}:{}", host, remote_path), contents);
        Ok(())
    }

    fn run_remote(&self, host: &str, command: &str) -> vpntool::Result<()> {
        self.calls.borrow_mut().push(format!("run {} {}", host, command));
        if take_failure(&self.failing_runs) {
            return Err(Error::Remote {
                host: host.to_string(),
                reason: "sudo: a password is required".to_string(),
            });
        }
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    authority: AuthorityManager<NativeSigner>,
    renderer: ConfigRenderer,
    out: std::path::PathBuf,
}

/// An initialized authority with `vpnserver` issued and DH parameters.
fn provisioned() -> Fixture {
    let dir = TempDir::new().unwrap();
    let authority = AuthorityManager::new(
        CertificateStore::new(dir.path().join("pki")),
        NativeSigner::default(),
    );
    authority.initialize().unwrap();
    authority.issue_server("vpnserver").unwrap();
    authority.generate_dh_params().unwrap();

    let out = dir.path().join("out");
    Fixture {
        _dir: dir,
        authority,
        renderer: ConfigRenderer::default(),
        out,
    }
}

#[test]
fn test_client_profile_embeds_issued_material() {
    let fx = provisioned();
    fx.authority.issue_client("alice").unwrap();

    let path = fx
        .renderer
        .render_client_config(fx.authority.store(), "alice", "vpn.example.com", &fx.out)
        .unwrap();
    assert_eq!(path, fx.out.join("alice.conf"));

    let profile = fs::read_to_string(&path).unwrap();
    let store = fx.authority.store();
    assert!(profile.contains("remote vpn.example.com 1194\n"));
    assert_eq!(
        inline_block(&profile, "cert").unwrap().trim_end(),
        store.read_cert("alice").unwrap().trim_end()
    );
    assert_eq!(
        inline_block(&profile, "key").unwrap().trim_end(),
        store.read_key("alice").unwrap().trim_end()
    );
    assert_eq!(
        inline_block(&profile, "ca").unwrap().trim_end(),
        store.read_ca().unwrap().trim_end()
    );
    assert!(inline_block(&profile, "dh").is_none());
}

#[test]
fn test_peer_to_peer_only_toggles_relay_line() {
    let fx = provisioned();
    let store = fx.authority.store();

    let on = fx
        .renderer
        .render_server_config(store, &fx.out.join("on"), true)
        .unwrap();
    let off = fx
        .renderer
        .render_server_config(store, &fx.out.join("off"), false)
        .unwrap();
    assert_eq!(on.file_name().unwrap(), "vpnserver.conf");

    let on = fs::read_to_string(on).unwrap();
    let off = fs::read_to_string(off).unwrap();
    let on_lines: Vec<&str> = on.lines().collect();
    let off_lines: Vec<&str> = off.lines().collect();

    let without_relay: Vec<&str> = on_lines
        .iter()
        .copied()
        .filter(|line| *line != "client-to-client")
        .collect();
    assert_eq!(on_lines.len(), off_lines.len() + 1);
    assert_eq!(without_relay, off_lines);
    assert!(on.contains("crl-verify /etc/openvpn/crl.pem"));
    assert!(inline_block(&on, "dh").is_some());
}

#[test]
fn test_revoked_identity_is_unrenderable() {
    let fx = provisioned();
    let issued = fx.authority.issue_client("alice").unwrap();
    fx.renderer
        .render_client_config(fx.authority.store(), "alice", "vpn.example.com", &fx.out)
        .unwrap();

    let revoked = fx.authority.revoke("alice").unwrap();
    assert_eq!(revoked.status, IdentityStatus::Revoked);
    assert_eq!(revoked.serial, issued.serial);
    assert!(revoked.revoked_at.is_some());

    let store = fx.authority.store();
    assert!(!store.cert_path("alice").exists());
    assert!(!store.key_path("alice").exists());
    assert!(!store.req_path("alice").exists());
    assert!(fx
        .authority
        .crl_serials()
        .unwrap()
        .contains(&normalize_serial(&issued.serial)));

    let err = fx
        .renderer
        .render_client_config(store, "alice", "vpn.example.com", &fx.out)
        .unwrap_err();
    assert!(matches!(err, Error::MissingMaterial { ref id, .. } if id == "alice"));
}

#[test]
fn test_server_profile_requires_dh_and_active_server() {
    let dir = TempDir::new().unwrap();
    let authority = AuthorityManager::new(
        CertificateStore::new(dir.path().join("pki")),
        NativeSigner::default(),
    );
    let renderer = ConfigRenderer::default();
    let out = dir.path().join("out");

    authority.initialize().unwrap();
    authority.issue_server("vpnserver").unwrap();
    let err = renderer
        .render_server_config(authority.store(), &out, true)
        .unwrap_err();
    assert!(matches!(err, Error::MissingMaterial { .. }));
    assert!(!out.join("vpnserver.conf").exists());

    authority.generate_dh_params().unwrap();
    renderer
        .render_server_config(authority.store(), &out, true)
        .unwrap();

    authority.revoke("vpnserver").unwrap();
    let err = renderer
        .render_server_config(authority.store(), &out, true)
        .unwrap_err();
    assert!(matches!(err, Error::MissingMaterial { ref id, .. } if id == "vpnserver"));
}

fn key_identifier(extensions: &[X509Extension], authority: bool) -> Option<Vec<u8>> {
    extensions.iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::AuthorityKeyIdentifier(aki) if authority => {
            aki.key_identifier.as_ref().map(|k| k.0.to_vec())
        }
        ParsedExtension::SubjectKeyIdentifier(ski) if !authority => Some(ski.0.to_vec()),
        _ => None,
    })
}

#[test]
fn test_issued_material_chains_to_ca() {
    let fx = provisioned();
    fx.authority.issue_client("alice").unwrap();
    fx.authority.issue_client("bob").unwrap();
    fx.authority.revoke("bob").unwrap();
    let store = fx.authority.store();

    let ca_text = store.read_ca().unwrap();
    let (_, ca_pem) = x509_parser::pem::parse_x509_pem(ca_text.as_bytes()).unwrap();
    let ca = ca_pem.parse_x509().unwrap();
    let ca_key_id = key_identifier(ca.extensions(), false).unwrap();

    let mut cert_key_id = None;
    for id in ["vpnserver", "alice"] {
        let text = store.read_cert(id).unwrap();
        let (_, pem) = x509_parser::pem::parse_x509_pem(text.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();

        assert_eq!(cert.issuer().as_raw(), ca.subject().as_raw());
        cert.verify_signature(Some(ca.public_key())).unwrap();
        let aki = key_identifier(cert.extensions(), true).unwrap();
        assert_eq!(aki, ca_key_id);
        cert_key_id = Some(aki);
    }

    let crl_text = store.read_crl().unwrap();
    let (_, crl_pem) = x509_parser::pem::parse_x509_pem(crl_text.as_bytes()).unwrap();
    let (_, crl) = x509_parser::parse_x509_crl(&crl_pem.contents).unwrap();
    assert_eq!(crl.issuer().as_raw(), ca.subject().as_raw());
    assert_eq!(key_identifier(crl.extensions(), true), cert_key_id);
    assert_eq!(crl.iter_revoked_certificates().count(), 1);
}

#[test]
fn test_revoking_one_of_a_batch_keeps_the_rest() {
    let fx = provisioned();
    let issued = fx.authority.issue_clients("bob, carol").unwrap();
    assert_eq!(issued.len(), 2);
    assert_ne!(issued[0].serial, issued[1].serial);

    fx.authority.revoke("bob").unwrap();
    let crl = fx.authority.store().read_crl().unwrap();

    fx.renderer
        .render_client_config(fx.authority.store(), "carol", "10.0.0.1", &fx.out)
        .unwrap();
    assert_eq!(
        fx.authority.status("carol").unwrap(),
        Some(IdentityStatus::Active)
    );

    let serials = fx.authority.crl_serials().unwrap();
    assert!(serials.contains(&normalize_serial(&issued[0].serial)));
    assert!(!serials.contains(&normalize_serial(&issued[1].serial)));

    assert!(matches!(
        fx.authority.revoke("bob"),
        Err(Error::AlreadyRevoked(_))
    ));
    assert_eq!(fx.authority.store().read_crl().unwrap(), crl);
}

#[test]
fn test_crl_accumulates_revocations() {
    let fx = provisioned();
    let first = fx.authority.issue_client("dave").unwrap();
    let second = fx.authority.issue_client("erin").unwrap();

    fx.authority.revoke("dave").unwrap();
    fx.authority.revoke("erin").unwrap();

    let serials = fx.authority.crl_serials().unwrap();
    assert_eq!(serials.len(), 2);
    assert!(serials.contains(&normalize_serial(&first.serial)));
    assert!(serials.contains(&normalize_serial(&second.serial)));
    fx.authority.verify_crl().unwrap();
}

#[test]
fn test_deploy_is_retryable_after_remote_failure() {
    let fx = provisioned();
    let store = fx.authority.store();
    fx.renderer.render_server_config(store, &fx.out, true).unwrap();

    let remote = FakeRemote::default();
    let deployer = Deployer::new(&remote);

    remote.fail_next_runs(1);
    let err = deployer
        .deploy(store, &fx.out, "vpnserver", "root@vpn.example.com")
        .unwrap_err();
    assert!(matches!(err, Error::RemoteSetupFailed { ref id, .. } if id == "vpnserver"));
    let first_attempt = remote.calls();

    deployer
        .deploy(store, &fx.out, "vpnserver", "root@vpn.example.com")
        .unwrap();
    let calls = remote.calls();
    assert_eq!(calls.len(), first_attempt.len() * 2);
    assert_eq!(calls[..first_attempt.len()], calls[first_attempt.len()..]);

    assert_eq!(
        calls[0],
        "copy root@vpn.example.com /tmp/vpnserver.conf".to_string()
    );
    assert_eq!(
        calls[1],
        "copy root@vpn.example.com /tmp/vpnserver-crl.pem".to_string()
    );
    assert!(calls[2].contains("sudo systemctl restart 'openvpn@vpnserver'"));

    let staged = remote
        .file("root@vpn.example.com", "/tmp/vpnserver.conf")
        .unwrap();
    assert_eq!(staged, fs::read_to_string(fx.out.join("vpnserver.conf")).unwrap());
    assert_eq!(
        remote
            .file("root@vpn.example.com", "/tmp/vpnserver-crl.pem")
            .unwrap(),
        store.read_crl().unwrap()
    );
}

#[test]
fn test_transfer_failure_skips_remote_setup() {
    let fx = provisioned();
    fx.authority.issue_client("alice").unwrap();
    fx.renderer
        .render_client_config(fx.authority.store(), "alice", "vpn.example.com", &fx.out)
        .unwrap();

    let remote = FakeRemote::default();
    remote.fail_next_copies(1);
    let err = Deployer::new(&remote)
        .deploy(fx.authority.store(), &fx.out, "alice", "pi@10.0.0.7")
        .unwrap_err();

    assert!(matches!(err, Error::TransferFailed { ref target, .. } if target == "pi@10.0.0.7"));
    assert!(remote.calls().iter().all(|call| !call.starts_with("run")));
}

#[test]
fn test_deploy_without_profile_touches_nothing() {
    let fx = provisioned();
    let remote = FakeRemote::default();

    let err = Deployer::new(&remote)
        .deploy(fx.authority.store(), &fx.out, "vpnserver", "root@vpn")
        .unwrap_err();
    assert!(matches!(err, Error::MissingMaterial { .. }));
    assert!(remote.calls().is_empty());

    let err = Deployer::new(&remote)
        .deploy(fx.authority.store(), &fx.out, "vpnserver", "")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_failed_crl_push_keeps_revocation() {
    let fx = provisioned();
    fx.authority.issue_client("mallory").unwrap();
    fx.renderer
        .render_client_config(fx.authority.store(), "mallory", "vpn.example.com", &fx.out)
        .unwrap();

    let remote = FakeRemote::default();
    let deployer = Deployer::new(&remote);
    remote.fail_next_copies(1);

    let err = deployer
        .revoke_and_propagate(&fx.authority, &fx.out, "mallory", "root@vpn")
        .unwrap_err();
    assert!(matches!(err, Error::CrlPropagationFailed { ref id, .. } if id == "mallory"));
    assert_eq!(
        fx.authority.status("mallory").unwrap(),
        Some(IdentityStatus::Revoked)
    );
    assert!(!fx.out.join("mallory.conf").exists());

    deployer
        .push_crl(fx.authority.store(), "mallory", "root@vpn")
        .unwrap();
    assert_eq!(
        remote.file("root@vpn", "/tmp/crl.pem").unwrap(),
        fx.authority.store().read_crl().unwrap()
    );
    let last = remote.calls().pop().unwrap();
    assert_eq!(
        last,
        "run root@vpn sudo mv /tmp/crl.pem /etc/openvpn/crl.pem && sudo chmod 644 /etc/openvpn/crl.pem"
    );
}

#[test]
fn test_revoke_without_server_skips_push() {
    let fx = provisioned();
    fx.authority.issue_client("trent").unwrap();

    let remote = FakeRemote::default();
    Deployer::new(&remote)
        .revoke_and_propagate(&fx.authority, &fx.out, "trent", "")
        .unwrap();

    assert!(remote.calls().is_empty());
    assert_eq!(
        fx.authority.status("trent").unwrap(),
        Some(IdentityStatus::Revoked)
    );
}

#[test]
fn test_boxed_signer_drives_authority() {
    let dir = TempDir::new().unwrap();
    let signer: Box<dyn Signer> = Box::new(NativeSigner::default());
    let authority = AuthorityManager::new(CertificateStore::new(dir.path()), signer);

    authority.initialize().unwrap();
    let identity = authority.issue_client("alice").unwrap();
    assert!(identity.is_active());
    assert_eq!(authority.identities().unwrap().len(), 1);
}
