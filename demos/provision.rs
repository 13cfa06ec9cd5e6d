use std::path::Path;
use vpntool::types::{CertSigAlgo, DistinguishedName};
use vpntool::{AuthorityManager, CertificateStore, ConfigRenderer, NativeSigner};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Creating a CA in ./demo-pki ...");

    let signer = NativeSigner::new(CertSigAlgo::EcdsaP256).with_ca_subject(
        DistinguishedName::new("Example VPN CA")
            .with_organization("Example Organization")
            .with_country("US"),
    );
    let authority = AuthorityManager::new(CertificateStore::new("demo-pki"), signer);
    authority.initialize()?;

    println!("\nIssuing the server identity...");
    authority.issue_server("vpnserver")?;
    authority.generate_dh_params()?;

    let out = Path::new("demo-out");
    let renderer = ConfigRenderer::default();
    let server = renderer.render_server_config(authority.store(), out, true)?;
    println!("Server profile: {}", server.display());

    println!("\nIssuing clients...");
    for client in authority.issue_clients("alice,bob")? {
        let path =
            renderer.render_client_config(authority.store(), &client.id, "vpn.example.com", out)?;
        println!("  {} (serial {}) -> {}", client.id, client.serial, path.display());
    }

    println!("\nRevoking bob...");
    authority.revoke("bob")?;
    std::fs::remove_file(out.join("bob.conf"))?;
    println!("CRL now lists: {:?}", authority.crl_serials()?);

    println!("\nIdentities:");
    for identity in authority.identities()? {
        println!("  {:<10} {:<8} {}", identity.id, identity.status, identity.serial);
    }

    Ok(())
}
