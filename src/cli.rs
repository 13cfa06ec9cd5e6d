use crate::authority::AuthorityManager;
use crate::deploy::{Deployer, SshRemote};
use crate::error::{Error, Result};
use crate::render::ConfigRenderer;
use crate::signer::{EasyRsaSigner, NativeSigner, Signer};
use crate::store::CertificateStore;
use crate::types::{split_identifiers, CertSigAlgo, IdentityStatus, DEFAULT_SERVER_ID};
use clap::{ArgAction, Args, Parser, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

type Authority = AuthorityManager<Box<dyn Signer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignerKind {
    Native,
    Easyrsa,
}

#[derive(Args, Debug)]
pub struct SignerArgs {
    #[arg(
        long,
        value_enum,
        default_value = "native",
        env = "VPNTOOL_SIGNER",
        help = "Signing backend"
    )]
    pub signer: SignerKind,

    #[arg(
        long,
        env = "VPNTOOL_EASYRSA",
        help = "easy-rsa script (default: <pki>/easyrsa)"
    )]
    pub easyrsa: Option<PathBuf>,

    #[arg(
        long,
        default_value = "ecdsa-p256",
        help = "Key algorithm for the native signer: ed25519, ecdsa-p256, ecdsa-p384"
    )]
    pub algorithm: String,
}

impl SignerArgs {
    pub fn build(&self) -> Result<Box<dyn Signer>> {
        match self.signer {
            SignerKind::Native => {
                let algorithm = self.algorithm.parse::<CertSigAlgo>()?;
                Ok(Box::new(NativeSigner::new(algorithm)))
            }
            SignerKind::Easyrsa => {
                let mut signer = EasyRsaSigner::default();
                if let Some(ref script) = self.easyrsa {
                    signer = signer.with_script(script);
                }
                Ok(Box::new(signer))
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "vpntool")]
#[command(version, about = "Provision and operate an OpenVPN deployment", long_about = None)]
pub struct Cli {
    #[arg(long, default_value = "pki", env = "VPNTOOL_PKI", help = "PKI directory")]
    pub pki: PathBuf,

    #[arg(
        long,
        default_value = ".",
        env = "VPNTOOL_OUT",
        help = "Directory for rendered .conf files"
    )]
    pub out: PathBuf,

    #[arg(long, help = "Initialize the CA, create the server and render its config")]
    pub init: bool,

    #[arg(long, help = "Add client(s) to the VPN (comma separated)")]
    pub clients: Option<String>,

    #[arg(long, help = "Deploy this identity to --url")]
    pub deploy: Option<String>,

    #[arg(
        long,
        help = "VPN server address for new clients, deploy target, or server receiving the CRL"
    )]
    pub url: Option<String>,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Enable client to client communication"
    )]
    pub peer_to_peer: bool,

    #[arg(long, help = "Revoke this identity and push the CRL to --url if given")]
    pub revoke: Option<String>,

    #[arg(long, help = "Push the current CRL to --url")]
    pub push_crl: bool,

    #[arg(long, help = "List identities and their status")]
    pub list: bool,

    #[cfg(feature = "json")]
    #[arg(long, help = "Print --list as JSON")]
    pub json: bool,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// Initialises `env_logger`, defaulting to `info`. `RUST_LOG` overrides.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let authority: Authority =
        AuthorityManager::new(CertificateStore::new(&cli.pki), cli.signer.build()?);
    let renderer = ConfigRenderer::default();
    let deployer = Deployer::new(SshRemote::default());
    let mut acted = false;

    if cli.init {
        acted = true;
        init_vpn(&authority, &renderer, &cli.out, cli.peer_to_peer)?;
    }

    if let Some(ref clients) = cli.clients {
        acted = true;
        let url = require_url(&cli.url, "specify --url to point to your VPN server")?;
        let ids = split_identifiers(clients);
        if ids.is_empty() {
            return Err(Error::InvalidInput(format!("no client in '{}'", clients)));
        }
        for id in ids {
            authority.issue_client(&id)?;
            let path = renderer.render_client_config(authority.store(), &id, url, &cli.out)?;
            println!("{} {}", "Client created:".green().bold(), id);
            println!("  {}: {}", "Config".cyan(), path.display());
        }
    }

    if let Some(ref id) = cli.deploy {
        acted = true;
        let target = require_url(&cli.url, "specify --url to point to your deploy target")?;
        deployer.deploy(authority.store(), &cli.out, id, target)?;
        println!("{} {} -> {}", "Deployed:".green().bold(), id, target);
    }

    if let Some(ref id) = cli.revoke {
        acted = true;
        let target = cli.url.as_deref().unwrap_or("");
        deployer.revoke_and_propagate(&authority, &cli.out, id, target)?;
        println!("{} {}", "Revoked:".green().bold(), id);
        if target.is_empty() {
            println!(
                "  {}",
                "CRL not pushed; run --push-crl --url <server> to exclude it from the VPN"
                    .yellow()
            );
        } else {
            println!("  {}: {}", "CRL installed on".cyan(), target);
        }
    }

    if cli.push_crl {
        acted = true;
        let target = require_url(&cli.url, "specify --url to point to your VPN server")?;
        deployer.push_crl(authority.store(), "*", target)?;
        println!("{} {}", "CRL installed on".green().bold(), target);
    }

    if cli.list {
        acted = true;
        #[cfg(feature = "json")]
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&authority.identities()?)?);
            return Ok(());
        }
        print_identities(&authority)?;
    }

    if !acted {
        return Err(Error::InvalidInput(
            "nothing to do, see --help".to_string(),
        ));
    }
    Ok(())
}

fn init_vpn(
    authority: &Authority,
    renderer: &ConfigRenderer,
    out: &Path,
    peer_to_peer: bool,
) -> Result<()> {
    authority.initialize()?;
    authority.issue_server(DEFAULT_SERVER_ID)?;
    authority.generate_dh_params()?;
    let path = renderer.render_server_config(authority.store(), out, peer_to_peer)?;

    println!("{}", "VPN initialized successfully!".green().bold());
    println!("  {}: {}", "CA".cyan(), authority.store().ca_cert_path().display());
    println!("  {}: {}", "Server".cyan(), DEFAULT_SERVER_ID);
    println!("  {}: {}", "Server config".cyan(), path.display());
    println!(
        "  {}: {}",
        "Peer-to-peer".cyan(),
        if peer_to_peer { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn print_identities(authority: &Authority) -> Result<()> {
    let identities = authority.identities()?;
    if identities.is_empty() {
        println!("{}", "No identities issued".yellow());
        return Ok(());
    }

    let in_crl = authority.crl_serials().unwrap_or_default();
    println!(
        "{:<24} {:<8} {:<10} {:<12} {}",
        "ID".bold(),
        "STATUS".bold(),
        "SERIAL".bold(),
        "EXPIRES".bold(),
        "IN CRL".bold()
    );
    for identity in identities {
        let status = match identity.status {
            IdentityStatus::Active => identity.status.to_string().green(),
            IdentityStatus::Revoked => identity.status.to_string().red(),
        };
        let listed = in_crl.contains(&crate::store::normalize_serial(&identity.serial));
        println!(
            "{:<24} {:<8} {:<10} {:<12} {}",
            identity.id,
            status,
            identity.serial,
            identity.not_after.format("%Y-%m-%d"),
            if listed { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn require_url<'a>(url: &'a Option<String>, message: &str) -> Result<&'a str> {
    match url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => Err(Error::InvalidInput(message.to_string())),
    }
}

#[derive(Parser, Debug)]
#[command(name = "pkitool")]
#[command(version, about = "Manage the VPN certificate authority", long_about = None)]
pub struct PkiToolCli {
    #[arg(long, default_value = "pki", env = "VPNTOOL_PKI", help = "PKI directory to operate in")]
    pub pki: PathBuf,

    #[arg(long, help = "Initialize a new CA in --pki")]
    pub init: bool,

    #[arg(long, help = "Client(s) to create (comma separated)")]
    pub add_client: Option<String>,

    #[arg(long, help = "Server(s) to create (comma separated)")]
    pub add_server: Option<String>,

    #[arg(long, help = "Create Diffie-Hellman parameters")]
    pub create_dh: bool,

    #[arg(long, help = "Client(s)/server(s) to revoke (comma separated)")]
    pub revoke: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

pub fn run_pkitool() -> Result<()> {
    let cli = PkiToolCli::parse();
    let authority: Authority =
        AuthorityManager::new(CertificateStore::new(&cli.pki), cli.signer.build()?);

    if cli.init {
        authority.initialize()?;
        println!("{}", "CA created successfully!".green().bold());
        println!("  {}: {}", "Certificate".cyan(), authority.store().ca_cert_path().display());
    }

    if let Some(ref clients) = cli.add_client {
        for id in split_identifiers(clients) {
            let identity = authority.issue_client(&id)?;
            println!("{} {} ({})", "Client created:".green().bold(), id, identity.serial);
        }
    }

    if let Some(ref servers) = cli.add_server {
        for id in split_identifiers(servers) {
            let identity = authority.issue_server(&id)?;
            println!("{} {} ({})", "Server created:".green().bold(), id, identity.serial);
        }
    }

    if cli.create_dh {
        authority.generate_dh_params()?;
        println!("{}", "DH parameters created".green().bold());
        println!("  {}: {}", "Output".cyan(), authority.store().dh_path().display());
    }

    if let Some(ref entities) = cli.revoke {
        for id in split_identifiers(entities) {
            authority.revoke(&id)?;
            println!("{} {}", "Revoked:".green().bold(), id);
        }
        println!("  {}: {}", "CRL".cyan(), authority.store().crl_path().display());
    }

    Ok(())
}
