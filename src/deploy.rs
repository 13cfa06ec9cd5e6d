//! Pushing profiles and CRLs to remote hosts.
//!
//! Every operation is a transfer step followed by a remote command step; the
//! command only runs after all transfers succeeded. Both steps overwrite
//! whatever is already there, so a failed operation can simply be re-run.

use crate::authority::AuthorityManager;
use crate::error::{Error, Result};
use crate::signer::Signer;
use crate::store::CertificateStore;
use crate::types::validate_identifier;
use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// File copy and command execution on a named remote host.
pub trait RemoteOps {
    fn copy_file(&self, local: &Path, host: &str, remote_path: &str) -> Result<()>;

    /// Runs `command` through the remote login shell.
    fn run_remote(&self, host: &str, command: &str) -> Result<()>;
}

impl<R: RemoteOps + ?Sized> RemoteOps for &R {
    fn copy_file(&self, local: &Path, host: &str, remote_path: &str) -> Result<()> {
        (**self).copy_file(local, host, remote_path)
    }

    fn run_remote(&self, host: &str, command: &str) -> Result<()> {
        (**self).run_remote(host, command)
    }
}

/// Quotes one word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(word)).into_owned()
}

/// [`RemoteOps`] over the system `scp` and `ssh` clients. Stdio is inherited
/// so password and sudo prompts reach the operator.
#[derive(Debug, Clone)]
pub struct SshRemote {
    ssh: String,
    scp: String,
    options: Vec<String>,
    tty: bool,
}

impl Default for SshRemote {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            options: Vec::new(),
            tty: true,
        }
    }
}

impl SshRemote {
    /// Extra `-o` style options passed to both clients, e.g. `-oBatchMode=yes`.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Disables `ssh -t`, for unattended runs.
    pub fn without_tty(mut self) -> Self {
        self.tty = false;
        self
    }

    /// scp shell-parses the remote path in legacy mode and takes it
    /// literally over SFTP, so only paths that read the same both ways are
    /// accepted.
    fn scp_command(&self, local: &Path, host: &str, remote_path: &str) -> Result<Command> {
        if remote_path.is_empty() || shell_quote(remote_path) != remote_path {
            return Err(Error::InvalidInput(format!(
                "remote path '{}' must not need shell quoting",
                remote_path
            )));
        }
        let mut cmd = Command::new(&self.scp);
        cmd.args(&self.options)
            .arg("--")
            .arg(local)
            .arg(format!("{}:{}", host, remote_path));
        Ok(cmd)
    }

    fn ssh_command(&self, host: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        if self.tty {
            cmd.arg("-t");
        }
        cmd.args(&self.options).arg("--").arg(host).arg(command);
        cmd
    }
}

fn run_local(mut cmd: Command, host: &str) -> Result<()> {
    log::debug!("running {:?}", cmd);
    let status = cmd.status().map_err(|e| Error::Remote {
        host: host.to_string(),
        reason: format!("could not start {:?}: {}", cmd.get_program(), e),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Remote {
            host: host.to_string(),
            reason: match status.code() {
                Some(code) => format!("{:?} exited with status {}", cmd.get_program(), code),
                None => format!("{:?} terminated by signal", cmd.get_program()),
            },
        })
    }
}

impl RemoteOps for SshRemote {
    fn copy_file(&self, local: &Path, host: &str, remote_path: &str) -> Result<()> {
        run_local(self.scp_command(local, host, remote_path)?, host)
    }

    fn run_remote(&self, host: &str, command: &str) -> Result<()> {
        run_local(self.ssh_command(host, command), host)
    }
}

/// Where things go on the VPN host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub staging_dir: String,
    pub config_dir: String,
    pub package: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            staging_dir: "/tmp".to_string(),
            config_dir: "/etc/openvpn".to_string(),
            package: "openvpn".to_string(),
        }
    }
}

impl RemoteLayout {
    pub fn staged_config(&self, id: &str) -> String {
        format!("{}/{}.conf", self.staging_dir, id)
    }

    pub fn staged_crl(&self, id: &str) -> String {
        format!("{}/{}-crl.pem", self.staging_dir, id)
    }

    pub fn live_config(&self, id: &str) -> String {
        format!("{}/{}.conf", self.config_dir, id)
    }

    pub fn live_crl(&self) -> String {
        format!("{}/crl.pem", self.config_dir)
    }

    /// Installs the daemon if needed, moves the staged files into place and
    /// (re)starts `openvpn@<id>`. Every step is a no-op on a correct host.
    pub fn install_script(&self, id: &str) -> String {
        let package = shell_quote(&self.package);
        let unit = shell_quote(&format!("{}@{}", self.package, id));
        [
            format!(
                "if ! dpkg-query -W {} >/dev/null 2>&1; then sudo apt-get -y install {}; fi",
                package, package
            ),
            format!(
                "sudo mv {} {}",
                shell_quote(&self.staged_config(id)),
                shell_quote(&self.live_config(id))
            ),
            self.crl_script(&self.staged_crl(id)),
            format!("sudo systemctl enable {}", unit),
            format!("sudo systemctl restart {}", unit),
        ]
        .join(" && ")
    }

    /// Moves a staged CRL over the live one. OpenVPN re-reads `crl-verify`
    /// on every handshake, so no restart is needed.
    pub fn crl_script(&self, staged: &str) -> String {
        let live = shell_quote(&self.live_crl());
        format!(
            "sudo mv {} {} && sudo chmod 644 {}",
            shell_quote(staged),
            live,
            live
        )
    }
}

pub struct Deployer<R> {
    remote: R,
    layout: RemoteLayout,
}

impl<R: RemoteOps> Deployer<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            layout: RemoteLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: RemoteLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Installs `<output_dir>/<id>.conf` and the current CRL on `target` and
    /// enables the `openvpn@<id>` unit.
    pub fn deploy(
        &self,
        store: &CertificateStore,
        output_dir: &Path,
        id: &str,
        target: &str,
    ) -> Result<()> {
        validate_identifier(id)?;
        require_target(target)?;

        let config = profile_path(output_dir, id);
        if !config.is_file() {
            return Err(Error::missing(
                id,
                format!("rendered profile not found at {}", config.display()),
            ));
        }
        let crl = store.crl_path();
        if !crl.is_file() {
            return Err(Error::missing(
                id,
                format!("CRL not found at {}", crl.display()),
            ));
        }

        let transfer_failed = |e: Error| Error::TransferFailed {
            id: id.to_string(),
            target: target.to_string(),
            reason: e.to_string(),
        };
        self.remote
            .copy_file(&config, target, &self.layout.staged_config(id))
            .map_err(transfer_failed)?;
        self.remote
            .copy_file(&crl, target, &self.layout.staged_crl(id))
            .map_err(transfer_failed)?;
        log::debug!("staged {} and CRL on {}", config.display(), target);

        self.remote
            .run_remote(target, &self.layout.install_script(id))
            .map_err(|e| Error::RemoteSetupFailed {
                id: id.to_string(),
                target: target.to_string(),
                reason: e.to_string(),
            })?;

        log::info!("deployed '{}' to {}", id, target);
        Ok(())
    }

    /// Pushes the current CRL to `target` and installs it as the live CRL.
    /// `id` names the revocation being propagated, for error reporting.
    pub fn push_crl(&self, store: &CertificateStore, id: &str, target: &str) -> Result<()> {
        require_target(target)?;

        let propagation_failed = |reason: String| Error::CrlPropagationFailed {
            id: id.to_string(),
            target: target.to_string(),
            reason,
        };

        let crl = store.crl_path();
        if !crl.is_file() {
            return Err(propagation_failed(format!(
                "CRL not found at {}",
                crl.display()
            )));
        }

        let staged = format!("{}/crl.pem", self.layout.staging_dir);
        self.remote
            .copy_file(&crl, target, &staged)
            .map_err(|e| propagation_failed(e.to_string()))?;
        self.remote
            .run_remote(target, &self.layout.crl_script(&staged))
            .map_err(|e| propagation_failed(e.to_string()))?;

        log::info!("installed CRL on {}", target);
        Ok(())
    }

    /// Revokes `id`, drops its local profile and, when `server_target` is
    /// not empty, pushes the new CRL there. A failed push leaves the
    /// revocation in place and reports `CrlPropagationFailed`.
    pub fn revoke_and_propagate<S: Signer>(
        &self,
        authority: &AuthorityManager<S>,
        output_dir: &Path,
        id: &str,
        server_target: &str,
    ) -> Result<()> {
        authority.revoke(id)?;

        let profile = profile_path(output_dir, id);
        match fs::remove_file(&profile) {
            Ok(()) => log::debug!("removed {}", profile.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("could not remove {}: {}", profile.display(), e),
        }

        if server_target.trim().is_empty() {
            log::warn!("no server given, CRL for '{}' was not propagated", id);
            return Ok(());
        }
        self.push_crl(authority.store(), id, server_target)
    }
}

fn profile_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{}.conf", id))
}

fn require_target(target: &str) -> Result<()> {
    if target.trim().is_empty() {
        return Err(Error::InvalidInput("deploy target must not be empty".to_string()));
    }
    if target.starts_with('-') || target.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(format!("invalid target '{}'", target)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("alice"), "alice");
        assert_eq!(shell_quote("/tmp/a b.conf"), "'/tmp/a b.conf'");
        assert_eq!(shell_quote("x'; rm -rf /"), "'x'\\''; rm -rf /'");
    }

    #[test]
    fn test_install_script_order() {
        let script = RemoteLayout::default().install_script("vpnserver");
        let steps: Vec<&str> = script.split(" && ").collect();

        assert!(steps[0].starts_with("if ! dpkg-query -W openvpn"));
        assert_eq!(steps[1], "sudo mv /tmp/vpnserver.conf /etc/openvpn/vpnserver.conf");
        assert_eq!(steps[2], "sudo mv /tmp/vpnserver-crl.pem /etc/openvpn/crl.pem");
        assert_eq!(steps[3], "sudo chmod 644 /etc/openvpn/crl.pem");
        assert_eq!(steps[4], "sudo systemctl enable 'openvpn@vpnserver'");
        assert_eq!(steps[5], "sudo systemctl restart 'openvpn@vpnserver'");
    }

    #[test]
    fn test_layout_paths_are_quoted() {
        let layout = RemoteLayout {
            staging_dir: "/var/tmp/vpn stage".to_string(),
            ..RemoteLayout::default()
        };
        assert!(layout
            .crl_script("/var/tmp/vpn stage/crl.pem")
            .starts_with("sudo mv '/var/tmp/vpn stage/crl.pem' /etc/openvpn/crl.pem"));
    }

    #[test]
    fn test_ssh_commands_use_argv() {
        let remote = SshRemote::default().with_option("-oBatchMode=yes");

        let ssh = remote.ssh_command("root@vpn", "echo ok");
        let args: Vec<_> = ssh.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-t", "-oBatchMode=yes", "--", "root@vpn", "echo ok"]);

        let scp = remote
            .without_tty()
            .scp_command(Path::new("out/alice.conf"), "root@vpn", "/tmp/alice.conf")
            .unwrap();
        let args: Vec<_> = scp.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-oBatchMode=yes", "--", "out/alice.conf", "root@vpn:/tmp/alice.conf"]
        );
    }

    #[test]
    fn test_scp_rejects_paths_needing_quotes() {
        let remote = SshRemote::default();
        for path in ["/var/tmp/vpn stage/crl.pem", "/tmp/$(id).conf", ""] {
            assert!(matches!(
                remote.scp_command(Path::new("crl.pem"), "root@vpn", path),
                Err(Error::InvalidInput(_))
            ));
        }
        assert!(matches!(
            remote.copy_file(Path::new("crl.pem"), "root@vpn", "/tmp/a b"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_target_validation() {
        assert!(require_target("root@vpn.example.com").is_ok());
        assert!(require_target("").is_err());
        assert!(require_target("-oProxyCommand=evil").is_err());
        assert!(require_target("a b").is_err());
    }
}
