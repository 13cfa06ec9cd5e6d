use super::Signer;
use crate::error::{Error, Result};
use crate::store::CertificateStore;
use crate::types::Role;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Drives an installed easy-rsa 3 script in batch mode.
///
/// easy-rsa maintains `index.txt`, `serial` and `crlnumber` itself, so the
/// store reads identity status exactly as it does for the native signer.
#[derive(Debug, Clone)]
pub struct EasyRsaSigner {
    script: Option<PathBuf>,
    ca_common_name: String,
}

impl Default for EasyRsaSigner {
    fn default() -> Self {
        Self {
            script: None,
            ca_common_name: "default".to_string(),
        }
    }
}

impl EasyRsaSigner {
    /// Uses `script` instead of `<pki_dir>/easyrsa`.
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_ca_common_name(mut self, cn: impl Into<String>) -> Self {
        self.ca_common_name = cn.into();
        self
    }

    fn script_path(&self, store: &CertificateStore) -> PathBuf {
        self.script
            .clone()
            .unwrap_or_else(|| store.root().join("easyrsa"))
    }

    fn command(&self, store: &CertificateStore, args: &[&str]) -> Command {
        let mut cmd = Command::new(self.script_path(store));
        cmd.args(args)
            .current_dir(store.root())
            .env("EASYRSA_BATCH", "1")
            .env("EASYRSA_PKI", store.pki_path())
            .env("EASYRSA_REQ_CN", &self.ca_common_name)
            .stdin(Stdio::null());
        cmd
    }

    fn run(&self, store: &CertificateStore, args: &[&str]) -> Result<()> {
        let display = format!("easyrsa {}", args.join(" "));
        log::debug!("running {} in {}", display, store.root().display());

        let status = self
            .command(store, args)
            .status()
            .map_err(|e| Error::Signer {
                command: display.clone(),
                reason: format!("could not start {}: {}", self.script_path(store).display(), e),
            })?;

        if !status.success() {
            return Err(Error::Signer {
                command: display,
                reason: match status.code() {
                    Some(code) => format!("exit status {}", code),
                    None => "terminated by signal".to_string(),
                },
            });
        }
        Ok(())
    }
}

impl Signer for EasyRsaSigner {
    fn init_authority(&self, store: &CertificateStore) -> Result<()> {
        self.run(store, &["init-pki"])?;
        self.run(store, &["build-ca", "nopass"])
    }

    fn issue(&self, store: &CertificateStore, id: &str, role: Role) -> Result<()> {
        let command = match role {
            Role::Server => "build-server-full",
            Role::Client => "build-client-full",
        };
        self.run(store, &[command, id, "nopass"])
    }

    fn revoke(&self, store: &CertificateStore, id: &str) -> Result<()> {
        self.run(store, &["revoke", id])
    }

    fn regenerate_crl(&self, store: &CertificateStore) -> Result<()> {
        self.run(store, &["gen-crl"])
    }

    fn generate_dh_params(&self, store: &CertificateStore) -> Result<()> {
        self.run(store, &["gen-dh"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_is_built_from_argv() {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());
        let signer = EasyRsaSigner::default();

        let cmd = signer.command(&store, &["build-client-full", "alice; rm -rf /", "nopass"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["build-client-full", "alice; rm -rf /", "nopass"]);
        assert_eq!(cmd.get_program(), dir.path().join("easyrsa").as_os_str());
    }

    #[test]
    fn test_missing_script_is_signer_error() {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());
        let signer = EasyRsaSigner::default().with_script(dir.path().join("does-not-exist"));

        assert!(matches!(
            signer.generate_dh_params(&store),
            Err(Error::Signer { .. })
        ));
    }
}
