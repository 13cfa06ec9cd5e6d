//! OpenVPN profile rendering.
//!
//! Profiles are projections of store contents: the renderer never issues or
//! revokes anything. Deployment-wide settings live in [`NetworkConstants`]
//! and the skeletons in [`ConfigTemplates`], both fixed at construction.

use crate::error::{Error, Result};
use crate::store::CertificateStore;
use crate::types::{IdentityStatus, DEFAULT_SERVER_ID};
use std::fs;
use std::path::{Path, PathBuf};

/// Path of the CRL on the VPN server, referenced by `crl-verify`.
pub const REMOTE_CRL_PATH: &str = "/etc/openvpn/crl.pem";

const SERVER_TEMPLATE: &str = "port {{port}}
proto {{proto}}
dev tun
server {{subnet}}
ifconfig-pool-persist ipp.txt
keepalive {{keepalive}}
{{compression}}
persist-key
persist-tun
{{relay}}crl-verify {{crl_path}}
status openvpn-status.log
verb 3
<ca>
{{ca}}</ca>
<cert>
{{cert}}</cert>
<key>
{{key}}</key>
<dh>
{{dh}}</dh>
";

const CLIENT_TEMPLATE: &str = "client
dev tun
proto {{proto}}
remote {{remote}} {{port}}
resolv-retry infinite
nobind
persist-key
persist-tun
remote-cert-tls server
{{compression}}
verb 3
<ca>
{{ca}}</ca>
<cert>
{{cert}}</cert>
<key>
{{key}}</key>
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConstants {
    pub port: u16,
    pub protocol: String,
    /// Network address and netmask handed to the `server` directive.
    pub subnet: String,
    pub keepalive_interval: u32,
    pub keepalive_timeout: u32,
    pub compression: String,
}

impl Default for NetworkConstants {
    fn default() -> Self {
        Self {
            port: 1194,
            protocol: "tcp".to_string(),
            subnet: "10.8.0.0 255.255.255.0".to_string(),
            keepalive_interval: 10,
            keepalive_timeout: 120,
            compression: "comp-lzo".to_string(),
        }
    }
}

/// A profile skeleton with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Substitutes every placeholder in one pass, so substituted values are
    /// never rescanned. Unknown placeholders are an error.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.text.len() * 2);
        let mut rest = self.text.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                Error::InvalidInput("unterminated placeholder in template".to_string())
            })?;
            let name = &after[..end];
            let value = vars
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("no value for template placeholder '{}'", name))
                })?;
            out.push_str(value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplates {
    pub server: Template,
    pub client: Template,
}

impl Default for ConfigTemplates {
    fn default() -> Self {
        Self {
            server: Template::new(SERVER_TEMPLATE),
            client: Template::new(CLIENT_TEMPLATE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    templates: ConfigTemplates,
    network: NetworkConstants,
    server_id: String,
    crl_path: String,
}

impl Default for ConfigRenderer {
    fn default() -> Self {
        Self::new(ConfigTemplates::default(), NetworkConstants::default())
    }
}

impl ConfigRenderer {
    pub fn new(templates: ConfigTemplates, network: NetworkConstants) -> Self {
        Self {
            templates,
            network,
            server_id: DEFAULT_SERVER_ID.to_string(),
            crl_path: REMOTE_CRL_PATH.to_string(),
        }
    }

    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    pub fn with_crl_path(mut self, path: impl Into<String>) -> Self {
        self.crl_path = path.into();
        self
    }

    pub fn network(&self) -> &NetworkConstants {
        &self.network
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Writes `<output_dir>/<server_id>.conf`.
    pub fn render_server_config(
        &self,
        store: &CertificateStore,
        output_dir: &Path,
        peer_to_peer: bool,
    ) -> Result<PathBuf> {
        let ca = store.read_ca()?;
        let (cert, key) = active_material(store, &self.server_id)?;
        let dh = store.read_dh()?;

        let port = self.network.port.to_string();
        let keepalive = format!(
            "{} {}",
            self.network.keepalive_interval, self.network.keepalive_timeout
        );
        let relay = if peer_to_peer { "client-to-client\n" } else { "" };
        let (ca, cert, key, dh) = (block(&ca), block(&cert), block(&key), block(&dh));

        let document = self.templates.server.render(&[
            ("port", port.as_str()),
            ("proto", self.network.protocol.as_str()),
            ("subnet", self.network.subnet.as_str()),
            ("keepalive", keepalive.as_str()),
            ("compression", self.network.compression.as_str()),
            ("relay", relay),
            ("crl_path", self.crl_path.as_str()),
            ("ca", ca.as_str()),
            ("cert", cert.as_str()),
            ("key", key.as_str()),
            ("dh", dh.as_str()),
        ])?;

        let path = write_profile(output_dir, &self.server_id, &document)?;
        log::info!(
            "rendered server profile {} (peer-to-peer {})",
            path.display(),
            if peer_to_peer { "on" } else { "off" }
        );
        Ok(path)
    }

    /// Writes `<output_dir>/<id>.conf` pointing at `remote_url`.
    pub fn render_client_config(
        &self,
        store: &CertificateStore,
        id: &str,
        remote_url: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        if remote_url.trim().is_empty() || remote_url.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "invalid remote address '{}'",
                remote_url
            )));
        }

        let ca = store.read_ca()?;
        let (cert, key) = active_material(store, id)?;

        let port = self.network.port.to_string();
        let (ca, cert, key) = (block(&ca), block(&cert), block(&key));

        let document = self.templates.client.render(&[
            ("proto", self.network.protocol.as_str()),
            ("remote", remote_url),
            ("port", port.as_str()),
            ("compression", self.network.compression.as_str()),
            ("ca", ca.as_str()),
            ("cert", cert.as_str()),
            ("key", key.as_str()),
        ])?;

        let path = write_profile(output_dir, id, &document)?;
        log::info!("rendered client profile {} for {}", path.display(), remote_url);
        Ok(path)
    }
}

/// Certificate and key of an active identity; anything else is missing.
fn active_material(store: &CertificateStore, id: &str) -> Result<(String, String)> {
    match store.status(id)? {
        Some(IdentityStatus::Active) => {}
        Some(IdentityStatus::Revoked) => return Err(Error::missing(id, "identity is revoked")),
        None => return Err(Error::missing(id, "identity was never issued")),
    }
    Ok((store.read_cert(id)?, store.read_key(id)?))
}

/// Inline PEM as stored, terminated so the closing tag starts a line.
fn block(pem: &str) -> String {
    if pem.ends_with('\n') {
        pem.to_string()
    } else {
        format!("{}\n", pem)
    }
}

fn write_profile(output_dir: &Path, id: &str, document: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}.conf", id));
    fs::write(&path, document)?;
    Ok(path)
}

/// Text between `<tag>\n` and `</tag>` of a rendered profile.
pub fn inline_block<'a>(document: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>\n", tag);
    let close = format!("</{}>", tag);
    let start = document.find(&open)? + open.len();
    let end = start + document[start..].find(&close)?;
    Some(&document[start..end])
}
