//! On-disk certificate store in the easy-rsa 3 layout.
//!
//! ```text
//! <pki_dir>/pki/ca.crt
//! <pki_dir>/pki/private/ca.key
//! <pki_dir>/pki/private/<id>.key
//! <pki_dir>/pki/issued/<id>.crt
//! <pki_dir>/pki/reqs/<id>.req
//! <pki_dir>/pki/dh.pem
//! <pki_dir>/pki/crl.pem
//! <pki_dir>/pki/index.txt   OpenSSL CA database
//! <pki_dir>/pki/serial      next certificate serial (hex)
//! <pki_dir>/pki/crlnumber   next CRL number (hex)
//! ```
//!
//! Identity status is read from `index.txt`, so a store written by the
//! native signer stays usable with easy-rsa and the other way round.

use crate::error::{Error, Result};
use crate::types::{Identity, IdentityStatus, RevocationReason};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const INITIAL_SERIAL: &str = "01";

#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

/// One row of `index.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub status: IdentityStatus,
    pub not_after: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason: Option<RevocationReason>,
    pub serial: String,
    pub subject: String,
}

impl IndexRow {
    pub fn active(serial: impl Into<String>, id: &str, not_after: DateTime<Utc>) -> Self {
        Self {
            status: IdentityStatus::Active,
            not_after,
            revoked_at: None,
            reason: None,
            serial: serial.into(),
            subject: format!("/CN={}", id),
        }
    }

    pub fn common_name(&self) -> Option<&str> {
        self.subject
            .split('/')
            .find_map(|part| part.strip_prefix("CN="))
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 6 {
            return Err(Error::InvalidInput(format!(
                "malformed index row: {}",
                line
            )));
        }

        // 'E' (expired) rows are still unrevoked issuances.
        let status = match fields[0] {
            "V" | "E" => IdentityStatus::Active,
            "R" => IdentityStatus::Revoked,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown index status '{}'",
                    other
                )))
            }
        };

        let not_after = parse_asn1_time(fields[1])?;

        let (revoked_at, reason) = if fields[2].is_empty() {
            (None, None)
        } else {
            let mut parts = fields[2].splitn(2, ',');
            let at = parse_asn1_time(parts.next().unwrap_or_default())?;
            let reason = parts.next().and_then(RevocationReason::from_index_name);
            (Some(at), reason)
        };

        Ok(Self {
            status,
            not_after,
            revoked_at,
            reason,
            serial: fields[3].to_string(),
            subject: fields[5..].join("\t"),
        })
    }

    pub fn to_line(&self) -> String {
        let flag = match self.status {
            IdentityStatus::Active => "V",
            IdentityStatus::Revoked => "R",
        };
        let revoked = match (self.revoked_at, self.reason) {
            (Some(at), Some(reason)) => format!("{},{}", format_asn1_time(at), reason.index_name()),
            (Some(at), None) => format_asn1_time(at),
            _ => String::new(),
        };
        format!(
            "{}\t{}\t{}\t{}\tunknown\t{}",
            flag,
            format_asn1_time(self.not_after),
            revoked,
            self.serial,
            self.subject
        )
    }
}

impl CertificateStore {
    pub fn new(pki_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: pki_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pki_path(&self) -> PathBuf {
        self.root.join("pki")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.pki_path().join("ca.crt")
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.pki_path().join("private").join("ca.key")
    }

    pub fn key_path(&self, id: &str) -> PathBuf {
        self.pki_path().join("private").join(format!("{}.key", id))
    }

    pub fn cert_path(&self, id: &str) -> PathBuf {
        self.pki_path().join("issued").join(format!("{}.crt", id))
    }

    pub fn req_path(&self, id: &str) -> PathBuf {
        self.pki_path().join("reqs").join(format!("{}.req", id))
    }

    pub fn dh_path(&self) -> PathBuf {
        self.pki_path().join("dh.pem")
    }

    pub fn crl_path(&self) -> PathBuf {
        self.pki_path().join("crl.pem")
    }

    pub fn index_path(&self) -> PathBuf {
        self.pki_path().join("index.txt")
    }

    pub fn serial_path(&self) -> PathBuf {
        self.pki_path().join("serial")
    }

    pub fn crl_number_path(&self) -> PathBuf {
        self.pki_path().join("crlnumber")
    }

    pub fn ca_exists(&self) -> bool {
        self.ca_cert_path().is_file()
    }

    /// Creates the directory skeleton and empty bookkeeping files. Existing
    /// bookkeeping is left alone.
    pub fn create_layout(&self) -> Result<()> {
        let pki = self.pki_path();
        for dir in ["private", "issued", "reqs"] {
            fs::create_dir_all(pki.join(dir))?;
        }
        if !self.index_path().exists() {
            self.write_file(&self.index_path(), "")?;
        }
        if !self.serial_path().exists() {
            self.write_file(&self.serial_path(), &format!("{}\n", INITIAL_SERIAL))?;
        }
        if !self.crl_number_path().exists() {
            self.write_file(&self.crl_number_path(), &format!("{}\n", INITIAL_SERIAL))?;
        }
        Ok(())
    }

    pub fn index(&self) -> Result<Vec<IndexRow>> {
        let content = match fs::read_to_string(self.index_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(IndexRow::parse)
            .collect()
    }

    /// Every identity in the database, latest row per common name, in order
    /// of first issuance. The CA itself is not listed.
    pub fn identities(&self) -> Result<Vec<Identity>> {
        let mut identities: Vec<Identity> = Vec::new();
        for row in self.index()? {
            let Some(cn) = row.common_name() else {
                continue;
            };
            let identity = Identity {
                id: cn.to_string(),
                status: row.status,
                serial: row.serial.clone(),
                not_after: row.not_after,
                revoked_at: row.revoked_at,
            };
            match identities.iter_mut().find(|i| i.id == identity.id) {
                Some(existing) => *existing = identity,
                None => identities.push(identity),
            }
        }
        Ok(identities)
    }

    pub fn identity(&self, id: &str) -> Result<Option<Identity>> {
        Ok(self.identities()?.into_iter().find(|i| i.id == id))
    }

    pub fn status(&self, id: &str) -> Result<Option<IdentityStatus>> {
        Ok(self.identity(id)?.map(|i| i.status))
    }

    /// Whether any key, certificate or request for `id` is on disk.
    pub fn has_material(&self, id: &str) -> bool {
        self.key_path(id).exists() || self.cert_path(id).exists() || self.req_path(id).exists()
    }

    pub fn read_ca(&self) -> Result<String> {
        read_material(&self.ca_cert_path(), "ca", "CA certificate")
    }

    pub fn read_cert(&self, id: &str) -> Result<String> {
        read_material(&self.cert_path(id), id, "certificate")
    }

    pub fn read_key(&self, id: &str) -> Result<String> {
        read_material(&self.key_path(id), id, "private key")
    }

    pub fn read_dh(&self) -> Result<String> {
        read_material(&self.dh_path(), "dh", "Diffie-Hellman parameters")
    }

    pub fn read_crl(&self) -> Result<String> {
        read_material(&self.crl_path(), "crl", "certificate revocation list")
    }

    /// Deletes key, certificate and request of `id`, including the copies
    /// easy-rsa archives under `pki/revoked/` when `serial` is known.
    pub fn remove_material(&self, id: &str, serial: Option<&str>) -> Result<()> {
        let mut paths = vec![self.key_path(id), self.cert_path(id), self.req_path(id)];
        if let Some(serial) = serial {
            let revoked = self.pki_path().join("revoked");
            paths.push(revoked.join("private_by_serial").join(format!("{}.key", serial)));
            paths.push(revoked.join("certs_by_serial").join(format!("{}.crt", serial)));
            paths.push(revoked.join("reqs_by_serial").join(format!("{}.req", serial)));
        }

        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn append_index(&self, row: &IndexRow) -> Result<()> {
        let mut rows = self.index()?;
        rows.push(row.clone());
        self.write_index(&rows)
    }

    /// Flips the active row of `id` to revoked and returns it.
    pub fn mark_revoked(
        &self,
        id: &str,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<IndexRow> {
        let mut rows = self.index()?;
        let row = rows
            .iter_mut()
            .rev()
            .find(|r| r.common_name() == Some(id) && r.status == IdentityStatus::Active)
            .ok_or_else(|| Error::UnknownIdentity(id.to_string()))?;

        row.status = IdentityStatus::Revoked;
        row.revoked_at = Some(at);
        row.reason = Some(reason);
        let revoked = row.clone();

        self.write_index(&rows)?;
        Ok(revoked)
    }

    /// Returns the serial to use now and persists its successor.
    pub fn next_serial(&self) -> Result<String> {
        bump_hex_counter(self, &self.serial_path())
    }

    pub fn next_crl_number(&self) -> Result<String> {
        bump_hex_counter(self, &self.crl_number_path())
    }

    /// Writes through a temporary sibling and renames it into place.
    pub fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp = tmp_sibling(path);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Like [`write_file`](Self::write_file) but readable by the owner only.
    pub fn write_secret(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp = tmp_sibling(path);
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_index(&self, rows: &[IndexRow]) -> Result<()> {
        let mut content = String::new();
        for row in rows {
            content.push_str(&row.to_line());
            content.push('\n');
        }
        self.write_file(&self.index_path(), &content)
    }
}

fn read_material(path: &Path, id: &str, what: &str) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::missing(
            id,
            format!("{} not found at {}", what, path.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn bump_hex_counter(store: &CertificateStore, path: &Path) -> Result<String> {
    let current = match fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_uppercase(),
        Ok(_) => INITIAL_SERIAL.to_string(),
        Err(e) if e.kind() == ErrorKind::NotFound => INITIAL_SERIAL.to_string(),
        Err(e) => return Err(e.into()),
    };
    let value = u128::from_str_radix(&current, 16).map_err(|_| {
        Error::InvalidInput(format!("corrupt counter in {}: {}", path.display(), current))
    })?;
    let next = value
        .checked_add(1)
        .ok_or_else(|| Error::InvalidInput(format!("counter in {} exhausted", path.display())))?;

    store.write_file(path, &format!("{}\n", format_serial(next)))?;
    Ok(format_serial(value))
}

/// Uppercase hex with an even number of digits, as OpenSSL writes serials.
pub fn format_serial(value: u128) -> String {
    let hex = format!("{:X}", value);
    if hex.len() % 2 == 1 {
        format!("0{}", hex)
    } else {
        hex
    }
}

/// Canonical form for comparing serials from different sources.
pub fn normalize_serial(serial: &str) -> String {
    let cleaned: String = serial
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase();
    let trimmed = cleaned.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidInput(format!("invalid hex serial: {}", s)));
    }
    let s = if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    };

    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::InvalidInput(format!("invalid hex serial: {}", s)))
        })
        .collect()
}

fn parse_asn1_time(s: &str) -> Result<DateTime<Utc>> {
    let format = match s.len() {
        13 => "%y%m%d%H%M%SZ",
        15 => "%Y%m%d%H%M%SZ",
        _ => {
            return Err(Error::InvalidInput(format!(
                "invalid index timestamp '{}'",
                s
            )))
        }
    };
    let naive = NaiveDateTime::parse_from_str(s, format)
        .map_err(|e| Error::InvalidInput(format!("invalid index timestamp '{}': {}", s, e)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn format_asn1_time(at: DateTime<Utc>) -> String {
    // UTCTime until 2049, GeneralizedTime afterwards.
    if at.year() < 2050 {
        at.format("%y%m%d%H%M%SZ").to_string()
    } else {
        at.format("%Y%m%d%H%M%SZ").to_string()
    }
}
