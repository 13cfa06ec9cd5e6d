use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("certificate authority already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("no certificate authority at {0}, run init first")]
    UnknownAuthority(PathBuf),

    #[error("identity '{0}' was already issued")]
    DuplicateIdentity(String),

    #[error("identity '{0}' was never issued")]
    UnknownIdentity(String),

    #[error("identity '{0}' is already revoked")]
    AlreadyRevoked(String),

    #[error("missing material for '{id}': {what}")]
    MissingMaterial { id: String, what: String },

    #[error("transfer of '{id}' to {target} failed: {reason}")]
    TransferFailed {
        id: String,
        target: String,
        reason: String,
    },

    #[error("remote setup of '{id}' on {target} failed: {reason}")]
    RemoteSetupFailed {
        id: String,
        target: String,
        reason: String,
    },

    #[error("CRL revoking '{id}' was not installed on {target}: {reason}")]
    CrlPropagationFailed {
        id: String,
        target: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Certificate generation error: {0}")]
    CertGen(String),

    #[error("CRL parsing error: {0}")]
    CrlParse(String),

    #[error("CRL out of sync with index: {0}")]
    CrlMismatch(String),

    #[error("signer command '{command}' failed: {reason}")]
    Signer { command: String, reason: String },

    #[error("{host}: {reason}")]
    Remote { host: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn missing(id: impl Into<String>, what: impl Into<String>) -> Self {
        Error::MissingMaterial {
            id: id.into(),
            what: what.into(),
        }
    }
}

impl From<rcgen::Error> for Error {
    fn from(err: rcgen::Error) -> Self {
        Error::CertGen(err.to_string())
    }
}

impl From<x509_parser::error::X509Error> for Error {
    fn from(err: x509_parser::error::X509Error) -> Self {
        Error::CrlParse(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::CrlParse(err.to_string())
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
