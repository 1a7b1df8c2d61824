//! use ca_hierarchy::error::PkiError;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ledger::Serial;
use crate::policy::CaRole;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PkiError> = std::result::Result<T, E>;

/// Represents errors that can occur while managing the CA hierarchy.
///
/// Validation variants are raised before any state is touched. Ledger
/// invariant variants are always fatal to the current operation.
#[derive(Debug, Error, Clone)]
pub enum PkiError {
    /// The requested subject was empty after trimming.
    #[error("Certificate subject must not be empty")]
    EmptySubject,

    /// The principal class is not one of server, user or device.
    #[error("Unknown issuance profile: {0}")]
    UnknownProfile(String),

    /// The subject maps onto a file name the CA keeps for itself.
    #[error("Certificate subject {0:?} collides with the CA's own files")]
    ReservedSubject(String),

    /// The two passphrase entries for a CA did not match.
    #[error("Passphrases for {ca} do not match")]
    PassphraseMismatch { ca: CaRole },

    /// A blank passphrase was offered.
    #[error("Passphrase must not be empty")]
    EmptyPassphrase,

    /// The vault already holds a passphrase for this CA.
    #[error("Passphrase for {ca} is already set for this session")]
    PassphraseAlreadySet { ca: CaRole },

    /// A serial was recorded twice in one ledger.
    #[error("Serial {serial} already recorded in the {ca} ledger")]
    DuplicateSerial { ca: CaRole, serial: Serial },

    /// A serial was referenced that the ledger has never recorded.
    #[error("Serial {serial} is not recorded in the {ca} ledger")]
    UnknownSerial { ca: CaRole, serial: Serial },

    /// The crypto provider failed; carries its diagnostic verbatim.
    #[error("Crypto provider error: {0}")]
    CryptoProvider(String),

    /// Setup was requested while a complete hierarchy exists.
    #[error("A CA hierarchy already exists; explicit confirmation is required to recreate it")]
    HierarchyAlreadyExists,

    /// A previous setup was interrupted and left a partial hierarchy.
    #[error("The CA hierarchy is incomplete; discard it and rerun setup")]
    HierarchyIncomplete,

    /// An operation needed the hierarchy before it was set up.
    #[error("No CA hierarchy has been set up")]
    HierarchyNotInitialized,

    /// A specific CA is missing from an otherwise present hierarchy.
    #[error("Certificate authority {0} does not exist")]
    MissingAuthority(CaRole),

    /// A filesystem operation failed.
    #[error("Storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// The configuration is invalid or could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// A signature or chain failed to verify.
    #[error("Verification failed: {0}")]
    Verification(String),
}

impl PkiError {
    /// Wraps a filesystem error together with the path it concerns.
    pub fn storage(path: &Path, err: impl std::fmt::Display) -> Self {
        PkiError::Storage {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Re-labels a low level failure as a crypto provider failure.
    ///
    /// Errors that already carry operator meaning pass through unchanged.
    pub fn into_provider(self) -> Self {
        match self {
            PkiError::CryptoProvider(_)
            | PkiError::EmptySubject
            | PkiError::UnknownProfile(_)
            | PkiError::ReservedSubject(_)
            | PkiError::Storage { .. } => self,
            other => PkiError::CryptoProvider(other.to_string()),
        }
    }

    /// Whether the error was raised before any state was mutated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PkiError::EmptySubject | PkiError::UnknownProfile(_) | PkiError::ReservedSubject(_)
        )
    }
}

impl From<der::Error> for PkiError {
    /// Converts a `der::Error` into a `PkiError`.
    fn from(err: der::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}

impl From<pkcs8::Error> for PkiError {
    fn from(err: pkcs8::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}

impl From<spki::Error> for PkiError {
    fn from(err: spki::Error) -> Self {
        PkiError::EncodingError(err.to_string())
    }
}

impl From<rsa::Error> for PkiError {
    fn from(err: rsa::Error) -> Self {
        PkiError::KeyGenerationError(err.to_string())
    }
}

impl From<rsa::signature::Error> for PkiError {
    fn from(err: rsa::signature::Error) -> Self {
        PkiError::Verification(err.to_string())
    }
}

impl From<serde_json::Error> for PkiError {
    fn from(err: serde_json::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}
