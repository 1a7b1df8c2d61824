//! The cryptographic capability the hierarchy is built on.
//!
//! [`CryptoProvider`] is the seam between CA bookkeeping and the primitives.
//! [`RustCryptoProvider`] implements it on the RustCrypto crates.

use std::fmt;

use rand::Rng;
use tracing::debug;
use zeroize::Zeroizing;

use crate::cert::csr::CertificateSigningRequest;
use crate::cert::extensions::SubjectAltName;
use crate::cert::extensions::ToAndFromX509Extension;
use crate::cert::params::{CertificationRequestInfo, DistinguishedName, Validity};
use crate::cert::{Certificate, CertificateWithPrivateKey, SelfIssuer};
use crate::config::DEFAULT_KDF_ITERATIONS;
use crate::error::{PkiError, Result};
use crate::issuer::Issuer;
use crate::key::{KeyAlgorithm, KeyPair, PublicKey};
use crate::ledger::Serial;
use crate::policy::IssuanceProfile;
use crate::vault::Passphrase;

/// A freshly generated private key, held in memory by the provider.
#[derive(Clone)]
pub struct KeyHandle {
    key: KeyPair,
}

impl KeyHandle {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.key.algorithm()
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

/// A passphrase-protected private key as stored on disk (encrypted PKCS#8 PEM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKey(String);

impl EncryptedKey {
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn as_pem(&self) -> &str {
        &self.0
    }
}

/// Key generation, request building and signing.
///
/// Every failure is reported as [`PkiError::CryptoProvider`] carrying the
/// underlying diagnostic, except validation errors which pass through.
pub trait CryptoProvider {
    fn generate_key_pair(&self, algorithm: KeyAlgorithm) -> Result<KeyHandle>;

    fn build_csr(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        alt_names: &[String],
    ) -> Result<CertificateSigningRequest>;

    /// Self-signs a CA certificate. The serial is chosen at random.
    fn self_sign(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        profile: &IssuanceProfile,
        validity_days: u32,
    ) -> Result<Certificate>;

    /// Signs `csr` with the issuer's key, unlocked by `passphrase`.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        csr: &CertificateSigningRequest,
        issuer_cert: &Certificate,
        issuer_key: &EncryptedKey,
        passphrase: &Passphrase,
        profile: &IssuanceProfile,
        validity_days: u32,
        serial: Serial,
    ) -> Result<Certificate>;

    fn export_encrypted_key(&self, key: &KeyHandle, passphrase: &Passphrase)
    -> Result<EncryptedKey>;

    /// Unencrypted PKCS#8 PEM, used for end-entity keys.
    fn export_key(&self, key: &KeyHandle) -> Result<Zeroizing<String>>;

    /// Fails unless `passphrase` decrypts `key`.
    fn check_passphrase(&self, key: &EncryptedKey, passphrase: &Passphrase) -> Result<()>;
}

/// [`CryptoProvider`] backed by the RustCrypto crates.
#[derive(Debug, Clone, Copy)]
pub struct RustCryptoProvider {
    kdf_iterations: u32,
}

impl Default for RustCryptoProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KDF_ITERATIONS)
    }
}

impl RustCryptoProvider {
    pub fn new(kdf_iterations: u32) -> Self {
        Self { kdf_iterations }
    }

    fn unlock(&self, key: &EncryptedKey, passphrase: &Passphrase) -> Result<KeyPair> {
        KeyPair::from_encrypted_pkcs8_pem(key.as_pem(), passphrase.expose())
    }
}

fn request_info(
    subject: DistinguishedName,
    subject_public_key: PublicKey,
    profile: &IssuanceProfile,
) -> CertificationRequestInfo {
    CertificationRequestInfo::builder()
        .subject(subject)
        .subject_public_key(subject_public_key)
        .usages(profile.extended_key_usage.clone())
        .is_ca(profile.is_ca)
        .maybe_path_length(profile.path_length)
        .key_usage(profile.key_usage)
        .build()
}

impl CryptoProvider for RustCryptoProvider {
    fn generate_key_pair(&self, algorithm: KeyAlgorithm) -> Result<KeyHandle> {
        let key = KeyPair::generate(algorithm).map_err(PkiError::into_provider)?;
        debug!(%algorithm, "generated key pair");
        Ok(KeyHandle { key })
    }

    fn build_csr(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        alt_names: &[String],
    ) -> Result<CertificateSigningRequest> {
        if subject.common_name.trim().is_empty() {
            return Err(PkiError::EmptySubject);
        }
        CertificateSigningRequest::build(&key.key, subject, alt_names)
            .map_err(PkiError::into_provider)
    }

    fn self_sign(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        profile: &IssuanceProfile,
        validity_days: u32,
    ) -> Result<Certificate> {
        let info = request_info(subject.clone(), key.public_key(), profile);
        // Positive and at most 63 bits, so it never collides with the sign bit.
        let serial = Serial::new(rand::rng().random_range(1u64 << 32..1u64 << 62));
        let issuer = SelfIssuer {
            name: subject.clone(),
            key: &key.key,
        };
        issuer
            .issue(&info, Validity::for_days(i64::from(validity_days)), serial)
            .map_err(PkiError::into_provider)
    }

    fn sign(
        &self,
        csr: &CertificateSigningRequest,
        issuer_cert: &Certificate,
        issuer_key: &EncryptedKey,
        passphrase: &Passphrase,
        profile: &IssuanceProfile,
        validity_days: u32,
        serial: Serial,
    ) -> Result<Certificate> {
        let signed = (|| -> Result<Certificate> {
            csr.verify()?;
            let key = self.unlock(issuer_key, passphrase)?;
            if key.public_key() != issuer_cert.public_key()? {
                return Err(PkiError::InvalidInput(
                    "issuer key does not match issuer certificate".to_string(),
                ));
            }

            let mut info = request_info(csr.subject(), csr.public_key()?, profile);
            if profile.accepts_alt_names {
                info.extensions = csr
                    .requested_extensions()?
                    .into_iter()
                    .filter(|ext| ext.oid == SubjectAltName::OID)
                    .collect();
            }

            let issuer = CertificateWithPrivateKey {
                cert: issuer_cert.clone(),
                key,
            };
            issuer.issue(&info, Validity::for_days(i64::from(validity_days)), serial)
        })();
        signed.map_err(PkiError::into_provider)
    }

    fn export_encrypted_key(
        &self,
        key: &KeyHandle,
        passphrase: &Passphrase,
    ) -> Result<EncryptedKey> {
        if passphrase.is_blank() {
            return Err(PkiError::EmptyPassphrase);
        }
        let pem = key
            .key
            .to_encrypted_pkcs8_pem(passphrase.expose(), self.kdf_iterations)
            .map_err(PkiError::into_provider)?;
        Ok(EncryptedKey(pem.to_string()))
    }

    fn export_key(&self, key: &KeyHandle) -> Result<Zeroizing<String>> {
        key.key.to_pkcs8_pem().map_err(PkiError::into_provider)
    }

    fn check_passphrase(&self, key: &EncryptedKey, passphrase: &Passphrase) -> Result<()> {
        self.unlock(key, passphrase)
            .map(|_| ())
            .map_err(PkiError::into_provider)
    }
}
