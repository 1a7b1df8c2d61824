#![allow(dead_code)]

use std::cell::Cell;
use std::path::Path;

use ca_hierarchy::cert::Certificate;
use ca_hierarchy::cert::csr::CertificateSigningRequest;
use ca_hierarchy::cert::params::DistinguishedName;
use ca_hierarchy::config::{HierarchyConfig, OverwritePolicy};
use ca_hierarchy::error::{PkiError, Result};
use ca_hierarchy::hierarchy::{Hierarchy, HierarchyManager};
use ca_hierarchy::key::KeyAlgorithm;
use ca_hierarchy::ledger::Serial;
use ca_hierarchy::operator::ScriptedOperator;
use ca_hierarchy::policy::IssuanceProfile;
use ca_hierarchy::provider::{CryptoProvider, EncryptedKey, KeyHandle, RustCryptoProvider};
use ca_hierarchy::vault::{Passphrase, PassphraseVault};
use zeroize::Zeroizing;

pub const SECRET: &str = "correct horse battery staple";

/// PBKDF2 rounds for test keys.
pub const TEST_KDF_ITERATIONS: u32 = 16;

pub fn config(base: &Path) -> HierarchyConfig {
    HierarchyConfig::builder()
        .base_dir(base.to_path_buf())
        .organization("ACME".to_string())
        .domain("example.com".to_string())
        .country("DE".to_string())
        .kdf_iterations(TEST_KDF_ITERATIONS)
        .build()
}

pub fn manager_with(config: HierarchyConfig) -> HierarchyManager<RustCryptoProvider> {
    let provider = RustCryptoProvider::new(config.kdf_iterations);
    HierarchyManager::new(config, provider)
}

pub fn manager(base: &Path) -> HierarchyManager<RustCryptoProvider> {
    manager_with(config(base))
}

pub fn revoking_manager(base: &Path) -> HierarchyManager<RustCryptoProvider> {
    let mut config = config(base);
    config.overwrite_policy = OverwritePolicy::Revoke;
    manager_with(config)
}

pub fn operator() -> ScriptedOperator {
    ScriptedOperator::new().with_all(SECRET)
}

/// Sets up a full hierarchy and returns it with the vault still warm.
pub fn setup(manager: &HierarchyManager<RustCryptoProvider>) -> (Hierarchy, PassphraseVault) {
    let mut vault = PassphraseVault::new();
    let hierarchy = manager.setup(&mut operator(), &mut vault).unwrap();
    (hierarchy, vault)
}

/// Delegates to [`RustCryptoProvider`] but fails chosen operations.
#[derive(Default)]
pub struct FailingProvider {
    inner: RustCryptoProvider,
    /// 1-based `sign` call that fails.
    fail_sign_at: Option<u32>,
    fail_export_key: bool,
    signs: Cell<u32>,
}

impl FailingProvider {
    pub fn failing_sign(call: u32) -> Self {
        Self {
            inner: RustCryptoProvider::new(TEST_KDF_ITERATIONS),
            fail_sign_at: Some(call),
            ..Self::default()
        }
    }

    pub fn failing_export_key() -> Self {
        Self {
            inner: RustCryptoProvider::new(TEST_KDF_ITERATIONS),
            fail_export_key: true,
            ..Self::default()
        }
    }

    pub fn signs(&self) -> u32 {
        self.signs.get()
    }
}

impl CryptoProvider for FailingProvider {
    fn generate_key_pair(&self, algorithm: KeyAlgorithm) -> Result<KeyHandle> {
        self.inner.generate_key_pair(algorithm)
    }

    fn build_csr(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        alt_names: &[String],
    ) -> Result<CertificateSigningRequest> {
        self.inner.build_csr(key, subject, alt_names)
    }

    fn self_sign(
        &self,
        key: &KeyHandle,
        subject: &DistinguishedName,
        profile: &IssuanceProfile,
        validity_days: u32,
    ) -> Result<Certificate> {
        self.inner.self_sign(key, subject, profile, validity_days)
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
        let call = self.signs.get() + 1;
        self.signs.set(call);
        if self.fail_sign_at == Some(call) {
            return Err(PkiError::CryptoProvider(format!("signing failed for serial {serial}")));
        }
        self.inner.sign(
            csr,
            issuer_cert,
            issuer_key,
            passphrase,
            profile,
            validity_days,
            serial,
        )
    }

    fn export_encrypted_key(&self, key: &KeyHandle, passphrase: &Passphrase) -> Result<EncryptedKey> {
        self.inner.export_encrypted_key(key, passphrase)
    }

    fn export_key(&self, key: &KeyHandle) -> Result<Zeroizing<String>> {
        if self.fail_export_key {
            return Err(PkiError::CryptoProvider("key export failed".to_string()));
        }
        self.inner.export_key(key)
    }

    fn check_passphrase(&self, key: &EncryptedKey, passphrase: &Passphrase) -> Result<()> {
        self.inner.check_passphrase(key, passphrase)
    }
}

pub fn failing_manager(base: &Path, provider: FailingProvider) -> HierarchyManager<FailingProvider> {
    HierarchyManager::new(config(base), provider)
}
