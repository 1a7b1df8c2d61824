//! CA hierarchy lifecycle: `Absent -> RootCreated -> IntermediatesCreated -> Complete`.
//!
//! The state is derived from what is on disk every time it is asked for, so
//! an interrupted setup is visible to the next session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::cert::Certificate;
use crate::config::HierarchyConfig;
use crate::error::{PkiError, Result};
use crate::ledger::{Ledger, LedgerEntry, Serial};
use crate::operator::{Confirmation, Operator, PassphraseStage};
use crate::pem_utils;
use crate::policy::{CaRole, IssuanceProfile, PolicyCatalog};
use crate::provider::{CryptoProvider, EncryptedKey};
use crate::storage::{self, CaPaths};
use crate::vault::{Passphrase, PassphraseVault};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyState {
    Absent,
    RootCreated,
    /// The root plus a strict, non-empty subset of the intermediates.
    IntermediatesCreated(BTreeSet<CaRole>),
    Complete,
}

impl fmt::Display for HierarchyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyState::Absent => f.write_str("absent"),
            HierarchyState::RootCreated => f.write_str("root created"),
            HierarchyState::IntermediatesCreated(roles) => {
                let names: Vec<String> = roles.iter().map(ToString::to_string).collect();
                write!(f, "intermediates created: {}", names.join(", "))
            }
            HierarchyState::Complete => f.write_str("complete"),
        }
    }
}

/// One CA of the hierarchy as loaded from disk.
#[derive(Debug)]
pub struct CertificateAuthority {
    role: CaRole,
    paths: CaPaths,
    certificate: Certificate,
    chain: Vec<Certificate>,
    key: EncryptedKey,
    ledger: Ledger,
    profile: IssuanceProfile,
}

impl CertificateAuthority {
    fn load(config: &HierarchyConfig, catalog: &PolicyCatalog, role: CaRole) -> Result<Self> {
        let paths = CaPaths::new(&config.base_dir, role);
        if !paths.is_complete() {
            return Err(PkiError::MissingAuthority(role));
        }
        let certificate = Certificate::from_pem(&storage::read_to_string(&paths.cert_file())?)?;
        let chain = pem_utils::split_certificates(&storage::read_to_string(&paths.chain_file())?)?;
        let key = EncryptedKey::from_pem(storage::read_to_string(&paths.key_file())?);
        let ledger = Ledger::open(paths.dir(), role)?;
        Ok(Self {
            role,
            paths,
            certificate,
            chain,
            key,
            ledger,
            profile: catalog.profile_for_role(role).clone(),
        })
    }

    pub fn role(&self) -> CaRole {
        self.role
    }

    /// Common name of the CA certificate.
    pub fn name(&self) -> String {
        self.certificate.subject().common_name
    }

    pub fn paths(&self) -> &CaPaths {
        &self.paths
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// `[self, ..., root]`.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn encrypted_key(&self) -> &EncryptedKey {
        &self.key
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The profile this CA applies to what it signs.
    pub fn profile(&self) -> &IssuanceProfile {
        &self.profile
    }

    /// Validity in days of the certificates this CA signs.
    pub fn validity_days(&self) -> u32 {
        self.profile.validity_days
    }

    /// Passphrase for this CA's key: from the vault, or prompted, checked
    /// against the key and then cached.
    pub fn passphrase<P: CryptoProvider + ?Sized>(
        &self,
        provider: &P,
        operator: &mut dyn Operator,
        vault: &mut PassphraseVault,
    ) -> Result<Passphrase> {
        if let Some(secret) = vault.get(self.role) {
            return Ok(secret);
        }
        let secret = operator.passphrase(self.role, PassphraseStage::Unlock)?;
        if secret.is_blank() {
            return Err(PkiError::EmptyPassphrase);
        }
        provider.check_passphrase(&self.key, &secret)?;
        vault.set(self.role, secret.clone())?;
        Ok(secret)
    }
}

/// A complete, loaded hierarchy.
#[derive(Debug)]
pub struct Hierarchy {
    authorities: BTreeMap<CaRole, CertificateAuthority>,
}

impl Hierarchy {
    pub fn authority(&self, role: CaRole) -> Result<&CertificateAuthority> {
        self.authorities
            .get(&role)
            .ok_or(PkiError::MissingAuthority(role))
    }

    pub fn root(&self) -> Result<&CertificateAuthority> {
        self.authority(CaRole::Root)
    }

    /// All CAs, root first.
    pub fn authorities(&self) -> impl Iterator<Item = &CertificateAuthority> {
        self.authorities.values()
    }
}

/// Drives setup, loading and teardown of the hierarchy.
#[derive(Debug)]
pub struct HierarchyManager<P> {
    config: HierarchyConfig,
    catalog: PolicyCatalog,
    provider: P,
}

impl<P: CryptoProvider> HierarchyManager<P> {
    pub fn new(config: HierarchyConfig, provider: P) -> Self {
        let catalog = PolicyCatalog::new(&config);
        Self {
            config,
            catalog,
            provider,
        }
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn paths(&self, role: CaRole) -> CaPaths {
        CaPaths::new(&self.config.base_dir, role)
    }

    pub fn state(&self) -> HierarchyState {
        if !self.paths(CaRole::Root).is_complete() {
            return HierarchyState::Absent;
        }
        let created: BTreeSet<CaRole> = CaRole::INTERMEDIATES
            .into_iter()
            .filter(|role| self.paths(*role).is_complete())
            .collect();
        match created.len() {
            0 => HierarchyState::RootCreated,
            n if n == CaRole::INTERMEDIATES.len() => HierarchyState::Complete,
            _ => HierarchyState::IntermediatesCreated(created),
        }
    }

    /// Leftovers of an interrupted setup that never got a usable root.
    fn has_debris(&self) -> bool {
        self.paths(CaRole::Root).dir().exists()
            || self.config.base_dir.join("intermediate").exists()
    }

    /// Loads the hierarchy. Only a complete one can be used.
    pub fn load(&self) -> Result<Hierarchy> {
        match self.state() {
            HierarchyState::Complete => {}
            HierarchyState::Absent => return Err(PkiError::HierarchyNotInitialized),
            _ => return Err(PkiError::HierarchyIncomplete),
        }
        let authorities = CaRole::ALL
            .into_iter()
            .map(|role| -> Result<_> {
                Ok((role, CertificateAuthority::load(&self.config, &self.catalog, role)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Hierarchy { authorities })
    }

    /// Removes every CA directory.
    pub fn teardown(&self) -> Result<()> {
        storage::remove_tree(self.paths(CaRole::Root).dir())?;
        storage::remove_tree(&self.config.base_dir.join("intermediate"))?;
        warn!(base = %self.config.base_dir.display(), "CA hierarchy removed");
        Ok(())
    }

    /// Builds the whole hierarchy: the root, then each intermediate in order.
    ///
    /// An existing or partial hierarchy is only replaced after the operator
    /// confirms [`Confirmation::DestroyHierarchy`]. Any failure aborts the
    /// setup; the step that failed leaves no files behind, earlier steps stay.
    pub fn setup(
        &self,
        operator: &mut dyn Operator,
        vault: &mut PassphraseVault,
    ) -> Result<Hierarchy> {
        self.config.validate()?;
        let state = self.state();
        let refusal = match &state {
            HierarchyState::Complete => Some(PkiError::HierarchyAlreadyExists),
            HierarchyState::Absent if !self.has_debris() => None,
            _ => Some(PkiError::HierarchyIncomplete),
        };
        if let Some(refusal) = refusal {
            if !operator.confirm(&Confirmation::DestroyHierarchy) {
                info!(%state, "setup refused without confirmation");
                return Err(refusal);
            }
            self.teardown()?;
            vault.clear_all();
        }

        info!(base = %self.config.base_dir.display(), "setting up CA hierarchy");
        self.create_root(operator, vault)?;
        for role in CaRole::INTERMEDIATES {
            self.create_intermediate(role, operator, vault)?;
        }
        info!("CA hierarchy complete");
        self.load()
    }

    fn create_root(&self, operator: &mut dyn Operator, vault: &mut PassphraseVault) -> Result<()> {
        let role = CaRole::Root;
        let passphrase = new_passphrase(operator, role)?;
        let subject = self.catalog.ca_subject(role);
        let key = self.provider.generate_key_pair(self.config.key_algorithm)?;
        let profile = self.catalog.self_signed_profile();
        let cert = self
            .provider
            .self_sign(&key, &subject, profile, profile.validity_days)?;
        let encrypted = self.provider.export_encrypted_key(&key, &passphrase)?;

        let paths = self.paths(role);
        with_cleanup(&paths, || {
            paths.create_layout()?;
            write_authority(&paths, &encrypted, &cert, &[cert.clone()])?;
            Ledger::create(
                paths.dir(),
                role,
                Serial::new(self.config.serial_start.for_role(role)),
            )?;
            Ok(())
        })?;

        vault.forget(role);
        vault.set(role, passphrase)?;
        info!(serial = %cert.serial()?, subject = %subject.to_oneline(), "root CA created");
        Ok(())
    }

    fn create_intermediate(
        &self,
        role: CaRole,
        operator: &mut dyn Operator,
        vault: &mut PassphraseVault,
    ) -> Result<()> {
        let root = CertificateAuthority::load(&self.config, &self.catalog, CaRole::Root)?;
        let passphrase = new_passphrase(operator, role)?;
        let root_passphrase = root.passphrase(&self.provider, operator, vault)?;

        let subject = self.catalog.ca_subject(role);
        let key = self.provider.generate_key_pair(self.config.key_algorithm)?;
        let csr = self.provider.build_csr(&key, &subject, &[])?;
        let encrypted = self.provider.export_encrypted_key(&key, &passphrase)?;

        let paths = self.paths(role);
        let mut tx = root.ledger().transaction();
        let serial = tx.allocate_serial()?;
        let cert = self.provider.sign(
            &csr,
            root.certificate(),
            root.encrypted_key(),
            &root_passphrase,
            root.profile(),
            self.catalog.ca_validity_days(role),
            serial,
        )?;

        with_cleanup(&paths, || {
            let chain: Vec<Certificate> = std::iter::once(cert.clone())
                .chain(root.chain().iter().cloned())
                .collect();
            paths.create_layout()?;
            write_authority(&paths, &encrypted, &cert, &chain)?;
            Ledger::create(
                paths.dir(),
                role,
                Serial::new(self.config.serial_start.for_role(role)),
            )?;
            let validity = cert.validity();
            tx.record_issued(LedgerEntry::new(
                serial,
                subject.to_oneline(),
                OffsetDateTime::now_utc(),
                validity.not_after,
            ))?;
            tx.commit()
        })?;

        vault.forget(role);
        vault.set(role, passphrase)?;
        info!(%role, %serial, subject = %subject.to_oneline(), "intermediate CA created");
        Ok(())
    }
}

/// Reads a new passphrase twice and insists both entries agree.
fn new_passphrase(operator: &mut dyn Operator, ca: CaRole) -> Result<Passphrase> {
    let first = operator.passphrase(ca, PassphraseStage::Enter)?;
    if first.is_blank() {
        return Err(PkiError::EmptyPassphrase);
    }
    let second = operator.passphrase(ca, PassphraseStage::Confirm)?;
    if !first.matches(&second) {
        warn!(%ca, "passphrase confirmation mismatch");
        return Err(PkiError::PassphraseMismatch { ca });
    }
    Ok(first)
}

fn write_authority(
    paths: &CaPaths,
    key: &EncryptedKey,
    cert: &Certificate,
    chain: &[Certificate],
) -> Result<()> {
    storage::write_private(&paths.key_file(), key.as_pem().as_bytes())?;
    storage::write_public(&paths.cert_file(), cert.to_pem()?.as_bytes())?;
    storage::write_public(
        &paths.chain_file(),
        pem_utils::join_certificates(chain)?.as_bytes(),
    )
}

/// Runs `step`; on failure removes the CA directory it was populating.
fn with_cleanup(paths: &CaPaths, step: impl FnOnce() -> Result<()>) -> Result<()> {
    step().inspect_err(|e| {
        error!(dir = %paths.dir().display(), error = %e, "CA creation failed, removing partial files");
        if let Err(cleanup) = paths.remove() {
            warn!(error = %cleanup, "cleanup failed");
        }
    })
}
