//! Issuance of end-entity certificates.

use bon::Builder;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cert::Certificate;
use crate::cert::csr::CertificateSigningRequest;
use crate::cert::params::DistinguishedName;
use crate::config::{HierarchyConfig, OverwritePolicy};
use crate::error::{PkiError, Result};
use crate::hierarchy::{CertificateAuthority, Hierarchy, HierarchyManager};
use crate::ledger::{LedgerEntry, Serial};
use crate::operator::{Confirmation, Operator};
use crate::pem_utils;
use crate::policy::{CaRole, IssuanceProfile, PrincipalClass, ServerCa};
use crate::provider::CryptoProvider;
use crate::storage::{self, ArtifactPaths};
use crate::vault::PassphraseVault;

/// What the operator asked for.
///
/// # Example
/// ```
/// use ca_hierarchy::issuance::CertificateRequest;
/// use ca_hierarchy::policy::PrincipalClass;
/// let request = CertificateRequest::builder()
///     .class(PrincipalClass::Server)
///     .common_name("mail.example.com".to_string())
///     .alt_names(vec!["smtp.example.com".to_string()])
///     .build();
/// assert!(request.organizational_unit.is_none());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct CertificateRequest {
    pub class: PrincipalClass,
    #[builder(default)]
    pub server_ca: ServerCa,
    pub common_name: String,
    pub organizational_unit: Option<String>,
    pub email: Option<String>,
    /// Extra DNS names, honoured for server requests only.
    #[builder(default)]
    pub alt_names: Vec<String>,
}

/// Everything produced by one issuance.
#[derive(Debug)]
pub struct IssuedCertificateBundle {
    pub artifact: String,
    pub ca: CaRole,
    pub serial: Serial,
    pub key_pem: Zeroizing<String>,
    pub certificate: Certificate,
    pub csr: CertificateSigningRequest,
    /// `[leaf, intermediate, root]`.
    pub chain: Vec<Certificate>,
    pub files: ArtifactPaths,
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(Box<IssuedCertificateBundle>),
    /// A bundle with this name exists and the operator kept it.
    Declined { artifact: String },
}

impl IssueOutcome {
    pub fn bundle(&self) -> Option<&IssuedCertificateBundle> {
        match self {
            IssueOutcome::Issued(bundle) => Some(bundle),
            IssueOutcome::Declined { .. } => None,
        }
    }
}

/// Filesystem-safe artifact name: lower case, whitespace and path
/// separators collapsed to `_`. Names of the CA's own files are refused.
pub fn artifact_name(subject: &str) -> Result<String> {
    let separators =
        Regex::new(r"[\s/\\]+").map_err(|e| PkiError::InvalidInput(e.to_string()))?;
    let name = separators
        .replace_all(subject.trim(), "_")
        .to_lowercase();
    if name.is_empty() || name.chars().all(|c| c == '_' || c == '.') {
        return Err(PkiError::EmptySubject);
    }
    if storage::is_reserved_artifact(&name) {
        return Err(PkiError::ReservedSubject(subject.trim().to_string()));
    }
    Ok(name)
}

/// Issues leaf certificates from a loaded hierarchy.
pub struct IssuanceEngine<'a, P> {
    hierarchy: &'a Hierarchy,
    config: &'a HierarchyConfig,
    provider: &'a P,
}

impl<'a, P: CryptoProvider> IssuanceEngine<'a, P> {
    pub fn new(manager: &'a HierarchyManager<P>, hierarchy: &'a Hierarchy) -> Self {
        Self {
            hierarchy,
            config: manager.config(),
            provider: manager.provider(),
        }
    }

    /// Validates, signs, records and writes one certificate bundle.
    pub fn issue(
        &self,
        request: &CertificateRequest,
        operator: &mut dyn Operator,
        vault: &mut PassphraseVault,
    ) -> Result<IssueOutcome> {
        let common_name = request.common_name.trim();
        if common_name.is_empty() {
            return Err(PkiError::EmptySubject);
        }
        let artifact = artifact_name(common_name)?;
        let ca = self
            .hierarchy
            .authority(request.class.issuing_role(request.server_ca))?;
        let files = ca.paths().artifact(&artifact);
        let profile = ca.profile();
        let subject = leaf_subject(ca, profile, request, common_name);

        let superseded = if files.any_exists() {
            let confirmation = Confirmation::OverwriteBundle {
                artifact: artifact.clone(),
            };
            if !operator.confirm(&confirmation) {
                warn!(%artifact, ca = %ca.role(), "existing bundle kept, nothing issued");
                return Ok(IssueOutcome::Declined { artifact });
            }
            Some(superseded_serial(ca, &files, &subject))
        } else {
            None
        };

        let passphrase = ca.passphrase(self.provider, operator, vault)?;

        if let Some(old_serial) = superseded {
            if let (OverwritePolicy::Revoke, Some(serial)) = (self.config.overwrite_policy, old_serial)
            {
                ca.ledger().mark_revoked(serial)?;
            }
            files.remove_all()?;
            info!(%artifact, ca = %ca.role(), "removed superseded bundle");
        }

        let alt_names = resolve_alt_names(profile, request, common_name);

        let key = self.provider.generate_key_pair(self.config.key_algorithm)?;
        let csr = self.provider.build_csr(&key, &subject, &alt_names)?;

        // The allocation is on disk before any file is written, so files
        // orphaned by a crash never share a serial with a later issuance.
        let mut tx = ca.ledger().transaction();
        let serial = tx.allocate_serial()?;
        let certificate = self.provider.sign(
            &csr,
            ca.certificate(),
            ca.encrypted_key(),
            &passphrase,
            profile,
            profile.validity_days,
            serial,
        )?;
        let key_pem = self.provider.export_key(&key)?;
        let chain: Vec<Certificate> = std::iter::once(certificate.clone())
            .chain(ca.chain().iter().cloned())
            .collect();

        let written = (|| -> Result<()> {
            write_bundle(&files, &key_pem, &certificate, &csr, &chain)?;
            tx.record_issued(LedgerEntry::new(
                serial,
                subject.to_oneline(),
                OffsetDateTime::now_utc(),
                certificate.validity().not_after,
            ))?;
            tx.commit()
        })();
        if let Err(e) = written {
            warn!(%artifact, %serial, error = %e, "issuance failed, removing bundle files");
            files.remove_all()?;
            return Err(e);
        }

        info!(
            ca = %ca.role(),
            %serial,
            subject = %subject.to_oneline(),
            "issued certificate"
        );
        Ok(IssueOutcome::Issued(Box::new(IssuedCertificateBundle {
            artifact,
            ca: ca.role(),
            serial,
            key_pem,
            certificate,
            csr,
            chain,
            files,
        })))
    }

    /// Marks an issued serial revoked in the CA's ledger.
    pub fn revoke(&self, ca: CaRole, serial: Serial) -> Result<()> {
        self.hierarchy.authority(ca)?.ledger().mark_revoked(serial)
    }
}

/// Serial of the bundle being replaced: only if this CA signed it and its
/// ledger entry names both the certificate's subject and `subject`.
fn superseded_serial(
    ca: &CertificateAuthority,
    files: &ArtifactPaths,
    subject: &DistinguishedName,
) -> Option<Serial> {
    let pem = storage::read_to_string(&files.cert).ok()?;
    let cert = Certificate::from_pem(&pem).ok()?;
    if let Err(e) = cert.verify_issued_by(ca.certificate()) {
        warn!(path = %files.cert.display(), ca = %ca.role(), error = %e, "existing certificate was not issued by this CA");
        return None;
    }
    let serial = cert.serial().ok()?;
    match ca.ledger().lookup(serial) {
        Some(entry)
            if entry.subject == cert.subject().to_oneline()
                && entry.subject == subject.to_oneline() =>
        {
            Some(serial)
        }
        _ => {
            warn!(ca = %ca.role(), %serial, "existing certificate has no matching ledger entry");
            None
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Subject of the leaf: organization and country follow the issuing CA,
/// OU and email fall back to the profile defaults.
fn leaf_subject(
    ca: &CertificateAuthority,
    profile: &IssuanceProfile,
    request: &CertificateRequest,
    common_name: &str,
) -> DistinguishedName {
    let issuer = ca.certificate().subject();
    DistinguishedName {
        common_name: common_name.to_string(),
        country: issuer.country,
        state: issuer.state,
        locality: issuer.locality,
        organization: issuer.organization,
        organization_unit: non_blank(&request.organizational_unit)
            .or_else(|| profile.default_organizational_unit.clone()),
        email: non_blank(&request.email).or_else(|| profile.default_email.clone()),
    }
}

/// The common name first, then the requested alternates, without duplicates.
fn resolve_alt_names(
    profile: &IssuanceProfile,
    request: &CertificateRequest,
    common_name: &str,
) -> Vec<String> {
    if !profile.accepts_alt_names {
        if !request.alt_names.is_empty() {
            warn!(
                class = %request.class,
                ignored = ?request.alt_names,
                "alternate names only apply to server certificates"
            );
        }
        return Vec::new();
    }
    let mut names = vec![common_name.to_string()];
    for name in &request.alt_names {
        let name = name.trim();
        if name.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            continue;
        }
        names.push(name.to_string());
    }
    debug!(?names, "resolved subject alternative names");
    names
}

fn write_bundle(
    files: &ArtifactPaths,
    key_pem: &str,
    certificate: &Certificate,
    csr: &CertificateSigningRequest,
    chain: &[Certificate],
) -> Result<()> {
    storage::write_private(&files.key, key_pem.as_bytes())?;
    storage::write_public(&files.cert, certificate.to_pem()?.as_bytes())?;
    storage::write_public(&files.csr, csr.to_pem()?.as_bytes())?;
    storage::write_public(
        &files.fullchain,
        pem_utils::join_certificates(chain)?.as_bytes(),
    )
}
