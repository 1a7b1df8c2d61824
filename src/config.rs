use std::fs;
use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PkiError, Result};
use crate::key::KeyAlgorithm;
use crate::policy::CaRole;

/// PBKDF2 rounds used for CA private keys unless configured otherwise.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// What happens to the ledger entry of a bundle that gets overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// The superseded entry keeps its status.
    #[default]
    Retain,
    /// The superseded serial is marked revoked.
    Revoke,
}

/// Validity periods in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityDays {
    pub root: u32,
    pub intermediate: u32,
    pub server: u32,
    pub user: u32,
    pub device: u32,
}

impl Default for ValidityDays {
    fn default() -> Self {
        Self {
            root: 7300,
            intermediate: 3650,
            server: 825,
            user: 730,
            device: 1095,
        }
    }
}

/// First serial each CA hands out. Offsets keep serials distinguishable across CAs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialStarts {
    pub root: u64,
    pub domain_server: u64,
    pub generic_server: u64,
    pub people: u64,
    pub device: u64,
}

impl Default for SerialStarts {
    fn default() -> Self {
        Self {
            root: 1000,
            domain_server: 1000,
            generic_server: 4000,
            people: 2000,
            device: 3000,
        }
    }
}

impl SerialStarts {
    pub fn for_role(&self, role: CaRole) -> u64 {
        match role {
            CaRole::Root => self.root,
            CaRole::DomainServer => self.domain_server,
            CaRole::GenericServer => self.generic_server,
            CaRole::People => self.people,
            CaRole::Device => self.device,
        }
    }
}

/// Optional naming overrides for one CA and the certificates it issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleNaming {
    /// Common name of the CA certificate itself.
    pub common_name: Option<String>,
    pub organizational_unit: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
    pub root: RoleNaming,
    pub domain_server: RoleNaming,
    pub generic_server: RoleNaming,
    pub people: RoleNaming,
    pub device: RoleNaming,
}

impl Naming {
    pub fn for_role(&self, role: CaRole) -> &RoleNaming {
        match role {
            CaRole::Root => &self.root,
            CaRole::DomainServer => &self.domain_server,
            CaRole::GenericServer => &self.generic_server,
            CaRole::People => &self.people,
            CaRole::Device => &self.device,
        }
    }
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

/// Settings for one CA hierarchy.
///
/// # Example
/// ```
/// use ca_hierarchy::config::HierarchyConfig;
/// let config: HierarchyConfig = toml::from_str(r#"
///     base_dir = "/srv/pki"
///     organization = "ACME"
///     domain = "example.com"
///
///     [serial_start]
///     device = 5000
/// "#).unwrap();
/// assert_eq!(config.serial_start.device, 5000);
/// assert_eq!(config.serial_start.people, 2000);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub base_dir: PathBuf,
    pub organization: String,
    pub domain: String,
    pub country: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
    #[builder(default = DEFAULT_KDF_ITERATIONS)]
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[builder(default)]
    #[serde(default)]
    pub overwrite_policy: OverwritePolicy,
    #[builder(default)]
    #[serde(default)]
    pub validity: ValidityDays,
    #[builder(default)]
    #[serde(default)]
    pub serial_start: SerialStarts,
    #[builder(default)]
    #[serde(default)]
    pub naming: Naming,
}

impl HierarchyConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| PkiError::Config(format!("{}: {e}", path.display())))?;
        let config: HierarchyConfig = toml::from_str(&text)
            .map_err(|e| PkiError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!(path = %path.display(), "loaded hierarchy configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() {
            return Err(PkiError::Config("organization must not be empty".to_string()));
        }
        if self.domain.trim().is_empty() {
            return Err(PkiError::Config("domain must not be empty".to_string()));
        }
        if self.kdf_iterations == 0 {
            return Err(PkiError::Config("kdf_iterations must be positive".to_string()));
        }
        let v = &self.validity;
        if [v.root, v.intermediate, v.server, v.user, v.device].contains(&0) {
            return Err(PkiError::Config("validity periods must be positive".to_string()));
        }
        for role in CaRole::ALL {
            if self.serial_start.for_role(role) == 0 {
                return Err(PkiError::Config(format!(
                    "serial_start for {role} must be positive"
                )));
            }
        }
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(PkiError::Config(format!(
                    "country must be a two letter code, got {country:?}"
                )));
            }
        }
        Ok(())
    }
}
