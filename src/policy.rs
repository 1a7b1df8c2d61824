//! Policy catalog: what each CA issues, and with which extensions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cert::extensions::{ExtendedKeyUsageOption, FlagSet, KeyUsages};
use crate::cert::params::DistinguishedName;
use crate::config::HierarchyConfig;
use crate::error::{PkiError, Result};

/// The five certificate authorities of the hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CaRole {
    Root,
    DomainServer,
    GenericServer,
    People,
    Device,
}

impl CaRole {
    /// Intermediates in the order setup creates them.
    pub const INTERMEDIATES: [CaRole; 4] = [
        CaRole::DomainServer,
        CaRole::GenericServer,
        CaRole::People,
        CaRole::Device,
    ];

    pub const ALL: [CaRole; 5] = [
        CaRole::Root,
        CaRole::DomainServer,
        CaRole::GenericServer,
        CaRole::People,
        CaRole::Device,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            CaRole::Root => "root",
            CaRole::DomainServer => "domain-server",
            CaRole::GenericServer => "generic-server",
            CaRole::People => "people",
            CaRole::Device => "device",
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, CaRole::Root)
    }
}

impl fmt::Display for CaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.dir_name())
    }
}

impl FromStr for CaRole {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        CaRole::ALL
            .into_iter()
            .find(|role| role.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PkiError::InvalidInput(format!("unknown certificate authority: {s}")))
    }
}

/// Category of certificate subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalClass {
    Server,
    User,
    Device,
}

impl fmt::Display for PrincipalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrincipalClass::Server => "server",
            PrincipalClass::User => "user",
            PrincipalClass::Device => "device",
        })
    }
}

impl FromStr for PrincipalClass {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(PrincipalClass::Server),
            "user" => Ok(PrincipalClass::User),
            "device" => Ok(PrincipalClass::Device),
            _ => Err(PkiError::UnknownProfile(s.to_string())),
        }
    }
}

/// Which intermediate signs a server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerCa {
    #[default]
    Domain,
    Generic,
}

impl FromStr for ServerCa {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domain" => Ok(ServerCa::Domain),
            "generic" => Ok(ServerCa::Generic),
            other => Err(PkiError::InvalidInput(format!("unknown server CA: {other}"))),
        }
    }
}

impl PrincipalClass {
    /// The CA that issues for this class. `server_ca` only matters for servers.
    pub fn issuing_role(self, server_ca: ServerCa) -> CaRole {
        match (self, server_ca) {
            (PrincipalClass::Server, ServerCa::Domain) => CaRole::DomainServer,
            (PrincipalClass::Server, ServerCa::Generic) => CaRole::GenericServer,
            (PrincipalClass::User, _) => CaRole::People,
            (PrincipalClass::Device, _) => CaRole::Device,
        }
    }
}

/// Extensions and naming defaults a CA applies to what it issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceProfile {
    /// The CA applying this profile.
    pub role: CaRole,
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    pub key_usage: FlagSet<KeyUsages>,
    pub default_organizational_unit: Option<String>,
    pub default_email: Option<String>,
    pub accepts_alt_names: bool,
    pub is_ca: bool,
    pub path_length: Option<u8>,
    pub validity_days: u32,
}

/// Immutable table of profiles, one per CA role, plus CA naming.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    profiles: Vec<IssuanceProfile>,
    self_signed: IssuanceProfile,
    ca_subjects: Vec<(CaRole, DistinguishedName)>,
}

impl PolicyCatalog {
    pub fn new(config: &HierarchyConfig) -> Self {
        let validity = &config.validity;
        let naming = &config.naming;
        let ca_usage = KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature;
        let tls_usage = KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment;

        let leaf = |role: CaRole,
                    eku: Vec<ExtendedKeyUsageOption>,
                    key_usage: FlagSet<KeyUsages>,
                    ou: &str,
                    email: Option<String>,
                    validity_days: u32| {
            let overrides = naming.for_role(role);
            IssuanceProfile {
                role,
                extended_key_usage: eku,
                key_usage,
                default_organizational_unit: overrides
                    .organizational_unit
                    .clone()
                    .or_else(|| Some(ou.to_string())),
                default_email: overrides.email.clone().or(email),
                accepts_alt_names: matches!(role, CaRole::DomainServer | CaRole::GenericServer),
                is_ca: false,
                path_length: None,
                validity_days,
            }
        };

        let profiles = vec![
            IssuanceProfile {
                role: CaRole::Root,
                extended_key_usage: Vec::new(),
                key_usage: ca_usage.into(),
                default_organizational_unit: None,
                default_email: None,
                accepts_alt_names: false,
                is_ca: true,
                path_length: Some(0),
                validity_days: validity.intermediate,
            },
            leaf(
                CaRole::DomainServer,
                vec![ExtendedKeyUsageOption::ServerAuth],
                tls_usage.into(),
                "Servers",
                Some(format!("hostmaster@{}", config.domain)),
                validity.server,
            ),
            leaf(
                CaRole::GenericServer,
                vec![ExtendedKeyUsageOption::ServerAuth],
                tls_usage.into(),
                "Infrastructure",
                Some(format!("admin@{}", config.domain)),
                validity.server,
            ),
            leaf(
                CaRole::People,
                vec![
                    ExtendedKeyUsageOption::ClientAuth,
                    ExtendedKeyUsageOption::EmailProtection,
                ],
                KeyUsages::DigitalSignature | KeyUsages::NonRepudiation | KeyUsages::KeyEncipherment,
                "People",
                None,
                validity.user,
            ),
            leaf(
                CaRole::Device,
                vec![
                    ExtendedKeyUsageOption::ServerAuth,
                    ExtendedKeyUsageOption::ClientAuth,
                ],
                tls_usage.into(),
                "Devices",
                None,
                validity.device,
            ),
        ];

        let self_signed = IssuanceProfile {
            role: CaRole::Root,
            extended_key_usage: Vec::new(),
            key_usage: ca_usage.into(),
            default_organizational_unit: None,
            default_email: None,
            accepts_alt_names: false,
            is_ca: true,
            path_length: None,
            validity_days: validity.root,
        };

        let ca_subjects = CaRole::ALL
            .into_iter()
            .map(|role| (role, ca_subject(config, role)))
            .collect();

        Self {
            profiles,
            self_signed,
            ca_subjects,
        }
    }

    /// Profile for a principal class. Servers resolve through `server_ca`.
    pub fn profile_for(&self, class: PrincipalClass, server_ca: ServerCa) -> &IssuanceProfile {
        self.profile_for_role(class.issuing_role(server_ca))
    }

    /// Parses the class name first; anything but server, user or device is `UnknownProfile`.
    pub fn profile_for_name(&self, class: &str, server_ca: ServerCa) -> Result<&IssuanceProfile> {
        Ok(self.profile_for(class.parse()?, server_ca))
    }

    /// The profile `role` applies when it signs. The root's profile is the
    /// one for intermediate CA certificates.
    pub fn profile_for_role(&self, role: CaRole) -> &IssuanceProfile {
        self.profiles
            .iter()
            .find(|profile| profile.role == role)
            .unwrap_or(&self.self_signed)
    }

    /// Profile of the root's own self-signed certificate.
    pub fn self_signed_profile(&self) -> &IssuanceProfile {
        &self.self_signed
    }

    /// Validity of the certificate `role` itself holds.
    pub fn ca_validity_days(&self, role: CaRole) -> u32 {
        if role.is_root() {
            self.self_signed.validity_days
        } else {
            self.profile_for_role(CaRole::Root).validity_days
        }
    }

    pub fn ca_subject(&self, role: CaRole) -> DistinguishedName {
        self.ca_subjects
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, dn)| dn.clone())
            .unwrap_or_default()
    }
}

fn ca_subject(config: &HierarchyConfig, role: CaRole) -> DistinguishedName {
    let overrides = config.naming.for_role(role);
    let org = &config.organization;
    let default_cn = match role {
        CaRole::Root => format!("{org} Root CA"),
        CaRole::DomainServer => config.domain.clone(),
        CaRole::GenericServer => format!("{org} Server CA"),
        CaRole::People => format!("{org} People CA"),
        CaRole::Device => format!("{org} Device CA"),
    };
    DistinguishedName {
        common_name: overrides.common_name.clone().unwrap_or(default_cn),
        country: config.country.clone(),
        state: None,
        locality: None,
        organization: Some(org.clone()),
        organization_unit: overrides
            .organizational_unit
            .clone()
            .or_else(|| Some("Certificate Authority".to_string())),
        email: overrides.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PolicyCatalog {
        let config = HierarchyConfig::builder()
            .base_dir("/tmp/unused".into())
            .organization("ACME".to_string())
            .domain("example.com".to_string())
            .build();
        PolicyCatalog::new(&config)
    }

    #[test]
    fn test_server_profiles_differ_only_in_naming() {
        let catalog = catalog();
        let domain = catalog.profile_for(PrincipalClass::Server, ServerCa::Domain);
        let generic = catalog.profile_for(PrincipalClass::Server, ServerCa::Generic);
        assert_eq!(domain.extended_key_usage, vec![ExtendedKeyUsageOption::ServerAuth]);
        assert_eq!(domain.extended_key_usage, generic.extended_key_usage);
        assert_ne!(domain.default_organizational_unit, generic.default_organizational_unit);
        assert_ne!(domain.default_email, generic.default_email);
        assert!(domain.accepts_alt_names && generic.accepts_alt_names);
    }

    #[test]
    fn test_people_profile_has_non_repudiation() {
        let profile = catalog().profile_for(PrincipalClass::User, ServerCa::Domain).clone();
        assert_eq!(profile.role, CaRole::People);
        assert!(profile.key_usage.contains(KeyUsages::NonRepudiation));
        assert_eq!(
            profile.extended_key_usage,
            vec![
                ExtendedKeyUsageOption::ClientAuth,
                ExtendedKeyUsageOption::EmailProtection
            ]
        );
        assert!(!profile.accepts_alt_names);
    }

    #[test]
    fn test_device_profile_is_dual_use() {
        let catalog = catalog();
        let profile = catalog.profile_for(PrincipalClass::Device, ServerCa::Generic);
        assert_eq!(profile.role, CaRole::Device);
        assert_eq!(
            profile.extended_key_usage,
            vec![
                ExtendedKeyUsageOption::ServerAuth,
                ExtendedKeyUsageOption::ClientAuth
            ]
        );
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let err = catalog()
            .profile_for_name("printer", ServerCa::Domain)
            .unwrap_err();
        assert!(matches!(err, PkiError::UnknownProfile(name) if name == "printer"));
    }

    #[test]
    fn test_root_signs_intermediates_with_zero_path_length() {
        let catalog = catalog();
        let profile = catalog.profile_for_role(CaRole::Root);
        assert!(profile.is_ca);
        assert_eq!(profile.path_length, Some(0));
        assert!(catalog.self_signed_profile().path_length.is_none());
        assert_eq!(catalog.ca_subject(CaRole::DomainServer).common_name, "example.com");
        assert_eq!(catalog.ca_subject(CaRole::Root).common_name, "ACME Root CA");
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in CaRole::ALL {
            assert_eq!(role.to_string().parse::<CaRole>().unwrap(), role);
        }
    }
}
