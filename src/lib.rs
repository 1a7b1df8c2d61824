//! # ca-hierarchy - A Small Hierarchical PKI in Pure Rust
//!
//! ca-hierarchy runs a two-level certificate authority: one self-signed root
//! and four intermediates, each dedicated to one kind of principal. It is
//! built on the RustCrypto crates and keeps all of its state in a plain
//! directory tree.
//!
//! ## The Hierarchy
//!
//! - **Root CA**: signs the intermediates and nothing else
//! - **Domain server CA**: TLS server certificates for the organization's domain (default server issuer)
//! - **Generic server CA**: TLS server certificates for other infrastructure
//! - **People CA**: client and S/MIME certificates for users
//! - **Device CA**: certificates usable as both TLS client and server
//!
//! Every CA owns a serial ledger. Serials are allocated contiguously, never
//! reused, and a serial allocated for an issuance that fails is voided.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ca_hierarchy::{
//!     config::HierarchyConfig,
//!     hierarchy::HierarchyManager,
//!     issuance::{CertificateRequest, IssuanceEngine},
//!     operator::ScriptedOperator,
//!     policy::PrincipalClass,
//!     provider::RustCryptoProvider,
//!     vault::PassphraseVault,
//! };
//!
//! # fn main() -> Result<(), ca_hierarchy::error::PkiError> {
//! let config = HierarchyConfig::builder()
//!     .base_dir("/srv/pki".into())
//!     .organization("ACME".to_string())
//!     .domain("example.com".to_string())
//!     .build();
//! let manager = HierarchyManager::new(config, RustCryptoProvider::default());
//!
//! let mut operator = ScriptedOperator::new().with_all("correct horse");
//! let mut vault = PassphraseVault::new();
//! let hierarchy = manager.setup(&mut operator, &mut vault)?;
//!
//! let request = CertificateRequest::builder()
//!     .class(PrincipalClass::Server)
//!     .common_name("mail.example.com".to_string())
//!     .alt_names(vec!["smtp.example.com".to_string()])
//!     .build();
//! let outcome = IssuanceEngine::new(&manager, &hierarchy)
//!     .issue(&request, &mut operator, &mut vault)?;
//! if let Some(bundle) = outcome.bundle() {
//!     println!("issued serial {} to {}", bundle.serial, bundle.artifact);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`error::PkiError`]:
//!
//! ```rust
//! use ca_hierarchy::{error::PkiError, policy::PrincipalClass};
//!
//! match "printer".parse::<PrincipalClass>() {
//!     Ok(class) => println!("class {class}"),
//!     Err(PkiError::UnknownProfile(name)) => println!("no profile named {name}"),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`policy`]: CA roles, principal classes and their issuance profiles
//! - [`ledger`]: Per-CA serial allocation and issuance records
//! - [`vault`]: Session cache of CA passphrases
//! - [`provider`]: The crypto provider seam and its RustCrypto implementation
//! - [`hierarchy`]: Setup, loading and teardown of the CA hierarchy
//! - [`issuance`]: End-entity certificate issuance
//! - [`operator`]: Passphrase prompts and confirmations
//! - [`config`]: TOML configuration
//! - [`storage`]: On-disk layout and file permissions
//! - [`key`], [`cert`], [`issuer`], [`tbs_certificate`]: X.509 building blocks

pub mod cert;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod issuance;
pub mod issuer;
pub mod key;
pub mod ledger;
pub mod operator;
pub mod pem_utils;
pub mod policy;
pub mod provider;
pub mod storage;
pub mod tbs_certificate;
pub mod vault;
