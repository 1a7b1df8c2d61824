use der::Encode;
use der::flagset::FlagSet;
use x509_cert::certificate::CertificateInner;

use crate::cert::Certificate;
use crate::cert::extensions::AuthorityKeyIdentifier;
use crate::cert::extensions::BasicConstraints;
use crate::cert::extensions::ExtendedKeyUsage;
use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::cert::extensions::KeyUsage;
use crate::cert::extensions::KeyUsages;
use crate::cert::extensions::SubjectKeyIdentifier;
use crate::cert::extensions::ToAndFromX509Extension;
use crate::cert::params::Validity;
use crate::cert::params::{CertificationRequestInfo, DistinguishedName, ExtensionParam};
use crate::error::{PkiError, Result};
use crate::key::KeyPair;
use crate::ledger::Serial;
use crate::tbs_certificate::TbsCertificate;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> DistinguishedName;

    /// Returns the encoded issuer name placed in issued certificates.
    fn issuer_x509_name(&self) -> Result<x509_cert::name::Name> {
        self.issuer_name().as_x509_name()
    }

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate based on the provided certification request information.
    ///
    /// # Arguments
    /// * `cert_request` - Subject, public key and requested usages.
    /// * `validity` - The validity window of the new certificate.
    /// * `serial` - The serial allocated from the issuer's ledger.
    ///
    /// # Returns
    /// The signed `Certificate`.
    fn issue(
        &self,
        cert_request: &CertificationRequestInfo,
        validity: Validity,
        serial: Serial,
    ) -> Result<Certificate> {
        let signing_key = self.signing_key();
        let signature_algo = signing_key.signature_algorithm();
        let authority_key_id = AuthorityKeyIdentifier {
            key_identifier: signing_key.public_key().key_identifier()?,
        };
        let subject_key_id =
            SubjectKeyIdentifier(cert_request.subject_public_key.key_identifier()?);

        let basic_constraints = BasicConstraints {
            is_ca: cert_request.is_ca,
            max_path_length: cert_request.path_length.filter(|_| cert_request.is_ca),
        };

        let mut extensions: Vec<ExtensionParam> = vec![
            ExtensionParam::from_extension(basic_constraints, true)?,
            ExtensionParam::from_extension(subject_key_id, false)?,
            ExtensionParam::from_extension(authority_key_id, false)?,
        ];

        let key_usage_flags = cert_request
            .key_usage
            .unwrap_or_else(|| derive_key_usage(cert_request));
        if !key_usage_flags.is_empty() {
            let key_usage = KeyUsage(key_usage_flags);
            extensions.push(ExtensionParam::from_extension(key_usage, true)?);
        }

        if !cert_request.usages.is_empty() {
            let extended_key_usage = ExtendedKeyUsage {
                usage: cert_request.usages.clone(),
            };
            extensions.push(ExtensionParam::from_extension(extended_key_usage, false)?);
        }

        // Issuer-controlled extensions win over anything carried in the request.
        let controlled = [
            BasicConstraints::OID,
            SubjectKeyIdentifier::OID,
            AuthorityKeyIdentifier::OID,
            KeyUsage::OID,
            ExtendedKeyUsage::OID,
        ];
        let combined_extensions = cert_request
            .extensions
            .iter()
            .filter(|ext| !controlled.contains(&ext.oid))
            .cloned()
            .chain(extensions)
            .collect();

        let tbs_cert = TbsCertificate {
            serial_number: serial,
            signature_algorithm: signature_algo,
            issuer: self.issuer_x509_name()?,
            not_before: validity.not_before,
            not_after: validity.not_after,
            subject: cert_request.subject.clone(),
            subject_public_key: cert_request.subject_public_key.clone(),
            extensions: combined_extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let signature = signing_key.sign_data(&tbs_cert_inner.to_der()?)?;

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: signature_algo.into(),
            signature: der::asn1::BitString::from_bytes(&signature)
                .map_err(|e| PkiError::EncodingError(e.to_string()))?,
        };

        Ok(Certificate { inner: cert_inner })
    }
}

fn derive_key_usage(cert_request: &CertificationRequestInfo) -> FlagSet<KeyUsages> {
    let mut key_usage_flags: FlagSet<KeyUsages> = FlagSet::default();

    if cert_request.is_ca {
        key_usage_flags |= KeyUsages::KeyCertSign;
        key_usage_flags |= KeyUsages::CRLSign;
    }

    for usage in &cert_request.usages {
        match usage {
            ExtendedKeyUsageOption::ClientAuth
            | ExtendedKeyUsageOption::ServerAuth
            | ExtendedKeyUsageOption::EmailProtection => {
                key_usage_flags |= KeyUsages::DigitalSignature;
                key_usage_flags |= KeyUsages::KeyEncipherment;
            }
            ExtendedKeyUsageOption::CodeSigning
            | ExtendedKeyUsageOption::TimeStamping
            | ExtendedKeyUsageOption::OcspSigning => {
                key_usage_flags |= KeyUsages::DigitalSignature;
            }
        }
    }
    key_usage_flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateWithPrivateKey, SelfIssuer};
    use crate::key::PublicKey;

    fn ca() -> CertificateWithPrivateKey {
        let key = KeyPair::generate_ecdsa_p256();
        let name = DistinguishedName::builder()
            .common_name("Test Root".to_string())
            .build();
        let info = CertificationRequestInfo::builder()
            .subject(name.clone())
            .subject_public_key(PublicKey::from_key_pair(&key))
            .is_ca(true)
            .build();
        let cert = SelfIssuer { name, key: &key }
            .issue(&info, Validity::for_days(30), Serial::new(7))
            .unwrap();
        CertificateWithPrivateKey { cert, key }
    }

    #[test]
    fn test_issued_certificate_carries_serial_and_verifies() {
        let ca = ca();
        let leaf_key = KeyPair::generate_ed25519();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .common_name("leaf".to_string())
                    .build(),
            )
            .subject_public_key(PublicKey::from_key_pair(&leaf_key))
            .usages(vec![ExtendedKeyUsageOption::ServerAuth])
            .build();
        let leaf = ca
            .issue(&info, Validity::for_days(1), Serial::new(1000))
            .unwrap();

        assert_eq!(leaf.serial().unwrap(), Serial::new(1000));
        assert!(!leaf.is_ca().unwrap());
        leaf.verify_issued_by(&ca.cert).unwrap();
        ca.cert.verify_issued_by(&ca.cert).unwrap();
    }

    #[test]
    fn test_derived_key_usage_for_ca() {
        let ca = ca();
        let usage = ca.cert.key_usage().unwrap().unwrap();
        assert!(usage.contains(KeyUsages::KeyCertSign));
        assert!(usage.contains(KeyUsages::CRLSign));
    }

    #[test]
    fn test_request_cannot_override_basic_constraints() {
        let ca = ca();
        let leaf_key = KeyPair::generate_ecdsa_p256();
        let forged = ExtensionParam::from_extension(
            BasicConstraints {
                is_ca: true,
                max_path_length: None,
            },
            true,
        )
        .unwrap();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .common_name("sneaky".to_string())
                    .build(),
            )
            .subject_public_key(PublicKey::from_key_pair(&leaf_key))
            .extensions(vec![forged])
            .build();
        let leaf = ca
            .issue(&info, Validity::for_days(1), Serial::new(1001))
            .unwrap();
        assert!(!leaf.is_ca().unwrap());
    }
}
