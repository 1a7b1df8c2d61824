pub mod csr;
pub mod extensions;
pub mod params;

use der::{Decode, DecodePem, Encode, EncodePem};
use extensions::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAltName, ToAndFromX509Extension,
};
use params::{DistinguishedName, ExtensionParam, Validity};
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{PkiError, Result};
use crate::issuer::Issuer;
use crate::key::{KeyPair, PublicKey};
use crate::ledger::Serial;

/// Represents the supported signature algorithms for certificates.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption.
    Sha256WithRSA,
    /// SHA-256 with ECDSA.
    Sha256WithECDSA,
    /// SHA-384 with ECDSA.
    Sha384WithECDSA,
    /// Pure Ed25519.
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn from_algorithm_identifier(id: &AlgorithmIdentifierOwned) -> Result<Self> {
        match id.oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => Ok(Self::Sha256WithRSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_256 => Ok(Self::Sha256WithECDSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_384 => Ok(Self::Sha384WithECDSA),
            const_oid::db::rfc8410::ID_ED_25519 => Ok(Self::Ed25519),
            other => Err(PkiError::DecodingError(format!(
                "Unsupported signature algorithm {other}"
            ))),
        }
    }

    /// Digest name as recorded in CA metadata.
    pub fn digest_name(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256WithRSA | SignatureAlgorithm::Sha256WithECDSA => "sha256",
            SignatureAlgorithm::Sha384WithECDSA => "sha384",
            SignatureAlgorithm::Ed25519 => "ed25519",
        }
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    fn from(value: SignatureAlgorithm) -> Self {
        match value {
            SignatureAlgorithm::Sha256WithRSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(der::Any::null()),
            },
            SignatureAlgorithm::Sha256WithECDSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            SignatureAlgorithm::Sha384WithECDSA => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_384,
                parameters: None,
            },
            SignatureAlgorithm::Ed25519 => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc8410::ID_ED_25519,
                parameters: None,
            },
        }
    }
}

/// Represents an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_pem(pem.as_bytes())?,
        })
    }

    pub fn serial(&self) -> Result<Serial> {
        Serial::from_be_bytes(self.inner.tbs_certificate.serial_number.as_bytes())
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.subject)
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.issuer)
    }

    pub fn validity(&self) -> Validity {
        let validity = &self.inner.tbs_certificate.validity;
        Validity {
            not_before: to_offset_date_time(validity.not_before),
            not_after: to_offset_date_time(validity.not_after),
        }
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.tbs_certificate.subject_public_key_info)
    }

    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm> {
        SignatureAlgorithm::from_algorithm_identifier(&self.inner.signature_algorithm)
    }

    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ExtensionParam::from_x509)
            .collect()
    }

    /// Decodes the extension of type `E`, if present.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        self.extensions()
            .iter()
            .find(|ext| ext.oid == E::OID)
            .map(|ext| ext.to_extension::<E>())
            .transpose()
    }

    pub fn basic_constraints(&self) -> Result<BasicConstraints> {
        Ok(self.extension::<BasicConstraints>()?.unwrap_or_default())
    }

    pub fn is_ca(&self) -> Result<bool> {
        Ok(self.basic_constraints()?.is_ca)
    }

    pub fn key_usage(&self) -> Result<Option<KeyUsage>> {
        self.extension::<KeyUsage>()
    }

    pub fn extended_key_usage(&self) -> Result<Vec<extensions::ExtendedKeyUsageOption>> {
        Ok(self
            .extension::<ExtendedKeyUsage>()?
            .map(|eku| eku.usage)
            .unwrap_or_default())
    }

    pub fn subject_alt_names(&self) -> Result<Vec<String>> {
        Ok(self
            .extension::<SubjectAltName>()?
            .map(|san| san.names)
            .unwrap_or_default())
    }

    /// Checks that `issuer` signed this certificate: names chain, the
    /// issuer is a CA and the signature verifies under the issuer's key.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        let tbs = &self.inner.tbs_certificate;
        if tbs.issuer != issuer.inner.tbs_certificate.subject {
            return Err(PkiError::Verification(format!(
                "issuer name {} does not match {}",
                self.issuer().to_oneline(),
                issuer.subject().to_oneline()
            )));
        }
        if !issuer.is_ca()? {
            return Err(PkiError::Verification(format!(
                "{} is not a CA certificate",
                issuer.subject().to_oneline()
            )));
        }
        if tbs.signature != self.inner.signature_algorithm {
            return Err(PkiError::Verification(
                "inner and outer signature algorithms differ".to_string(),
            ));
        }
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            PkiError::Verification("signature has unused bits".to_string())
        })?;
        issuer
            .public_key()?
            .verify(&self.signature_algorithm()?, &tbs.to_der()?, signature)
    }

    /// Extracts certificate information into a `CertificationRequestInfo`.
    pub fn to_cert_info(&self) -> Result<params::CertificationRequestInfo> {
        Ok(params::CertificationRequestInfo {
            subject: self.subject(),
            subject_public_key: self.public_key()?,
            usages: self.extended_key_usage()?,
            is_ca: self.is_ca()?,
            path_length: self.basic_constraints()?.max_path_length,
            key_usage: self.key_usage()?.map(|ku| ku.0),
            extensions: self.extensions(),
        })
    }
}

fn to_offset_date_time(time: x509_cert::time::Time) -> OffsetDateTime {
    match time {
        x509_cert::time::Time::UtcTime(ut) => OffsetDateTime::from(ut.to_system_time()),
        x509_cert::time::Time::GeneralTime(gt) => OffsetDateTime::from(gt.to_system_time()),
    }
}

/// Verifies an ordered chain `[leaf, ..., root]`.
///
/// Every certificate must be signed by its successor, must be within its
/// validity window now, and the last element must be self-signed.
pub fn verify_chain(chain: &[Certificate]) -> Result<()> {
    let Some(anchor) = chain.last() else {
        return Err(PkiError::Verification("empty chain".to_string()));
    };
    let now = OffsetDateTime::now_utc();
    for cert in chain {
        if !cert.validity().contains(now) {
            return Err(PkiError::Verification(format!(
                "{} is outside its validity period",
                cert.subject().to_oneline()
            )));
        }
    }
    for pair in chain.windows(2) {
        pair[0].verify_issued_by(&pair[1])?;
    }
    anchor.verify_issued_by(anchor)
}

// Helper struct for self-signed certificates
pub(crate) struct SelfIssuer<'a> {
    pub name: DistinguishedName,
    pub key: &'a KeyPair,
}

impl Issuer for SelfIssuer<'_> {
    fn issuer_name(&self) -> DistinguishedName {
        self.name.clone()
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }
}

/// A CA certificate together with its decrypted private key.
#[derive(Debug, Clone)]
pub struct CertificateWithPrivateKey {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issuer for CertificateWithPrivateKey {
    fn issuer_name(&self) -> DistinguishedName {
        // The name of the issuer is the subject of the certificate
        self.cert.subject()
    }

    fn issuer_x509_name(&self) -> Result<x509_cert::name::Name> {
        Ok(self.cert.inner.tbs_certificate.subject.clone())
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }
}
