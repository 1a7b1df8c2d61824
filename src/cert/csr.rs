use const_oid::AssociatedOid;
use der::asn1::{BitString, SetOfVec};
use der::{Any, Decode, DecodePem, Encode, EncodePem};
use x509_cert::attr::Attribute;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq};

use super::SignatureAlgorithm;
use super::extensions::{SubjectAltName, ToAndFromX509Extension};
use super::params::{DistinguishedName, ExtensionParam};
use crate::error::{PkiError, Result};
use crate::key::{KeyPair, PublicKey};

/// A PKCS#10 certificate signing request.
///
/// Requested extensions travel in a single `extensionRequest` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    pub inner: CertReq,
}

impl CertificateSigningRequest {
    /// Builds and signs a request for `subject`.
    ///
    /// A non-empty `alt_names` list is requested as a DNS-only
    /// SubjectAltName extension, in the given order.
    pub fn build(key: &KeyPair, subject: &DistinguishedName, alt_names: &[String]) -> Result<Self> {
        let mut attributes = Vec::new();
        if !alt_names.is_empty() {
            let san = SubjectAltName {
                names: alt_names.to_vec(),
            };
            let extension = ExtensionParam::from_extension(san, false)?.to_x509()?;
            let request = ExtensionReq(vec![extension]);
            attributes.push(Attribute {
                oid: ExtensionReq::OID,
                values: SetOfVec::try_from(vec![Any::encode_from(&request)?])?,
            });
        }

        let info = CertReqInfo {
            version: x509_cert::request::Version::V1,
            subject: subject.as_x509_name()?,
            public_key: key.as_spki()?,
            attributes: SetOfVec::try_from(attributes)?,
        };
        let signature = key.sign_data(&info.to_der()?)?;

        Ok(Self {
            inner: CertReq {
                info,
                algorithm: key.signature_algorithm().into(),
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }

    /// Checks the proof of possession: the request is signed by the key it carries.
    pub fn verify(&self) -> Result<()> {
        let algorithm = SignatureAlgorithm::from_algorithm_identifier(&self.inner.algorithm)?;
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            PkiError::Verification("request signature has unused bits".to_string())
        })?;
        self.public_key()?
            .verify(&algorithm, &self.inner.info.to_der()?, signature)
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.info.subject)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.info.public_key)
    }

    /// All extensions carried in `extensionRequest` attributes.
    pub fn requested_extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut extensions = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != ExtensionReq::OID {
                continue;
            }
            for value in attribute.values.iter() {
                let request = ExtensionReq::from_der(&value.to_der()?)?;
                extensions.extend(request.0.iter().map(ExtensionParam::from_x509));
            }
        }
        Ok(extensions)
    }

    /// DNS names requested through SubjectAltName, empty when none were asked for.
    pub fn requested_alt_names(&self) -> Result<Vec<String>> {
        match self
            .requested_extensions()?
            .iter()
            .find(|ext| ext.oid == SubjectAltName::OID)
        {
            Some(ext) => Ok(ext.to_extension::<SubjectAltName>()?.names),
            None => Ok(Vec::new()),
        }
    }

    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertReq::from_pem(pem.as_bytes())?,
        })
    }
}
