use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Ia5StringRef, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::{Any, Tag, Tagged};
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::{FlagSet, KeyUsages, ToAndFromX509Extension};
pub use crate::cert::extensions::ExtendedKeyUsage;
pub use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::error::{PkiError, Result};
use crate::key::PublicKey;

const OID_COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const OID_STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const OID_LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_ORGANIZATION_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

/// Parameters for building an X.509 certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `usages` - A list of extended key usage options.
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `path_length` - pathLenConstraint for CA certificates.
/// * `key_usage` - Explicit key usage bits; derived from `usages` when absent.
/// * `extensions` - Additional X.509 extensions, e.g. copied from a CSR.
#[derive(Clone, Debug, Builder)]
pub struct CertificationRequestInfo {
    pub subject: DistinguishedName,
    pub subject_public_key: PublicKey,
    #[builder(default)]
    pub usages: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub is_ca: bool,
    pub path_length: Option<u8>,
    pub key_usage: Option<FlagSet<KeyUsages>>,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// Distinguished name parameters for building an X.509 certificate.
///
/// Absent attributes are omitted from the encoded name rather than
/// written as empty strings.
#[derive(Clone, Debug, Builder, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: String,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
    pub email: Option<String>,
}

impl DistinguishedName {
    /// Converts the distinguished name to an X.509-compatible format.
    ///
    /// Attributes are written most significant first (C, ST, L, O, OU, CN,
    /// emailAddress), the order OpenSSL prints them in.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName> {
        let mut rdns = Vec::new();
        if let Some(country) = non_empty(&self.country) {
            let value = Any::encode_from(&PrintableStringRef::new(country)?)?;
            rdns.push(single_rdn(OID_COUNTRY, value)?);
        }
        for (oid, value) in [
            (OID_STATE, &self.state),
            (OID_LOCALITY, &self.locality),
            (OID_ORGANIZATION, &self.organization),
            (OID_ORGANIZATION_UNIT, &self.organization_unit),
        ] {
            if let Some(value) = non_empty(value) {
                rdns.push(single_rdn(oid, Any::encode_from(&Utf8StringRef::new(value)?)?)?);
            }
        }
        rdns.push(single_rdn(
            OID_COMMON_NAME,
            Any::encode_from(&Utf8StringRef::new(&self.common_name)?)?,
        )?);
        if let Some(email) = non_empty(&self.email) {
            let value = Any::encode_from(&Ia5StringRef::new(email)?)?;
            rdns.push(single_rdn(OID_EMAIL_ADDRESS, value)?);
        }
        Ok(RdnSequence(rdns))
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    ///
    /// Unknown attribute types are skipped.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Self {
        let mut dn = DistinguishedName::default();
        for rdn in x509dn.0.iter() {
            for attr in rdn.0.iter() {
                let Some(value) = attribute_string(&attr.value) else {
                    continue;
                };
                match attr.oid {
                    OID_COMMON_NAME => dn.common_name = value,
                    OID_COUNTRY => dn.country = Some(value),
                    OID_STATE => dn.state = Some(value),
                    OID_LOCALITY => dn.locality = Some(value),
                    OID_ORGANIZATION => dn.organization = Some(value),
                    OID_ORGANIZATION_UNIT => dn.organization_unit = Some(value),
                    OID_EMAIL_ADDRESS => dn.email = Some(value),
                    _ => {}
                }
            }
        }
        dn
    }

    /// One-line rendering in the `/C=../O=../CN=..` form used by CA indexes.
    pub fn to_oneline(&self) -> String {
        let mut out = String::new();
        let parts = [
            ("C", self.country.as_deref()),
            ("ST", self.state.as_deref()),
            ("L", self.locality.as_deref()),
            ("O", self.organization.as_deref()),
            ("OU", self.organization_unit.as_deref()),
            ("CN", Some(self.common_name.as_str())),
            ("emailAddress", self.email.as_deref()),
        ];
        for (key, value) in parts {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                out.push('/');
                out.push_str(key);
                out.push('=');
                out.push_str(value);
            }
        }
        out
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn single_rdn(oid: ObjectIdentifier, value: Any) -> Result<RelativeDistinguishedName> {
    let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])?;
    Ok(RelativeDistinguishedName(set))
}

fn attribute_string(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::TeletexString => {
            std::str::from_utf8(value.value()).ok().map(str::to_string)
        }
        _ => None,
    }
}

/// Certificate validity period.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    pub fn for_days(days: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            not_before: now,
            not_after: now + Duration::days(days),
        }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        let value = extension.to_x509_extension_value()?;
        Ok(Self {
            oid: E::OID,
            critical,
            value,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        if self.oid != E::OID {
            return Err(PkiError::InvalidInput(format!(
                "extension {} is not {}",
                self.oid,
                E::OID
            )));
        }
        E::from_x509_extension_value(&self.value)
    }

    pub(crate) fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }

    pub(crate) fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: der::asn1::OctetString::new(self.value.clone())?,
        })
    }
}
