use std::fmt;
use std::str::FromStr;

use der::{Encode, SecretDocument, pem::LineEnding};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey};
use rand_core::{OsRng, RngCore};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use zeroize::Zeroizing;

use crate::cert::SignatureAlgorithm;
use crate::error::{PkiError, Result};

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Key algorithms a CA or leaf key can be generated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
    Ed25519,
    Rsa2048,
    Rsa4096,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::EcdsaP256 => "ecdsa-p256",
            KeyAlgorithm::EcdsaP384 => "ecdsa-p384",
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Rsa2048 => "rsa2048",
            KeyAlgorithm::Rsa4096 => "rsa4096",
        };
        f.write_str(name)
    }
}

impl FromStr for KeyAlgorithm {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecdsa-p256" | "p256" | "prime256v1" => Ok(KeyAlgorithm::EcdsaP256),
            "ecdsa-p384" | "p384" | "secp384r1" => Ok(KeyAlgorithm::EcdsaP384),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "rsa2048" => Ok(KeyAlgorithm::Rsa2048),
            "rsa4096" => Ok(KeyAlgorithm::Rsa4096),
            other => Err(PkiError::InvalidInput(format!(
                "unsupported key algorithm: {other}"
            ))),
        }
    }
}

/// Supported key types for certificate operations.
#[derive(Clone)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
        verifying_key: P384VerifyingKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a key pair for the given algorithm.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::EcdsaP256 => Ok(Self::generate_ecdsa_p256()),
            KeyAlgorithm::EcdsaP384 => Ok(Self::generate_ecdsa_p384()),
            KeyAlgorithm::Ed25519 => Ok(Self::generate_ed25519()),
            KeyAlgorithm::Rsa2048 => Self::generate_rsa(2048),
            KeyAlgorithm::Rsa4096 => Self::generate_rsa(4096),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        let signing_key = P256SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP256 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        let signing_key = P384SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP384 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        KeyPair::Ed25519 { signing_key }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { private, .. } => {
                use rsa::traits::PublicKeyParts;
                if private.size() * 8 > 2048 {
                    KeyAlgorithm::Rsa4096
                } else {
                    KeyAlgorithm::Rsa2048
                }
            }
            KeyPair::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
            KeyPair::EcdsaP384 { .. } => KeyAlgorithm::EcdsaP384,
            KeyPair::Ed25519 { .. } => KeyAlgorithm::Ed25519,
        }
    }

    /// The signature algorithm this key produces.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            KeyPair::Rsa { .. } => SignatureAlgorithm::Sha256WithRSA,
            KeyPair::EcdsaP256 { .. } => SignatureAlgorithm::Sha256WithECDSA,
            KeyPair::EcdsaP384 { .. } => SignatureAlgorithm::Sha384WithECDSA,
            KeyPair::Ed25519 { .. } => SignatureAlgorithm::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_key_pair(self)
    }

    /// Returns the SubjectPublicKeyInfo for this key pair.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        self.public_key().to_spki()
    }

    /// Signs `data` and returns the signature in its X.509 encoding
    /// (DER `Ecdsa-Sig-Value` for ECDSA, raw bytes otherwise).
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { private, .. } => {
                let signing_key =
                    rsa::pkcs1v15::SigningKey::<Sha256>::new(private.as_ref().clone());
                let signature = signing_key.sign(data);
                Ok(signature.to_vec())
            }
            KeyPair::EcdsaP256 { signing_key, .. } => {
                let signature: p256::ecdsa::Signature = signing_key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key, .. } => {
                let signature: p384::ecdsa::Signature = signing_key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => Ok(signing_key.sign(data).to_bytes().to_vec()),
        }
    }

    fn to_pkcs8_der(&self) -> Result<SecretDocument> {
        let doc = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_der()?,
            KeyPair::EcdsaP256 { signing_key, .. } => signing_key.to_pkcs8_der()?,
            KeyPair::EcdsaP384 { signing_key, .. } => signing_key.to_pkcs8_der()?,
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_der()?,
        };
        Ok(doc)
    }

    /// Unencrypted PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        self.to_pkcs8_der()?
            .to_pem(PRIVATE_KEY_LABEL, LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// PKCS#8 PEM encrypted with PBES2 (PBKDF2-SHA256, AES-256-CBC).
    pub fn to_encrypted_pkcs8_pem(
        &self,
        passphrase: &str,
        kdf_iterations: u32,
    ) -> Result<Zeroizing<String>> {
        if passphrase.is_empty() {
            return Err(PkiError::EmptyPassphrase);
        }
        let doc = self.to_pkcs8_der()?;
        let info = pkcs8::PrivateKeyInfo::try_from(doc.as_bytes())?;

        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);
        let params =
            pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(kdf_iterations, &salt, &iv)
                .map_err(pkcs8::Error::from)?;

        info.encrypt_with_params(params, passphrase.as_bytes())?
            .to_pem(ENCRYPTED_KEY_LABEL, LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Parses an unencrypted PKCS#8 PEM of any supported algorithm.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let (label, doc) = SecretDocument::from_pem(pem)?;
        if label != PRIVATE_KEY_LABEL {
            return Err(PkiError::DecodingError(format!(
                "expected {PRIVATE_KEY_LABEL}, found {label}"
            )));
        }
        Self::from_pkcs8_der(doc.as_bytes())
    }

    /// Decrypts an encrypted PKCS#8 PEM. A wrong passphrase fails here.
    pub fn from_encrypted_pkcs8_pem(pem: &str, passphrase: &str) -> Result<Self> {
        let (label, doc) = SecretDocument::from_pem(pem)?;
        if label != ENCRYPTED_KEY_LABEL {
            return Err(PkiError::DecodingError(format!(
                "expected {ENCRYPTED_KEY_LABEL}, found {label}"
            )));
        }
        let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(doc.as_bytes())?;
        let decrypted = encrypted
            .decrypt(passphrase.as_bytes())
            .map_err(|e| PkiError::DecodingError(format!("unable to decrypt private key: {e}")))?;
        Self::from_pkcs8_der(decrypted.as_bytes())
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        if let Ok(signing_key) = P256SigningKey::from_pkcs8_der(der) {
            let verifying_key = *signing_key.verifying_key();
            return Ok(KeyPair::EcdsaP256 {
                signing_key,
                verifying_key,
            });
        }
        if let Ok(signing_key) = P384SigningKey::from_pkcs8_der(der) {
            let verifying_key = *signing_key.verifying_key();
            return Ok(KeyPair::EcdsaP384 {
                signing_key,
                verifying_key,
            });
        }
        if let Ok(signing_key) = Ed25519SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::Ed25519 { signing_key });
        }
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|_| PkiError::DecodingError("unsupported private key type".to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }
}

/// Public half of a [`KeyPair`], as carried in certificates and requests.
#[derive(Clone, Debug, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        match key_pair {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { verifying_key, .. } => PublicKey::EcdsaP256(*verifying_key),
            KeyPair::EcdsaP384 { verifying_key, .. } => PublicKey::EcdsaP384(*verifying_key),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        if let Ok(key) = P256VerifyingKey::from_public_key_der(&der) {
            return Ok(PublicKey::EcdsaP256(key));
        }
        if let Ok(key) = P384VerifyingKey::from_public_key_der(&der) {
            return Ok(PublicKey::EcdsaP384(key));
        }
        if let Ok(key) = Ed25519VerifyingKey::from_public_key_der(&der) {
            return Ok(PublicKey::Ed25519(key));
        }
        RsaPublicKey::from_public_key_der(&der)
            .map(PublicKey::Rsa)
            .map_err(|_| {
                PkiError::DecodingError(format!(
                    "unsupported public key algorithm {}",
                    spki.algorithm.oid
                ))
            })
    }

    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            PublicKey::Rsa(public) => SubjectPublicKeyInfoOwned::from_key(public.clone())?,
            PublicKey::EcdsaP256(key) => SubjectPublicKeyInfoOwned::from_key(*key)?,
            PublicKey::EcdsaP384(key) => SubjectPublicKeyInfoOwned::from_key(*key)?,
            PublicKey::Ed25519(key) => SubjectPublicKeyInfoOwned::from_key(*key)?,
        };
        Ok(spki)
    }

    fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            PublicKey::Rsa(_) => SignatureAlgorithm::Sha256WithRSA,
            PublicKey::EcdsaP256(_) => SignatureAlgorithm::Sha256WithECDSA,
            PublicKey::EcdsaP384(_) => SignatureAlgorithm::Sha384WithECDSA,
            PublicKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// SHA-1 over the subjectPublicKey bits (RFC 5280 method 1).
    pub fn key_identifier(&self) -> Result<Vec<u8>> {
        let spki = self.to_spki()?;
        let digest = <sha1::Sha1 as sha1::Digest>::digest(spki.subject_public_key.raw_bytes());
        Ok(digest.to_vec())
    }

    /// Verifies `signature` over `data` made with `algorithm`.
    pub fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        if *algorithm != self.signature_algorithm() {
            return Err(PkiError::Verification(format!(
                "signature algorithm {algorithm:?} does not match the signer key"
            )));
        }
        match self {
            PublicKey::Rsa(public) => {
                let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone());
                let signature = rsa::pkcs1v15::Signature::try_from(signature)?;
                verifying_key.verify(data, &signature)?;
            }
            PublicKey::EcdsaP256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature)?;
                key.verify(data, &signature)?;
            }
            PublicKey::EcdsaP384(key) => {
                let signature = p384::ecdsa::Signature::from_der(signature)?;
                key.verify(data, &signature)?;
            }
            PublicKey::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)?;
                key.verify(data, &signature)?;
            }
        }
        Ok(())
    }
}
