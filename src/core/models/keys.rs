use std::fmt;

use age::secrecy::ExposeSecret;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{CryptoFailure, KeycardError, Result};

/// A full keypair: an age X25519 identity for encryption and an Ed25519
/// key for signatures.
#[derive(Clone)]
pub struct Keypair {
    encryption: age::x25519::Identity,
    signing: SigningKey,
}

impl Keypair {
    pub fn from_parts(encryption: age::x25519::Identity, signing: SigningKey) -> Self {
        Self {
            encryption,
            signing,
        }
    }

    pub fn encryption_identity(&self) -> &age::x25519::Identity {
        &self.encryption
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            encryption: self.encryption.to_public(),
            verifying: self.signing.verifying_key(),
        }
    }

    /// Serialize the secret halves. The result must only ever be written
    /// after password-based encryption.
    pub(crate) fn to_private_document(&self) -> PrivateKeyDocument {
        PrivateKeyDocument {
            version: KEY_DOCUMENT_VERSION,
            encryption: self.encryption.to_string().expose_secret().to_string(),
            signing: STANDARD.encode(self.signing.to_bytes()),
        }
    }

    pub(crate) fn from_private_document(doc: &PrivateKeyDocument) -> Result<Self> {
        let encryption: age::x25519::Identity = doc
            .encryption
            .parse()
            .map_err(|e: &str| CryptoFailure::Decode(format!("invalid age identity: {e}")))?;

        let signing_bytes: [u8; 32] = STANDARD
            .decode(&doc.signing)
            .map_err(|e| CryptoFailure::Decode(format!("invalid signing key encoding: {e}")))?
            .try_into()
            .map_err(|_| CryptoFailure::Decode("signing key must be 32 bytes".into()))?;

        Ok(Self {
            encryption,
            signing: SigningKey::from_bytes(&signing_bytes),
        })
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

const KEY_DOCUMENT_VERSION: u32 = 1;

/// On-disk form of the private halves (plaintext inside the encrypted file).
#[derive(Serialize, Deserialize)]
pub(crate) struct PrivateKeyDocument {
    pub version: u32,
    pub encryption: String,
    pub signing: String,
}

/// The public halves of a [`Keypair`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "PublicKeyDocument", try_from = "PublicKeyDocument")]
pub struct PublicKey {
    encryption: age::x25519::Recipient,
    verifying: VerifyingKey,
}

/// Exported form of a public key:
/// `{"encryption":"age1…","verifying":"<base64 ed25519>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyDocument {
    pub encryption: String,
    pub verifying: String,
}

impl PublicKey {
    pub fn encryption_recipient(&self) -> &age::x25519::Recipient {
        &self.encryption
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    /// Raw public key bytes as written to `<identity>.pub`.
    pub fn export(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&PublicKeyDocument::from(self.clone()))
            .map_err(|e| CryptoFailure::Encode(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse bytes produced by [`PublicKey::export`].
    pub fn import(bytes: &[u8]) -> Result<Self> {
        let doc: PublicKeyDocument = serde_json::from_slice(bytes)
            .map_err(|e| CryptoFailure::Decode(format!("invalid public key document: {e}")))?;
        Self::try_from(doc)
    }

    /// Hex SHA-256 over both public halves; stable identifier for dedup.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.encryption.to_string().as_bytes());
        hasher.update(self.verifying.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying == other.verifying
            && self.encryption.to_string() == other.encryption.to_string()
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("encryption", &self.encryption.to_string())
            .field("verifying", &STANDARD.encode(self.verifying.as_bytes()))
            .finish()
    }
}

impl From<PublicKey> for PublicKeyDocument {
    fn from(key: PublicKey) -> Self {
        Self {
            encryption: key.encryption.to_string(),
            verifying: STANDARD.encode(key.verifying.as_bytes()),
        }
    }
}

impl TryFrom<PublicKeyDocument> for PublicKey {
    type Error = KeycardError;

    fn try_from(doc: PublicKeyDocument) -> Result<Self> {
        let encryption = doc
            .encryption
            .parse::<age::x25519::Recipient>()
            .map_err(|e: &str| {
                CryptoFailure::Decode(format!("invalid recipient '{}': {e}", doc.encryption))
            })?;

        let verifying_bytes: [u8; 32] = STANDARD
            .decode(&doc.verifying)
            .map_err(|e| CryptoFailure::Decode(format!("invalid verifying key encoding: {e}")))?
            .try_into()
            .map_err(|_| CryptoFailure::Decode("verifying key must be 32 bytes".into()))?;

        let verifying = VerifyingKey::from_bytes(&verifying_bytes)
            .map_err(|e| CryptoFailure::Decode(format!("invalid verifying key: {e}")))?;

        Ok(Self {
            encryption,
            verifying,
        })
    }
}
