use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{CryptoFailure, KeycardError, Result};
use crate::core::models::keys::PublicKey;

/// Card schema version issued by this build.
pub const CARD_VERSION: &str = "4.0";

/// Signature map key for the card owner's own signature.
pub const SELF_SIGNER: &str = "self";

/// Reject anything but a 64-character lowercase hex card ID.
pub fn validate_card_id(id: &str) -> Result<()> {
    if id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Ok(())
    } else {
        Err(KeycardError::invalid(format!("'{id}' is not a card ID")))
    }
}

/// Whether a card is visible to one application or globally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardScope {
    #[default]
    Application,
    Global,
}

impl fmt::Display for CardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Global => write!(f, "global"),
        }
    }
}

impl FromStr for CardScope {
    type Err = KeycardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "application" => Ok(Self::Application),
            "global" => Ok(Self::Global),
            other => Err(KeycardError::Configuration {
                detail: format!("unknown card scope '{other}' (use 'application' or 'global')"),
            }),
        }
    }
}

/// Reason attached to a card revocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    #[default]
    Unspecified,
    Compromised,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Compromised => write!(f, "compromised"),
        }
    }
}

impl FromStr for RevocationReason {
    type Err = KeycardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "compromised" => Ok(Self::Compromised),
            other => Err(KeycardError::Configuration {
                detail: format!(
                    "unknown revocation reason '{other}' (use 'unspecified' or 'compromised')"
                ),
            }),
        }
    }
}

/// The signed part of a card: who it names and which key it binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardContent {
    pub identity: String,
    pub identity_type: String,
    pub scope: CardScope,
    pub public_key: PublicKey,
}

impl CardContent {
    /// Canonical bytes that signatures and the card ID are computed over.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoFailure::Encode(e.to_string()).into())
    }
}

/// A card built locally and not yet accepted by a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRequest {
    /// Base64 of [`CardContent::snapshot`].
    pub content_snapshot: String,
    /// Signer name to base64 Ed25519 signature over the snapshot.
    pub signatures: BTreeMap<String, String>,
}

impl CardRequest {
    pub fn new(content: &CardContent) -> Result<Self> {
        Ok(Self {
            content_snapshot: STANDARD.encode(content.snapshot()?),
            signatures: BTreeMap::new(),
        })
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.content_snapshot)
            .map_err(|e| CryptoFailure::Decode(format!("invalid card snapshot: {e}")).into())
    }

    pub fn content(&self) -> Result<CardContent> {
        serde_json::from_slice(&self.snapshot_bytes()?)
            .map_err(|e| CryptoFailure::Decode(format!("invalid card content: {e}")).into())
    }

    /// Directory-assigned ID: hex SHA-256 of the snapshot.
    pub fn id(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.snapshot_bytes()?)))
    }

    pub fn add_signature(&mut self, signer: &str, signature: &[u8]) {
        self.signatures
            .insert(signer.to_string(), STANDARD.encode(signature));
    }

    /// Check the owner's signature against the public key the card binds.
    pub fn verify_self_signature(&self) -> Result<()> {
        let encoded = self.signatures.get(SELF_SIGNER).ok_or_else(|| {
            CryptoFailure::SignatureMismatch("card request carries no self signature".into())
        })?;
        let bytes: [u8; 64] = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoFailure::Decode(format!("invalid signature encoding: {e}")))?
            .try_into()
            .map_err(|_| CryptoFailure::Decode("signature must be 64 bytes".into()))?;

        let content = self.content()?;
        content
            .public_key
            .verifying_key()
            .verify(&self.snapshot_bytes()?, &Signature::from_bytes(&bytes))
            .map_err(|_| {
                CryptoFailure::SignatureMismatch("self signature does not match card key".into())
                    .into()
            })
    }
}

/// A card issued by a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub identity: String,
    pub identity_type: String,
    pub scope: CardScope,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub public_key: PublicKey,
    pub content_snapshot: String,
    pub signatures: BTreeMap<String, String>,
}

impl Card {
    /// Issue a card for an accepted request.
    pub fn issue(request: &CardRequest, created_at: DateTime<Utc>) -> Result<Self> {
        let content = request.content()?;
        Ok(Self {
            id: request.id()?,
            identity: content.identity,
            identity_type: content.identity_type,
            scope: content.scope,
            version: CARD_VERSION.to_string(),
            created_at,
            public_key: content.public_key,
            content_snapshot: request.content_snapshot.clone(),
            signatures: request.signatures.clone(),
        })
    }

    /// Self-contained, re-importable export (base64 of the card JSON).
    pub fn export(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| CryptoFailure::Encode(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    /// Parse an exported card and [`verify`](Self::verify) it.
    pub fn import(exported: &str) -> Result<Self> {
        let json = STANDARD
            .decode(exported.trim())
            .map_err(|e| CryptoFailure::Decode(format!("invalid card export: {e}")))?;
        let card: Card = serde_json::from_slice(&json)
            .map_err(|e| CryptoFailure::Decode(format!("invalid card export: {e}")))?;
        card.verify()?;
        Ok(card)
    }

    /// Check that the ID is the snapshot hash, that every field matches the
    /// signed snapshot and that the self signature verifies.
    pub fn verify(&self) -> Result<()> {
        let request = CardRequest {
            content_snapshot: self.content_snapshot.clone(),
            signatures: self.signatures.clone(),
        };
        if request.id()? != self.id {
            return Err(CryptoFailure::Decode(format!(
                "card ID {} does not match its content",
                self.id
            ))
            .into());
        }

        let content = request.content()?;
        let fields = CardContent {
            identity: self.identity.clone(),
            identity_type: self.identity_type.clone(),
            scope: self.scope,
            public_key: self.public_key.clone(),
        };
        if content != fields {
            return Err(CryptoFailure::Decode(format!(
                "fields of card {} do not match its content",
                self.id
            ))
            .into());
        }
        request.verify_self_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::keys::Keypair;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> Keypair {
        Keypair::from_parts(
            age::x25519::Identity::generate(),
            SigningKey::generate(&mut rand::rngs::OsRng),
        )
    }

    fn signed_request(identity: &str, kp: &Keypair) -> CardRequest {
        let content = CardContent {
            identity: identity.into(),
            identity_type: "unknown".into(),
            scope: CardScope::Application,
            public_key: kp.public_key(),
        };
        let mut request = CardRequest::new(&content).unwrap();
        let sig = kp.signing_key().sign(&request.snapshot_bytes().unwrap());
        request.add_signature(SELF_SIGNER, &sig.to_bytes());
        request
    }

    #[test]
    fn self_signature_verifies() {
        let kp = keypair();
        let request = signed_request("alice", &kp);
        assert!(request.verify_self_signature().is_ok());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let owner = keypair();
        let intruder = keypair();
        let mut request = signed_request("alice", &owner);
        let sig = intruder
            .signing_key()
            .sign(&request.snapshot_bytes().unwrap());
        request.add_signature(SELF_SIGNER, &sig.to_bytes());

        let err = request.verify_self_signature().unwrap_err();
        assert_eq!(err.kind(), crate::core::errors::ErrorKind::SignatureMismatch);
    }

    #[test]
    fn id_is_stable_for_same_content() {
        let kp = keypair();
        let a = signed_request("alice", &kp);
        let b = signed_request("alice", &kp);
        assert_eq!(a.id().unwrap(), b.id().unwrap());
        assert_eq!(a.id().unwrap().len(), 64);
    }

    #[test]
    fn exported_card_imports_and_rejects_tampering() {
        let kp = keypair();
        let card = Card::issue(&signed_request("alice", &kp), Utc::now()).unwrap();

        let exported = card.export().unwrap();
        assert_eq!(Card::import(&exported).unwrap(), card);

        let mut forged = card.clone();
        forged.identity = "mallory".into();
        assert!(Card::import(&forged.export().unwrap()).is_err());
    }

    #[test]
    fn every_displayed_field_is_covered_by_the_snapshot() {
        let kp = keypair();
        let card = Card::issue(&signed_request("alice", &kp), Utc::now()).unwrap();
        assert!(card.verify().is_ok());

        let mut retyped = card.clone();
        retyped.identity_type = "admin".into();
        assert!(Card::import(&retyped.export().unwrap()).is_err());

        let mut rescoped = card.clone();
        rescoped.scope = CardScope::Global;
        assert!(rescoped.verify().is_err());

        let mut rekeyed = card.clone();
        rekeyed.public_key = keypair().public_key();
        assert!(rekeyed.verify().is_err());

        let mut renamed = card;
        renamed.id = "0".repeat(64);
        assert!(renamed.verify().is_err());
    }

    #[test]
    fn card_ids_are_hex_digests() {
        let kp = keypair();
        let id = signed_request("alice", &kp).id().unwrap();
        assert!(validate_card_id(&id).is_ok());
        assert!(validate_card_id("abc").is_err());
        assert!(validate_card_id(&format!("../{}", &id[3..])).is_err());
        assert!(validate_card_id(&id.to_uppercase()).is_err());
    }

    #[test]
    fn scope_and_reason_parse() {
        assert_eq!("global".parse::<CardScope>().unwrap(), CardScope::Global);
        assert_eq!(
            "compromised".parse::<RevocationReason>().unwrap(),
            RevocationReason::Compromised
        );
        assert!("everything".parse::<RevocationReason>().is_err());
    }
}
