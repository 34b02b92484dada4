use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::errors::{KeycardError, Result};
use crate::core::models::card::{Card, CardRequest, RevocationReason};
use crate::core::traits::directory::Directory;

/// Directory that keeps every card in a single JSON document on disk.
///
/// Serves as a local, offline directory endpoint. Revoked cards stay in the
/// file with their revocation time and reason, but are hidden from `get`
/// and `find`.
///
/// ```json
/// { "cards": [ { "card": { "id": "…", "identity": "alice", … },
///               "revoked_at": null, "revocation_reason": null } ] }
/// ```
pub struct FileDirectory {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryDocument {
    cards: Vec<CardRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CardRecord {
    card: Card,
    revoked_at: Option<DateTime<Utc>>,
    revocation_reason: Option<RevocationReason>,
}

impl CardRecord {
    fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }
}

impl FileDirectory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self, operation: &str) -> Result<DirectoryDocument> {
        if !self.path.exists() {
            return Ok(DirectoryDocument::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            KeycardError::remote(
                operation,
                format!("cannot read directory {}: {e}", self.path.display()),
            )
        })?;
        if content.trim().is_empty() {
            return Ok(DirectoryDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            KeycardError::remote(
                operation,
                format!("malformed directory {}: {e}", self.path.display()),
            )
        })
    }

    fn write(&self, operation: &str, document: &DirectoryDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| KeycardError::remote(operation, e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, json + "\n").map_err(|e| {
            KeycardError::remote(
                operation,
                format!("cannot write directory {}: {e}", self.path.display()),
            )
        })
    }

    fn card_not_found(id: &str) -> KeycardError {
        KeycardError::NotFound {
            what: format!("card {id}"),
        }
    }
}

impl Directory for FileDirectory {
    fn publish(&self, request: &CardRequest) -> Result<Card> {
        request
            .verify_self_signature()
            .map_err(|e| KeycardError::remote("publish", e.to_string()))?;

        let mut document = self.read("publish")?;
        let id = request.id()?;
        if document.cards.iter().any(|r| r.card.id == id) {
            return Err(KeycardError::remote(
                "publish",
                format!("card {id} is already published"),
            ));
        }

        let card = Card::issue(request, Utc::now())?;
        document.cards.push(CardRecord {
            card: card.clone(),
            revoked_at: None,
            revocation_reason: None,
        });
        self.write("publish", &document)?;

        info!("published card {} for '{}'", card.id, card.identity);
        Ok(card)
    }

    fn get(&self, id: &str) -> Result<Card> {
        self.read("get")?
            .cards
            .into_iter()
            .find(|r| r.card.id == id && r.is_live())
            .map(|r| r.card)
            .ok_or_else(|| Self::card_not_found(id))
    }

    fn find(&self, identities: &[String]) -> Result<Vec<Card>> {
        let cards: Vec<Card> = self
            .read("find")?
            .cards
            .into_iter()
            .filter(|r| r.is_live() && identities.contains(&r.card.identity))
            .map(|r| r.card)
            .collect();

        debug!("directory file matched {} card(s)", cards.len());
        Ok(cards)
    }

    fn revoke(&self, id: &str, reason: RevocationReason) -> Result<()> {
        let mut document = self.read("revoke")?;
        let record = document
            .cards
            .iter_mut()
            .find(|r| r.card.id == id)
            .ok_or_else(|| Self::card_not_found(id))?;

        if !record.is_live() {
            return Err(KeycardError::remote(
                "revoke",
                format!("card {id} is already revoked"),
            ));
        }
        record.revoked_at = Some(Utc::now());
        record.revocation_reason = Some(reason);
        self.write("revoke", &document)?;

        info!("revoked card {id} ({reason})");
        Ok(())
    }
}
