use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::core::models::keys::PublicKey;

/// How a caller names an encryption target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientRef {
    /// A directory card, by ID.
    Card(String),
    /// Every live directory card for an identity (or `<identity>.pub` when
    /// no directory is configured).
    Identity(String),
    /// A local `<identity>.pub` file.
    LocalKey(String),
    /// A card previously written by `card export`.
    CardFile(PathBuf),
}

impl fmt::Display for RecipientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card(id) => write!(f, "card {id}"),
            Self::Identity(identity) => write!(f, "identity {identity}"),
            Self::LocalKey(identity) => write!(f, "local key {identity}"),
            Self::CardFile(path) => write!(f, "card file {}", path.display()),
        }
    }
}

/// Ordered set of public keys, deduplicated by fingerprint.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    keys: Vec<PublicKey>,
    seen: HashSet<String>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; returns `false` if an identical key is already present.
    pub fn insert(&mut self, key: PublicKey) -> bool {
        if !self.seen.insert(key.fingerprint()) {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PublicKey> {
        self.keys.iter()
    }
}

impl FromIterator<PublicKey> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = PublicKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::keys::Keypair;

    fn public_key() -> PublicKey {
        Keypair::from_parts(
            age::x25519::Identity::generate(),
            ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        )
        .public_key()
    }

    #[test]
    fn duplicates_are_dropped_in_order() {
        let a = public_key();
        let b = public_key();

        let set: RecipientSet = vec![a.clone(), b.clone(), a.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);

        let keys: Vec<&PublicKey> = set.iter().collect();
        assert_eq!(keys[0], &a);
        assert_eq!(keys[1], &b);
    }
}
