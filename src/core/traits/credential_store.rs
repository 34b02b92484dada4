use std::path::PathBuf;

use age::secrecy::SecretString;

use crate::core::errors::Result;
use crate::core::models::keys::{Keypair, PublicKey};

/// Files written for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    pub public: PathBuf,
    pub private: PathBuf,
}

/// Port for local key material, keyed by identity.
pub trait CredentialStore: Send + Sync {
    /// Persist the public key in clear and the private key under `password`.
    fn save(&self, identity: &str, password: &SecretString, keypair: &Keypair)
    -> Result<CredentialPaths>;

    /// Load and decode the keypair for `identity`.
    fn load(&self, identity: &str, password: &SecretString) -> Result<Keypair>;

    /// Load only the public key for `identity`.
    fn load_public(&self, identity: &str) -> Result<PublicKey>;

    /// Delete both artifacts for `identity`, if present.
    fn remove(&self, identity: &str) -> Result<()>;
}
