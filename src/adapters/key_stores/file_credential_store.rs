use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use age::secrecy::{ExposeSecret, SecretString};
use log::debug;

use crate::core::errors::{KeycardError, Result};
use crate::core::models::identity::validate_identity;
use crate::core::models::keys::{Keypair, PublicKey};
use crate::core::traits::credential_store::{CredentialPaths, CredentialStore};
use crate::core::traits::crypto::CryptoProvider;

/// Extension of the clear public key file.
pub const PUBLIC_KEY_EXTENSION: &str = "pub";

/// Extension of the password-protected private key file.
pub const PRIVATE_KEY_EXTENSION: &str = "key";

/// Credential store that keeps one file pair per identity in a directory.
///
/// Layout for identity `alice`:
/// ```text
/// alice.pub   public key document, clear JSON
/// alice.key   private key document, sealed under the password (age scrypt, armored)
/// ```
#[derive(Clone)]
pub struct FileCredentialStore<P: CryptoProvider> {
    dir: PathBuf,
    crypto: P,
}

impl<P: CryptoProvider> FileCredentialStore<P> {
    /// Create a store rooted at `dir`, sealing keys with `crypto`.
    pub fn new(dir: PathBuf, crypto: P) -> Self {
        Self { dir, crypto }
    }

    pub fn public_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.{PUBLIC_KEY_EXTENSION}"))
    }

    pub fn private_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.{PRIVATE_KEY_EXTENSION}"))
    }

    fn read_existing(path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => KeycardError::KeyFileNotFound {
                path: path.to_path_buf(),
            },
            _ => KeycardError::Io(e),
        })
    }

    /// Create the private key file, refusing to replace an existing one.
    fn write_private(identity: &str, path: &Path, data: &[u8]) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|e| match e.kind() {
            IoErrorKind::AlreadyExists => KeycardError::KeyAlreadyExists {
                identity: identity.to_string(),
                path: path.to_path_buf(),
            },
            _ => KeycardError::Io(e),
        })?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }
}

impl<P: CryptoProvider> CredentialStore for FileCredentialStore<P> {
    fn save(
        &self,
        identity: &str,
        password: &SecretString,
        keypair: &Keypair,
    ) -> Result<CredentialPaths> {
        validate_identity(identity)?;
        if password.expose_secret().is_empty() {
            return Err(KeycardError::invalid("password must not be empty"));
        }

        let paths = CredentialPaths {
            public: self.public_path(identity),
            private: self.private_path(identity),
        };
        if paths.private.exists() {
            return Err(KeycardError::KeyAlreadyExists {
                identity: identity.to_string(),
                path: paths.private,
            });
        }

        let sealed = self.crypto.encode_private_key(keypair, password)?;
        let public = keypair.public_key().export()?;

        fs::create_dir_all(&self.dir)?;
        Self::write_private(identity, &paths.private, &sealed)?;
        if let Err(e) = fs::write(&paths.public, public) {
            let _ = fs::remove_file(&paths.private);
            return Err(e.into());
        }

        debug!(
            "saved credentials for '{identity}' to {} and {}",
            paths.public.display(),
            paths.private.display()
        );
        Ok(paths)
    }

    fn load(&self, identity: &str, password: &SecretString) -> Result<Keypair> {
        validate_identity(identity)?;

        let sealed = Self::read_existing(&self.private_path(identity))?;
        let public = self.load_public(identity)?;

        let keypair = self
            .crypto
            .decode_private_key(&sealed, password)
            .map_err(|_| KeycardError::Authentication {
                identity: identity.to_string(),
            })?;

        if keypair.public_key() != public {
            return Err(KeycardError::Authentication {
                identity: identity.to_string(),
            });
        }
        Ok(keypair)
    }

    fn load_public(&self, identity: &str) -> Result<PublicKey> {
        validate_identity(identity)?;
        let bytes = Self::read_existing(&self.public_path(identity))?;
        PublicKey::import(&bytes)
    }

    fn remove(&self, identity: &str) -> Result<()> {
        validate_identity(identity)?;
        for path in [self.public_path(identity), self.private_path(identity)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
