use serde::Deserialize;
use std::path::{Path, PathBuf};

use log::debug;

use crate::core::errors::{KeycardError, Result};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "keycard.toml";

/// Top-level keycard configuration read from `keycard.toml`.
///
/// Every section is optional; a missing file is the same as an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub directory: DirectorySection,
    #[serde(default)]
    pub keys: KeysSection,
    #[serde(default)]
    pub crypto: CryptoSection,
    #[serde(default)]
    pub revocation: RevocationSection,
}

impl AppConfig {
    /// Load the configuration from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KeycardError::Configuration {
                detail: format!("config file {} not found", path.display()),
            });
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| KeycardError::Configuration {
            detail: format!("Failed to parse {}: {e}", path.display()),
        })
    }

    /// Find and load the configuration.
    ///
    /// An explicit path must exist. Otherwise `./keycard.toml` is tried,
    /// then `<config dir>/keycard/config.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        let candidates = [
            Some(PathBuf::from(LOCAL_CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("keycard").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!("using config file {}", path.display());
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        debug!("no config file found, using defaults");
        Ok((Self::default(), None))
    }
}

/// The `[directory]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectorySection {
    /// `http(s)://` base URL or path to a JSON directory file.
    pub location: Option<String>,
    pub access_token: Option<String>,
    pub app_id: Option<String>,
    pub private_key_file: Option<PathBuf>,
    /// `application` or `global`.
    pub scope: Option<String>,
    pub identity_type: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// The `[keys]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysSection {
    /// Where `<identity>.pub` / `<identity>.key` live. Defaults to `.`.
    pub dir: Option<PathBuf>,
    pub scrypt_work_factor: Option<u8>,
}

/// The `[crypto]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoSection {
    pub buffer_limit: Option<u64>,
    pub armor: Option<bool>,
}

/// The `[revocation]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevocationSection {
    /// `unspecified` or `compromised`.
    pub reason: Option<String>,
}
