use std::path::PathBuf;
use std::time::Duration;

use age::secrecy::SecretString;
use log::warn;

use crate::config::app_config::AppConfig;
use crate::core::errors::{KeycardError, Result};
use crate::core::models::card::{CardScope, RevocationReason};
use crate::core::models::transform::DEFAULT_BUFFER_LIMIT;

const DEFAULT_IDENTITY_TYPE: &str = "unknown";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where the directory lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryLocation {
    Http(String),
    File(PathBuf),
}

impl DirectoryLocation {
    /// `http://` and `https://` values are URLs, anything else is a file path.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(KeycardError::Configuration {
                detail: "directory location must not be empty".into(),
            });
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            Ok(Self::Http(value.to_string()))
        } else {
            Ok(Self::File(PathBuf::from(value)))
        }
    }
}

/// Application credentials: the highest directory access tier.
#[derive(Debug)]
pub struct AppCredentialSettings {
    pub access_token: String,
    pub app_id: String,
    pub private_key_file: PathBuf,
    pub private_key_password: SecretString,
}

#[derive(Debug)]
pub enum CredentialSettings {
    Anonymous,
    Token(String),
    App(AppCredentialSettings),
}

#[derive(Debug)]
pub struct DirectorySettings {
    pub location: DirectoryLocation,
    pub credentials: CredentialSettings,
    pub timeout: Duration,
}

/// Values given on the command line or through `KEYCARD_*` variables.
/// They win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub directory: Option<String>,
    pub access_token: Option<String>,
    pub app_id: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub private_key_password: Option<SecretString>,
    pub revocation_reason: Option<RevocationReason>,
}

/// Fully resolved settings, built once per invocation.
#[derive(Debug)]
pub struct Settings {
    /// `None` means local-only mode.
    pub directory: Option<DirectorySettings>,
    pub keys_dir: PathBuf,
    pub scrypt_work_factor: Option<u8>,
    pub buffer_limit: u64,
    pub armor: bool,
    pub revocation_reason: RevocationReason,
    pub scope: CardScope,
    pub identity_type: String,
}

impl Settings {
    pub fn resolve(config: &AppConfig, overrides: Overrides) -> Result<Self> {
        let section = &config.directory;

        let revocation_reason = match (overrides.revocation_reason, &config.revocation.reason) {
            (Some(reason), _) => reason,
            (None, Some(reason)) => reason.parse()?,
            (None, None) => RevocationReason::default(),
        };
        let scope = match &section.scope {
            Some(scope) => scope.parse()?,
            None => CardScope::default(),
        };

        let scrypt_work_factor = config.keys.scrypt_work_factor;
        if let Some(factor) = scrypt_work_factor
            && !(1..=30).contains(&factor)
        {
            return Err(KeycardError::Configuration {
                detail: format!("scrypt_work_factor must be between 1 and 30, got {factor}"),
            });
        }

        let access_token = overrides.access_token.or_else(|| section.access_token.clone());
        let app_id = overrides.app_id.or_else(|| section.app_id.clone());
        let private_key_file = overrides
            .private_key_file
            .or_else(|| section.private_key_file.clone());
        let private_key_password = overrides.private_key_password;

        let location = overrides.directory.or_else(|| section.location.clone());
        let directory = match location {
            Some(location) => Some(DirectorySettings {
                location: DirectoryLocation::parse(&location)?,
                credentials: credential_tier(
                    access_token,
                    app_id,
                    private_key_file,
                    private_key_password,
                )?,
                timeout: Duration::from_secs(
                    section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            }),
            None => {
                if access_token.is_some()
                    || app_id.is_some()
                    || private_key_file.is_some()
                    || private_key_password.is_some()
                {
                    warn!("directory credentials given without a directory location; ignoring them");
                }
                None
            }
        };

        Ok(Self {
            directory,
            keys_dir: config.keys.dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            scrypt_work_factor,
            buffer_limit: config.crypto.buffer_limit.unwrap_or(DEFAULT_BUFFER_LIMIT),
            armor: config.crypto.armor.unwrap_or(false),
            revocation_reason,
            scope,
            identity_type: section
                .identity_type
                .clone()
                .unwrap_or_else(|| DEFAULT_IDENTITY_TYPE.to_string()),
        })
    }
}

/// Pick the highest complete credential tier: app, then token, then anonymous.
fn credential_tier(
    access_token: Option<String>,
    app_id: Option<String>,
    private_key_file: Option<PathBuf>,
    private_key_password: Option<SecretString>,
) -> Result<CredentialSettings> {
    let wants_app =
        app_id.is_some() || private_key_file.is_some() || private_key_password.is_some();

    match (access_token, app_id, private_key_file, private_key_password) {
        (Some(access_token), Some(app_id), Some(private_key_file), Some(private_key_password)) => {
            Ok(CredentialSettings::App(AppCredentialSettings {
                access_token,
                app_id,
                private_key_file,
                private_key_password,
            }))
        }
        _ if wants_app => Err(KeycardError::Configuration {
            detail: "application credentials need all of --access-token, --app-id, \
                     --private-key-file and --private-key-password"
                .into(),
        }),
        (Some(token), ..) => Ok(CredentialSettings::Token(token)),
        _ => Ok(CredentialSettings::Anonymous),
    }
}
