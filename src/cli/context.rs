use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use age::secrecy::SecretString;
use log::debug;
use tempfile::NamedTempFile;

use keycard::adapters::cipher::age_provider::AgeProvider;
use keycard::adapters::directory::file_directory::FileDirectory;
use keycard::adapters::directory::http_directory::{DirectoryCredentials, HttpDirectory};
use keycard::adapters::key_stores::file_credential_store::FileCredentialStore;
use keycard::config::app_config::AppConfig;
use keycard::config::settings::{
    CredentialSettings, DirectoryLocation, DirectorySettings, Overrides, Settings,
};
use keycard::core::errors::{KeycardError, Result, ResultExt};
use keycard::core::models::card::RevocationReason;
use keycard::core::models::transform::Payload;
use keycard::core::services::identity_service::{DirectoryMode, IdentityService, ServiceOptions};
use keycard::core::traits::crypto::CryptoProvider;
use keycard::core::traits::directory::Directory;

use crate::cli::GlobalArgs;

/// The orchestrator wired to the file credential store and the age provider.
pub type Service = IdentityService<FileCredentialStore<AgeProvider>, AgeProvider>;

/// Resolve settings from the config file and the global flags.
pub fn load_settings(global: &GlobalArgs, reason: Option<RevocationReason>) -> Result<Settings> {
    let (config, path) = AppConfig::discover(global.config.as_deref())?;
    if let Some(path) = path {
        crate::cli::output::detail(&format!("Config: {}", path.display()));
    }

    let overrides = Overrides {
        directory: global.directory.clone(),
        access_token: global.access_token.clone(),
        app_id: global.app_id.clone(),
        private_key_file: global.private_key_file.clone(),
        private_key_password: global.private_key_password.clone().map(SecretString::from),
        revocation_reason: reason,
    };
    Settings::resolve(&config, overrides)
}

/// Build the orchestrator for one invocation.
pub fn build_service(settings: Settings) -> Result<Service> {
    let crypto = match settings.scrypt_work_factor {
        Some(factor) => AgeProvider::with_work_factor(factor),
        None => AgeProvider::new(),
    };

    let directory = match &settings.directory {
        Some(directory) => DirectoryMode::Backed(open_directory(directory, &crypto)?),
        None => DirectoryMode::LocalOnly,
    };

    Ok(IdentityService {
        store: FileCredentialStore::new(settings.keys_dir.clone(), crypto.clone()),
        crypto,
        directory,
        options: ServiceOptions {
            revocation_reason: settings.revocation_reason,
            buffer_limit: settings.buffer_limit,
            scope: settings.scope,
            identity_type: settings.identity_type,
            armor: settings.armor,
        },
    })
}

fn open_directory(settings: &DirectorySettings, crypto: &AgeProvider) -> Result<Box<dyn Directory>> {
    match &settings.location {
        DirectoryLocation::File(path) => {
            if !matches!(settings.credentials, CredentialSettings::Anonymous) {
                debug!("file directory ignores access credentials");
            }
            debug!("using directory file {}", path.display());
            Ok(Box::new(FileDirectory::new(path.clone())))
        }
        DirectoryLocation::Http(url) => {
            let credentials = match &settings.credentials {
                CredentialSettings::Anonymous => DirectoryCredentials::Anonymous,
                CredentialSettings::Token(token) => DirectoryCredentials::Token(token.clone()),
                CredentialSettings::App(app) => {
                    let sealed = fs::read(&app.private_key_file).map_err(|e| match e.kind() {
                        io::ErrorKind::NotFound => KeycardError::KeyFileNotFound {
                            path: app.private_key_file.clone(),
                        },
                        _ => KeycardError::Io(e),
                    });
                    let key = sealed
                        .and_then(|bytes| {
                            crypto.decode_private_key(&bytes, &app.private_key_password)
                        })
                        .context("error loading application key")?;
                    DirectoryCredentials::App {
                        token: app.access_token.clone(),
                        app_id: app.app_id.clone(),
                        key,
                    }
                }
            };
            Ok(Box::new(HttpDirectory::new(url, credentials, settings.timeout)?))
        }
    }
}

/// Open `--input`, or stdin. Files report their size for mode selection.
pub fn open_input(path: Option<&Path>) -> Result<Payload<'static>> {
    match path {
        Some(path) => {
            let file = File::open(path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => KeycardError::invalid(format!(
                    "input file {} not found",
                    path.display()
                )),
                _ => KeycardError::Io(e),
            })?;
            let size = file.metadata()?.len();
            Ok(Payload::from_reader(BufReader::new(file), Some(size)))
        }
        None => Ok(Payload::from_reader(io::stdin().lock(), None)),
    }
}

/// Destination of a transform: stdout, or a temporary file next to the
/// target that replaces it only on `commit`.
pub enum Sink {
    Stdout(io::StdoutLock<'static>),
    File {
        path: PathBuf,
        writer: BufWriter<NamedTempFile>,
    },
}

impl Sink {
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let dir = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => Path::new("."),
                };
                Ok(Self::File {
                    path: path.to_path_buf(),
                    writer: BufWriter::new(NamedTempFile::new_in(dir)?),
                })
            }
            None => Ok(Self::Stdout(io::stdout().lock())),
        }
    }

    pub fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(out) => out as &mut dyn Write,
            Self::File { writer, .. } => writer as &mut dyn Write,
        }
    }

    /// Keep the output, replacing any existing file at the target.
    pub fn commit(self) -> Result<()> {
        match self {
            Self::Stdout(mut out) => out.flush()?,
            Self::File { path, writer } => {
                let temp = writer.into_inner().map_err(|e| e.into_error())?;
                temp.persist(&path).map_err(|e| e.error)?;
                debug!("wrote {}", path.display());
            }
        }
        Ok(())
    }

    /// Drop the output; an existing file at the target is left untouched.
    pub fn discard(self) {
        if let Self::File { path, .. } = self {
            debug!("discarded output for {}", path.display());
        }
    }
}

/// Write `data` to `--output` or stdout.
pub fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
    match path {
        Some(path) => fs::write(path, data)?,
        None => {
            let mut out = io::stdout().lock();
            out.write_all(data)?;
            out.flush()?;
        }
    }
    Ok(())
}
