pub mod commands;
pub mod context;
pub mod output;

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use keycard::core::models::card::RevocationReason;

/// Create identities, publish cards, and encrypt for the people behind them.
#[derive(Parser, Debug)]
#[command(
    name = "keycard",
    version,
    about,
    long_about = None,
    arg_required_else_help = true,
    subcommand_required = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command. Each falls back to a `KEYCARD_*` variable.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Directory access token
    #[arg(long, global = true, env = "KEYCARD_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Application ID used to co-sign published cards
    #[arg(long, global = true, env = "KEYCARD_APP_ID")]
    pub app_id: Option<String>,

    /// Application private key file
    #[arg(long, global = true, env = "KEYCARD_PRIVATE_KEY_FILE")]
    pub private_key_file: Option<PathBuf>,

    /// Password of the application private key
    #[arg(
        long,
        global = true,
        env = "KEYCARD_PRIVATE_KEY_PASSWORD",
        hide_env_values = true
    )]
    pub private_key_password: Option<String>,

    /// Directory URL (http/https) or path to a JSON directory file
    #[arg(long, global = true, env = "KEYCARD_DIRECTORY")]
    pub directory: Option<String>,

    /// Path to alternative config file
    #[arg(long, global = true, env = "KEYCARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, env = "KEYCARD_VERBOSE")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage local key pairs
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage directory cards
    Card {
        #[command(subcommand)]
        action: CardAction,
    },

    /// Encrypt data for cards, identities and exported card files
    Encrypt(EncryptArgs),

    /// Decrypt data with a local private key
    Decrypt(DecryptArgs),
}

#[derive(Subcommand, Debug)]
pub enum KeyAction {
    /// Create a key pair; with a directory, also publish a card
    Create(CredentialArgs),
    /// Revoke every card bound to an identity
    Revoke(RevokeArgs),
    /// Encrypt data for local public key files
    Encrypt(KeyEncryptArgs),
}

#[derive(Subcommand, Debug)]
pub enum CardAction {
    /// Create a key pair and publish its card (requires a directory)
    Create(CredentialArgs),
    /// List live cards for one or more identities
    Find(FindArgs),
    /// Export a card or its public key
    Export(ExportArgs),
    /// Revoke every card bound to an identity
    Revoke(RevokeArgs),
    /// Encrypt data for cards by ID
    Encrypt(CardEncryptArgs),
}

#[derive(Args, Debug)]
pub struct CredentialArgs {
    /// Identity the key belongs to
    #[arg(long)]
    pub identity: String,

    /// Password protecting the private key
    #[arg(long, env = "KEYCARD_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Revocation reason: unspecified or compromised
    #[arg(long)]
    pub reason: Option<RevocationReason>,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Identity to look up (repeatable)
    #[arg(long = "identity", required = true)]
    pub identities: Vec<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("selector").required(true).args(["id", "identity"])))]
pub struct ExportArgs {
    /// Card ID
    #[arg(long)]
    pub id: Option<String>,

    /// Identity; the first card found is exported
    #[arg(long)]
    pub identity: Option<String>,

    /// Export only the public key
    #[arg(long)]
    pub public_key: bool,

    /// Output file (default: stdout)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Input and output for a transform. Both default to the standard streams.
#[derive(Args, Debug, Default)]
pub struct IoArgs {
    /// Input file (default: stdin)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct KeyEncryptArgs {
    /// Identity whose local public key receives the data (repeatable)
    #[arg(long = "identity", required = true)]
    pub identities: Vec<String>,

    #[command(flatten)]
    pub io: IoArgs,

    /// ASCII-armor the output
    #[arg(long)]
    pub armor: bool,
}

#[derive(Args, Debug)]
pub struct CardEncryptArgs {
    /// Card ID to encrypt for (repeatable)
    #[arg(long = "id", required = true)]
    pub ids: Vec<String>,

    #[command(flatten)]
    pub io: IoArgs,

    /// ASCII-armor the output
    #[arg(long)]
    pub armor: bool,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("recipients")
        .required(true)
        .multiple(true)
        .args(["ids", "identities", "card_files"])
))]
pub struct EncryptArgs {
    /// Card ID to encrypt for (repeatable)
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Identity to encrypt for (repeatable)
    #[arg(long = "identity")]
    pub identities: Vec<String>,

    /// Exported card file to encrypt for (repeatable)
    #[arg(long = "card-file")]
    pub card_files: Vec<PathBuf>,

    /// Sign the data with this identity's local key
    #[arg(long, requires = "password")]
    pub sign_as: Option<String>,

    /// Password of the signing key
    #[arg(long, env = "KEYCARD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(flatten)]
    pub io: IoArgs,

    /// ASCII-armor the output
    #[arg(long)]
    pub armor: bool,
}

#[derive(Args, Debug)]
pub struct DecryptArgs {
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Require a valid signature from this identity
    #[arg(long)]
    pub sender: Option<String>,

    #[command(flatten)]
    pub io: IoArgs,
}
