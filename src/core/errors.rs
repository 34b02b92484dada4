use std::path::PathBuf;

/// All domain errors for keycard.
///
/// Each variant carries enough context to diagnose the issue from the
/// terminal. Private key material and passwords never appear in messages.
#[derive(Debug, thiserror::Error)]
pub enum KeycardError {
    #[error("Configuration error: {detail}")]
    Configuration { detail: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Could not decode private key for '{identity}'")]
    Authentication { identity: String },

    #[error(
        "Key file not found: {path}\n\n  \
         Run 'keycard key create --identity <id> --password <pw>' first."
    )]
    KeyFileNotFound { path: PathBuf },

    #[error("Key for identity '{identity}' already exists at {path}")]
    KeyAlreadyExists { identity: String, path: PathBuf },

    #[error("Invalid input: {detail}")]
    InvalidInput { detail: String },

    #[error("Directory rejected {operation}: {reason}")]
    Remote { operation: String, reason: String },

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<KeycardError>),

    #[error(transparent)]
    Crypto(#[from] CryptoFailure),

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<KeycardError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Provider-level failures. Signature mismatches are reported apart from
/// decryption failures so a tampered sender is never mistaken for a bad key.
#[derive(Debug, thiserror::Error)]
pub enum CryptoFailure {
    #[error("Key encoding failed: {0}")]
    Encode(String),

    #[error("Key decoding failed: {0}")]
    Decode(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Signature verification failed: {0}")]
    SignatureMismatch(String),
}

/// Coarse classification of a [`KeycardError`], looking through context layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Authentication,
    KeyFileNotFound,
    KeyAlreadyExists,
    InvalidInput,
    RemoteOperation,
    Aggregate,
    Encode,
    Decode,
    Encryption,
    Decryption,
    SignatureMismatch,
    Io,
}

impl KeycardError {
    /// Kind of the innermost error (context wrappers are transparent).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::KeyFileNotFound { .. } => ErrorKind::KeyFileNotFound,
            Self::KeyAlreadyExists { .. } => ErrorKind::KeyAlreadyExists,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Remote { .. } => ErrorKind::RemoteOperation,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::Crypto(CryptoFailure::Encode(_)) => ErrorKind::Encode,
            Self::Crypto(CryptoFailure::Decode(_)) => ErrorKind::Decode,
            Self::Crypto(CryptoFailure::Encryption(_)) => ErrorKind::Encryption,
            Self::Crypto(CryptoFailure::Decryption(_)) => ErrorKind::Decryption,
            Self::Crypto(CryptoFailure::SignatureMismatch(_)) => ErrorKind::SignatureMismatch,
            Self::Context { source, .. } => source.kind(),
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &KeycardError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Members of an aggregate, if the root error is one.
    pub fn aggregated(&self) -> &[KeycardError] {
        match self.root() {
            Self::Aggregate(errors) => errors,
            _ => &[],
        }
    }

    /// Messages from this error down to its root, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = Vec::new();
        let mut current = Some(self);
        while let Some(err) = current {
            match err {
                Self::Context { context, source } => {
                    messages.push(context.clone());
                    current = Some(source);
                }
                other => {
                    messages.push(other.to_string());
                    current = None;
                }
            }
        }
        messages
    }

    /// Single-line rendering of the context chain: `outer: inner: root`.
    pub fn chain_line(&self) -> String {
        self.chain().join(": ")
    }

    pub fn remote(operation: &str, reason: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            detail: detail.into(),
        }
    }
}

fn format_aggregate(errors: &[KeycardError]) -> String {
    let mut out = format!("{} error(s) occurred:", errors.len());
    for err in errors {
        out.push_str("\n\t* ");
        out.push_str(&err.chain_line());
    }
    out
}

/// Wraps an error with the name of the operation it crossed.
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T, E: Into<KeycardError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| KeycardError::Context {
            context: context.to_string(),
            source: Box::new(e.into()),
        })
    }
}

/// Collects per-item failures of a fan-out operation.
///
/// Errors are tagged with the index of the item that produced them so the
/// final aggregate is ordered by request order, whatever order they arrived in.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: Vec<(usize, KeycardError)>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, error: KeycardError) {
        self.errors.push((index, error));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing failed, otherwise an aggregate of every failure.
    pub fn finish(mut self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        self.errors.sort_by_key(|(index, _)| *index);
        Err(KeycardError::Aggregate(
            self.errors.into_iter().map(|(_, e)| e).collect(),
        ))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeycardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chain_renders_outermost_first() {
        let err: Result<()> = Err(KeycardError::remote("publish", "409 conflict"));
        let err = err.context("error publishing card").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        assert_eq!(
            err.chain_line(),
            "error publishing card: Directory rejected publish: 409 conflict"
        );
    }

    #[test]
    fn empty_accumulator_is_ok() {
        assert!(ErrorAccumulator::new().finish().is_ok());
    }

    #[test]
    fn accumulator_orders_by_index() {
        let mut acc = ErrorAccumulator::new();
        acc.push(3, KeycardError::invalid("third"));
        acc.push(1, KeycardError::invalid("first"));
        assert_eq!(acc.len(), 2);

        let err = acc.finish().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);

        let members: Vec<String> = err.aggregated().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            members,
            vec!["Invalid input: first", "Invalid input: third"]
        );
    }

    #[test]
    fn single_failure_is_still_an_aggregate() {
        let mut acc = ErrorAccumulator::new();
        acc.push(0, KeycardError::remote("revoke", "boom"));
        let err = acc.finish().unwrap_err();

        assert_eq!(err.aggregated().len(), 1);
        assert!(err.to_string().starts_with("1 error(s) occurred:"));
    }

    #[test]
    fn kind_sees_through_nested_context() {
        let err: Result<()> = Err(KeycardError::Authentication {
            identity: "alice".into(),
        });
        let err = err
            .context("error loading key")
            .context("error decrypting data")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.chain().len(), 3);
    }
}
