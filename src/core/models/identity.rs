use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::{KeycardError, Result};

/// Identities double as file names, so they are restricted to a safe alphabet.
static IDENTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@+-]*$").expect("identity pattern is a valid regex")
});

/// Maximum identity length, in bytes.
pub const MAX_IDENTITY_LEN: usize = 255;

/// Check that an identity can be used to name credential files.
pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(KeycardError::invalid("identity must not be empty"));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(KeycardError::invalid(format!(
            "identity is longer than {MAX_IDENTITY_LEN} bytes"
        )));
    }
    if !IDENTITY_PATTERN.is_match(identity) {
        return Err(KeycardError::invalid(format!(
            "identity '{identity}' may only contain letters, digits and . _ @ + -, \
             and must start with a letter or digit"
        )));
    }
    Ok(())
}

/// Normalize a directory query: trim entries, reject blanks, drop
/// duplicates while keeping the caller's order.
pub fn normalize_query(identities: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(identities.len());

    for raw in identities {
        let identity = raw.trim();
        if identity.is_empty() {
            return Err(KeycardError::invalid("identity in query must not be blank"));
        }
        if !normalized.iter().any(|seen| seen == identity) {
            normalized.push(identity.to_string());
        }
    }

    if normalized.is_empty() {
        return Err(KeycardError::invalid("at least one identity is required"));
    }
    Ok(normalized)
}
