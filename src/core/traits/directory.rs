use crate::core::errors::Result;
use crate::core::models::card::{Card, CardRequest, RevocationReason};

/// Port for the PKI directory that issues, lists and revokes cards.
///
/// Adapters live in `adapters::directory`. Revoked cards are never returned
/// by `get` or `find`.
pub trait Directory: Send + Sync {
    /// Submit a signed card request; returns the issued card.
    fn publish(&self, request: &CardRequest) -> Result<Card>;

    /// Fetch one card by ID.
    fn get(&self, id: &str) -> Result<Card>;

    /// All live cards matching any of `identities`, in directory order.
    fn find(&self, identities: &[String]) -> Result<Vec<Card>>;

    /// Revoke one card.
    fn revoke(&self, id: &str, reason: RevocationReason) -> Result<()>;
}
