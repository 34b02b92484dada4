pub mod credential_store;
pub mod crypto;
pub mod directory;
