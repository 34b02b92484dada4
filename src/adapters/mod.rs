pub mod cipher;
pub mod directory;
pub mod key_stores;
