pub mod file_credential_store;
