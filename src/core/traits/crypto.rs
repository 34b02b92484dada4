use std::io::{Read, Write};

use age::secrecy::SecretString;

use crate::core::errors::Result;
use crate::core::models::keys::{Keypair, PublicKey};
use crate::core::models::recipient::RecipientSet;

/// Port for key generation, key encoding and the cipher/signature primitives.
///
/// Implementations live in `adapters::cipher` (e.g. AgeProvider).
/// The core layer only depends on this trait, never on a concrete backend.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh encryption + signing keypair.
    fn generate_keypair(&self) -> Result<Keypair>;

    /// Encode the private halves under a password.
    fn encode_private_key(&self, keypair: &Keypair, password: &SecretString) -> Result<Vec<u8>>;

    /// Decode a private key written by `encode_private_key`. A wrong password
    /// and a corrupt file fail the same way.
    fn decode_private_key(&self, data: &[u8], password: &SecretString) -> Result<Keypair>;

    /// Encrypt a whole buffer so that any one recipient can decrypt it.
    fn encrypt(&self, plaintext: &[u8], recipients: &RecipientSet, armor: bool) -> Result<Vec<u8>>;

    /// Encrypt incrementally from `input` to `output`; returns plaintext bytes read.
    fn encrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        recipients: &RecipientSet,
        armor: bool,
    ) -> Result<u64>;

    /// Decrypt a whole buffer with the given private key.
    fn decrypt(&self, ciphertext: &[u8], keypair: &Keypair) -> Result<Vec<u8>>;

    /// Decrypt incrementally; returns plaintext bytes written.
    fn decrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        keypair: &Keypair,
    ) -> Result<u64>;

    /// Sign a message with the keypair's signing key.
    fn sign(&self, message: &[u8], keypair: &Keypair) -> Result<[u8; 64]>;

    /// Verify a signature; mismatches are `CryptoFailure::SignatureMismatch`.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<()>;
}
