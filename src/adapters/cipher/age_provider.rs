use std::io::{self, BufReader, Read, Write};
use std::iter;

use age::secrecy::{ExposeSecret, SecretString};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

use crate::core::errors::{CryptoFailure, Result};
use crate::core::models::keys::{Keypair, PrivateKeyDocument, PublicKey};
use crate::core::models::recipient::RecipientSet;
use crate::core::traits::crypto::CryptoProvider;

/// Crypto provider built on age (X25519 + ChaCha20-Poly1305) for
/// encryption and Ed25519 for signatures.
///
/// Private keys are sealed with age's scrypt passphrase recipient and
/// ASCII-armored so `.key` files stay text-friendly.
#[derive(Debug, Clone, Default)]
pub struct AgeProvider {
    /// scrypt log2(N) for new private key files; `None` uses age's default.
    work_factor: Option<u8>,
}

impl AgeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed scrypt work factor when sealing private keys.
    pub fn with_work_factor(work_factor: u8) -> Self {
        Self {
            work_factor: Some(work_factor),
        }
    }

    fn encryptor(recipients: &RecipientSet) -> Result<age::Encryptor> {
        if recipients.is_empty() {
            return Err(CryptoFailure::Encryption("No recipients provided".into()).into());
        }

        age::Encryptor::with_recipients(
            recipients
                .iter()
                .map(|k| k.encryption_recipient() as &dyn age::Recipient),
        )
        .map_err(|e| CryptoFailure::Encryption(format!("{e}")).into())
    }

    fn armor_format(armor: bool) -> age::armor::Format {
        if armor {
            age::armor::Format::AsciiArmor
        } else {
            age::armor::Format::Binary
        }
    }

    /// Encrypt `input` into `output`, finishing both the age stream and the armor.
    fn seal<W: Write>(
        encryptor: age::Encryptor,
        input: &mut dyn Read,
        output: W,
        armor: bool,
    ) -> io::Result<u64> {
        let armored = age::armor::ArmoredWriter::wrap_output(output, Self::armor_format(armor))?;
        let mut writer = encryptor.wrap_output(armored)?;
        let copied = io::copy(input, &mut writer)?;
        writer.finish()?.finish()?;
        Ok(copied)
    }

    fn open<'a, R: Read + 'a>(
        input: R,
        identity: &'a dyn age::Identity,
    ) -> Result<impl Read + 'a> {
        let armored = age::armor::ArmoredReader::new(BufReader::new(input));
        let decryptor = age::Decryptor::new(armored)
            .map_err(|e| CryptoFailure::Decryption(format!("Invalid encrypted data: {e}")))?;

        decryptor
            .decrypt(iter::once(identity))
            .map_err(|e| match e {
                age::DecryptError::NoMatchingKeys => CryptoFailure::Decryption(
                    "no matching key: this identity is not a recipient".into(),
                )
                .into(),
                other => CryptoFailure::Decryption(format!("{other}")).into(),
            })
    }
}

impl CryptoProvider for AgeProvider {
    fn generate_keypair(&self) -> Result<Keypair> {
        Ok(Keypair::from_parts(
            age::x25519::Identity::generate(),
            SigningKey::generate(&mut rand::rngs::OsRng),
        ))
    }

    fn encode_private_key(&self, keypair: &Keypair, password: &SecretString) -> Result<Vec<u8>> {
        let document = serde_json::to_vec(&keypair.to_private_document())
            .map_err(|e| CryptoFailure::Encode(e.to_string()))?;

        let mut recipient =
            age::scrypt::Recipient::new(SecretString::from(password.expose_secret().to_owned()));
        if let Some(work_factor) = self.work_factor {
            recipient.set_work_factor(work_factor);
        }
        let encryptor =
            age::Encryptor::with_recipients(iter::once(&recipient as &dyn age::Recipient))
                .map_err(|e| CryptoFailure::Encode(format!("{e}")))?;

        let mut output = Vec::new();
        Self::seal(encryptor, &mut document.as_slice(), &mut output, true)
            .map_err(|e| CryptoFailure::Encode(format!("Sealing private key failed: {e}")))?;
        Ok(output)
    }

    fn decode_private_key(&self, data: &[u8], password: &SecretString) -> Result<Keypair> {
        let identity =
            age::scrypt::Identity::new(SecretString::from(password.expose_secret().to_owned()));

        let mut reader = Self::open(data, &identity)
            .map_err(|_| CryptoFailure::Decode("private key could not be decrypted".into()))?;
        let mut document = Vec::new();
        reader
            .read_to_end(&mut document)
            .map_err(|_| CryptoFailure::Decode("private key could not be decrypted".into()))?;

        let document: PrivateKeyDocument = serde_json::from_slice(&document)
            .map_err(|e| CryptoFailure::Decode(format!("invalid private key document: {e}")))?;
        Keypair::from_private_document(&document)
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &RecipientSet, armor: bool) -> Result<Vec<u8>> {
        let encryptor = Self::encryptor(recipients)?;

        let mut output = Vec::new();
        Self::seal(encryptor, &mut &plaintext[..], &mut output, armor)
            .map_err(|e| CryptoFailure::Encryption(format!("Encryption stream failed: {e}")))?;
        Ok(output)
    }

    fn encrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        recipients: &RecipientSet,
        armor: bool,
    ) -> Result<u64> {
        let encryptor = Self::encryptor(recipients)?;

        Self::seal(encryptor, input, output, armor)
            .map_err(|e| CryptoFailure::Encryption(format!("Encryption stream failed: {e}")).into())
    }

    fn decrypt(&self, ciphertext: &[u8], keypair: &Keypair) -> Result<Vec<u8>> {
        let mut reader = Self::open(ciphertext, keypair.encryption_identity())?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| CryptoFailure::Decryption(format!("Read decrypted data failed: {e}")))?;
        Ok(plaintext)
    }

    fn decrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        keypair: &Keypair,
    ) -> Result<u64> {
        let mut reader = Self::open(input, keypair.encryption_identity())?;

        io::copy(&mut reader, output)
            .map_err(|e| CryptoFailure::Decryption(format!("Decryption stream failed: {e}")).into())
    }

    fn sign(&self, message: &[u8], keypair: &Keypair) -> Result<[u8; 64]> {
        Ok(keypair.signing_key().sign(message).to_bytes())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<()> {
        let bytes: [u8; 64] = signature.try_into().map_err(|_| {
            CryptoFailure::SignatureMismatch("signature must be 64 bytes".into())
        })?;

        public_key
            .verifying_key()
            .verify(message, &Signature::from_bytes(&bytes))
            .map_err(|_| {
                CryptoFailure::SignatureMismatch("signature does not match public key".into())
                    .into()
            })
    }
}
