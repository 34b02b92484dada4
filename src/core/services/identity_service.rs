use std::io::Write;

use age::secrecy::SecretString;
use log::{debug, info, warn};

use crate::core::errors::{CryptoFailure, ErrorAccumulator, KeycardError, Result, ResultExt};
use crate::core::models::card::{
    Card, CardContent, CardRequest, CardScope, RevocationReason, SELF_SIGNER,
};
use crate::core::models::identity::{normalize_query, validate_identity};
use crate::core::models::keys::{Keypair, PublicKey};
use crate::core::models::recipient::{RecipientRef, RecipientSet};
use crate::core::models::transform::{
    DEFAULT_BUFFER_LIMIT, Frame, FrameStrippingWriter, Payload, TransformMode, TransformReport,
    framed_plain, open_frame, seal_plain, seal_signed,
};
use crate::core::traits::credential_store::{CredentialPaths, CredentialStore};
use crate::core::traits::crypto::CryptoProvider;
use crate::core::traits::directory::Directory;

/// Whether card operations are available.
///
/// In `LocalOnly` mode every card step is skipped and identities exist only
/// as local credential files.
pub enum DirectoryMode {
    LocalOnly,
    Backed(Box<dyn Directory>),
}

impl DirectoryMode {
    pub fn directory(&self) -> Option<&dyn Directory> {
        match self {
            Self::LocalOnly => None,
            Self::Backed(directory) => Some(directory.as_ref()),
        }
    }

    pub fn is_backed(&self) -> bool {
        matches!(self, Self::Backed(_))
    }
}

/// Tunables for the orchestrator, resolved once by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub revocation_reason: RevocationReason,
    pub buffer_limit: u64,
    pub scope: CardScope,
    pub identity_type: String,
    /// Armor ciphertext even when the caller did not ask for it.
    pub armor: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            revocation_reason: RevocationReason::Unspecified,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            scope: CardScope::Application,
            identity_type: "unknown".to_string(),
            armor: false,
        }
    }
}

/// Result of `create_identity`.
#[derive(Debug, Clone)]
pub enum CreatedIdentity {
    /// The card was published; credentials were saved locally.
    Published { card: Card, paths: CredentialPaths },
    /// No directory: only the credential files were written.
    Local { paths: CredentialPaths },
}

/// Result of `revoke_identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationReport {
    pub identity: String,
    pub revoked: Vec<String>,
    pub reason: RevocationReason,
}

/// Identity and password of the key that signs an encrypted payload.
pub struct Signer {
    pub identity: String,
    pub password: SecretString,
}

#[derive(Default)]
pub struct EncryptOptions {
    pub armor: bool,
    pub signer: Option<Signer>,
}

/// Which card `export_card` should pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardSelector {
    Id(String),
    /// First card the directory returns for this identity.
    Identity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Base64 card export, re-importable with `Card::import`.
    Card,
    /// The card's raw public key document.
    PublicKey,
}

/// Orchestrates identity workflows by combining a `CredentialStore`,
/// a `CryptoProvider` and, when configured, a `Directory`.
pub struct IdentityService<S: CredentialStore, P: CryptoProvider> {
    pub store: S,
    pub crypto: P,
    pub directory: DirectoryMode,
    pub options: ServiceOptions,
}

impl<S: CredentialStore, P: CryptoProvider> IdentityService<S, P> {
    /// Generate a keypair and save it; with a directory, also publish a card.
    ///
    /// The credential files are written before publishing, and removed
    /// again if publishing fails, so a live card always has a local key.
    pub fn create_identity(&self, identity: &str, password: &SecretString) -> Result<CreatedIdentity> {
        validate_identity(identity)?;
        let keypair = self.crypto.generate_keypair().context("error creating key")?;

        let Some(directory) = self.directory.directory() else {
            let paths = self
                .store
                .save(identity, password, &keypair)
                .context("error saving key")?;
            debug!("created local keypair for '{identity}'");
            return Ok(CreatedIdentity::Local { paths });
        };

        let request = self
            .card_request(identity, &keypair)
            .context("error creating card")?;
        let paths = self
            .store
            .save(identity, password, &keypair)
            .context("error saving key")?;

        match directory.publish(&request) {
            Ok(card) => {
                info!("created card {} for '{identity}'", card.id);
                Ok(CreatedIdentity::Published { card, paths })
            }
            Err(e) => {
                if let Err(cleanup) = self.store.remove(identity) {
                    warn!("could not remove credentials for '{identity}' after failed publish: {cleanup}");
                }
                Err(e).context("error publishing card")
            }
        }
    }

    /// Revoke every card bound to `identity`.
    ///
    /// The local key is loaded first to prove possession. Each card is
    /// revoked independently; all failures are reported together.
    pub fn revoke_identity(&self, identity: &str, password: &SecretString) -> Result<RevocationReport> {
        let directory = self.require_directory("revoking cards")?;

        self.store
            .load(identity, password)
            .context("error loading key")?;

        let cards = directory
            .find(&[identity.to_string()])
            .context("error finding card")?;
        if cards.is_empty() {
            return Err(KeycardError::NotFound {
                what: format!("no cards found for identity '{identity}'"),
            });
        }

        let reason = self.options.revocation_reason;
        let mut failures = ErrorAccumulator::new();
        let mut revoked = Vec::with_capacity(cards.len());

        for (index, card) in cards.iter().enumerate() {
            match directory.revoke(&card.id, reason) {
                Ok(()) => revoked.push(card.id.clone()),
                Err(e) => failures.push(index, wrap(format!("card {}", card.id), e)),
            }
        }

        if !failures.is_empty() {
            warn!(
                "{} of {} revocation(s) failed for '{identity}'",
                failures.len(),
                cards.len()
            );
        }
        failures.finish().context("error revoking card")?;

        Ok(RevocationReport {
            identity: identity.to_string(),
            revoked,
            reason,
        })
    }

    /// Live cards for the given identities, in directory order.
    pub fn find_cards(&self, identities: &[String]) -> Result<Vec<Card>> {
        let directory = self.require_directory("finding cards")?;
        let query = normalize_query(identities)?;

        let cards = directory.find(&query).context("error finding cards")?;
        Ok(dedupe_cards(cards))
    }

    pub fn get_card(&self, id: &str) -> Result<Card> {
        self.require_directory("finding cards")?
            .get(id)
            .context("error finding card")
    }

    /// Serialize a card, or just its public key.
    pub fn export_card(&self, selector: &CardSelector, format: ExportFormat) -> Result<Vec<u8>> {
        let card = self.select_card(selector)?;

        match format {
            ExportFormat::Card => {
                let mut exported = card.export().context("error exporting card")?.into_bytes();
                exported.push(b'\n');
                Ok(exported)
            }
            ExportFormat::PublicKey => card
                .public_key
                .export()
                .context("error exporting public key"),
        }
    }

    /// Resolve every recipient reference into one deduplicated key set.
    pub fn resolve_recipients(&self, recipients: &[RecipientRef]) -> Result<RecipientSet> {
        if recipients.is_empty() {
            return Err(KeycardError::invalid("at least one recipient is required"));
        }

        let mut set = RecipientSet::new();
        let mut failures = ErrorAccumulator::new();

        for (index, recipient) in recipients.iter().enumerate() {
            match self.resolve_recipient(recipient) {
                Ok(keys) => {
                    for key in keys {
                        set.insert(key);
                    }
                }
                Err(e) => failures.push(index, wrap(recipient.to_string(), e)),
            }
        }
        failures.finish().context("error resolving recipients")?;

        debug!(
            "resolved {} recipient reference(s) to {} key(s)",
            recipients.len(),
            set.len()
        );
        Ok(set)
    }

    /// Encrypt `payload` into `output` so that any one recipient can decrypt it.
    pub fn encrypt(
        &self,
        recipients: &[RecipientRef],
        mut payload: Payload<'_>,
        output: &mut dyn Write,
        options: &EncryptOptions,
    ) -> Result<TransformReport> {
        let set = self.resolve_recipients(recipients)?;
        let armor = options.armor || self.options.armor;

        let signing_key = match &options.signer {
            Some(signer) => Some(
                self.store
                    .load(&signer.identity, &signer.password)
                    .context("error loading signing key")?,
            ),
            None => None,
        };

        // Signatures cover the whole plaintext, so signing always buffers.
        let mode = match signing_key {
            Some(_) => TransformMode::Buffered,
            None => TransformMode::select(payload.size_hint, set.len(), self.options.buffer_limit),
        };
        debug!("encrypting for {} recipient(s), {mode}", set.len());

        let bytes_written = match mode {
            TransformMode::Buffered => {
                let message = payload.read_all().context("error reading input data")?;
                let plaintext = match &signing_key {
                    Some(keypair) => {
                        let signature = self
                            .crypto
                            .sign(&message, keypair)
                            .context("error signing data")?;
                        seal_signed(&signature, &message)
                    }
                    None => seal_plain(&message),
                };

                let ciphertext = self
                    .crypto
                    .encrypt(&plaintext, &set, armor)
                    .context("error encrypting data")?;
                output
                    .write_all(&ciphertext)
                    .context("error writing encrypted data")?;
                ciphertext.len() as u64
            }
            TransformMode::Streaming => {
                let mut framed = framed_plain(&mut payload.reader);
                self.crypto
                    .encrypt_stream(&mut framed, output, &set, armor)
                    .context("error encrypting data")?
            }
        };
        output.flush().context("error writing encrypted data")?;

        Ok(TransformReport {
            mode,
            bytes_written,
            recipients: set.len(),
            verified_sender: None,
        })
    }

    /// Decrypt `payload` with the private key of `identity`.
    ///
    /// With a `sender`, the plaintext must carry a signature that verifies
    /// against the sender's public key, or nothing is written.
    pub fn decrypt(
        &self,
        identity: &str,
        password: &SecretString,
        mut payload: Payload<'_>,
        output: &mut dyn Write,
        sender: Option<&str>,
    ) -> Result<TransformReport> {
        let keypair = self
            .store
            .load(identity, password)
            .context("error loading key")?;

        if let Some(sender) = sender {
            return self.decrypt_and_verify(&keypair, sender, payload, output);
        }

        let mode = TransformMode::select(payload.size_hint, 1, self.options.buffer_limit);
        debug!("decrypting as '{identity}', {mode}");

        let bytes_written = match mode {
            TransformMode::Buffered => {
                let ciphertext = payload.read_all().context("error reading input data")?;
                let plaintext = self
                    .crypto
                    .decrypt(&ciphertext, &keypair)
                    .context("error decrypting data")?;
                let message = open_frame(&plaintext)
                    .ok_or_else(unframed)
                    .context("error decrypting data")?
                    .message();
                output
                    .write_all(message)
                    .context("error writing decrypted data")?;
                message.len() as u64
            }
            TransformMode::Streaming => {
                let mut stripper = FrameStrippingWriter::new(&mut *output);
                self.crypto
                    .decrypt_stream(&mut payload.reader, &mut stripper, &keypair)
                    .context("error decrypting data")?;
                if !stripper.is_complete() {
                    return Err(unframed()).context("error decrypting data");
                }
                stripper.finish().context("error writing decrypted data")?
            }
        };
        output.flush().context("error writing decrypted data")?;

        Ok(TransformReport {
            mode,
            bytes_written,
            recipients: 1,
            verified_sender: None,
        })
    }

    fn decrypt_and_verify(
        &self,
        keypair: &Keypair,
        sender: &str,
        mut payload: Payload<'_>,
        output: &mut dyn Write,
    ) -> Result<TransformReport> {
        let ciphertext = payload.read_all().context("error reading input data")?;
        let plaintext = self
            .crypto
            .decrypt(&ciphertext, keypair)
            .context("error decrypting data")?;

        let candidates = self
            .sender_keys(sender)
            .context("error resolving sender")?;

        let (signature, message) = match open_frame(&plaintext) {
            Some(Frame::Signed { signature, message }) => (signature, message),
            Some(Frame::Plain(_)) => {
                return Err(CryptoFailure::SignatureMismatch("payload is not signed".into()))
                    .context("error verifying data");
            }
            None => return Err(unframed()).context("error decrypting data"),
        };

        let verified = candidates
            .iter()
            .any(|key| self.crypto.verify(message, signature, key).is_ok());
        if !verified {
            return Err(CryptoFailure::SignatureMismatch(format!(
                "signature does not match sender '{sender}'"
            )))
            .context("error verifying data");
        }
        debug!("signature verified for sender '{sender}'");

        output
            .write_all(message)
            .context("error writing decrypted data")?;
        output.flush().context("error writing decrypted data")?;

        Ok(TransformReport {
            mode: TransformMode::Buffered,
            bytes_written: message.len() as u64,
            recipients: 1,
            verified_sender: Some(sender.to_string()),
        })
    }

    fn require_directory(&self, operation: &str) -> Result<&dyn Directory> {
        self.directory
            .directory()
            .ok_or_else(|| KeycardError::Configuration {
                detail: format!(
                    "{operation} requires a directory; set --directory, KEYCARD_DIRECTORY \
                     or [directory] location in keycard.toml"
                ),
            })
    }

    fn card_request(&self, identity: &str, keypair: &Keypair) -> Result<CardRequest> {
        let content = CardContent {
            identity: identity.to_string(),
            identity_type: self.options.identity_type.clone(),
            scope: self.options.scope,
            public_key: keypair.public_key(),
        };
        let mut request = CardRequest::new(&content)?;
        let signature = self.crypto.sign(&request.snapshot_bytes()?, keypair)?;
        request.add_signature(SELF_SIGNER, &signature);
        Ok(request)
    }

    fn select_card(&self, selector: &CardSelector) -> Result<Card> {
        let directory = self.require_directory("exporting cards")?;

        match selector {
            CardSelector::Id(id) => directory.get(id).context("error finding card"),
            CardSelector::Identity(identity) => directory
                .find(&[identity.clone()])
                .context("error finding card")?
                .into_iter()
                .next()
                .ok_or_else(|| KeycardError::NotFound {
                    what: format!("no cards found for identity '{identity}'"),
                }),
        }
    }

    fn resolve_recipient(&self, recipient: &RecipientRef) -> Result<Vec<PublicKey>> {
        match recipient {
            RecipientRef::Card(id) => Ok(vec![self.get_card(id)?.public_key]),
            RecipientRef::Identity(identity) => match self.directory.directory() {
                Some(_) => self.identity_keys(identity),
                None => Ok(vec![self.store.load_public(identity)?]),
            },
            RecipientRef::LocalKey(identity) => Ok(vec![self.store.load_public(identity)?]),
            RecipientRef::CardFile(path) => {
                let exported = std::fs::read_to_string(path)?;
                Ok(vec![Card::import(&exported)?.public_key])
            }
        }
    }

    fn sender_keys(&self, sender: &str) -> Result<Vec<PublicKey>> {
        match self.directory.directory() {
            Some(_) => self.identity_keys(sender),
            None => Ok(vec![self.store.load_public(sender)?]),
        }
    }

    /// Public keys of every live card for `identity`; none is an error.
    fn identity_keys(&self, identity: &str) -> Result<Vec<PublicKey>> {
        let cards = self.find_cards(&[identity.to_string()])?;
        if cards.is_empty() {
            return Err(KeycardError::NotFound {
                what: format!("no cards found for identity '{identity}'"),
            });
        }
        Ok(cards.into_iter().map(|c| c.public_key).collect())
    }
}

fn unframed() -> CryptoFailure {
    CryptoFailure::Decryption("decrypted data is not a keycard message".into())
}

fn wrap(context: String, error: KeycardError) -> KeycardError {
    KeycardError::Context {
        context,
        source: Box::new(error),
    }
}

/// Drop repeated card IDs, keeping the directory's order.
fn dedupe_cards(cards: Vec<Card>) -> Vec<Card> {
    let mut seen = std::collections::HashSet::new();
    cards
        .into_iter()
        .filter(|card| seen.insert(card.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;
    use crate::adapters::cipher::age_provider::AgeProvider;
    use crate::adapters::key_stores::file_credential_store::FileCredentialStore;
    use crate::core::errors::ErrorKind;
    use crate::core::models::transform::SIGNATURE_LEN;

    /// In-memory directory with scripted failures.
    #[derive(Clone, Default)]
    struct MockDirectory {
        state: Arc<Mutex<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        cards: Vec<Card>,
        revoked: HashSet<String>,
        fail_revoke: HashSet<String>,
        fail_publish: bool,
        revoke_calls: usize,
    }

    impl MockDirectory {
        fn insert(&self, card: Card) {
            self.state.lock().unwrap().cards.push(card);
        }

        fn fail_revoke_of(&self, id: &str) {
            self.state.lock().unwrap().fail_revoke.insert(id.to_string());
        }

        fn fail_publish(&self) {
            self.state.lock().unwrap().fail_publish = true;
        }

        fn revoked(&self) -> HashSet<String> {
            self.state.lock().unwrap().revoked.clone()
        }

        fn revoke_calls(&self) -> usize {
            self.state.lock().unwrap().revoke_calls
        }
    }

    impl Directory for MockDirectory {
        fn publish(&self, request: &CardRequest) -> Result<Card> {
            let mut state = self.state.lock().unwrap();
            if state.fail_publish {
                return Err(KeycardError::remote("publish", "503 service unavailable"));
            }
            request.verify_self_signature()?;
            let card = Card::issue(request, Utc::now())?;
            state.cards.push(card.clone());
            Ok(card)
        }

        fn get(&self, id: &str) -> Result<Card> {
            let state = self.state.lock().unwrap();
            state
                .cards
                .iter()
                .find(|c| c.id == id && !state.revoked.contains(&c.id))
                .cloned()
                .ok_or_else(|| KeycardError::NotFound {
                    what: format!("card {id}"),
                })
        }

        fn find(&self, identities: &[String]) -> Result<Vec<Card>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .cards
                .iter()
                .filter(|c| identities.contains(&c.identity) && !state.revoked.contains(&c.id))
                .cloned()
                .collect())
        }

        fn revoke(&self, id: &str, _reason: RevocationReason) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.revoke_calls += 1;
            if state.fail_revoke.contains(id) {
                return Err(KeycardError::remote("revoke", format!("card {id} is locked")));
            }
            state.revoked.insert(id.to_string());
            Ok(())
        }
    }

    type TestService = IdentityService<FileCredentialStore<AgeProvider>, AgeProvider>;

    fn service(dir: &tempfile::TempDir, directory: DirectoryMode) -> TestService {
        let crypto = AgeProvider::with_work_factor(10);
        IdentityService {
            store: FileCredentialStore::new(dir.path().to_path_buf(), crypto.clone()),
            crypto,
            directory,
            options: ServiceOptions::default(),
        }
    }

    fn backed(dir: &tempfile::TempDir) -> (TestService, MockDirectory) {
        let mock = MockDirectory::default();
        (service(dir, DirectoryMode::Backed(Box::new(mock.clone()))), mock)
    }

    fn password(p: &str) -> SecretString {
        SecretString::from(p.to_string())
    }

    /// Publish an extra card for `identity` with a throwaway key.
    fn extra_card(svc: &TestService, mock: &MockDirectory, identity: &str) -> Card {
        let kp = svc.crypto.generate_keypair().unwrap();
        let request = svc.card_request(identity, &kp).unwrap();
        let card = Card::issue(&request, Utc::now()).unwrap();
        mock.insert(card.clone());
        card
    }

    fn encrypt_bytes(svc: &TestService, recipients: &[RecipientRef], data: &[u8], options: &EncryptOptions) -> (Vec<u8>, TransformReport) {
        let mut out = Vec::new();
        let report = svc
            .encrypt(recipients, Payload::from_bytes(data.to_vec()), &mut out, options)
            .unwrap();
        (out, report)
    }

    fn decrypt_bytes(svc: &TestService, identity: &str, pw: &str, data: &[u8], sender: Option<&str>) -> Result<(Vec<u8>, TransformReport)> {
        let mut out = Vec::new();
        let report = svc.decrypt(identity, &password(pw), Payload::from_bytes(data.to_vec()), &mut out, sender)?;
        Ok((out, report))
    }

    #[test]
    fn local_create_writes_credential_pair_only() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);

        let created = svc.create_identity("alice", &password("p1")).unwrap();
        let CreatedIdentity::Local { paths } = created else {
            panic!("expected local identity");
        };
        assert!(paths.public.exists());
        assert!(paths.private.exists());
    }

    #[test]
    fn backed_create_publishes_card_for_saved_key() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);

        let CreatedIdentity::Published { card, .. } =
            svc.create_identity("alice", &password("p1")).unwrap()
        else {
            panic!("expected published card");
        };
        assert_eq!(card.identity, "alice");

        let local = svc.store.load("alice", &password("p1")).unwrap();
        assert_eq!(card.public_key, local.public_key());
        assert_eq!(mock.find(&["alice".into()]).unwrap().len(), 1);
    }

    #[test]
    fn failed_publish_removes_local_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        mock.fail_publish();

        let err = svc.create_identity("alice", &password("p1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        assert!(err.chain_line().starts_with("error publishing card"));
        assert!(!dir.path().join("alice.key").exists());
        assert!(!dir.path().join("alice.pub").exists());
    }

    #[test]
    fn revoke_with_zero_cards_is_not_found_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        let kp = svc.crypto.generate_keypair().unwrap();
        svc.store.save("alice", &password("p1"), &kp).unwrap();

        let err = svc.revoke_identity("alice", &password("p1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(mock.revoke_calls(), 0);
    }

    #[test]
    fn revoke_requires_key_possession() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        svc.create_identity("alice", &password("p1")).unwrap();

        let err = svc.revoke_identity("alice", &password("wrong")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(mock.revoke_calls(), 0);
    }

    #[test]
    fn revoke_all_cards_for_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        svc.create_identity("alice", &password("p1")).unwrap();
        extra_card(&svc, &mock, "alice");
        extra_card(&svc, &mock, "bob");

        let report = svc.revoke_identity("alice", &password("p1")).unwrap();
        assert_eq!(report.revoked.len(), 2);
        assert_eq!(report.reason, RevocationReason::Unspecified);
        assert!(mock.find(&["alice".into()]).unwrap().is_empty());
        assert_eq!(mock.find(&["bob".into()]).unwrap().len(), 1);
    }

    #[test]
    fn partial_revoke_failure_aggregates_exactly_the_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        svc.create_identity("alice", &password("p1")).unwrap();
        let second = extra_card(&svc, &mock, "alice");
        let _third = extra_card(&svc, &mock, "alice");
        let fourth = extra_card(&svc, &mock, "alice");
        mock.fail_revoke_of(&second.id);
        mock.fail_revoke_of(&fourth.id);

        let err = svc.revoke_identity("alice", &password("p1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert_eq!(mock.revoke_calls(), 4);

        let failures = err.aggregated();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].chain_line().contains(&second.id));
        assert!(failures[1].chain_line().contains(&fourth.id));

        // The other two were revoked anyway
        let revoked = mock.revoked();
        assert_eq!(revoked.len(), 2);
        assert!(!revoked.contains(&second.id));
        assert!(!revoked.contains(&fourth.id));
    }

    #[test]
    fn revoke_uses_configured_reason() {
        let dir = tempfile::tempdir().unwrap();
        let (mut svc, _mock) = backed(&dir);
        svc.options.revocation_reason = RevocationReason::Compromised;
        svc.create_identity("alice", &password("p1")).unwrap();

        let report = svc.revoke_identity("alice", &password("p1")).unwrap();
        assert_eq!(report.reason, RevocationReason::Compromised);
    }

    #[test]
    fn revoke_without_directory_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        let err = svc.revoke_identity("alice", &password("p1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn export_by_identity_picks_first_returned_card() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        let first = extra_card(&svc, &mock, "alice");
        let _second = extra_card(&svc, &mock, "alice");

        let exported = svc
            .export_card(&CardSelector::Identity("alice".into()), ExportFormat::Card)
            .unwrap();
        let card = Card::import(std::str::from_utf8(&exported).unwrap()).unwrap();
        assert_eq!(card.id, first.id);

        let public = svc
            .export_card(&CardSelector::Id(first.id.clone()), ExportFormat::PublicKey)
            .unwrap();
        assert_eq!(PublicKey::import(&public).unwrap(), first.public_key);
    }

    #[test]
    fn export_unknown_identity_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _mock) = backed(&dir);
        let err = svc
            .export_card(&CardSelector::Identity("nobody".into()), ExportFormat::Card)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn buffered_round_trip_with_local_keys() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();

        let (ciphertext, report) = encrypt_bytes(
            &svc,
            &[RecipientRef::LocalKey("alice".into())],
            b"hello alice",
            &EncryptOptions::default(),
        );
        assert_eq!(report.mode, TransformMode::Buffered);

        let (plaintext, report) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
        assert_eq!(plaintext, b"hello alice");
        assert_eq!(report.mode, TransformMode::Buffered);
    }

    #[test]
    fn streaming_round_trip_for_large_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, DirectoryMode::LocalOnly);
        svc.options.buffer_limit = 4096;
        svc.create_identity("alice", &password("p1")).unwrap();

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        let (ciphertext, report) = encrypt_bytes(
            &svc,
            &[RecipientRef::LocalKey("alice".into())],
            &payload,
            &EncryptOptions::default(),
        );
        assert_eq!(report.mode, TransformMode::Streaming);

        let (plaintext, report) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
        assert_eq!(report.mode, TransformMode::Streaming);
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn unknown_size_streams() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();

        let mut ciphertext = Vec::new();
        let report = svc
            .encrypt(
                &[RecipientRef::LocalKey("alice".into())],
                Payload::from_reader(&b"from a pipe"[..], None),
                &mut ciphertext,
                &EncryptOptions::default(),
            )
            .unwrap();
        assert_eq!(report.mode, TransformMode::Streaming);

        let (plaintext, _) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
        assert_eq!(plaintext, b"from a pipe");
    }

    #[test]
    fn every_recipient_decrypts_independently() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        for name in ["a", "b", "c"] {
            svc.create_identity(name, &password(name)).unwrap();
        }

        let refs: Vec<RecipientRef> = ["a", "b", "c"]
            .iter()
            .map(|n| RecipientRef::LocalKey(n.to_string()))
            .collect();
        let (ciphertext, report) =
            encrypt_bytes(&svc, &refs, b"to all three", &EncryptOptions::default());
        assert_eq!(report.recipients, 3);

        for name in ["a", "b", "c"] {
            let (plaintext, _) = decrypt_bytes(&svc, name, name, &ciphertext, None).unwrap();
            assert_eq!(plaintext, b"to all three");
        }
    }

    #[test]
    fn duplicate_recipients_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();

        let set = svc
            .resolve_recipients(&[
                RecipientRef::LocalKey("alice".into()),
                RecipientRef::Identity("alice".into()),
            ])
            .unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn recipient_failures_are_aggregated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();

        let err = svc
            .resolve_recipients(&[
                RecipientRef::LocalKey("ghost".into()),
                RecipientRef::LocalKey("alice".into()),
                RecipientRef::Card("abc".into()),
            ])
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Aggregate);
        let failures = err.aggregated();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind(), ErrorKind::KeyFileNotFound);
        assert_eq!(failures[1].kind(), ErrorKind::Configuration);
    }

    #[test]
    fn no_recipients_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        let err = svc.resolve_recipients(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn encrypt_to_directory_cards() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _mock) = backed(&dir);
        let CreatedIdentity::Published { card, .. } =
            svc.create_identity("alice", &password("p1")).unwrap()
        else {
            panic!("expected published card");
        };

        for recipient in [
            RecipientRef::Card(card.id.clone()),
            RecipientRef::Identity("alice".into()),
        ] {
            let (ciphertext, _) =
                encrypt_bytes(&svc, &[recipient], b"via directory", &EncryptOptions::default());
            let (plaintext, _) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
            assert_eq!(plaintext, b"via directory");
        }
    }

    #[test]
    fn encrypt_to_exported_card_file() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _mock) = backed(&dir);
        svc.create_identity("alice", &password("p1")).unwrap();

        let exported = svc
            .export_card(&CardSelector::Identity("alice".into()), ExportFormat::Card)
            .unwrap();
        let card_file = dir.path().join("alice.card");
        std::fs::write(&card_file, exported).unwrap();

        let (ciphertext, _) = encrypt_bytes(
            &svc,
            &[RecipientRef::CardFile(card_file)],
            b"offline card",
            &EncryptOptions::default(),
        );
        let (plaintext, _) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
        assert_eq!(plaintext, b"offline card");
    }

    fn signed_setup() -> (tempfile::TempDir, TestService, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("pa")).unwrap();
        svc.create_identity("bob", &password("pb")).unwrap();
        svc.create_identity("mallory", &password("pm")).unwrap();

        let options = EncryptOptions {
            armor: false,
            signer: Some(Signer {
                identity: "alice".into(),
                password: password("pa"),
            }),
        };
        let (ciphertext, report) = encrypt_bytes(
            &svc,
            &[RecipientRef::LocalKey("bob".into())],
            b"signed by alice",
            &options,
        );
        assert_eq!(report.mode, TransformMode::Buffered);
        (dir, svc, ciphertext)
    }

    #[test]
    fn decrypt_then_verify_accepts_true_sender() {
        let (_dir, svc, ciphertext) = signed_setup();
        let (plaintext, report) =
            decrypt_bytes(&svc, "bob", "pb", &ciphertext, Some("alice")).unwrap();
        assert_eq!(plaintext, b"signed by alice");
        assert_eq!(report.verified_sender.as_deref(), Some("alice"));
    }

    #[test]
    fn wrong_sender_is_signature_mismatch() {
        let (_dir, svc, ciphertext) = signed_setup();
        let err = decrypt_bytes(&svc, "bob", "pb", &ciphertext, Some("mallory")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }

    #[test]
    fn tampered_ciphertext_is_decryption_failure() {
        let (_dir, svc, mut ciphertext) = signed_setup();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        let err = decrypt_bytes(&svc, "bob", "pb", &ciphertext, Some("alice")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decryption);
    }

    #[test]
    fn unsigned_payload_fails_verification() {
        let (_dir, svc, _) = signed_setup();
        let (ciphertext, _) = encrypt_bytes(
            &svc,
            &[RecipientRef::LocalKey("bob".into())],
            b"no signature",
            &EncryptOptions::default(),
        );
        let err = decrypt_bytes(&svc, "bob", "pb", &ciphertext, Some("alice")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }

    #[test]
    fn plain_decrypt_strips_signature_frame() {
        let (_dir, svc, ciphertext) = signed_setup();
        let (plaintext, _) = decrypt_bytes(&svc, "bob", "pb", &ciphertext, None).unwrap();
        assert_eq!(plaintext, b"signed by alice");
    }

    #[test]
    fn plaintext_resembling_a_signed_frame_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();

        let mut payload = vec![0x01];
        payload.extend_from_slice(&[0x41; SIGNATURE_LEN + 100]);
        let recipients = [RecipientRef::LocalKey("alice".into())];

        for (limit, mode) in [
            (DEFAULT_BUFFER_LIMIT, TransformMode::Buffered),
            (16, TransformMode::Streaming),
        ] {
            svc.options.buffer_limit = limit;
            let (ciphertext, report) =
                encrypt_bytes(&svc, &recipients, &payload, &EncryptOptions::default());
            assert_eq!(report.mode, mode);

            let (plaintext, report) =
                decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
            assert_eq!(report.mode, mode);
            assert_eq!(plaintext, payload, "{mode} round trip");
        }
    }

    #[test]
    fn empty_payload_round_trips_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();
        let recipients = [RecipientRef::LocalKey("alice".into())];

        let (buffered, _) = encrypt_bytes(&svc, &recipients, b"", &EncryptOptions::default());
        let mut streamed = Vec::new();
        svc.encrypt(
            &recipients,
            Payload::from_reader(&b""[..], None),
            &mut streamed,
            &EncryptOptions::default(),
        )
        .unwrap();

        for ciphertext in [buffered, streamed] {
            for limit in [DEFAULT_BUFFER_LIMIT, 0] {
                svc.options.buffer_limit = limit;
                let (plaintext, _) = decrypt_bytes(&svc, "alice", "p1", &ciphertext, None).unwrap();
                assert!(plaintext.is_empty());
            }
        }
    }

    #[test]
    fn unframed_ciphertext_is_decryption_failure() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, DirectoryMode::LocalOnly);
        svc.create_identity("alice", &password("p1")).unwrap();
        let keypair = svc.store.load("alice", &password("p1")).unwrap();

        let mut set = RecipientSet::new();
        set.insert(keypair.public_key());
        let raw = svc.crypto.encrypt(b"\x7fno frame", &set, false).unwrap();

        let err = decrypt_bytes(&svc, "alice", "p1", &raw, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decryption);
    }

    #[test]
    fn decrypt_with_wrong_password_is_authentication_error() {
        let (_dir, svc, ciphertext) = signed_setup();
        let err = decrypt_bytes(&svc, "bob", "nope", &ciphertext, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn find_cards_dedupes_query_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, mock) = backed(&dir);
        let card = extra_card(&svc, &mock, "alice");
        mock.insert(card.clone());

        let cards = svc
            .find_cards(&["alice".into(), " alice ".into()])
            .unwrap();
        assert_eq!(cards, vec![card]);
    }
}
