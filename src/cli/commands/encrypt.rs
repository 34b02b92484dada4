use age::secrecy::SecretString;

use keycard::core::errors::Result;
use keycard::core::models::recipient::RecipientRef;
use keycard::core::services::identity_service::{EncryptOptions, Signer};

use crate::cli::context::{self, Service, Sink};
use crate::cli::output;
use crate::cli::{EncryptArgs, GlobalArgs, IoArgs};

/// Execute the `keycard encrypt` command.
///
/// Recipients may be card IDs, identities (directory cards, or local public
/// keys without a directory) and exported card files, in any mix.
pub fn execute(global: &GlobalArgs, args: &EncryptArgs) -> Result<()> {
    let service = context::build_service(context::load_settings(global, None)?)?;

    let recipients: Vec<RecipientRef> = args
        .ids
        .iter()
        .cloned()
        .map(RecipientRef::Card)
        .chain(args.identities.iter().cloned().map(RecipientRef::Identity))
        .chain(args.card_files.iter().cloned().map(RecipientRef::CardFile))
        .collect();

    let signer = match (&args.sign_as, &args.password) {
        (Some(identity), Some(password)) => Some(Signer {
            identity: identity.clone(),
            password: SecretString::from(password.clone()),
        }),
        _ => None,
    };

    let options = EncryptOptions {
        armor: args.armor,
        signer,
    };
    transform(&service, &recipients, &args.io, options)
}

/// Encrypt `--input` into `--output` for the given recipients.
pub fn transform(
    service: &Service,
    recipients: &[RecipientRef],
    io: &IoArgs,
    options: EncryptOptions,
) -> Result<()> {
    for r in recipients {
        output::detail(&format!("Recipient: {r}"));
    }
    if let Some(signer) = &options.signer {
        output::detail(&format!("Signing as: {}", signer.identity));
    }

    let payload = context::open_input(io.input.as_deref())?;
    let mut sink = Sink::open(io.output.as_deref())?;

    match service.encrypt(recipients, payload, sink.writer(), &options) {
        Ok(report) => {
            sink.commit()?;
            output::detail(&format!(
                "Encrypted for {} key(s), {}, {} bytes written",
                report.recipients, report.mode, report.bytes_written
            ));
            if let Some(path) = &io.output {
                output::success(&format!("Encrypted to {}", path.display()));
            }
            Ok(())
        }
        Err(e) => {
            sink.discard();
            Err(e)
        }
    }
}
