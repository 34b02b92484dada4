use age::secrecy::SecretString;

use keycard::core::errors::Result;
use keycard::core::models::recipient::RecipientRef;
use keycard::core::services::identity_service::{CreatedIdentity, EncryptOptions};

use crate::cli::commands::encrypt;
use crate::cli::context::{self, Service};
use crate::cli::output;
use crate::cli::{CredentialArgs, GlobalArgs, KeyAction, RevokeArgs};

/// Execute the `keycard key` command.
pub fn execute(global: &GlobalArgs, action: &KeyAction) -> Result<()> {
    match action {
        KeyAction::Create(args) => {
            let service = context::build_service(context::load_settings(global, None)?)?;
            create(&service, args)
        }
        KeyAction::Revoke(args) => revoke(global, args),
        KeyAction::Encrypt(args) => {
            let service = context::build_service(context::load_settings(global, None)?)?;
            let recipients: Vec<RecipientRef> = args
                .identities
                .iter()
                .cloned()
                .map(RecipientRef::LocalKey)
                .collect();
            let options = EncryptOptions {
                armor: args.armor,
                signer: None,
            };
            encrypt::transform(&service, &recipients, &args.io, options)
        }
    }
}

/// Create a key pair, and publish its card when a directory is configured.
pub fn create(service: &Service, args: &CredentialArgs) -> Result<()> {
    let password = SecretString::from(args.password.clone());

    let sp = service
        .directory
        .is_backed()
        .then(|| output::spinner(&format!("Creating identity '{}'...", args.identity)));

    let created = service.create_identity(&args.identity, &password);
    if let Some(sp) = sp {
        output::abandon_spinner(sp);
    }

    match created? {
        CreatedIdentity::Published { card, paths } => {
            output::success(&format!("Key pair created for '{}'", args.identity));
            output::detail(&format!("Public key: {}", paths.public.display()));
            output::detail(&format!("Private key: {}", paths.private.display()));
            output::success(&format!("Created card ID {}", card.id));
            println!("{}", card.id);
        }
        CreatedIdentity::Local { paths } => {
            output::success(&format!("Key pair created for '{}'", args.identity));
            output::success(&format!("Public key: {}", paths.public.display()));
            output::success(&format!("Private key: {}", paths.private.display()));
            output::warning("No directory configured: no card was published");
        }
    }
    Ok(())
}

/// Revoke every card bound to the identity.
pub fn revoke(global: &GlobalArgs, args: &RevokeArgs) -> Result<()> {
    let service = context::build_service(context::load_settings(global, args.reason)?)?;
    let password = SecretString::from(args.credentials.password.clone());
    let identity = &args.credentials.identity;

    let sp = output::spinner(&format!("Revoking cards for '{identity}'..."));
    let report = match service.revoke_identity(identity, &password) {
        Ok(report) => report,
        Err(e) => {
            output::abandon_spinner(sp);
            return Err(e);
        }
    };
    output::finish_spinner(
        sp,
        &format!(
            "Revoked {} card(s) for '{}' ({})",
            report.revoked.len(),
            report.identity,
            report.reason
        ),
    );
    for id in &report.revoked {
        output::detail(&format!("Revoked: {id}"));
    }
    Ok(())
}
