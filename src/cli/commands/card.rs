use keycard::core::errors::{KeycardError, Result};
use keycard::core::models::card::Card;
use keycard::core::models::recipient::RecipientRef;
use keycard::core::services::identity_service::{CardSelector, EncryptOptions, ExportFormat};

use crate::cli::commands::{encrypt, key};
use crate::cli::context;
use crate::cli::output;
use crate::cli::{CardAction, ExportArgs, FindArgs, GlobalArgs};

/// Execute the `keycard card` command.
pub fn execute(global: &GlobalArgs, action: &CardAction) -> Result<()> {
    let service = || -> Result<context::Service> {
        context::build_service(context::load_settings(global, None)?)
    };

    match action {
        CardAction::Create(args) => {
            let service = service()?;
            if !service.directory.is_backed() {
                return Err(KeycardError::Configuration {
                    detail: "card create requires a directory; use 'key create' for a local key pair"
                        .into(),
                });
            }
            key::create(&service, args)
        }
        CardAction::Find(args) => find(&service()?, args),
        CardAction::Export(args) => export(&service()?, args),
        CardAction::Revoke(args) => key::revoke(global, args),
        CardAction::Encrypt(args) => {
            let recipients: Vec<RecipientRef> =
                args.ids.iter().cloned().map(RecipientRef::Card).collect();
            let options = EncryptOptions {
                armor: args.armor,
                signer: None,
            };
            encrypt::transform(&service()?, &recipients, &args.io, options)
        }
    }
}

const FIND_COLUMNS: [&str; 6] = ["ID", "Identity", "Type", "Scope", "Version", "Created At"];

fn find(service: &context::Service, args: &FindArgs) -> Result<()> {
    let sp = output::spinner("Searching cards...");
    let cards = match service.find_cards(&args.identities) {
        Ok(cards) => cards,
        Err(e) => {
            output::abandon_spinner(sp);
            return Err(e);
        }
    };
    output::abandon_spinner(sp);

    if cards.is_empty() {
        output::warning("No cards found");
    }
    let rows: Vec<Vec<String>> = cards.iter().map(row).collect();
    output::table(&FIND_COLUMNS, &rows);
    Ok(())
}

fn row(card: &Card) -> Vec<String> {
    vec![
        card.id.clone(),
        card.identity.clone(),
        card.identity_type.clone(),
        card.scope.to_string(),
        card.version.clone(),
        card.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    ]
}

fn export(service: &context::Service, args: &ExportArgs) -> Result<()> {
    let selector = match (&args.id, &args.identity) {
        (Some(id), _) => CardSelector::Id(id.clone()),
        (None, Some(identity)) => CardSelector::Identity(identity.clone()),
        (None, None) => return Err(KeycardError::invalid("either --id or --identity is required")),
    };
    let format = if args.public_key {
        ExportFormat::PublicKey
    } else {
        ExportFormat::Card
    };

    let exported = service.export_card(&selector, format)?;
    context::write_output(args.output.as_deref(), &exported)?;

    if let Some(path) = &args.output {
        output::success(&format!("Exported to {}", path.display()));
    }
    Ok(())
}
