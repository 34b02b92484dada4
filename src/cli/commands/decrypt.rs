use age::secrecy::SecretString;

use keycard::core::errors::Result;

use crate::cli::context::{self, Sink};
use crate::cli::output;
use crate::cli::{DecryptArgs, GlobalArgs};

/// Execute the `keycard decrypt` command.
///
/// With `--sender`, nothing is written unless the embedded signature
/// verifies against one of the sender's keys.
pub fn execute(global: &GlobalArgs, args: &DecryptArgs) -> Result<()> {
    let service = context::build_service(context::load_settings(global, None)?)?;
    let password = SecretString::from(args.credentials.password.clone());

    let payload = context::open_input(args.io.input.as_deref())?;
    let mut sink = Sink::open(args.io.output.as_deref())?;

    let result = service.decrypt(
        &args.credentials.identity,
        &password,
        payload,
        sink.writer(),
        args.sender.as_deref(),
    );

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            sink.discard();
            return Err(e);
        }
    };
    sink.commit()?;

    output::detail(&format!(
        "Decrypted {} bytes, {}",
        report.bytes_written, report.mode
    ));
    if let Some(sender) = &report.verified_sender {
        output::success(&format!("Signature verified: {sender}"));
    }
    if let Some(path) = &args.io.output {
        output::success(&format!("Decrypted to {}", path.display()));
    }
    Ok(())
}
