mod cli;

use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    let args = Cli::parse();

    cli::output::set_verbose(args.global.verbose);
    init_logging(args.global.verbose);

    let result = match &args.command {
        Commands::Key { action } => cli::commands::key::execute(&args.global, action),
        Commands::Card { action } => cli::commands::card::execute(&args.global, action),
        Commands::Encrypt(encrypt) => cli::commands::encrypt::execute(&args.global, encrypt),
        Commands::Decrypt(decrypt) => cli::commands::decrypt::execute(&args.global, decrypt),
    };

    if let Err(e) = result {
        cli::output::report_error(&e);
        std::process::exit(1);
    }
}

/// Logs go to stderr. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "keycard=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}
