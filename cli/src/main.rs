mod args;
mod commands;

use clap::Parser;
use fsdock_core::config::CoreConfig;
use fsdock_core::errors::{FactoryError, FileError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::args::Cli;
use crate::commands::{App, SECRET_ENV};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status for usage mistakes.
const EXIT_USAGE: i32 = 2;
/// Exit status when the server wants (other) credentials.
const EXIT_CREDENTIALS: i32 = 3;

/// Whether the failure means the user should supply different credentials.
fn is_credential_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<FileError>()
            .is_some_and(FileError::needs_credentials)
            || matches!(
                cause.downcast_ref::<FactoryError>(),
                Some(FactoryError::AuthenticationRequired(_))
            )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match Cli::try_parse() {
        Ok(cli) => cli.command,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(EXIT_USAGE);
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    // Logs go to stderr so they never mix with command output on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("fsdock {VERSION} starting");
    let config = CoreConfig::from_env()?;
    debug!("Loaded configuration: {config:?}");
    let app = App::new(config, std::env::var(SECRET_ENV).ok());

    let mut stdin = tokio::io::stdin();
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = app.run(command, &mut stdin, &mut stdout).await {
        eprintln!("Error: {e:#}");
        if is_credential_error(&e) {
            eprintln!("Set {SECRET_ENV} to the server's password or key passphrase.");
            std::process::exit(EXIT_CREDENTIALS);
        }
        std::process::exit(1);
    }
    Ok(())
}
