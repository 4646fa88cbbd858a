mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG controls log levels, defaulting to info. Logs go to stderr so
    // command output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = commands::Cli::parse();
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            error!("mall-guard failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
