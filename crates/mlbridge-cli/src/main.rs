//! mlbridge CLI - train and test models through the host effect bridge.

mod commands;
mod config;

use std::ffi::OsString;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::CliError;
use crate::config::{Cli, Commands};

/// Reports the total run time when dropped, on success and failure alike.
struct RunTimer {
    started: Instant,
}

impl RunTimer {
    fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(elapsed_ms, "total");
        eprintln!("total: {}ms", elapsed_ms);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mlbridge_host=info,mlbridge_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    ExitCode::from(execute(std::env::args_os()).await)
}

/// Parse `args` and run the command, returning the process exit status.
///
/// The timer covers argument parsing, so usage errors are timed too.
async fn execute<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let _timer = RunTimer::start();

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            if let Err(print_err) = e.print() {
                eprintln!("{}", print_err);
            }
            return u8::try_from(e.exit_code()).unwrap_or(1);
        }
    };

    match run(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let config = cli.host_config();
    let output = match &cli.command {
        Commands::Train(args) => commands::train(args, config).await?,
        Commands::Test(args) => commands::test(args, config).await?,
    };

    let rendered = serde_json::to_string_pretty(&output).map_err(mlbridge_host::BridgeError::from)?;
    println!("{}", rendered);
    Ok(())
}
