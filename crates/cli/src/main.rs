/// Entry point for the Dexcloak CLI, an Android application obfuscation tool.
///
/// This module parses command-line arguments, installs logging and dispatches to the
/// `obfuscate` and `list` subcommands.
use clap::Parser;
use dexcloak_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for Dexcloak.
///
/// Dexcloak decodes an APK or app bundle, rewrites its smali, manifest and resources with the
/// selected passes, and rebuilds, re-signs and aligns the result.
#[derive(Parser)]
#[command(name = "dexcloak")]
#[command(about = "Dexcloak: Android application obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log progress at info level (`RUST_LOG` takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Runs the Dexcloak CLI with the provided arguments.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    cli.command.execute()
}
