use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lexledger_cli::{run_lifecycle, Settings};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexledger")]
#[command(about = "LexLedger court-records coordinator", long_about = None)]
struct Cli {
    /// TOML settings file, layered over the defaults
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full case lifecycle against the in-process ledger and store
    Simulate {
        #[arg(long)]
        pretty: bool,
    },

    /// Print the effective settings
    ShowConfig,
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Simulate { pretty } => {
            info!("Starting lifecycle simulation...");
            let report = run_lifecycle(&settings).await?;
            print_json(&report, pretty)?;
        }
        Commands::ShowConfig => print_json(&settings, true)?,
    }

    Ok(())
}
