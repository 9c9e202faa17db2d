//! Resource Governor CLI
//!
//! A read-only command-line tool for inspecting guarantees, burst usage and
//! adjustment history of a running governor.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{history, services, status};
use governor_lib::ServiceTier;

/// Resource Governor CLI
#[derive(Debug, Parser)]
#[command(name = "rgctl")]
#[command(author, version, about = "CLI for the Resource Governor", long_about = None)]
pub struct Cli {
    /// Governor API URL (can also be set via RG_API_URL env var)
    #[arg(long, env = "RG_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show governor health and burst pool usage
    Status,

    /// List governed services with their guarantees and burst usage
    Services {
        /// Only show services of this tier (critical, core, standard, best_effort)
        #[arg(long, short, value_parser = parse_tier)]
        tier: Option<ServiceTier>,
    },

    /// Show the quota adjustment history of a service
    History {
        /// Service name
        service: String,

        /// Show only the most recent records
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

fn parse_tier(value: &str) -> Result<ServiceTier, String> {
    ServiceTier::ALL
        .into_iter()
        .find(|tier| tier.to_string().eq_ignore_ascii_case(&value.replace('-', "_")))
        .ok_or_else(|| {
            format!(
                "unknown tier '{}', expected one of: critical, core, standard, best_effort",
                value
            )
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Services { tier } => services::list_services(&client, tier, cli.format).await?,
        Commands::History { service, limit } => {
            history::show_history(&client, &service, limit, cli.format).await?
        }
    }

    Ok(())
}
