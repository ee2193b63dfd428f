//! Pond Sentinel CLI
//!
//! A command-line tool for querying pond health, alerts, detector state
//! and aggregates from a running sentinel, and for posting test readings.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{ponds, series, service};
use sentinel_lib::PondId;

/// Pond Sentinel CLI
#[derive(Parser)]
#[command(name = "pondctl")]
#[command(author, version, about = "CLI for Pond Sentinel water quality monitoring", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PONDCTL_API_URL env var)
    #[arg(long, env = "PONDCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current health score of a pond
    Health {
        /// Pond ID
        pond: PondId,
    },

    /// List recent alerts of a pond
    Alerts {
        /// Pond ID
        pond: PondId,

        /// Look-back window (e.g., 30m, 24h, 7d)
        #[arg(long, default_value = "24h")]
        since: String,

        /// Only show alerts of this severity (info, warning, critical)
        #[arg(long)]
        severity: Option<String>,
    },

    /// Show the change detector state of a series
    Detector {
        /// Pond ID
        pond: PondId,

        /// Sensor type (temperature, ph, dissolved_oxygen, turbidity, ammonia, nitrate)
        sensor: String,
    },

    /// List hourly or daily aggregates of a series
    Buckets {
        /// Pond ID
        pond: PondId,

        /// Sensor type
        sensor: String,

        /// Bucket size (hour, day)
        #[arg(long, short, default_value = "hour")]
        granularity: String,

        /// Look-back window (e.g., 24h, 30d)
        #[arg(long, default_value = "24h")]
        since: String,
    },

    /// Post a single reading
    Send {
        /// Pond ID
        pond: PondId,

        /// Sensor type
        sensor: String,

        /// Measured value
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// Unit (defaults to the sensor's canonical unit)
        #[arg(long)]
        unit: Option<String>,

        /// Reading time in RFC 3339 (defaults to now)
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Show recent notification deliveries of a pond
    Deliveries {
        /// Pond ID
        pond: PondId,

        /// Maximum number of deliveries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show service component health
    Status,

    /// Show or change local CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Save default settings
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format
        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = config.format(cli.format);

    match cli.command {
        // Configuration commands do not talk to the service
        Commands::Config(ConfigCommands::Show) => service::show_config(&config, format),
        Commands::Config(ConfigCommands::Set {
            api_url,
            default_format,
        }) => service::set_config(config, api_url, default_format),
        command => {
            let client = client::ApiClient::new(&config.api_url(cli.api_url))?;
            execute(&client, command, format).await
        }
    }
}

async fn execute(client: &client::ApiClient, command: Commands, format: output::OutputFormat) -> Result<()> {
    match command {
        Commands::Health { pond } => {
            ponds::show_health(client, pond, format).await?;
        }
        Commands::Alerts {
            pond,
            since,
            severity,
        } => {
            ponds::list_alerts(client, pond, &since, severity, format).await?;
        }
        Commands::Detector { pond, sensor } => {
            series::show_detector(client, pond, &sensor, format).await?;
        }
        Commands::Buckets {
            pond,
            sensor,
            granularity,
            since,
        } => {
            series::list_buckets(client, pond, &sensor, &granularity, &since, format).await?;
        }
        Commands::Send {
            pond,
            sensor,
            value,
            unit,
            timestamp,
        } => {
            series::send_reading(client, pond, &sensor, value, unit, timestamp, format).await?;
        }
        Commands::Deliveries { pond, limit } => {
            ponds::list_deliveries(client, pond, limit, format).await?;
        }
        Commands::Status => {
            service::show_status(client, format).await?;
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
