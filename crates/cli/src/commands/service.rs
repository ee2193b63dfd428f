//! Service status and local CLI configuration commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ServiceHealth};
use crate::config::Config;
use crate::output::{color_status, print_info, print_json, print_rows, print_success, OutputFormat};

/// Row for the components table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

/// Show component health of the service
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: ServiceHealth = client.get("healthz").await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("{}", "Pond Sentinel Status".bold());
            println!("{}", "=".repeat(40));
            println!("Endpoint: {}", client.base_url().as_str().cyan());
            println!("Overall:  {}", color_status(&health.status));
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    component: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                    updated_at: component.updated_at.clone(),
                })
                .collect();
            print_rows(rows, "No components reported");
        }
    }

    Ok(())
}

/// Print the effective CLI configuration
pub fn show_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            print_info(&format!("Config file: {}", Config::config_path()?.display()));
            println!("API URL: {}", config.api_url(None));
            println!("Format:  {:?}", config.format(None));
        }
    }
    Ok(())
}

/// Persist a default API URL and/or output format
pub fn set_config(
    mut config: Config,
    api_url: Option<String>,
    format: Option<OutputFormat>,
) -> Result<()> {
    if let Some(url) = api_url {
        url::Url::parse(&url)?;
        config.api_url = Some(url);
    }
    if let Some(format) = format {
        config.default_format = Some(format);
    }

    let path = config.save()?;
    print_success(&format!("Saved configuration to {}", path.display()));
    Ok(())
}
