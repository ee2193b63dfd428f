//! Pond-level CLI commands: health, alerts and notification deliveries

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use colored::Colorize;
use sentinel_lib::notify::{DeliveryOutcome, DeliveryResult};
use sentinel_lib::{Alert, ContributingFactor, HealthScore, PondId};
use tabled::Tabled;

use super::parse_window;
use crate::client::ApiClient;
use crate::output::{
    color_score, color_status, format_timestamp, print_json, print_rows, truncate_id, OutputFormat,
};

/// Row for the contributing factors table
#[derive(Tabled)]
struct FactorRow {
    #[tabled(rename = "Factor")]
    factor: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Row for the alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Row for the deliveries table
#[derive(Tabled)]
struct DeliveryRow {
    #[tabled(rename = "Alert")]
    alert_id: String,
    #[tabled(rename = "Completed")]
    completed_at: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Locale")]
    locale: String,
    #[tabled(rename = "Recipient")]
    recipient: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

fn factor_row(factor: &ContributingFactor) -> FactorRow {
    match factor {
        ContributingFactor::SubScore {
            sensor_type,
            value,
            sub_score,
            weight,
        } => FactorRow {
            factor: "sub-score".to_string(),
            sensor: sensor_type.to_string(),
            detail: format!(
                "value {:.2} scored {:.2} (weight {:.2})",
                value, sub_score, weight
            ),
        },
        ContributingFactor::ActiveAlarm {
            sensor_type,
            severity,
            penalty,
        } => FactorRow {
            factor: "alarm".to_string(),
            sensor: sensor_type.to_string(),
            detail: format!("{} alarm, -{:.0}", color_status(severity.as_str()), penalty),
        },
        ContributingFactor::MissingSeries { sensor_type } => FactorRow {
            factor: "missing".to_string(),
            sensor: sensor_type.to_string(),
            detail: "no reading yet".to_string(),
        },
    }
}

/// Show the current health score of a pond
pub async fn show_health(client: &ApiClient, pond_id: PondId, format: OutputFormat) -> Result<()> {
    let path = format!("v1/ponds/{}/health", pond_id);
    let health: HealthScore = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("{}", format!("Pond {} Health", pond_id).bold());
            println!("{}", "=".repeat(40));
            println!("Score:   {}", color_score(health.score));
            println!("Grade:   {}", health.grade);
            println!("Status:  {}", color_status(&health.status));
            println!("As of:   {}", format_timestamp(&health.timestamp));
            println!();

            let rows: Vec<FactorRow> = health.contributing_factors.iter().map(factor_row).collect();
            print_rows(rows, "No contributing factors");
        }
    }

    Ok(())
}

/// List recent alerts of a pond
pub async fn list_alerts(
    client: &ApiClient,
    pond_id: PondId,
    since: &str,
    severity: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let since = Utc::now() - parse_window(since)?;
    let path = format!("v1/ponds/{}/alerts", pond_id);
    let alerts: Vec<Alert> = client
        .get_with_query(
            &path,
            &[("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))],
        )
        .await?;

    let filtered: Vec<Alert> = alerts
        .into_iter()
        .filter(|a| {
            severity
                .as_ref()
                .map(|s| a.severity.as_str().eq_ignore_ascii_case(s))
                .unwrap_or(true)
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&filtered)?,
        OutputFormat::Table => {
            let total = filtered.len();
            let rows: Vec<AlertRow> = filtered
                .iter()
                .map(|a| AlertRow {
                    id: truncate_id(&a.id.to_string()),
                    created_at: format_timestamp(&a.created_at),
                    severity: color_status(a.severity.as_str()),
                    kind: a.kind.as_str().to_string(),
                    sensor: a
                        .sensor_type
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    reason: a.reason.clone(),
                })
                .collect();
            print_rows(rows, "No alerts in this window");
            if total > 0 {
                println!("\nTotal: {} alerts", total);
            }
        }
    }

    Ok(())
}

fn delivery_rows(result: &DeliveryResult) -> impl Iterator<Item = DeliveryRow> + '_ {
    result.recipients.iter().map(move |r| DeliveryRow {
        alert_id: truncate_id(&result.alert_id.to_string()),
        completed_at: format_timestamp(&result.completed_at),
        channel: result.channel.clone(),
        locale: result.locale.clone(),
        recipient: r.recipient.clone(),
        attempts: r.attempts,
        outcome: match &r.outcome {
            DeliveryOutcome::Delivered => color_status("delivered"),
            DeliveryOutcome::Failed { error, permanent } => format!(
                "{}{}: {}",
                color_status("failed"),
                if *permanent { " (permanent)" } else { "" },
                error
            ),
        },
    })
}

/// Show recent notification deliveries of a pond
pub async fn list_deliveries(
    client: &ApiClient,
    pond_id: PondId,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("v1/ponds/{}/deliveries", pond_id);
    let deliveries: Vec<DeliveryResult> = client
        .get_with_query(&path, &[("limit", limit.to_string())])
        .await?;

    match format {
        OutputFormat::Json => print_json(&deliveries)?,
        OutputFormat::Table => {
            let rows: Vec<DeliveryRow> = deliveries.iter().flat_map(delivery_rows).collect();
            print_rows(rows, "No deliveries recorded");
        }
    }

    Ok(())
}
