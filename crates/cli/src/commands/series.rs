//! Series-level CLI commands: detector state, aggregates and manual readings

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use sentinel_lib::{AggregateBucket, DetectorState, Granularity, PondId, SensorType};
use tabled::Tabled;

use super::parse_window;
use crate::client::{ApiClient, IngestSummary, ReadingRequest};
use crate::output::{
    color_status, format_timestamp, format_value, print_info, print_json, print_rows,
    print_success, print_warning, OutputFormat,
};

/// Row for the buckets table
#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "Count")]
    count: u64,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Closed")]
    closed: String,
}

fn parse_sensor(sensor: &str) -> Result<SensorType> {
    sensor.parse::<SensorType>().context("Invalid sensor type")
}

/// Show the live Page-Hinkley state of a series
pub async fn show_detector(
    client: &ApiClient,
    pond_id: PondId,
    sensor: &str,
    format: OutputFormat,
) -> Result<()> {
    let sensor = parse_sensor(sensor)?;
    let path = format!("v1/ponds/{}/sensors/{}/detector", pond_id, sensor);
    let state: DetectorState = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&state)?,
        OutputFormat::Table => {
            let unit = sensor.canonical_unit();
            println!("{}", format!("Detector pond {} / {}", pond_id, sensor).bold());
            println!("{}", "=".repeat(40));
            println!("Mean:        {}", format_value(state.mean, unit));
            println!("U_t:         {:.4}", state.cumulative_sum);
            println!("m_t:         {:.4}", state.min_cumulative_sum);
            println!("Deviation:   {:.4}", state.deviation());
            println!("Samples:     {}", state.sample_count);
            match state.last_alarm_at {
                Some(ts) => println!("Last alarm:  {}", format_timestamp(&ts).yellow()),
                None => println!("Last alarm:  never"),
            }
        }
    }

    Ok(())
}

/// List aggregate buckets of a series over a look-back window
pub async fn list_buckets(
    client: &ApiClient,
    pond_id: PondId,
    sensor: &str,
    granularity: &str,
    since: &str,
    format: OutputFormat,
) -> Result<()> {
    let sensor = parse_sensor(sensor)?;
    let granularity: Granularity = granularity
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let to = Utc::now();
    let from = to - parse_window(since)?;

    let path = format!("v1/ponds/{}/sensors/{}/buckets", pond_id, sensor);
    let buckets: Vec<AggregateBucket> = client
        .get_with_query(
            &path,
            &[
                ("granularity", granularity.as_str().to_string()),
                ("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ],
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&buckets)?,
        OutputFormat::Table => {
            let unit = sensor.canonical_unit();
            let rows: Vec<BucketRow> = buckets
                .iter()
                .map(|b| BucketRow {
                    start: format_timestamp(&b.bucket_start),
                    count: b.count,
                    mean: b
                        .mean()
                        .map(|m| format_value(m, unit))
                        .unwrap_or_else(|| "-".to_string()),
                    min: format_value(b.min, unit),
                    max: format_value(b.max, unit),
                    closed: if b.closed { "yes" } else { "open" }.to_string(),
                })
                .collect();
            print_rows(rows, "No buckets in this window");
        }
    }

    Ok(())
}

/// Post one reading to the service and show what the engine did with it
pub async fn send_reading(
    client: &ApiClient,
    pond_id: PondId,
    sensor: &str,
    value: f64,
    unit: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let sensor = parse_sensor(sensor)?;
    let request = ReadingRequest {
        pond_id,
        sensor_type: sensor,
        value,
        unit: unit.unwrap_or_else(|| sensor.canonical_unit().to_string()),
        timestamp: timestamp.unwrap_or_else(Utc::now),
    };

    let summary: IngestSummary = client.post("v1/readings", &request).await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Reading accepted for pond {} / {}",
                pond_id, sensor
            ));
            if !summary.persisted {
                print_warning("Reading was processed but could not be persisted");
            }
            if let Some(change_point) = &summary.change_point {
                print_warning(&format!(
                    "Change point: deviation {:.3} exceeded lambda {:.3} after {} samples",
                    change_point.deviation, change_point.lambda, change_point.samples
                ));
            } else if let Some(deviation) = summary.deviation {
                print_info(&format!("Detector deviation {:.3}", deviation));
            }
            if summary.detector_reset {
                print_warning("Detector state was reset");
            }
            for alert in &summary.alerts {
                println!(
                    "  {} {} {}",
                    color_status(alert.severity.as_str()),
                    alert.kind.as_str(),
                    alert.reason
                );
            }
            if summary.suppressed > 0 {
                print_info(&format!("{} alerts suppressed by cool-down", summary.suppressed));
            }
        }
    }

    Ok(())
}
