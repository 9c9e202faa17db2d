//! Governor status command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, color_utilization, format_amount, format_timestamp, print_json, print_table,
    OutputFormat,
};
use governor_lib::{GovernorSnapshot, HealthResponse};

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    health: &'a HealthResponse,
    snapshot: &'a GovernorSnapshot,
}

/// Show governor health and burst pool usage
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.get_health().await?;
    let snapshot = client.get_snapshot().await?;

    match format {
        OutputFormat::Json => print_json(&StatusReport {
            health: &health,
            snapshot: &snapshot,
        })?,
        OutputFormat::Table => {
            println!("{}", "Resource Governor".bold());
            println!("{}", "=".repeat(50));
            println!("Instance:               {}", snapshot.instance.cyan());
            println!("Resource:               {}", snapshot.resource);
            println!("Health:                 {}", color_status(health.status));
            println!("Services:               {}", snapshot.services.len());
            println!();

            let pool = &snapshot.burst_pool;
            let used = if pool.total_capacity > 0.0 {
                pool.allocated / pool.total_capacity
            } else {
                0.0
            };
            println!("{}", "Capacity".bold());
            println!("{}", "-".repeat(50));
            println!(
                "Total:                  {}",
                format_amount(snapshot.total_capacity)
            );
            println!(
                "Guaranteed:             {}",
                format_amount(snapshot.total_guaranteed())
            );
            println!(
                "Burst pool:             {} / {} ({})",
                format_amount(pool.allocated),
                format_amount(pool.total_capacity),
                color_utilization(used)
            );
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status),
                    message: component.message.clone().unwrap_or_default(),
                    updated: format_timestamp(component.updated_at),
                })
                .collect();
            if !rows.is_empty() {
                print_table(rows);
            }

            println!();
            println!(
                "Snapshot taken: {}",
                format_timestamp(snapshot.timestamp).dimmed()
            );
        }
    }

    Ok(())
}
