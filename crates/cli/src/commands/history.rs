//! Quota adjustment history command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_tier, format_amount, format_change, format_timestamp, print_json, print_table,
    print_warning, OutputFormat,
};
use governor_lib::AdjustmentRecord;

/// Row for the adjustment history table
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Old")]
    old: String,
    #[tabled(rename = "New")]
    new: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Samples")]
    samples: String,
}

/// Newest records first, keeping at most `limit`
fn recent(history: &[AdjustmentRecord], limit: Option<usize>) -> Vec<AdjustmentRecord> {
    history
        .iter()
        .rev()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

/// Show the quota adjustment history of a service
pub async fn show_history(
    client: &ApiClient,
    service: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = client.get_service(service).await?;
    let records = recent(&snapshot.history, limit);

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            println!(
                "{} {} ({})",
                "Adjustment history for".bold(),
                snapshot.name.cyan(),
                color_tier(snapshot.tier)
            );
            println!(
                "Guarantee {} (base {}), max burst {}",
                format_amount(snapshot.current_guarantee),
                format_amount(snapshot.base_minimum),
                format_amount(snapshot.max_burst)
            );
            println!();

            if records.is_empty() {
                print_warning("No adjustments recorded");
                return Ok(());
            }

            let rows: Vec<HistoryRow> = records
                .iter()
                .map(|r| {
                    let change = format_change(r.old_guarantee, r.new_guarantee);
                    HistoryRow {
                        time: format_timestamp(r.timestamp),
                        old: format_amount(r.old_guarantee),
                        new: format_amount(r.new_guarantee),
                        change: if r.new_guarantee >= r.old_guarantee {
                            change.green().to_string()
                        } else {
                            change.yellow().to_string()
                        },
                        reason: r.reason.clone(),
                        samples: r
                            .statistics
                            .map(|s| s.sample_count.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    }
                })
                .collect();
            print_table(rows);
        }
    }

    Ok(())
}
