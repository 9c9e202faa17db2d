//! Service listing command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_tier, color_utilization, format_amount, format_timestamp, print_json, print_table,
    print_warning, OutputFormat,
};
use governor_lib::{ServiceSnapshot, ServiceTier};

/// Row for the services table
#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Guarantee")]
    guarantee: String,
    #[tabled(rename = "In Use")]
    in_use: String,
    #[tabled(rename = "Burst")]
    burst: String,
    #[tabled(rename = "Burst Use")]
    burst_use: String,
    #[tabled(rename = "Allocs")]
    allocations: usize,
    #[tabled(rename = "Anomalies")]
    anomalies: u64,
    #[tabled(rename = "Adjusted")]
    adjusted: String,
}

impl From<&ServiceSnapshot> for ServiceRow {
    fn from(s: &ServiceSnapshot) -> Self {
        Self {
            name: s.name.clone(),
            tier: color_tier(s.tier),
            guarantee: format_amount(s.current_guarantee),
            in_use: format_amount(s.guaranteed_in_use),
            burst: format!("{} / {}", format_amount(s.burst_held), format_amount(s.max_burst)),
            burst_use: color_utilization(s.burst_utilization()),
            allocations: s.active_allocations,
            anomalies: s.anomalies_total,
            adjusted: format_timestamp(s.last_adjusted),
        }
    }
}

/// Keep services of the requested tier, highest priority first
fn select(mut services: Vec<ServiceSnapshot>, tier: Option<ServiceTier>) -> Vec<ServiceSnapshot> {
    services.retain(|s| tier.map_or(true, |t| s.tier == t));
    services.sort_by(|a, b| b.tier.cmp(&a.tier).then_with(|| a.name.cmp(&b.name)));
    services
}

/// List governed services
pub async fn list_services(
    client: &ApiClient,
    tier: Option<ServiceTier>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = client.get_snapshot().await?;
    let services = select(snapshot.services, tier);

    match format {
        OutputFormat::Json => print_json(&services)?,
        OutputFormat::Table => {
            if services.is_empty() {
                print_warning("No services found");
                return Ok(());
            }

            let rows: Vec<ServiceRow> = services.iter().map(ServiceRow::from).collect();
            print_table(rows);
            println!("\nTotal: {} services", services.len());
        }
    }

    Ok(())
}
