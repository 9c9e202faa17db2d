//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use governor_lib::{ComponentStatus, ServiceTier};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a rounded table
pub fn print_table<T: tabled::Tabled>(rows: Vec<T>) {
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format a capacity amount with up to two decimals
pub fn format_amount(amount: f64) -> String {
    let formatted = format!("{:.2}", amount);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Format a ratio in [0, 1] as a percentage
pub fn format_percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// Format a signed relative change, e.g. "+20.0%"
pub fn format_change(old: f64, new: f64) -> String {
    if old.abs() < f64::EPSILON {
        return "n/a".to_string();
    }
    format!("{:+.1}%", (new - old) / old * 100.0)
}

/// Format a Unix millisecond timestamp; zero means never
pub fn format_timestamp(ms: i64) -> String {
    if ms <= 0 {
        return "never".to_string();
    }
    match chrono::DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

/// Color a health status
pub fn color_status(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Healthy => "healthy".green().to_string(),
        ComponentStatus::Degraded => "degraded".yellow().to_string(),
        ComponentStatus::Unhealthy => "unhealthy".red().to_string(),
    }
}

/// Color a tier by priority
pub fn color_tier(tier: ServiceTier) -> String {
    let name = tier.to_string();
    match tier {
        ServiceTier::Critical => name.red().bold().to_string(),
        ServiceTier::Core => name.magenta().to_string(),
        ServiceTier::Standard => name.blue().to_string(),
        ServiceTier::BestEffort => name.dimmed().to_string(),
    }
}

/// Color a burst utilization ratio
pub fn color_utilization(ratio: f64) -> String {
    let formatted = format_percent(ratio);
    if ratio >= 0.9 {
        formatted.red().to_string()
    } else if ratio >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
