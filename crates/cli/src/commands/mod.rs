//! Subcommand implementations

pub mod history;
pub mod services;
pub mod status;
