//! Process host for the resource governor: configuration loading and the HTTP surface

pub mod api;
pub mod config;
