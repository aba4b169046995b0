//! CLI command handlers.

pub mod analyze;
pub mod config;
pub mod diagnose;
