//! seven-stations - narrative analysis pipeline and graph diagnostics
//!
//! Usage:
//!   seven-stations analyze script.txt        Run all seven stations
//!   seven-stations diagnose graph.json       Health report for a saved graph
//!   seven-stations config show               Effective configuration
//!   seven-stations --help                    Show all commands

use anyhow::Result;
use clap::Parser;

use seven_stations::cli::output::{DetailLevel, OutputMode};
use seven_stations::cli::{effective_config, execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr so JSON output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seven_stations=info".parse()?),
        )
        .init();

    let mode = OutputMode::from_flags(cli.json, cli.md);
    let detail = DetailLevel::from_flags(cli.brief, cli.full);
    let config = effective_config(&cli);

    execute(&cli.command, &config, mode, detail).await
}
