//! CLI interface for seven-stations.

pub mod handlers;
pub mod output;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{ClientConfig, StationsConfig};
use output::{DetailLevel, OutputMode};

/// Seven-stations - narrative analysis pipeline and graph diagnostics
#[derive(Parser)]
#[command(name = "seven-stations", version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ./stations.toml, then the user config dir)
    #[arg(long, env = "STATIONS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Client preset applied over the loaded config
    #[arg(long, value_enum, global = true)]
    pub preset: Option<Preset>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    /// Output as Markdown
    #[arg(long, global = true)]
    pub md: bool,

    /// Brief output (less detail)
    #[arg(long, global = true)]
    pub brief: bool,

    /// Full output (maximum detail)
    #[arg(long, global = true)]
    pub full: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    Production,
    Development,
}

impl Preset {
    pub fn client_config(self) -> ClientConfig {
        match self {
            Preset::Production => ClientConfig::production(),
            Preset::Development => ClientConfig::development(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run graph diagnostics on a saved narrative graph (JSON)
    Diagnose {
        /// Path to the graph JSON file
        graph: PathBuf,
    },

    /// Run the analysis pipeline over a text file
    Analyze {
        /// Path to the narrative text
        input: PathBuf,
        /// First station to run
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=7))]
        start_at: u8,
        /// Last station to run
        #[arg(long, default_value = "7", value_parser = clap::value_parser!(u8).range(1..=7))]
        end_at: u8,
        /// Stations to skip (repeatable)
        #[arg(long)]
        skip: Vec<u8>,
        /// Deadline per station in seconds (overrides config)
        #[arg(long)]
        stage_timeout: Option<u64>,
        /// Disable compliance checking
        #[arg(long)]
        no_compliance: bool,
        /// Disable uncertainty scoring
        #[arg(long)]
        no_uncertainty: bool,
        /// Write the resulting narrative graph to this file
        #[arg(long)]
        save_graph: Option<PathBuf>,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// List the config file locations that are checked
    Paths,
    /// Send a tiny request to the model backend
    Check,
}

/// Resolve the effective config for a parsed command line.
pub fn effective_config(cli: &Cli) -> StationsConfig {
    let mut config = crate::config::load_config(cli.config.as_deref());
    if let Some(preset) = cli.preset {
        config.client = preset.client_config();
        // Env overrides still win over presets.
        crate::config::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    }
    config
}

/// Execute a CLI command.
pub async fn execute(
    command: &Commands,
    config: &StationsConfig,
    mode: OutputMode,
    detail: DetailLevel,
) -> anyhow::Result<()> {
    match command {
        Commands::Diagnose { graph } => handlers::diagnose::handle_diagnose(graph, config, mode, detail)?,

        Commands::Analyze {
            input,
            start_at,
            end_at,
            skip,
            stage_timeout,
            no_compliance,
            no_uncertainty,
            save_graph,
        } => {
            let args = handlers::analyze::AnalyzeArgs {
                input: input.clone(),
                start_at: *start_at,
                end_at: *end_at,
                skip: skip.clone(),
                stage_timeout: *stage_timeout,
                compliance: !no_compliance,
                uncertainty: !no_uncertainty,
                save_graph: save_graph.clone(),
            };
            handlers::analyze::handle_analyze(&args, config, mode, detail).await?
        }

        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => handlers::config::handle_show(config, mode)?,
            ConfigCommands::Paths => handlers::config::handle_paths(mode),
            ConfigCommands::Check => handlers::config::handle_check(config, mode).await?,
        },

        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "seven-stations",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
