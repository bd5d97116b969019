use anyhow::Result;
use atlas::core::log::init_logging;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for atlas::AppCommand {
    fn from(cmd: Commands) -> atlas::AppCommand {
        match cmd {
            Commands::Returns => atlas::AppCommand::Returns,
            Commands::Quote { tickers } => atlas::AppCommand::Quote { tickers },
            Commands::Heatmap { ticker, range } => atlas::AppCommand::Heatmap { ticker, range },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display leverage-aware returns and weights for each portfolio
    Returns,
    /// Aggregate quotes for one or more tickers across all sources
    Quote {
        #[arg(required = true)]
        tickers: Vec<String>,
    },
    /// Display a monthly return heatmap for a ticker
    Heatmap {
        ticker: String,
        /// History window, e.g. 1y, 5y, 10y, max
        #[arg(short, long, default_value = atlas::DEFAULT_HEATMAP_RANGE)]
        range: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => atlas::cli::setup::setup_at_path(path),
            None => atlas::cli::setup::setup(),
        },
        Some(cmd) => atlas::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
