use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polyneuron_node::config::{NodeConfig, DEFAULT_CONFIG_FILE};
use polyneuron_node::{cli, logging};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "polyneuron")]
#[command(about = "PolyNeuron - staked reasoning-task marketplace", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new configuration file
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Parameter preset to use (production, devnet)
        #[arg(long, default_value = "production")]
        preset: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run an in-process marketplace round and print the results
    Simulate {
        /// Number of workers to register
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of tasks to create
        #[arg(short, long)]
        tasks: Option<usize>,

        /// Minimum stake override, in whole units
        #[arg(long)]
        min_stake: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

/// Config file, then env, with defaults when no file is present.
fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            NodeConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => NodeConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (ignore if it doesn't)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Err(e) = logging::init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        let log_level = logging::effective_level(&config.logging, cli.verbose);
        // Best effort; a subscriber may already be installed
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(format!(
                "polyneuron={}",
                log_level
            )))
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }

    match cli.command {
        Commands::Init {
            output,
            preset,
            force,
        } => {
            let path = cli::init_config(&output, &preset, force)?;
            println!("✅ Wrote {} ({} preset)", path.display(), preset);
            Ok(())
        }

        Commands::Simulate {
            workers,
            tasks,
            min_stake,
            json,
        } => {
            // Priority order: CLI args > ENV vars > Config file > Defaults
            if let Some(workers) = workers {
                config.simulation.workers = workers;
            }
            if let Some(tasks) = tasks {
                config.simulation.tasks = tasks;
            }
            if let Some(min_stake) = min_stake {
                config.market.min_stake = min_stake;
            }
            config.validate().context("Invalid configuration")?;

            info!(
                version = env!("CARGO_PKG_VERSION"),
                workers = config.simulation.workers,
                tasks = config.simulation.tasks,
                "🧬 PolyNeuron simulation"
            );

            let report = cli::run_simulation(&config)
                .await
                .context("Simulation failed")?;
            cli::print_report(&report, json)
        }

        Commands::ShowConfig => {
            print!("{}", cli::render_config(&config)?);
            Ok(())
        }
    }
}
