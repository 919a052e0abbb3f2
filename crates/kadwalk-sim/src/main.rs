//! kadwalk - Kademlia closest-peer lookup simulator

use anyhow::Result;
use clap::{Parser, Subcommand};
use kadwalk_core::CancelToken;
use kadwalk_sim::config::{expand_path, Config};
use kadwalk_sim::{run_lookup, Simulation};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kadwalk")]
#[command(about = "Simulate iterative Kademlia lookups", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.kadwalk/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a random network and look up the peers closest to a key
    Lookup {
        /// Key to look up (hashed into the key space)
        #[arg(required = true)]
        key: String,

        /// Lookup parallelism (overrides config)
        #[arg(short, long)]
        alpha: Option<usize>,

        /// Number of simulated peers (overrides config)
        #[arg(short, long)]
        peers: Option<usize>,

        /// Rank candidates with the latency scorer
        #[arg(long)]
        latency_scorer: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Status,

    /// Initialize configuration
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = expand_path(&cli.config);

    match cli.command {
        Commands::Lookup { key, alpha, peers, latency_scorer, json } => {
            let mut config = Config::load_or_default(&config_path)?;
            if let Some(alpha) = alpha {
                config.lookup.alpha = alpha;
            }
            if let Some(peers) = peers {
                config.network.peers = peers;
                config.network.seeds = config.network.seeds.min(peers);
            }
            config.lookup.latency_scorer |= latency_scorer;
            config.validate()?;

            lookup(&config, &key, json).await?;
        }
        Commands::Status => {
            show_status(&config_path)?;
        }
        Commands::Init => {
            init_config(&config_path)?;
        }
    }

    Ok(())
}

async fn lookup(config: &Config, key: &str, json: bool) -> Result<()> {
    let sim = Simulation::build(&config.network, config.lookup.k)?;
    tracing::info!(
        "Built network: {} peers ({} failing, {} hanging)",
        sim.peers.len(),
        sim.failing,
        sim.hanging
    );

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, returning partial result");
            on_signal.cancel();
        }
    });

    let report = run_lookup(&sim, &config.lookup, key, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    Ok(())
}

fn show_status(config_path: &Path) -> Result<()> {
    println!("kadwalk v{}", env!("CARGO_PKG_VERSION"));

    let config = if config_path.exists() {
        println!("Config: {}", config_path.display());
        Config::load(config_path)?
    } else {
        println!("Config: defaults ({} not found)", config_path.display());
        Config::default()
    };

    println!();
    print!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    if let Some(dir) = config_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Created config directory: {}", dir.display());
        }
    }

    let toml = toml::to_string_pretty(&Config::default())?;
    std::fs::write(config_path, toml)?;

    println!("Initialized kadwalk config at: {}", config_path.display());

    Ok(())
}
