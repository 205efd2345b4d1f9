//! COPE - Opportunistic network coding simulation
//!
//! Runs COPE engines over a simulated broadcast medium and reports how many
//! transmissions coding saved.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use cope_logging::{CopeSubscriberBuilder, LogConfig};
use cope_simulation::{Scenario, SimConfig};

#[derive(Parser)]
#[command(
    name = "cope-sim",
    about = "Opportunistic XOR network coding simulation",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write a full engine trace to DIR/cope.log instead of the console
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print statistics
    Run {
        #[arg(value_enum, default_value_t = Scenario::AliceBob)]
        scenario: Scenario,

        /// Nodes in a chain scenario (max 26)
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Packets injected per flow
        #[arg(short, long)]
        packets: Option<u32>,

        /// Receiver loss probability
        #[arg(short, long)]
        loss: Option<f64>,

        #[arg(short, long)]
        seed: Option<u64>,

        /// JSON file with a full simulation configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a scenario's radio topology and routes
    Topology {
        #[arg(value_enum, default_value_t = Scenario::AliceBob)]
        scenario: Scenario,

        #[arg(short, long, default_value = "5")]
        nodes: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match &cli.log_dir {
        Some(dir) => LogConfig::production(dir.clone()),
        None if cli.verbose => LogConfig {
            engine_level: Some("debug".to_string()),
            ..LogConfig::development()
        },
        None => LogConfig {
            default_level: "info".to_string(),
            ..LogConfig::development()
        },
    };
    let _guard = CopeSubscriberBuilder::new()
        .with_config(log_config)
        .init()?;

    match cli.command {
        Commands::Run {
            scenario,
            nodes,
            packets,
            loss,
            seed,
            config,
            json,
        } => {
            let mut sim_config = match config {
                Some(path) => load_config(&path)?,
                None => SimConfig::default(),
            };
            if let Some(packets) = packets {
                sim_config.packets_per_flow = packets;
            }
            if let Some(loss) = loss {
                anyhow::ensure!((0.0..=1.0).contains(&loss), "loss must be within 0..=1");
                sim_config.loss_probability = loss;
            }
            if let Some(seed) = seed {
                sim_config.seed = seed;
            }
            for warning in sim_config.engine.validate() {
                tracing::warn!(%warning, "Engine configuration");
            }

            let report = scenario.run(nodes, sim_config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n=== {} ({} ms) ===", report.scenario, report.elapsed_ms);
                println!("{}", report.stats);
            }
        }
        Commands::Topology { scenario, nodes } => {
            let topology = scenario.topology(nodes);
            println!("{}", topology.visualize());
            for (source, destination) in scenario.flows(&topology) {
                let hop = topology
                    .next_hop(source, destination)
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  flow {} -> {} via {}", source, destination, hop);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<SimConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
