//! HASHWEAVE Node Binary

use clap::{Parser, Subcommand};
use hashweave_consensus::{Hashgraph, Simulation};
use hashweave_core::{ConsensusConfig, NodeConfig};
use hashweave_crypto::keys::{KeyFile, KeyPair};
use hashweave_node::NodeBuilder;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "hashweave-node")]
#[command(about = "HASHWEAVE Node - leaderless BFT consensus over a gossiped event graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Key file path (defaults to node_key.json in the data directory)
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep everything in memory
        #[arg(long)]
        in_memory: bool,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run consensus over a simulated gossip history
    Simulate {
        /// Number of participants
        #[arg(long, default_value = "4")]
        participants: u32,

        /// Number of gossip syncs after the initial events
        #[arg(long, default_value = "200")]
        events: u64,

        /// Pick sync pairs at random from this seed instead of the ring schedule
        #[arg(long)]
        seed: Option<u64>,

        /// Participant that signs one conflicting pair of events (ring schedule only)
        #[arg(long)]
        forker: Option<usize>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            key,
            api_addr,
            data_dir,
            in_memory,
        } => {
            let mut config = match config {
                Some(path) => NodeConfig::load(&path)?,
                None => NodeConfig::default(),
            };
            init_logging(&config.log_level);

            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            let key_path = key.unwrap_or_else(|| config.data_dir.join("node_key.json"));
            let keypair = load_or_create_keypair(&key_path)?;

            let mut builder = NodeBuilder::new().config(config).keypair(keypair);
            if let Some(addr) = api_addr {
                builder = builder.api_addr(&addr);
            }
            if in_memory {
                builder = builder.in_memory();
            }

            builder.build().start().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();
            let json = serde_json::to_string_pretty(&KeyFile::from(&keypair))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }

        Commands::Simulate {
            participants,
            events,
            seed,
            forker,
        } => {
            init_logging("warn");
            simulate(participants, events, seed, forker)?;
        }
    }

    Ok(())
}

fn simulate(participants: u32, events: u64, seed: Option<u64>, forker: Option<usize>) -> anyhow::Result<()> {
    let mut sim = Simulation::with_participants(participants)?;
    match (seed, forker) {
        (Some(seed), _) => sim.run_random(events, seed)?,
        (None, Some(forker)) => {
            anyhow::ensure!(forker < participants as usize, "forker must be a participant index");
            sim.run_ring_with_fork(events, forker, events / 4)?;
        }
        (None, None) => sim.run_ring(events)?,
    }

    let mut hashgraph = Hashgraph::new(ConsensusConfig::default(), sim.participants())?;
    for event in sim.events() {
        hashgraph.submit_event(event.clone())?;
    }

    let stats = hashgraph.stats();
    let log = hashgraph.log();
    println!("participants:        {}", participants);
    println!("events:              {}", stats.events);
    println!("rounds:              {}", stats.rounds);
    match stats.last_decided_round {
        Some(round) => println!("last decided round:  {}", round),
        None => println!("last decided round:  none"),
    }
    println!("finalized:           {}", stats.finalized);
    println!("forks:               {}", stats.forks);
    println!("order digest:        {}", log.digest());
    Ok(())
}

fn load_or_create_keypair(key_path: &Path) -> anyhow::Result<KeyPair> {
    if key_path.exists() {
        let content = std::fs::read_to_string(key_path)?;
        let key_file: KeyFile = serde_json::from_str(&content)?;
        let keypair = key_file.to_keypair()?;
        info!("Loaded keypair from {}", key_path.display());
        return Ok(keypair);
    }

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let keypair = KeyPair::generate();
    std::fs::write(key_path, serde_json::to_string_pretty(&KeyFile::from(&keypair))?)?;
    info!("Generated new keypair, saved to {}", key_path.display());

    Ok(keypair)
}
