//! plasma-node entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plasma_core::KeyPair;
use plasma_node::{InMemoryRootChain, Node, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plasma-node")]
#[command(about = "Plasma MVP child-chain operator node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator node
    Run {
        /// The config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the API listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Generate an example config file
    GenerateExampleConfig {
        #[arg(short, long, default_value = "./plasma.toml")]
        output_path: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn operator_key(config: &NodeConfig) -> Result<KeyPair> {
    match &config.operator_private_key {
        Some(hex) => KeyPair::from_private_key_hex(hex).context("parse operator_private_key"),
        None => {
            tracing::warn!("no operator_private_key configured, generating an ephemeral key");
            Ok(KeyPair::generate())
        }
    }
}

async fn run(config_path: Option<PathBuf>, listen: Option<SocketAddr>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => NodeConfig::load(&path)
            .with_context(|| format!("load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(listen) = listen {
        config.api.listen = listen;
    }

    let operator = operator_key(&config)?;
    tracing::info!(operator = %operator.address(), "starting plasma node");

    // TODO: replace with an Ethereum-backed RootChain once the contract client exists.
    let root_chain = Arc::new(InMemoryRootChain::new(config.child_block_interval));
    let node = Node::new(operator.address(), root_chain, &config);
    tracing::info!(genesis = %node.genesis_block().await.hash(), "genesis block");

    let listener = if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(config.api.listen)
            .await
            .with_context(|| format!("bind api listener on {}", config.api.listen))?;
        Some(listener)
    } else {
        None
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    node.run(listener, shutdown).await?;
    tracing::info!("exiting");
    Ok(())
}

fn generate_example_config(path: PathBuf) -> Result<()> {
    let content = NodeConfig::default().to_toml()?;
    std::fs::write(&path, content)
        .with_context(|| format!("write config to {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, listen } => run(config, listen).await,
        Commands::GenerateExampleConfig { output_path } => generate_example_config(output_path),
    }
}
