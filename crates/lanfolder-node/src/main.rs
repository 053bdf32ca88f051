//! LAN Folder node -- single binary LAN folder synchronization.
//!
//! Usage:
//!   lanfolder-node                      # Run with default config
//!   lanfolder-node --config path.toml   # Run with custom config
//!   lanfolder-node identity             # Show (or create) the node's PeerId

use clap::{Parser, Subcommand};

use lanfolder_index::IndexStore;
use lanfolder_node::config::NodeConfig;
use lanfolder_node::node::{Node, Sockets};
use lanfolder_node::{expand_tilde, folders, identity};

#[derive(Parser)]
#[command(name = "lanfolder-node", about = "LAN peer-to-peer folder synchronization node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.lanfolder/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Show or generate the node identity
    Identity,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanfolder_node=info,lanfolder_api=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Identity) => {
            let id_path = expand_tilde(&cfg.node.identity_file);
            let peer_id = identity::load_or_create(&id_path)?;
            println!("Peer ID: {peer_id}");
            println!("Identity file: {}", id_path.display());
        }
        Some(Commands::Run) | None => {
            run_node(cfg).await?;
        }
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let peer_id = identity::load_or_create(&expand_tilde(&cfg.node.identity_file))?;
    tracing::info!(peer = %peer_id, "node identity loaded");

    let root = expand_tilde(&cfg.node.root);
    let folders = folders::prepare(&root)?;
    let index = IndexStore::new();
    let seeded = folders::seed_defaults(&folders, &index).await?;
    tracing::info!(root = %root.display(), seeded, "folders ready");

    let sockets = Sockets::bind(cfg.listen_addr()?).await?;
    let node = Node::start(&cfg, peer_id, folders, index, sockets).await?;
    node.announce().await?;

    tracing::info!("all tasks spawned, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    node.shutdown().await;

    tracing::info!("shutdown complete");
    Ok(())
}
