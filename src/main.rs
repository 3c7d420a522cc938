//! Tincoin (TIN) node.
//!
//! Main entry point for running a TIN node: p2p listener, JSON-RPC
//! server, and the optional miner, all over one shared `Node`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;

use tin_core::config::{ChainParams, NodeConfig};
use tin_core::constants;
use tin_core::crypto::Address;
use tin_core::mining::mine_loop;
use tin_core::node::Node;
use tin_core::p2p::PeerServer;
use tin_core::rpc::{self, RpcState};
use tin_core::storage::BlockStore;
use tin_core::wallet::Wallet;

#[derive(Parser, Debug)]
#[command(name = "tin-node", version, about = "Tincoin (TIN) node")]
struct Args {
    /// P2p listen address
    #[arg(long, default_value_t = NodeConfig::default().listen_addr)]
    listen: SocketAddr,

    /// JSON-RPC port
    #[arg(long, default_value_t = NodeConfig::default().rpc_port)]
    rpc_port: u16,

    /// Bootstrap peer to connect to at startup; may be repeated
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Directory for the block database and wallet; omitted, the node
    /// runs in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Mine continuously
    #[arg(long)]
    mine: bool,

    /// Address credited with mining rewards; defaults to the node
    /// wallet
    #[arg(long)]
    reward_address: Option<Address>,

    /// JSON file overriding default chain parameters
    #[arg(long)]
    params: Option<PathBuf>,

    /// Maximum simultaneously connected peers
    #[arg(long, default_value_t = NodeConfig::default().max_peers)]
    max_peers: usize,

    /// Maximum transactions held in the mempool
    #[arg(long, default_value_t = NodeConfig::default().mempool_capacity)]
    mempool_capacity: usize,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    println!(
        "{} ({}) node v{}",
        constants::CHAIN_FULL_NAME,
        constants::CHAIN_NAME,
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let params = match &args.params {
        Some(path) => ChainParams::load(path)?,
        None => ChainParams::default(),
    };
    let config = NodeConfig {
        listen_addr: args.listen,
        rpc_port: args.rpc_port,
        bootstrap_peers: args.peers,
        data_dir: args.data_dir,
        max_peers: args.max_peers,
        mempool_capacity: args.mempool_capacity,
    };

    let (store, wallet, wallet_path) = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let store = BlockStore::open(dir.join("blocks"))?;
            let wallet_path = dir.join("wallet.json");
            let wallet = Wallet::load_or_create(&wallet_path)?;
            (Some(store), wallet, Some(wallet_path))
        }
        None => {
            println!("No --data-dir given; chain and wallet are in memory only");
            let mut wallet = Wallet::new();
            wallet.generate_key();
            (None, wallet, None)
        }
    };

    let node = Arc::new(Node::with_options(params, store, config.mempool_capacity));
    let head = node.head_info().await;
    println!("Chain head:     #{} {}", head.index, head.hash);
    if let Some(address) = wallet.first_address() {
        println!("Wallet address: {}", address);
    }

    // Resolved before the wallet moves behind the RPC lock
    let reward_address = args.reward_address.or_else(|| wallet.first_address());

    let (server, accept) =
        PeerServer::bind(node.clone(), config.listen_addr, config.max_peers).await?;
    println!("P2p listening:  {}", server.listen_addr());
    for addr in config.bootstrap_peers.iter().copied() {
        let server = server.clone();
        tokio::spawn(async move { server.connect(addr).await });
    }

    let rpc_state = Arc::new(RpcState {
        node: node.clone(),
        wallet: Arc::new(Mutex::new(wallet)),
        peers: server.peers().clone(),
        wallet_path,
    });
    let rpc_addr = SocketAddr::from(([0, 0, 0, 0], config.rpc_port));
    println!("JSON-RPC:       http://{}", rpc_addr);
    let rpc = tokio::spawn(rpc::serve(rpc_state, rpc_addr));

    if args.mine {
        let reward_address =
            reward_address.ok_or("wallet has no key; pass --reward-address")?;
        println!("Mining to:      {}", reward_address);
        tokio::spawn(mine_loop(node.clone(), reward_address));
    }
    println!("Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutdown signal received. Stopping node...");
        }
        res = rpc => res??,
        _ = accept => {
            log::error!("p2p accept loop ended unexpectedly");
        }
    }
    Ok(())
}
