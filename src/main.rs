mod network;

use clap::Parser;
use ledger_core::{persistence, Ledger, Mempool, Miner};
use ledger_shared::crypto::KeyPair;
use ledger_shared::{NetworkType, NodeConfig, Result};
use network::P2PNode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How often the main thread persists a snapshot as a backstop, independent
/// of the one taken after every newly committed block.
const PERIODIC_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// How often the main thread wakes to check the shutdown flag while idling
/// between periodic saves.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "mini-ledger")]
#[command(about = "Minimal UTXO blockchain node")]
#[command(version)]
struct Cli {
    /// Port the peer listener binds to.
    #[arg(long, default_value_t = 9000)]
    p2p_port: u16,

    /// Port an external administrative API would bind to. Not served by this
    /// process; carried through for compatibility with deployments that run
    /// one alongside it.
    #[arg(long, default_value_t = 8000)]
    api_port: u16,

    /// Comma-separated `host:port` addresses to dial on startup.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Directory holding the persisted chain snapshot.
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Required leading hex-zero prefix a mined block hash must satisfy.
    #[arg(long, default_value = "0000")]
    difficulty_prefix: String,

    /// Reward paid to the coinbase output of a newly mined block.
    #[arg(long, default_value_t = 50)]
    block_reward: u64,

    /// Address to receive mining rewards. If omitted, a fresh keypair is
    /// generated and its private key printed once to stderr.
    #[arg(long)]
    miner_address: Option<String>,

    /// Run without mining; just sync and gossip.
    #[arg(long)]
    no_mine: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = NodeConfig {
        network: NetworkType::default(),
        p2p_port: cli.p2p_port,
        api_port: cli.api_port,
        bootstrap_peers: cli.peers.clone(),
        data_dir: cli.data_dir.clone(),
        block_reward: cli.block_reward,
        difficulty_prefix: cli.difficulty_prefix.clone(),
    };
    info!(?config, "starting node");

    let miner_address = cli.miner_address.clone().unwrap_or_else(|| {
        let keypair = KeyPair::generate();
        let address = keypair.public_key.address();
        warn!(
            %address,
            "no miner address given; generated a keypair for this run \
             (private key printed once below, not persisted)"
        );
        eprintln!(
            "generated mining keypair - private key (keep this safe, shown only once): {}",
            hex::encode(keypair.private_key.as_bytes())
        );
        address
    });

    let ledger = match persistence::load(&cli.data_dir)? {
        Some(ledger) => {
            info!(height = ledger.height(), "resumed ledger from snapshot");
            ledger
        }
        None => {
            info!("no snapshot found, starting a fresh chain");
            Ledger::new(&miner_address, cli.block_reward, cli.difficulty_prefix.clone())?
        }
    };
    let ledger = Arc::new(Mutex::new(ledger));
    let mempool = Arc::new(Mutex::new(Mempool::new()));

    // Shared by the miner's PoW loop and the peer listener's accept loop, and
    // flipped by the Ctrl-C handler below: a single signal that tells every
    // long-running loop in the process to wind down.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|err| ledger_shared::BlockchainError::NetworkError(err.to_string()))?;
    }

    let node = P2PNode::new(
        Arc::clone(&ledger),
        Arc::clone(&mempool),
        cli.p2p_port,
        cli.data_dir.clone(),
        Arc::clone(&shutdown),
    );
    node.start(&cli.peers)
        .map_err(|err| ledger_shared::BlockchainError::NetworkError(err.to_string()))?;

    if !cli.no_mine {
        let (mined_tx, mined_rx) = std::sync::mpsc::channel();
        let miner = Miner::new(
            Arc::clone(&ledger),
            Arc::clone(&mempool),
            miner_address.clone(),
            cli.block_reward,
            cli.difficulty_prefix.clone(),
            mined_tx,
            Arc::clone(&shutdown),
        );
        thread::spawn(move || miner.run());

        let relay_ledger = Arc::clone(&ledger);
        let relay_node = Arc::clone(&node);
        let relay_data_dir = cli.data_dir.clone();
        thread::spawn(move || {
            for block in mined_rx {
                let snapshot_result = {
                    let ledger = relay_ledger.lock().unwrap();
                    persistence::save(&relay_data_dir, &ledger)
                };
                if let Err(err) = snapshot_result {
                    warn!(%err, "failed to persist chain snapshot after mining a block");
                }
                relay_node.broadcast_block(block);
            }
        });
    }

    info!(address = %miner_address, port = cli.p2p_port, "node running");
    let mut last_save = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(SHUTDOWN_POLL_INTERVAL);
        if last_save.elapsed() >= PERIODIC_SAVE_INTERVAL {
            let snapshot_result = {
                let ledger = ledger.lock().unwrap();
                persistence::save(&cli.data_dir, &ledger)
            };
            if let Err(err) = snapshot_result {
                warn!(%err, "periodic snapshot save failed");
            }
            last_save = Instant::now();
        }
    }

    info!("shutting down, saving final snapshot");
    let ledger = ledger.lock().unwrap();
    persistence::save(&cli.data_dir, &ledger)?;
    Ok(())
}
