//! Shared node configuration type.

use serde::{Deserialize, Serialize};

/// Network identity the node was started on. Only `Mainnet`/`Devnet` carry any
/// behavioral weight today (both run the same consensus rules); the distinction
/// exists so logs and persisted snapshots are self-describing.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Mainnet,
    #[default]
    Devnet,
}

/// Node-wide configuration, built once at startup from parsed CLI flags with
/// defaults applied for anything the operator didn't set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network identity.
    pub network: NetworkType,
    /// Port the peer listener binds to.
    pub p2p_port: u16,
    /// Port the (out-of-scope) administrative API would bind to; carried so it
    /// can be handed to an external admin layer.
    pub api_port: u16,
    /// Initial peers to connect to on startup, as `host:port`.
    pub bootstrap_peers: Vec<String>,
    /// Directory holding the persisted chain snapshot.
    pub data_dir: String,
    /// Reward paid to the coinbase output of a newly mined block.
    pub block_reward: u64,
    /// Required leading hex-zero prefix of a valid block hash.
    pub difficulty_prefix: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::default(),
            p2p_port: 9000,
            api_port: 8000,
            bootstrap_peers: Vec::new(),
            data_dir: "./data".to_string(),
            block_reward: 50,
            difficulty_prefix: "0000".to_string(),
        }
    }
}
