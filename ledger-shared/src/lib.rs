pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{sign, verify, KeyPair, PrivateKey, PublicKey};
pub use error::BlockchainError;
pub use hash::Hash256;
pub use types::{NetworkType, NodeConfig};

pub type Result<T> = std::result::Result<T, BlockchainError>;
