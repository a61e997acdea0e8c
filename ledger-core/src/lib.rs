pub mod block;
pub mod ledger;
pub mod mempool;
pub mod mining;
pub mod persistence;
pub mod transaction;
pub mod utxo;

pub use block::{apply_transactions, Block};
pub use ledger::Ledger;
pub use mempool::Mempool;
pub use mining::Miner;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{OutPoint, UtxoSet};

pub use ledger_shared::{BlockchainError, Hash256, Result};
