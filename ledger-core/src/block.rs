use crate::transaction::{Transaction, TxPreimage};
use crate::utxo::{OutPoint, UtxoSet};
use chrono::Utc;
use ledger_shared::{hash::canonical_json_sha256, BlockchainError, Hash256, Result};
use serde::{Deserialize, Serialize};

/// The part of a block that its hash covers. The `hash` field itself is
/// excluded from its own preimage, and so is every nested transaction's own
/// `txid` — each transaction contributes its txid-less preimage, the same
/// exclusion rule applied whether a transaction is hashing itself or sitting
/// inside a block.
#[derive(Serialize)]
struct BlockPreimage<'a> {
    index: u64,
    prev_hash: Hash256,
    transactions: Vec<TxPreimage<'a>>,
    nonce: u64,
    timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub prev_hash: Hash256,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub timestamp: i64,
    pub hash: Hash256,
}

impl Block {
    /// Assembles a block and computes its hash from the given `nonce`. Does
    /// not search for a difficulty-satisfying nonce; that's the miner's job.
    #[must_use]
    pub fn new(index: u64, prev_hash: Hash256, transactions: Vec<Transaction>, nonce: u64) -> Self {
        Self::new_at(index, prev_hash, transactions, nonce, Utc::now().timestamp())
    }

    /// Like [`Block::new`] but with an explicit timestamp, so a miner can
    /// hold the timestamp fixed across many nonce attempts.
    #[must_use]
    pub fn new_at(
        index: u64,
        prev_hash: Hash256,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: i64,
    ) -> Self {
        let hash = Self::compute_hash(index, prev_hash, &transactions, nonce, timestamp);
        Self {
            index,
            prev_hash,
            transactions,
            nonce,
            timestamp,
            hash,
        }
    }

    /// The first block of the chain. Exempt from the difficulty check, so no
    /// nonce search is needed.
    #[must_use]
    pub fn genesis(miner_address: &str, reward: u64) -> Self {
        let coinbase = Transaction::create_coinbase(miner_address, reward);
        Self::new(0, Hash256::zero(), vec![coinbase], 0)
    }

    /// Recomputes the hash from this block's current content.
    #[must_use]
    pub fn recompute_hash(&self) -> Hash256 {
        Self::compute_hash(
            self.index,
            self.prev_hash,
            &self.transactions,
            self.nonce,
            self.timestamp,
        )
    }

    fn compute_hash(
        index: u64,
        prev_hash: Hash256,
        transactions: &[Transaction],
        nonce: u64,
        timestamp: i64,
    ) -> Hash256 {
        let preimage = BlockPreimage {
            index,
            prev_hash,
            transactions: transactions.iter().map(Transaction::to_preimage).collect(),
            nonce,
            timestamp,
        };
        canonical_json_sha256(&preimage).expect("block preimage always serializes")
    }

    /// Structural validity: at least one transaction, the first (and only the
    /// first) is coinbase, every transaction is individually well formed, and
    /// the stored hash matches recomputation.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated rule.
    pub fn validate_basic(&self) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "block has no transactions".to_string(),
            ));
        }
        if !self.transactions[0].is_coinbase {
            return Err(BlockchainError::InvalidBlock(
                "first transaction is not coinbase".to_string(),
            ));
        }
        for tx in &self.transactions[1..] {
            if tx.is_coinbase {
                return Err(BlockchainError::InvalidBlock(
                    "multiple coinbase transactions".to_string(),
                ));
            }
        }
        for tx in &self.transactions {
            tx.validate_basic()?;
        }
        if self.recompute_hash() != self.hash {
            return Err(BlockchainError::InvalidHash);
        }
        Ok(())
    }
}

/// Applies a block's transactions, in order, to `utxo`: removes each
/// non-coinbase input's referent, then inserts every output. Removing an
/// outpoint that is absent (never existed, or already spent earlier in the
/// same block) fails the whole block — this is what rejects same-block
/// double-spends without any extra bookkeeping.
///
/// # Errors
///
/// Returns [`BlockchainError::UtxoNotFound`] if any input references an
/// outpoint not present in `utxo` at the moment it is applied.
pub fn apply_transactions(transactions: &[Transaction], utxo: &mut UtxoSet) -> Result<()> {
    for tx in transactions {
        if !tx.is_coinbase {
            for input in &tx.inputs {
                let outpoint = OutPoint::new(input.prev_txid, input.output_index);
                if utxo.remove(&outpoint).is_none() {
                    return Err(BlockchainError::UtxoNotFound);
                }
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(
                tx.txid,
                u32::try_from(index).map_err(|_| {
                    BlockchainError::InvalidBlock("output index overflow".to_string())
                })?,
            );
            utxo.insert(outpoint, output.clone());
        }
    }
    Ok(())
}
