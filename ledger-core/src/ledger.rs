use crate::block::{apply_transactions, Block};
use crate::transaction::Transaction;
use crate::utxo::{OutPoint, UtxoSet};
use ledger_shared::{crypto, BlockchainError, Hash256, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// The chain of blocks plus the UTXO set they produce. Both are protected by
/// a single exclusive lock at the call site; every method here assumes
/// `&mut self` access is already serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    blocks: Vec<Block>,
    utxo_set: UtxoSet,
    block_index: HashMap<Hash256, usize>,
    block_reward: u64,
    difficulty_prefix: String,
}

impl Ledger {
    /// Builds a fresh ledger with a freshly minted genesis block paying
    /// `block_reward` to `miner_address`.
    ///
    /// # Errors
    ///
    /// Returns an error only if applying the genesis block's own coinbase
    /// output to an empty UTXO set fails, which cannot happen in practice.
    pub fn new(miner_address: &str, block_reward: u64, difficulty_prefix: String) -> Result<Self> {
        let genesis = Block::genesis(miner_address, block_reward);
        let mut utxo_set = UtxoSet::new();
        apply_transactions(&genesis.transactions, &mut utxo_set)?;
        let mut block_index = HashMap::new();
        block_index.insert(genesis.hash, 0);
        Ok(Self {
            blocks: vec![genesis],
            utxo_set,
            block_index,
            block_reward,
            difficulty_prefix,
        })
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn height(&self) -> u64 {
        (self.blocks.len() - 1) as u64
    }

    /// # Panics
    ///
    /// Never panics: the genesis block is always present.
    #[must_use]
    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("genesis always present")
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub const fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    #[must_use]
    pub fn get_balance(&self, address: &str) -> u64 {
        self.utxo_set.get_balance(address)
    }

    #[must_use]
    pub fn get_block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.block_index.get(hash).map(|&index| &self.blocks[index])
    }

    #[must_use]
    pub fn get_block_by_height(&self, height: u64) -> Option<&Block> {
        let index = usize::try_from(height).ok()?;
        self.blocks.get(index)
    }

    /// Scans the chain for the block containing a transaction with the given
    /// txid.
    #[must_use]
    pub fn find_transaction(&self, txid: &Hash256) -> Option<(&Block, &Transaction)> {
        self.blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| &tx.txid == txid)
                .map(|tx| (block, tx))
        })
    }

    /// Checks a non-coinbase transaction against the current UTXO set:
    /// every input must reference a live UTXO, its signature must verify over
    /// that input's `prev_txid` bytes, the signing key must hash to the
    /// UTXO's address, and inputs must cover outputs.
    ///
    /// # Errors
    ///
    /// Returns [`BlockchainError::UtxoNotFound`], [`BlockchainError::InvalidSignature`],
    /// or [`BlockchainError::InsufficientFunds`] for the respective violation.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        tx.validate_basic()?;
        if tx.is_coinbase {
            return Ok(());
        }

        let mut input_total = 0u64;
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_txid, input.output_index);
            let utxo = self
                .utxo_set
                .get(&outpoint)
                .ok_or(BlockchainError::UtxoNotFound)?;

            let pubkey_bytes =
                hex::decode(&input.pubkey).map_err(|_| BlockchainError::InvalidSignature)?;
            let pubkey = crypto::PublicKey::from_bytes(pubkey_bytes)
                .map_err(|_| BlockchainError::InvalidSignature)?;
            if pubkey.address() != utxo.address {
                return Err(BlockchainError::InvalidSignature);
            }

            if !crypto::verify(&pubkey, input.prev_txid.as_bytes(), &input.signature) {
                return Err(BlockchainError::InvalidSignature);
            }

            input_total = input_total
                .checked_add(utxo.value)
                .ok_or_else(|| BlockchainError::InvalidTransaction("input overflow".to_string()))?;
        }

        if input_total < tx.total_output_value() {
            return Err(BlockchainError::InsufficientFunds);
        }

        Ok(())
    }

    /// Checks that `block` may legally be appended on top of the current tip.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated rule: structural
    /// validity, linkage to the tip, height, proof-of-work, coinbase reward,
    /// or any contained transaction.
    pub fn is_valid_new_block(&self, block: &Block) -> Result<()> {
        block.validate_basic()?;

        if block.prev_hash != self.tip().hash {
            return Err(BlockchainError::UnknownParent);
        }
        if block.index != self.height() + 1 {
            return Err(BlockchainError::InvalidBlock(
                "unexpected block height".to_string(),
            ));
        }
        if !block.hash.meets_difficulty(&self.difficulty_prefix) {
            return Err(BlockchainError::InsufficientDifficulty);
        }

        let coinbase = &block.transactions[0];
        if coinbase.total_output_value() != self.block_reward {
            return Err(BlockchainError::InvalidBlock(
                "coinbase reward does not match block reward".to_string(),
            ));
        }

        for tx in &block.transactions[1..] {
            self.validate_transaction(tx)?;
        }

        Ok(())
    }

    /// Validates and appends `block` to the tip, updating the UTXO set.
    ///
    /// # Errors
    ///
    /// Returns an error if `block` is not valid on top of the current tip.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        self.is_valid_new_block(&block)?;

        let mut new_utxo = self.utxo_set.clone();
        apply_transactions(&block.transactions, &mut new_utxo)?;

        let hash = block.hash;
        let index = self.blocks.len();
        self.blocks.push(block);
        self.utxo_set = new_utxo;
        self.block_index.insert(hash, index);

        info!(height = self.height(), "block added");
        Ok(())
    }

    /// Replays `blocks` from an empty UTXO set, checking that the candidate's
    /// genesis block matches `local_genesis_hash` by content (genesis must
    /// match, not be replaced), then checking linkage, per-block
    /// proof-of-work, coinbase reward, and every transaction for the rest of
    /// the chain.
    ///
    /// # Errors
    ///
    /// Returns an error at the first block that fails validation.
    fn replay(
        blocks: &[Block],
        local_genesis_hash: Hash256,
        block_reward: u64,
        difficulty_prefix: &str,
    ) -> Result<UtxoSet> {
        if blocks.is_empty() {
            return Err(BlockchainError::InvalidBlock("empty chain".to_string()));
        }
        if blocks[0].hash != local_genesis_hash {
            return Err(BlockchainError::InvalidBlock(
                "genesis block does not match local chain".to_string(),
            ));
        }

        let mut utxo = UtxoSet::new();
        let mut prev_hash = Hash256::zero();

        for (height, block) in blocks.iter().enumerate() {
            block.validate_basic()?;

            #[allow(clippy::cast_possible_truncation)]
            let expected_index = height as u64;
            if block.index != expected_index {
                return Err(BlockchainError::InvalidBlock(
                    "block index out of sequence".to_string(),
                ));
            }

            if height > 0 {
                if block.prev_hash != prev_hash {
                    return Err(BlockchainError::InvalidBlock(
                        "chain linkage broken".to_string(),
                    ));
                }
                if !block.hash.meets_difficulty(difficulty_prefix) {
                    return Err(BlockchainError::InsufficientDifficulty);
                }
                let coinbase = &block.transactions[0];
                if coinbase.total_output_value() != block_reward {
                    return Err(BlockchainError::InvalidBlock(
                        "coinbase reward does not match block reward".to_string(),
                    ));
                }
                for tx in &block.transactions[1..] {
                    tx.validate_basic()?;
                    for input in &tx.inputs {
                        let outpoint = OutPoint::new(input.prev_txid, input.output_index);
                        let referenced = utxo.get(&outpoint).ok_or(BlockchainError::UtxoNotFound)?;
                        let pubkey_bytes = hex::decode(&input.pubkey)
                            .map_err(|_| BlockchainError::InvalidSignature)?;
                        let pubkey = crypto::PublicKey::from_bytes(pubkey_bytes)
                            .map_err(|_| BlockchainError::InvalidSignature)?;
                        if pubkey.address() != referenced.address {
                            return Err(BlockchainError::InvalidSignature);
                        }
                        if !crypto::verify(&pubkey, input.prev_txid.as_bytes(), &input.signature) {
                            return Err(BlockchainError::InvalidSignature);
                        }
                    }
                }
            }

            apply_transactions(&block.transactions, &mut utxo)?;
            prev_hash = block.hash;
        }

        Ok(utxo)
    }

    /// Whether `blocks` forms a fully valid chain from genesis, under this
    /// ledger's reward and difficulty rules.
    #[must_use]
    pub fn is_valid_chain(&self, blocks: &[Block]) -> bool {
        Self::replay(
            blocks,
            self.blocks[0].hash,
            self.block_reward,
            &self.difficulty_prefix,
        )
        .is_ok()
    }

    /// Replaces the local chain with `blocks` if it is both valid and
    /// strictly longer than the current chain. Equal-length candidates lose
    /// to the local chain; no other tie-break is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if `blocks` fails replay validation.
    ///
    /// Returns `Ok(false)` without error if `blocks` is valid but not longer
    /// than the current chain.
    pub fn replace_chain(&mut self, blocks: Vec<Block>) -> Result<bool> {
        if blocks.len() <= self.blocks.len() {
            return Ok(false);
        }

        let utxo_set = Self::replay(
            &blocks,
            self.blocks[0].hash,
            self.block_reward,
            &self.difficulty_prefix,
        )?;

        let mut block_index = HashMap::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            block_index.insert(block.hash, index);
        }

        self.blocks = blocks;
        self.utxo_set = utxo_set;
        self.block_index = block_index;
        warn!(height = self.height(), "chain replaced by longer peer chain");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput};
    use ledger_shared::crypto::KeyPair;

    /// Empty difficulty prefix: every hash trivially "meets" it, so these
    /// tests don't depend on finding a winning nonce.
    fn test_ledger(miner_address: &str) -> Ledger {
        Ledger::new(miner_address, 50, String::new()).unwrap()
    }

    fn spend_output(
        keypair: &KeyPair,
        outpoint: OutPoint,
        to_address: &str,
        value: u64,
    ) -> Transaction {
        let signature = keypair.sign(outpoint.txid.as_bytes());
        let input = TxInput::new(
            outpoint.txid,
            outpoint.output_index,
            signature,
            hex::encode(keypair.public_key.as_bytes()),
        );
        Transaction::new(
            vec![input],
            vec![TxOutput::new(value, to_address.to_string())],
            false,
        )
    }

    #[test]
    fn new_ledger_has_genesis_at_height_zero() {
        let ledger = test_ledger("aaaa");
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.get_balance("aaaa"), 50);
    }

    #[test]
    fn find_transaction_locates_the_containing_block() {
        let ledger = test_ledger("aaaa");
        let coinbase_txid = ledger.tip().transactions[0].txid;

        let (block, tx) = ledger.find_transaction(&coinbase_txid).unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(tx.txid, coinbase_txid);
    }

    #[test]
    fn find_transaction_returns_none_for_unknown_txid() {
        let ledger = test_ledger("aaaa");
        assert!(ledger
            .find_transaction(&Hash256::sha256(b"never mined"))
            .is_none());
    }

    #[test]
    fn add_block_accepts_valid_transfer() {
        let keypair = KeyPair::generate();
        let miner_address = keypair.public_key.address();
        let mut ledger = test_ledger(&miner_address);

        let genesis_outpoint = OutPoint::new(ledger.tip().transactions[0].txid, 0);
        let transfer = spend_output(&keypair, genesis_outpoint, "bob", 50);

        let next = Block::new(1, ledger.tip().hash, vec![
            Transaction::create_coinbase(&miner_address, 50),
            transfer,
        ], 0);

        ledger.add_block(next).unwrap();
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.get_balance("bob"), 50);
        assert_eq!(ledger.get_balance(&miner_address), 50);
    }

    #[test]
    fn add_block_rejects_wrong_prev_hash() {
        let mut ledger = test_ledger("aaaa");
        let coinbase = Transaction::create_coinbase("aaaa", 50);
        let bad_block = Block::new(1, Hash256::sha256(b"not the tip"), vec![coinbase], 0);
        assert!(matches!(
            ledger.add_block(bad_block),
            Err(BlockchainError::UnknownParent)
        ));
    }

    #[test]
    fn add_block_rejects_double_spend_of_already_spent_output() {
        let keypair = KeyPair::generate();
        let miner_address = keypair.public_key.address();
        let mut ledger = test_ledger(&miner_address);

        let genesis_outpoint = OutPoint::new(ledger.tip().transactions[0].txid, 0);
        let first_spend = spend_output(&keypair, genesis_outpoint, "bob", 50);
        let block_one = Block::new(1, ledger.tip().hash, vec![
            Transaction::create_coinbase(&miner_address, 50),
            first_spend,
        ], 0);
        ledger.add_block(block_one).unwrap();

        let second_spend = spend_output(&keypair, genesis_outpoint, "carol", 50);
        let block_two = Block::new(2, ledger.tip().hash, vec![
            Transaction::create_coinbase(&miner_address, 50),
            second_spend,
        ], 0);
        assert!(ledger.add_block(block_two).is_err());
    }

    #[test]
    fn replace_chain_accepts_strictly_longer_valid_chain() {
        let mut ledger = test_ledger("aaaa");
        let genesis = ledger.tip().clone();

        let block_one = Block::new(1, genesis.hash, vec![Transaction::create_coinbase("aaaa", 50)], 0);
        let block_two = Block::new(2, block_one.hash, vec![Transaction::create_coinbase("aaaa", 50)], 0);

        let replaced = ledger
            .replace_chain(vec![genesis, block_one, block_two])
            .unwrap();
        assert!(replaced);
        assert_eq!(ledger.height(), 2);
    }

    #[test]
    fn replace_chain_rejects_equal_length_chain() {
        let mut ledger = test_ledger("aaaa");
        let candidate = ledger.blocks().to_vec();
        let replaced = ledger.replace_chain(candidate).unwrap();
        assert!(!replaced);
        assert_eq!(ledger.height(), 0);
    }

    #[test]
    fn is_valid_chain_rejects_broken_linkage() {
        let ledger = test_ledger("aaaa");
        let genesis = ledger.tip().clone();
        let orphan = Block::new(1, Hash256::sha256(b"wrong parent"), vec![Transaction::create_coinbase("aaaa", 50)], 0);
        assert!(!ledger.is_valid_chain(&[genesis, orphan]));
    }

    #[test]
    fn is_valid_chain_rejects_a_different_genesis() {
        let ledger = test_ledger("aaaa");
        let foreign_genesis = Block::genesis("someone_else", 50);
        assert!(!ledger.is_valid_chain(&[foreign_genesis]));
    }

    #[test]
    fn add_block_rejects_hash_not_meeting_difficulty() {
        let mut ledger = Ledger::new("aaaa", 50, "f".repeat(64)).unwrap();
        let candidate = Block::new(1, ledger.tip().hash, vec![Transaction::create_coinbase("aaaa", 50)], 0);
        assert!(matches!(
            ledger.add_block(candidate),
            Err(BlockchainError::InsufficientDifficulty)
        ));
        assert_eq!(ledger.height(), 0);
    }

    #[test]
    fn replace_chain_rejects_a_longer_chain_with_different_genesis() {
        let mut ledger = test_ledger("aaaa");
        let foreign_genesis = Block::genesis("someone_else", 50);
        let block_one = Block::new(
            1,
            foreign_genesis.hash,
            vec![Transaction::create_coinbase("someone_else", 50)],
            0,
        );
        assert!(ledger
            .replace_chain(vec![foreign_genesis, block_one])
            .is_err());
        assert_eq!(ledger.height(), 0);
    }
}
