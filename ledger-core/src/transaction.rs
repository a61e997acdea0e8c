use chrono::Utc;
use ledger_shared::{hash::canonical_json_sha256, BlockchainError, Hash256, Result};
use serde::{Deserialize, Serialize};

/// Reference plus proof-of-spend for a prior output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: Hash256,
    pub output_index: u32,
    /// Hex-encoded ECDSA signature over the signing preimage (see [`crate::ledger`]).
    pub signature: String,
    /// Hex-encoded raw SEC1 uncompressed public key (64 bytes, no `0x04` prefix).
    pub pubkey: String,
}

impl TxInput {
    #[must_use]
    pub const fn new(prev_txid: Hash256, output_index: u32, signature: String, pubkey: String) -> Self {
        Self {
            prev_txid,
            output_index,
            signature,
            pubkey,
        }
    }
}

/// A value bound to an address. Carries no script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub address: String,
}

impl TxOutput {
    #[must_use]
    pub const fn new(value: u64, address: String) -> Self {
        Self { value, address }
    }
}

/// The part of a transaction that its txid hashes over. Kept separate from
/// [`Transaction`] so the txid field itself never leaks into its own preimage
/// — whether the transaction is hashing itself or sitting nested inside a
/// block's preimage, the exclusion rule is the same.
#[derive(Serialize)]
pub(crate) struct TxPreimage<'a> {
    inputs: &'a [TxInput],
    outputs: &'a [TxOutput],
    is_coinbase: bool,
    timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: i64,
    pub is_coinbase: bool,
    pub txid: Hash256,
}

impl Transaction {
    /// Builds and hashes a transaction from its content; `txid` is always
    /// derived, never supplied, so it can't drift from the content it names.
    #[must_use]
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, is_coinbase: bool) -> Self {
        let timestamp = Utc::now().timestamp();
        let txid = Self::compute_txid(&inputs, &outputs, is_coinbase, timestamp);
        Self {
            inputs,
            outputs,
            timestamp,
            is_coinbase,
            txid,
        }
    }

    /// The first transaction of a block: no inputs, one output paying `reward`
    /// to `miner_address`.
    #[must_use]
    pub fn create_coinbase(miner_address: &str, reward: u64) -> Self {
        let outputs = vec![TxOutput::new(reward, miner_address.to_string())];
        Self::new(Vec::new(), outputs, true)
    }

    /// Recomputes the txid from `self`'s current content. Used to check the
    /// fixed-point invariant: a stored txid must equal this.
    #[must_use]
    pub fn recompute_txid(&self) -> Hash256 {
        Self::compute_txid(&self.inputs, &self.outputs, self.is_coinbase, self.timestamp)
    }

    /// The txid-less representation of this transaction, for use nested
    /// inside another preimage (a block's). Its own txid never appears here.
    pub(crate) fn to_preimage(&self) -> TxPreimage<'_> {
        TxPreimage {
            inputs: &self.inputs,
            outputs: &self.outputs,
            is_coinbase: self.is_coinbase,
            timestamp: self.timestamp,
        }
    }

    fn compute_txid(
        inputs: &[TxInput],
        outputs: &[TxOutput],
        is_coinbase: bool,
        timestamp: i64,
    ) -> Hash256 {
        let preimage = TxPreimage {
            inputs,
            outputs,
            is_coinbase,
            timestamp,
        };
        // Built entirely from owned/derived fields; a failure here would mean
        // the JSON encoder itself is broken, not that this particular value is
        // unencodable.
        canonical_json_sha256(&preimage).expect("transaction preimage always serializes")
    }

    #[must_use]
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Structural validity, independent of any UTXO state.
    ///
    /// # Errors
    ///
    /// Returns an error if outputs are empty, a coinbase carries inputs, a
    /// non-coinbase transaction carries none, or the stored txid doesn't match
    /// its content.
    pub fn validate_basic(&self) -> Result<()> {
        if self.outputs.is_empty() {
            return Err(BlockchainError::InvalidTransaction(
                "transaction has no outputs".to_string(),
            ));
        }
        if self.is_coinbase && !self.inputs.is_empty() {
            return Err(BlockchainError::InvalidTransaction(
                "coinbase transaction must have no inputs".to_string(),
            ));
        }
        if !self.is_coinbase && self.inputs.is_empty() {
            return Err(BlockchainError::InvalidTransaction(
                "non-coinbase transaction must have at least one input".to_string(),
            ));
        }
        if self.recompute_txid() != self.txid {
            return Err(BlockchainError::InvalidHash);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_has_no_inputs_and_one_output() {
        let tx = Transaction::create_coinbase("aaaa", 50);
        assert!(tx.is_coinbase);
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 50);
        assert_eq!(tx.outputs[0].address, "aaaa");
    }

    #[test]
    fn txid_is_a_fixed_point() {
        let tx = Transaction::create_coinbase("bob", 50);
        assert_eq!(tx.txid, tx.recompute_txid());
    }

    #[test]
    fn txid_is_deterministic_for_identical_content() {
        let input = TxInput::new(Hash256::zero(), 0, "sig".to_string(), "pub".to_string());
        let output = TxOutput::new(30, "carol".to_string());
        let tx1 = Transaction {
            inputs: vec![input.clone()],
            outputs: vec![output.clone()],
            timestamp: 1_700_000_000,
            is_coinbase: false,
            txid: Hash256::zero(),
        };
        let txid1 = tx1.recompute_txid();
        let tx2 = Transaction {
            inputs: vec![input],
            outputs: vec![output],
            timestamp: 1_700_000_000,
            is_coinbase: false,
            txid: Hash256::zero(),
        };
        assert_eq!(txid1, tx2.recompute_txid());
    }

    #[test]
    fn validate_basic_rejects_empty_outputs() {
        let tx = Transaction::new(Vec::new(), Vec::new(), false);
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn validate_basic_rejects_coinbase_with_inputs() {
        let input = TxInput::new(Hash256::zero(), 0, String::new(), String::new());
        let tx = Transaction::new(vec![input], vec![TxOutput::new(1, "x".to_string())], true);
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn validate_basic_rejects_non_coinbase_without_inputs() {
        let tx = Transaction::new(Vec::new(), vec![TxOutput::new(1, "x".to_string())], false);
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn round_trip_through_json_preserves_txid() {
        let tx = Transaction::create_coinbase("dave", 50);
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.txid, tx.txid);
        assert_eq!(back.recompute_txid(), tx.txid);
    }
}
