use crate::transaction::TxOutput;
use ledger_shared::Hash256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier of an unspent output: the transaction that created it
/// plus its position in that transaction's output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub output_index: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: Hash256, output_index: u32) -> Self {
        Self {
            txid,
            output_index,
        }
    }
}

/// The live set of unspent outputs. Mutated only by block commit and full
/// chain replacement, never by mempool admission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.entries.insert(outpoint, output);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.entries.remove(outpoint)
    }

    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.entries.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    #[must_use]
    pub fn get_balance(&self, address: &str) -> u64 {
        self.entries
            .values()
            .filter(|output| output.address == address)
            .map(|output| output.value)
            .sum()
    }

    #[must_use]
    pub fn total_value(&self) -> u64 {
        self.entries.values().map(|output| output.value).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
