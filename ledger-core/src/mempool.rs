use crate::transaction::Transaction;
use indexmap::IndexMap;
use ledger_shared::Hash256;

/// Pending transactions awaiting a block. Admission performs no UTXO
/// validation — that check happens when a block including the transaction is
/// proposed, not at the moment it enters the pool. A transaction that later
/// turns out unspendable simply never gets mined.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    /// Insertion order is preserved so `take` always offers the oldest
    /// transactions first.
    pending: IndexMap<Hash256, Transaction>,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `tx`. Returns `false` without changing the pool if a
    /// transaction with the same txid is already pending.
    pub fn add(&mut self, tx: Transaction) -> bool {
        if self.pending.contains_key(&tx.txid) {
            return false;
        }
        self.pending.insert(tx.txid, tx);
        true
    }

    /// Drops `txid` from the pool. A no-op if it isn't present.
    pub fn remove(&mut self, txid: &Hash256) {
        self.pending.shift_remove(txid);
    }

    /// Removes every transaction in `txids` (used once a block containing
    /// them has been committed).
    pub fn remove_all(&mut self, txids: impl IntoIterator<Item = Hash256>) {
        for txid in txids {
            self.remove(&txid);
        }
    }

    #[must_use]
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.pending.contains_key(txid)
    }

    /// Returns up to `limit` pending transactions, oldest first.
    #[must_use]
    pub fn take(&self, limit: usize) -> Vec<Transaction> {
        self.pending.values().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput};

    fn tx(seed: u8) -> Transaction {
        let input = TxInput::new(
            Hash256::sha256(&[seed]),
            0,
            String::new(),
            String::new(),
        );
        Transaction::new(vec![input], vec![TxOutput::new(1, "addr".to_string())], false)
    }

    #[test]
    fn add_admits_without_utxo_validation() {
        let mut mempool = Mempool::new();
        assert!(mempool.add(tx(1)));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn add_rejects_duplicate_txid() {
        let mut mempool = Mempool::new();
        let transaction = tx(1);
        assert!(mempool.add(transaction.clone()));
        assert!(!mempool.add(transaction));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn take_preserves_insertion_order() {
        let mut mempool = Mempool::new();
        let first = tx(1);
        let second = tx(2);
        mempool.add(first.clone());
        mempool.add(second.clone());

        let taken = mempool.take(10);
        assert_eq!(taken, vec![first, second]);
    }

    #[test]
    fn take_respects_limit() {
        let mut mempool = Mempool::new();
        for seed in 0..5u8 {
            mempool.add(tx(seed));
        }
        assert_eq!(mempool.take(2).len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut mempool = Mempool::new();
        let transaction = tx(1);
        mempool.add(transaction.clone());
        mempool.remove(&transaction.txid);
        mempool.remove(&transaction.txid);
        assert!(mempool.is_empty());
    }
}
