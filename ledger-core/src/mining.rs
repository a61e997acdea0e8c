use crate::block::Block;
use crate::ledger::Ledger;
use crate::mempool::Mempool;
use crate::transaction::Transaction;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

/// How many mempool transactions a candidate block may carry, besides its
/// coinbase.
const MAX_TXS_PER_BLOCK: usize = 10;

/// Sleep between unsuccessful PoW rounds, so a low difficulty doesn't spin a
/// core at 100%.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Single-threaded, preemptible proof-of-work miner. Runs its search loop on
/// the calling thread; callers typically spawn that onto a dedicated
/// [`std::thread`].
pub struct Miner {
    ledger: Arc<Mutex<Ledger>>,
    mempool: Arc<Mutex<Mempool>>,
    miner_address: String,
    block_reward: u64,
    difficulty_prefix: String,
    stop: Arc<AtomicBool>,
    mined_blocks: Sender<Block>,
}

impl Miner {
    /// `stop` is shared with the caller so an external shutdown signal (a
    /// Ctrl-C handler, for instance) can halt mining without going through a
    /// `Miner` reference at all.
    #[must_use]
    pub fn new(
        ledger: Arc<Mutex<Ledger>>,
        mempool: Arc<Mutex<Mempool>>,
        miner_address: String,
        block_reward: u64,
        difficulty_prefix: String,
        mined_blocks: Sender<Block>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ledger,
            mempool,
            miner_address,
            block_reward,
            difficulty_prefix,
            stop,
            mined_blocks,
        }
    }

    #[must_use]
    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    /// Signals the run loop to return after its current nonce attempt.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Mines continuously until [`Miner::stop`] is called. Blocks the
    /// current thread.
    pub fn run(&self) {
        info!(miner_address = %self.miner_address, "miner started");
        while !self.is_stopped() {
            self.mine_one_round();
        }
    }

    /// Builds one candidate on top of the current tip and searches for a
    /// winning nonce, checking every attempt whether mining should stop or
    /// the tip has moved on from under the candidate. Commits and broadcasts
    /// the block on success.
    fn mine_one_round(&self) {
        let (candidate_index, prev_hash) = {
            let ledger = self.ledger.lock().unwrap();
            (ledger.height() + 1, ledger.tip().hash)
        };

        // Snapshot mempool contents up front; never hold this lock during
        // the nonce search below.
        let pending = {
            let mempool = self.mempool.lock().unwrap();
            mempool.take(MAX_TXS_PER_BLOCK)
        };

        let coinbase = Transaction::create_coinbase(&self.miner_address, self.block_reward);
        let mut transactions = Vec::with_capacity(pending.len() + 1);
        transactions.push(coinbase);
        transactions.extend(pending.iter().cloned());

        let timestamp = Utc::now().timestamp();
        let mut nonce = 0u64;

        loop {
            if self.is_stopped() {
                return;
            }

            let candidate = Block::new_at(
                candidate_index,
                prev_hash,
                transactions.clone(),
                nonce,
                timestamp,
            );

            if candidate.hash.meets_difficulty(&self.difficulty_prefix) {
                self.submit(candidate, &pending);
                return;
            }

            let tip_advanced = {
                let ledger = self.ledger.lock().unwrap();
                ledger.height() >= candidate_index
            };
            if tip_advanced {
                // Someone else's block landed first; restart on the new tip.
                thread::sleep(RETRY_DELAY);
                return;
            }

            nonce += 1;
        }
    }

    /// Commits a mined block, drops its transactions from the mempool, and
    /// notifies listeners (typically the peer broadcaster).
    fn submit(&self, block: Block, mined_txs: &[Transaction]) {
        let committed = {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.add_block(block.clone()).is_ok()
        };

        if !committed {
            return;
        }

        {
            let mut mempool = self.mempool.lock().unwrap();
            mempool.remove_all(mined_txs.iter().map(|tx| tx.txid));
        }

        info!(height = block.index, hash = %block.hash, "block mined");
        let _ = self.mined_blocks.send(block);
    }
}

/// Drains and discards every message sent on `mined_blocks`, for tests and
/// callers that don't need a live broadcaster.
#[must_use]
pub fn discard_mined_blocks() -> (Sender<Block>, std::sync::mpsc::Receiver<Block>) {
    std::sync::mpsc::channel()
}
