//! Peer-to-peer gossip over raw TCP: newline-delimited JSON messages,
//! one thread per connection, no handshake and no acknowledgements.

use ledger_core::{persistence, Block, Ledger, Mempool, Transaction};
use ledger_shared::BlockchainError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the accept loop polls the stop flag while no connection is
/// pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Message {
    #[serde(rename = "NEW_TX")]
    NewTx { tx: Transaction },
    #[serde(rename = "NEW_BLOCK")]
    NewBlock { block: Block },
    #[serde(rename = "REQUEST_CHAIN")]
    RequestChain,
    #[serde(rename = "SEND_CHAIN")]
    SendChain { chain: Vec<Block> },
}

/// Write ends of every connection currently considered active. A peer that
/// fails a write is dropped silently; there's no retry or reconnect.
#[derive(Default)]
struct PeerSet {
    writers: Mutex<Vec<TcpStream>>,
}

impl PeerSet {
    fn add(&self, writer: TcpStream) {
        self.writers.lock().unwrap().push(writer);
    }

    fn broadcast(&self, message: &Message) {
        let Ok(mut payload) = serde_json::to_string(message) else {
            return;
        };
        payload.push('\n');

        let mut writers = self.writers.lock().unwrap();
        writers.retain_mut(|peer| peer.write_all(payload.as_bytes()).is_ok());
    }

    fn peer_count(&self) -> usize {
        self.writers.lock().unwrap().len()
    }
}

/// A running peer node: owns the listener and every open connection, and
/// gossips new transactions and blocks to all of them.
pub struct P2PNode {
    ledger: Arc<Mutex<Ledger>>,
    mempool: Arc<Mutex<Mempool>>,
    peers: Arc<PeerSet>,
    port: u16,
    data_dir: String,
    stop: Arc<AtomicBool>,
}

impl P2PNode {
    #[must_use]
    pub fn new(
        ledger: Arc<Mutex<Ledger>>,
        mempool: Arc<Mutex<Mempool>>,
        port: u16,
        data_dir: String,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            mempool,
            peers: Arc::new(PeerSet::default()),
            port,
            data_dir,
            stop,
        })
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.peer_count()
    }

    /// Binds the listener on a background thread and dials every address in
    /// `bootstrap_peers`. Returns once the listener is bound; connection
    /// handling continues on spawned threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind to the configured port.
    pub fn start(self: &Arc<Self>, bootstrap_peers: &[String]) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))?;
        listener.set_nonblocking(true)?;
        info!(port = self.port, "p2p listener bound");

        let this = Arc::clone(self);
        thread::spawn(move || this.accept_loop(listener));

        for addr in bootstrap_peers {
            self.connect_to_peer(addr);
        }

        Ok(())
    }

    /// Signals the accept loop to stop taking new connections after its
    /// current poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Polls for incoming connections on a non-blocking listener so the stop
    /// flag can be checked between accept attempts, matching the miner's
    /// own preemption convention.
    fn accept_loop(self: &Arc<Self>, listener: TcpListener) {
        while !self.stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => self.adopt_connection(stream),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => warn!(%err, "failed to accept connection"),
            }
        }
        info!("p2p listener stopped accepting connections");
    }

    /// Dials `addr`, requests its chain on connect, and spawns a reader
    /// thread for it. Connection failures are logged and otherwise ignored —
    /// there's no retry.
    pub fn connect_to_peer(self: &Arc<Self>, addr: &str) {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!(%addr, "connected to peer");
                self.adopt_connection(stream);
                self.peers.broadcast(&Message::RequestChain);
            }
            Err(err) => warn!(%addr, %err, "could not connect to peer"),
        }
    }

    fn adopt_connection(self: &Arc<Self>, stream: TcpStream) {
        let Ok(writer) = stream.try_clone() else {
            return;
        };
        self.peers.add(writer);

        let this = Arc::clone(self);
        thread::spawn(move || this.handle_connection(stream));
    }

    /// Reads newline-delimited JSON messages from `stream` until it closes.
    /// A line that fails to parse is dropped silently; the connection stays
    /// open.
    fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(message) => self.handle_message(message),
                Err(err) => debug!(%err, "dropped malformed peer message"),
            }
        }
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::NewTx { tx } => self.on_new_tx(tx),
            Message::NewBlock { block } => self.on_new_block(block),
            Message::RequestChain => self.on_request_chain(),
            Message::SendChain { chain } => self.on_send_chain(chain),
        }
    }

    fn on_new_tx(&self, tx: Transaction) {
        let txid = tx.txid;
        if tx.validate_basic().is_err() {
            debug!(%txid, "dropped invalid incoming transaction");
            return;
        }
        if self.mempool.lock().unwrap().add(tx) {
            debug!(%txid, "admitted incoming transaction");
        }
    }

    fn on_new_block(&self, block: Block) {
        let index = block.index;
        let txids: Vec<_> = block.transactions.iter().map(|tx| tx.txid).collect();
        match self.ledger.lock().unwrap().add_block(block) {
            Ok(()) => {
                self.mempool.lock().unwrap().remove_all(txids);
                info!(height = index, "accepted block from peer");
                self.persist_snapshot();
            }
            Err(BlockchainError::UnknownParent) => {
                debug!(height = index, "orphaned block from peer, requesting full chain");
                self.peers.broadcast(&Message::RequestChain);
            }
            Err(err) => debug!(height = index, %err, "rejected block from peer"),
        }
    }

    fn on_request_chain(&self) {
        let chain = self.ledger.lock().unwrap().blocks().to_vec();
        self.peers.broadcast(&Message::SendChain { chain });
    }

    fn on_send_chain(&self, chain: Vec<Block>) {
        match self.ledger.lock().unwrap().replace_chain(chain) {
            Ok(true) => {
                info!("replaced local chain with a longer peer chain");
                self.persist_snapshot();
            }
            Ok(false) => debug!("received chain was not longer than the local chain"),
            Err(err) => warn!(%err, "received invalid chain from peer"),
        }
    }

    /// Writes a snapshot of the current chain after a successful commit,
    /// regardless of whether the block originated locally or from a peer.
    fn persist_snapshot(&self) {
        let ledger = self.ledger.lock().unwrap();
        if let Err(err) = persistence::save(&self.data_dir, &ledger) {
            warn!(%err, "failed to persist chain snapshot");
        }
    }

    pub fn broadcast_transaction(&self, tx: Transaction) {
        self.peers.broadcast(&Message::NewTx { tx });
    }

    pub fn broadcast_block(&self, block: Block) {
        self.peers.broadcast(&Message::NewBlock { block });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_json_with_expected_tag() {
        let request = Message::RequestChain;
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"REQUEST_CHAIN"}"#);
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Message::RequestChain));
    }

    #[test]
    fn malformed_json_fails_to_parse_as_message() {
        let result = serde_json::from_str::<Message>("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn broadcast_with_no_peers_does_not_panic() {
        let peers = PeerSet::default();
        peers.broadcast(&Message::RequestChain);
        assert_eq!(peers.peer_count(), 0);
    }
}
