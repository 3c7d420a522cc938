//! Message handling for chain synchronization.
//!
//! Each incoming message maps to zero or more replies addressed to the
//! sending peer. Head announcements drive a pull-based sync: whoever
//! hears of a heavier chain asks for the blocks it is missing. A block
//! batch that does not link onto the local head falls back to a
//! full-chain fetch, which the chain resolves by replaying the
//! candidate from genesis.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chain::{ChainError, MempoolError};
use crate::consensus::{Block, HeadInfo};
use crate::ledger::Transaction;
use crate::node::Node;
use crate::p2p::{Message, PeerBook};

/// Misbehavior points for a block that fails validation
const INVALID_BLOCK_POINTS: u32 = 20;

/// Misbehavior points for a transaction that fails validation
const INVALID_TX_POINTS: u32 = 10;

/// Applies peer messages to the local node and produces the replies
#[derive(Clone)]
pub struct Synchronizer {
    node: Arc<Node>,
    peers: Arc<Mutex<PeerBook>>,
}

impl Synchronizer {
    pub fn new(node: Arc<Node>, peers: Arc<Mutex<PeerBook>>) -> Self {
        Self { node, peers }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn peers(&self) -> &Arc<Mutex<PeerBook>> {
        &self.peers
    }

    pub async fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.peers.lock().await.is_banned(addr)
    }

    /// Handle one message from `from` and return the replies to send
    /// back on the same connection
    pub async fn handle_message(&self, from: SocketAddr, msg: Message) -> Vec<Message> {
        match msg {
            Message::Hello { listen_addr, peers } => {
                let mut book = self.peers.lock().await;
                if let Some(addr) = listen_addr {
                    book.add_known(addr);
                }
                book.add_known_many(&peers);
                vec![]
            }
            Message::GetHead => {
                vec![Message::AnnounceHead(self.node.head_info().await)]
            }
            Message::AnnounceHead(theirs) => self.handle_head(from, theirs).await,
            Message::GetBlocks { from_index } => {
                vec![Message::Blocks(self.node.blocks_from(from_index).await)]
            }
            Message::Blocks(blocks) => self.handle_blocks(from, blocks).await,
            Message::AnnounceTransaction(tx) => {
                self.handle_transaction(from, tx).await;
                vec![]
            }
        }
    }

    async fn handle_head(&self, from: SocketAddr, theirs: HeadInfo) -> Vec<Message> {
        self.peers.lock().await.record_head(&from, theirs.index);

        let ours = self.node.head_info().await;
        if theirs.cumulative_difficulty > ours.cumulative_difficulty {
            // A longer chain usually extends ours, so ask for the tail
            // first. A heavier chain that is not longer must diverge
            // below our head, and only a replay from genesis can adopt
            // it.
            let from_index = if theirs.index > ours.index {
                ours.index + 1
            } else {
                0
            };
            log::debug!(
                "peer {} announced heavier head #{}, requesting blocks from #{}",
                from,
                theirs.index,
                from_index
            );
            vec![Message::GetBlocks { from_index }]
        } else if ours.cumulative_difficulty > theirs.cumulative_difficulty {
            vec![Message::AnnounceHead(ours)]
        } else {
            vec![]
        }
    }

    async fn handle_blocks(&self, from: SocketAddr, blocks: Vec<Block>) -> Vec<Message> {
        let Some(first) = blocks.first() else {
            return vec![];
        };

        // A batch starting at genesis can never extend a chain that
        // already has one, so it goes straight to replay.
        if first.index == 0 {
            self.adopt_chain(from, blocks).await;
            return vec![];
        }

        for block in blocks {
            let (index, hash) = (block.index, block.hash);
            match self.node.submit_block(block).await {
                Ok(()) => {}
                Err(ChainError::NotExtendingHead) => {
                    // Crossed announcements resend blocks we already
                    // hold; those are not a fork.
                    if self.node.block_at(index).await.map(|b| b.hash) == Some(hash) {
                        continue;
                    }
                    log::debug!(
                        "block #{} from {} does not link, requesting the full chain",
                        index,
                        from
                    );
                    return vec![Message::GetBlocks { from_index: 0 }];
                }
                Err(e) => {
                    log::warn!("invalid block #{} from {}: {}", index, from, e);
                    self.punish(&from, INVALID_BLOCK_POINTS).await;
                    return vec![];
                }
            }
        }
        vec![]
    }

    async fn adopt_chain(&self, from: SocketAddr, candidate: Vec<Block>) {
        match self.node.replace_chain(candidate).await {
            Ok(()) => {}
            Err(ChainError::NotHeavier { ours, theirs }) => {
                log::debug!(
                    "chain from {} has work {}, ours has {}, keeping ours",
                    from,
                    theirs,
                    ours
                );
            }
            Err(e) => {
                log::warn!("rejecting chain from {}: {}", from, e);
                self.punish(&from, INVALID_BLOCK_POINTS).await;
            }
        }
    }

    async fn handle_transaction(&self, from: SocketAddr, tx: Transaction) {
        let id = tx.id;
        match self.node.submit_transaction(tx).await {
            Ok(true) => log::debug!("accepted transaction {} from {}", id, from),
            Ok(false) => {}
            Err(MempoolError::ConflictsWithPending) => {
                // A pool conflict is a propagation race, not a protocol
                // violation.
                log::debug!("transaction {} from {} conflicts with the pool", id, from);
            }
            Err(e) => {
                log::warn!("invalid transaction {} from {}: {}", id, from, e);
                self.punish(&from, INVALID_TX_POINTS).await;
            }
        }
    }

    async fn punish(&self, from: &SocketAddr, points: u32) {
        if self.peers.lock().await.report_misbehavior(from, points) {
            log::warn!("peer {} banned for repeated invalid data", from);
        }
    }
}
