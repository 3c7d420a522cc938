//! Block assembly and the proof-of-work search.
//!
//! `assemble_block` packs the reward transaction plus as many pending
//! transactions as fit, each re-checked against a scratch UTXO copy so
//! the packed set is conflict free. `Miner::search` is the nonce loop;
//! it runs on a blocking thread and honors a shared stop signal so an
//! in-flight search can be abandoned the moment the chain head moves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chain::{Chain, ChainError};
use crate::consensus::{block_reward, unix_now, Block};
use crate::crypto::Address;
use crate::ledger::Transaction;
use crate::node::{Node, NodeEvent};

/// Outcome of a proof-of-work search
#[derive(Debug)]
pub enum MiningOutcome {
    /// Found a nonce satisfying the difficulty
    Found(Block),
    /// The stop signal fired before a nonce was found
    Interrupted,
}

/// Build a candidate block on top of the current head.
///
/// The reward transaction comes first, paying the schedule amount for
/// the next height to `reward_address`; once the schedule reaches zero
/// it is omitted and the block holds pending transactions only.
/// Pending transactions are taken in arrival order and validated
/// against a scratch UTXO copy that applies each accepted one, so
/// chained spends pack together and conflicting spends are skipped.
/// The candidate's nonce starts at 0; it does not satisfy the
/// difficulty until `Miner::search` runs.
pub fn assemble_block(chain: &Chain, pending: Vec<Transaction>, reward_address: Address) -> Block {
    let params = chain.params();
    let head = chain.head();
    let next_index = head.index + 1;

    let mut scratch = chain.utxo().clone();
    let mut transactions = Vec::new();

    let amount = block_reward(params, next_index);
    if amount > 0 {
        let reward = Transaction::reward(reward_address, amount, next_index);
        scratch.apply_transaction(&reward);
        transactions.push(reward);
    }

    for tx in pending {
        if transactions.len() >= params.max_block_transactions {
            break;
        }
        if scratch.validate_transaction(&tx, 0).is_ok() {
            scratch.apply_transaction(&tx);
            transactions.push(tx);
        }
    }

    Block::new(
        next_index,
        head.hash,
        unix_now(),
        transactions,
        chain.next_difficulty(),
        0,
    )
}

/// Nonce searcher with a shared stop signal
#[derive(Clone)]
pub struct Miner {
    reward_address: Address,
    stop_signal: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(reward_address: Address) -> Self {
        Self {
            reward_address,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Address credited by blocks this miner assembles
    pub fn reward_address(&self) -> Address {
        self.reward_address
    }

    /// Handle to the stop signal
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Ask an in-flight search to give up
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Clear the stop signal before a new search
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Assemble a candidate for the given chain state
    pub fn assemble(&self, chain: &Chain, pending: Vec<Transaction>) -> Block {
        assemble_block(chain, pending, self.reward_address)
    }

    /// Increment the nonce until the block hash satisfies its
    /// difficulty or the stop signal fires. The stop signal is checked
    /// every iteration; when the nonce wraps, the timestamp is
    /// refreshed so the search space stays live.
    pub fn search(&self, mut block: Block) -> MiningOutcome {
        loop {
            if self.stop_signal.load(Ordering::SeqCst) {
                return MiningOutcome::Interrupted;
            }

            block.hash = block.compute_hash();
            if block.hash.leading_zero_bits() >= block.difficulty {
                return MiningOutcome::Found(block);
            }

            block.nonce = block.nonce.wrapping_add(1);
            if block.nonce == 0 {
                block.timestamp = unix_now();
            }
        }
    }
}

/// Mine and submit a single block, retrying if another block lands
/// first. Used by the RPC `mine` method.
pub async fn mine_once(node: &Arc<Node>, reward_address: Address) -> Result<Block, ChainError> {
    loop {
        let candidate = node.assemble_candidate(reward_address).await;
        let miner = Miner::new(reward_address);
        let search = tokio::task::spawn_blocking(move || miner.search(candidate));

        let block = match search.await {
            Ok(MiningOutcome::Found(block)) => block,
            Ok(MiningOutcome::Interrupted) => continue,
            Err(e) => {
                log::error!("mining task failed: {}", e);
                continue;
            }
        };

        match node.submit_block(block.clone()).await {
            Ok(()) => return Ok(block),
            Err(ChainError::NotExtendingHead) => {
                log::debug!("head moved during search, reassembling");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Continuous mining driven by node events.
///
/// Each round assembles a candidate against the current head and
/// searches on a blocking thread. A head change (our own accepted
/// block, a peer's block, or a chain replacement) stops the search
/// and starts a fresh round; the abandoned candidate is discarded.
/// New mempool transactions do not interrupt a running search.
pub async fn mine_loop(node: Arc<Node>, reward_address: Address) {
    let miner = Miner::new(reward_address);
    let mut events = node.subscribe();

    loop {
        drain_events(&mut events);

        let candidate = node.assemble_candidate(reward_address).await;
        miner.reset();
        let searcher = miner.clone();
        let mut search = tokio::task::spawn_blocking(move || searcher.search(candidate));

        let outcome = tokio::select! {
            res = &mut search => match res {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    log::error!("mining task failed: {}", e);
                    None
                }
            },
            alive = head_changed(&mut events) => {
                miner.stop();
                let _ = search.await;
                if !alive {
                    return;
                }
                None
            }
        };

        if let Some(MiningOutcome::Found(block)) = outcome {
            let index = block.index;
            let hash = block.hash;
            match node.submit_block(block).await {
                Ok(()) => log::info!("mined block #{} {}", index, hash),
                Err(ChainError::NotExtendingHead) => {
                    log::debug!("mined block #{} arrived late, discarded", index)
                }
                Err(e) => log::warn!("mined block #{} rejected: {}", index, e),
            }
        }
    }
}

/// Wait for the next event that moves the chain head. Returns false
/// once the node is gone and the channel closed.
async fn head_changed(events: &mut tokio::sync::broadcast::Receiver<NodeEvent>) -> bool {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(NodeEvent::BlockAccepted { .. }) | Ok(NodeEvent::ChainReplaced { .. }) => {
                return true;
            }
            Ok(NodeEvent::TransactionAccepted { .. }) => continue,
            // Missed events may include a head change
            Err(RecvError::Lagged(_)) => return true,
            Err(RecvError::Closed) => return false,
        }
    }
}

/// Discard queued events so a fresh assembly is not immediately
/// canceled by the echo of its own predecessor.
fn drain_events(events: &mut tokio::sync::broadcast::Receiver<NodeEvent>) {
    use tokio::sync::broadcast::error::TryRecvError;
    loop {
        match events.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return,
        }
    }
}
