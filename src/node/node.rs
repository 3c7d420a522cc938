//! Shared node state and the operations that mutate it.
//!
//! `Node` is the single logical writer: the chain and the mempool sit
//! behind one `RwLock` and every mutation (transaction admission,
//! block append, chain replacement) takes the write half, so a block
//! and its mempool fallout are always observed together. Readers take
//! cheap snapshots through the read half. Accepted mutations publish
//! a `NodeEvent` on a broadcast channel; the miner restarts on head
//! changes and the p2p layer gossips from the same stream.

use tokio::sync::{broadcast, RwLock};

use crate::chain::{Chain, ChainError, Mempool, MempoolError};
use crate::config::ChainParams;
use crate::consensus::{Block, HeadInfo};
use crate::crypto::{Address, Hash};
use crate::ledger::{Transaction, UtxoSet};
use crate::mining::assemble_block;
use crate::storage::BlockStore;

/// Capacity of the node event channel. Slow subscribers lag rather
/// than block the writer.
const EVENT_CAPACITY: usize = 64;

/// Chain mutations and mempool admissions, published as they happen
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A block extended the chain
    BlockAccepted { head: HeadInfo },
    /// A heavier fork replaced the whole chain
    ChainReplaced { head: HeadInfo },
    /// A new transaction entered the mempool
    TransactionAccepted { tx: Transaction },
}

/// Chain plus pending pool, mutated together under one lock
#[derive(Debug)]
struct NodeState {
    chain: Chain,
    mempool: Mempool,
}

/// A running node's ledger state, event feed, and block log
pub struct Node {
    params: ChainParams,
    state: RwLock<NodeState>,
    events: broadcast::Sender<NodeEvent>,
    store: Option<BlockStore>,
}

impl Node {
    /// In-memory node with default mempool capacity
    pub fn new(params: ChainParams) -> Self {
        Self::with_options(params, None, crate::chain::DEFAULT_MEMPOOL_CAPACITY)
    }

    /// Node with an optional block log and a bounded mempool.
    ///
    /// With a store, the persisted chain is replayed from genesis at
    /// startup; a store that is empty, unreadable, or fails replay
    /// degrades to a fresh genesis chain with an error log, never a
    /// crash.
    pub fn with_options(
        params: ChainParams,
        store: Option<BlockStore>,
        mempool_capacity: usize,
    ) -> Self {
        let chain = match &store {
            Some(store) => load_or_init(params.clone(), store),
            None => Chain::new(params.clone()),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            params,
            state: RwLock::new(NodeState {
                chain,
                mempool: Mempool::with_capacity(mempool_capacity),
            }),
            events,
            store,
        }
    }

    /// Network parameters this node runs under
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Subscribe to chain and mempool events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Admit a transaction to the mempool.
    ///
    /// `Ok(true)` means newly accepted and a `TransactionAccepted`
    /// event was published; `Ok(false)` means the id was already
    /// pending, which suppresses re-broadcast loops.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool, MempoolError> {
        let mut guard = self.state.write().await;
        let NodeState { chain, mempool } = &mut *guard;
        let accepted = mempool.insert(tx.clone(), chain.utxo())?;
        drop(guard);

        if accepted {
            let _ = self.events.send(NodeEvent::TransactionAccepted { tx });
        }
        Ok(accepted)
    }

    /// Append a block to the chain head.
    ///
    /// On success the mempool is re-filtered against the new UTXO set
    /// (mined and now-conflicting entries drop out), the block is
    /// persisted, and `BlockAccepted` is published.
    pub async fn submit_block(&self, block: Block) -> Result<(), ChainError> {
        let mut guard = self.state.write().await;
        guard.chain.try_append(block.clone())?;

        let NodeState { chain, mempool } = &mut *guard;
        mempool.recompute(chain.utxo());
        let head = chain.head_info();

        if let Some(store) = &self.store {
            if let Err(e) = store.append_block(&block) {
                log::error!("failed to persist block #{}: {}", block.index, e);
            }
        }
        drop(guard);

        let _ = self.events.send(NodeEvent::BlockAccepted { head });
        log::debug!("accepted block #{} {}", head.index, head.hash);
        Ok(())
    }

    /// Replace the chain with a strictly heavier candidate.
    ///
    /// The candidate replays from genesis inside `try_replace`; on
    /// success the mempool is re-filtered against the new UTXO set,
    /// the block log is rewritten, and `ChainReplaced` is published.
    pub async fn replace_chain(&self, candidate: Vec<Block>) -> Result<(), ChainError> {
        let mut guard = self.state.write().await;
        guard.chain.try_replace(candidate)?;

        let NodeState { chain, mempool } = &mut *guard;
        mempool.recompute(chain.utxo());
        let head = chain.head_info();

        if let Some(store) = &self.store {
            if let Err(e) = store.replace_chain(chain.blocks()) {
                log::error!("failed to persist replaced chain: {}", e);
            }
        }
        drop(guard);

        let _ = self.events.send(NodeEvent::ChainReplaced { head });
        log::info!("chain replaced, new head #{} {}", head.index, head.hash);
        Ok(())
    }

    /// Head metadata for announcements and sync decisions
    pub async fn head_info(&self) -> HeadInfo {
        self.state.read().await.chain.head_info()
    }

    /// Number of blocks including genesis
    pub async fn chain_len(&self) -> u64 {
        self.state.read().await.chain.blocks().len() as u64
    }

    /// Difficulty required of the next block
    pub async fn next_difficulty(&self) -> u32 {
        self.state.read().await.chain.next_difficulty()
    }

    /// Block at an index, if within the chain
    pub async fn block_at(&self, index: u64) -> Option<Block> {
        self.state.read().await.chain.block_at(index).cloned()
    }

    /// Blocks from `from_index` through the head
    pub async fn blocks_from(&self, from_index: u64) -> Vec<Block> {
        self.state.read().await.chain.blocks_from(from_index).to_vec()
    }

    /// Spendable balance of an address
    pub async fn balance_of(&self, address: &Address) -> u64 {
        self.state.read().await.chain.balance_of(address)
    }

    /// Confirmation count of a mined transaction
    pub async fn confirmations(&self, id: &Hash) -> Option<u64> {
        self.state.read().await.chain.confirmations(id)
    }

    /// A mined transaction and the index of its containing block
    pub async fn find_transaction(&self, id: &Hash) -> Option<(Transaction, u64)> {
        self.state
            .read()
            .await
            .chain
            .find_transaction(id)
            .map(|(block, tx)| (tx.clone(), block.index))
    }

    /// Copy of the current UTXO set, for wallets and inspection
    pub async fn utxo_snapshot(&self) -> UtxoSet {
        self.state.read().await.chain.utxo().clone()
    }

    /// Pending transactions, oldest first
    pub async fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.state.read().await.mempool.in_arrival_order()
    }

    /// Number of pending transactions
    pub async fn mempool_len(&self) -> usize {
        self.state.read().await.mempool.len()
    }

    /// Candidate block over the current head and pending transactions
    pub async fn assemble_candidate(&self, reward_address: Address) -> Block {
        let state = self.state.read().await;
        assemble_block(
            &state.chain,
            state.mempool.in_arrival_order(),
            reward_address,
        )
    }
}

fn load_or_init(params: ChainParams, store: &BlockStore) -> Chain {
    match store.load_chain() {
        Ok(blocks) if !blocks.is_empty() => match Chain::from_blocks(params.clone(), blocks) {
            Ok(chain) => {
                log::info!("loaded chain at height {} from disk", chain.height());
                return chain;
            }
            Err(e) => log::error!("stored chain failed replay, starting fresh: {}", e),
        },
        Ok(_) => log::info!("empty block store, starting from genesis"),
        Err(e) => log::error!("could not read block store, starting fresh: {}", e),
    }

    let chain = Chain::new(params);
    if let Err(e) = store.replace_chain(chain.blocks()) {
        log::error!("could not initialize block store: {}", e);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PrivateKey, Signature};
    use crate::ledger::{TxInput, TxOutput};
    use crate::mining::{Miner, MiningOutcome};

    fn test_node() -> Node {
        Node::new(ChainParams::test())
    }

    async fn mine_block(node: &Node, to: Address) -> Block {
        let miner = Miner::new(to);
        let candidate = node.assemble_candidate(to).await;
        match miner.search(candidate) {
            MiningOutcome::Found(block) => block,
            MiningOutcome::Interrupted => panic!("search interrupted"),
        }
    }

    fn transfer(key: &PrivateKey, funding: &Transaction, to: Address, amount: u64) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput {
                output_id: funding.id,
                output_index: 0,
                owner: key.address(),
                signature: Signature([0u8; 64]),
            }],
            vec![TxOutput {
                address: to,
                amount,
            }],
        );
        let sig = key.sign(&tx.signing_hash()).unwrap();
        tx.inputs[0].signature = sig;
        tx.id = tx.compute_id();
        tx
    }

    #[tokio::test]
    async fn test_submit_block_advances_head() {
        let node = test_node();
        let miner = PrivateKey::generate();

        let block = mine_block(&node, miner.address()).await;
        let reward = block.transactions[0].outputs[0].amount;
        node.submit_block(block).await.unwrap();

        assert_eq!(node.head_info().await.index, 1);
        assert_eq!(node.chain_len().await, 2);
        assert_eq!(node.balance_of(&miner.address()).await, reward);
    }

    #[tokio::test]
    async fn test_submit_transaction_dedupes_and_emits() {
        let node = test_node();
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate().address();

        let block = mine_block(&node, alice.address()).await;
        let funding = block.transactions[0].clone();
        node.submit_block(block).await.unwrap();

        let mut events = node.subscribe();
        let tx = transfer(&alice, &funding, bob, funding.outputs[0].amount);

        assert!(node.submit_transaction(tx.clone()).await.unwrap());
        match events.recv().await.unwrap() {
            NodeEvent::TransactionAccepted { tx: seen } => assert_eq!(seen.id, tx.id),
            other => panic!("unexpected event {:?}", other),
        }

        // Duplicate id: accepted silently, no second event
        assert!(!node.submit_transaction(tx).await.unwrap());
        assert!(events.try_recv().is_err());
        assert_eq!(node.mempool_len().await, 1);
    }

    #[tokio::test]
    async fn test_mined_transaction_leaves_mempool() {
        let node = test_node();
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate().address();

        let block = mine_block(&node, alice.address()).await;
        let funding = block.transactions[0].clone();
        node.submit_block(block).await.unwrap();

        let amount = funding.outputs[0].amount;
        let tx = transfer(&alice, &funding, bob, amount);
        node.submit_transaction(tx.clone()).await.unwrap();
        assert_eq!(node.mempool_len().await, 1);

        let block = mine_block(&node, alice.address()).await;
        assert!(block.transactions.iter().any(|t| t.id == tx.id));
        node.submit_block(block).await.unwrap();

        assert_eq!(node.mempool_len().await, 0);
        assert_eq!(node.balance_of(&bob).await, amount);
        assert_eq!(node.confirmations(&tx.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_submit_block_emits_block_accepted() {
        let node = test_node();
        let miner = PrivateKey::generate().address();
        let mut events = node.subscribe();

        let block = mine_block(&node, miner).await;
        let expected_hash = block.hash;
        node.submit_block(block).await.unwrap();

        match events.recv().await.unwrap() {
            NodeEvent::BlockAccepted { head } => {
                assert_eq!(head.index, 1);
                assert_eq!(head.hash, expected_hash);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replace_chain_recomputes_mempool() {
        let node = test_node();
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate().address();

        // Our chain funds alice, and a pending spend rides on it
        let block = mine_block(&node, alice.address()).await;
        let funding = block.transactions[0].clone();
        node.submit_block(block).await.unwrap();
        let tx = transfer(&alice, &funding, bob, funding.outputs[0].amount);
        node.submit_transaction(tx.clone()).await.unwrap();

        // A heavier fork in which alice's funding never happened
        let other = PrivateKey::generate().address();
        let rival = Node::new(ChainParams::test());
        for _ in 0..2 {
            let block = mine_block(&rival, other).await;
            rival.submit_block(block).await.unwrap();
        }
        let candidate = rival.blocks_from(0).await;

        node.replace_chain(candidate).await.unwrap();

        // The pending spend no longer has an input and is gone
        assert_eq!(node.mempool_len().await, 0);
        assert_eq!(node.head_info().await.index, 2);
        assert_eq!(node.balance_of(&alice.address()).await, 0);
    }

    #[tokio::test]
    async fn test_replace_chain_rejects_lighter() {
        let node = test_node();
        let miner = PrivateKey::generate().address();
        for _ in 0..2 {
            let block = mine_block(&node, miner).await;
            node.submit_block(block).await.unwrap();
        }

        let rival = Node::new(ChainParams::test());
        let block = mine_block(&rival, miner).await;
        rival.submit_block(block).await.unwrap();
        let candidate = rival.blocks_from(0).await;

        let err = node.replace_chain(candidate).await.unwrap_err();
        assert!(matches!(err, ChainError::NotHeavier { .. }));
        assert_eq!(node.head_info().await.index, 2);
    }

    #[tokio::test]
    async fn test_chain_survives_restart() {
        let params = ChainParams::test();
        let miner = PrivateKey::generate().address();
        let store = BlockStore::temporary().unwrap();

        let head = {
            let node = Node::with_options(params.clone(), Some(store.clone()), 100);
            for _ in 0..3 {
                let block = mine_block(&node, miner).await;
                node.submit_block(block).await.unwrap();
            }
            node.head_info().await
        };
        assert_eq!(head.index, 3);

        // A fresh node over the same store replays the persisted chain
        let node = Node::with_options(params, Some(store), 100);
        let reloaded = node.head_info().await;
        assert_eq!(reloaded.index, head.index);
        assert_eq!(reloaded.hash, head.hash);
        assert_eq!(reloaded.cumulative_difficulty, head.cumulative_difficulty);
    }
}
