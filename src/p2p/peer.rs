//! Peer bookkeeping.
//!
//! The book tracks every address we have heard of, with connection
//! state, a misbehavior score, and the peer's last announced height.
//! It is bounded: once full, new addresses are ignored until stale
//! entries are pruned. Gossiped addresses are untrusted input, so the
//! cap is what keeps a chatty peer from growing the book without end.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Misbehavior score at which a peer is banned
pub const BAN_THRESHOLD: u32 = 100;

/// Give up dialing an address after this many failed attempts
const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Known address, not currently connected
    Disconnected,
    /// Live connection
    Connected,
    /// Banned for misbehavior; never dialed again
    Banned,
}

/// What we know about one peer address
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub state: PeerState,
    pub last_seen: Instant,
    pub failed_attempts: u32,
    pub misbehavior: u32,
    /// Highest block index the peer has announced
    pub best_index: u64,
}

impl PeerInfo {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: PeerState::Disconnected,
            last_seen: Instant::now(),
            failed_attempts: 0,
            misbehavior: 0,
            best_index: 0,
        }
    }

    /// Refresh the last-seen time
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_banned(&self) -> bool {
        self.state == PeerState::Banned
    }

    fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Bounded registry of known and connected peers
#[derive(Debug)]
pub struct PeerBook {
    peers: HashMap<SocketAddr, PeerInfo>,
    connected: HashSet<SocketAddr>,
    max_connections: usize,
    max_known: usize,
}

impl PeerBook {
    pub fn new(max_connections: usize, max_known: usize) -> Self {
        Self {
            peers: HashMap::new(),
            connected: HashSet::new(),
            max_connections,
            max_known: max_known.max(max_connections),
        }
    }

    /// Record an address. Full books and already-known addresses are
    /// left as they are.
    pub fn add_known(&mut self, addr: SocketAddr) {
        if self.peers.len() >= self.max_known && !self.peers.contains_key(&addr) {
            return;
        }
        self.peers.entry(addr).or_insert_with(|| PeerInfo::new(addr));
    }

    /// Record a batch of gossiped addresses
    pub fn add_known_many(&mut self, addrs: &[SocketAddr]) {
        for addr in addrs {
            self.add_known(*addr);
        }
    }

    /// Mark a live connection to `addr`
    pub fn mark_connected(&mut self, addr: SocketAddr) {
        self.add_known(addr);
        if let Some(peer) = self.peers.get_mut(&addr) {
            if peer.is_banned() {
                return;
            }
            peer.state = PeerState::Connected;
            peer.failed_attempts = 0;
            peer.touch();
            self.connected.insert(addr);
        }
    }

    /// Record that the connection to `addr` ended
    pub fn mark_disconnected(&mut self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.get_mut(addr) {
            if peer.state == PeerState::Connected {
                peer.state = PeerState::Disconnected;
            }
            peer.touch();
        }
        self.connected.remove(addr);
    }

    /// Record a failed outbound dial
    pub fn connection_failed(&mut self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.get_mut(addr) {
            if peer.state == PeerState::Connected {
                peer.state = PeerState::Disconnected;
            }
            peer.failed_attempts += 1;
        }
        self.connected.remove(addr);
    }

    /// Add misbehavior points. Returns true if the peer crossed the
    /// ban threshold and must be disconnected.
    pub fn report_misbehavior(&mut self, addr: &SocketAddr, points: u32) -> bool {
        let Some(peer) = self.peers.get_mut(addr) else {
            return false;
        };
        peer.misbehavior = peer.misbehavior.saturating_add(points);
        if peer.misbehavior >= BAN_THRESHOLD {
            peer.state = PeerState::Banned;
            self.connected.remove(addr);
            return true;
        }
        false
    }

    pub fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.peers.get(addr).map(|p| p.is_banned()).unwrap_or(false)
    }

    /// Note the height a peer announced
    pub fn record_head(&mut self, addr: &SocketAddr, best_index: u64) {
        if let Some(peer) = self.peers.get_mut(addr) {
            peer.best_index = peer.best_index.max(best_index);
            peer.touch();
        }
    }

    /// Addresses worth dialing, bounded by free connection slots
    pub fn connect_candidates(&self, count: usize) -> Vec<SocketAddr> {
        if self.connected.len() >= self.max_connections {
            return vec![];
        }
        let free = self.max_connections - self.connected.len();

        self.peers
            .values()
            .filter(|p| {
                p.state == PeerState::Disconnected && p.failed_attempts < MAX_FAILED_ATTEMPTS
            })
            .take(count.min(free))
            .map(|p| p.addr)
            .collect()
    }

    /// Addresses to share in a `Hello`, excluding the recipient
    pub fn gossip_sample(&self, exclude: &SocketAddr, count: usize) -> Vec<SocketAddr> {
        self.peers
            .values()
            .filter(|p| !p.is_banned() && p.addr != *exclude)
            .take(count)
            .map(|p| p.addr)
            .collect()
    }

    /// Currently connected peers
    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        self.connected
            .iter()
            .filter_map(|addr| self.peers.get(addr))
            .cloned()
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn known_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_free_slot(&self) -> bool {
        self.connected.len() < self.max_connections
    }

    /// Drop disconnected entries not heard from within `timeout`,
    /// making room for fresh addresses. Banned peers are kept so the
    /// ban holds.
    pub fn prune_stale(&mut self, timeout: Duration) {
        self.peers
            .retain(|_, p| p.state != PeerState::Disconnected || !p.is_stale(timeout));
    }
}
