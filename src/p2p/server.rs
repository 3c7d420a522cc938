//! TCP transport for the gossip protocol.
//!
//! Each connection runs a reader task and a writer task joined by a
//! `select!`, so when either side fails the connection winds down as a
//! whole. The reader feeds frames through the synchronizer and queues
//! replies onto an outgoing channel that the writer drains. Accepted
//! blocks and transactions reach the other peers through the node's
//! event stream, which a fan-out task turns into announcements.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::node::{Node, NodeEvent};
use crate::p2p::{read_message, write_message, Message, PeerBook, PeerError, Synchronizer};

const MAX_KNOWN_PEERS: usize = 256;

/// Queued messages per peer before gossip to it is dropped
const OUTGOING_CAPACITY: usize = 64;

/// Addresses shared in a `Hello`
const GOSSIP_SAMPLE: usize = 8;

/// Outbound dials attempted per maintenance tick
const DIAL_BATCH: usize = 4;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Head announcement and redial cadence
const SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Drop a connection silent for this long. Peers announce their head
/// every `SYNC_INTERVAL`, so a quiet line means a stalled peer.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on writing a single frame to a peer
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Disconnected peers unheard for this long are forgotten
const STALE_PEER_TIMEOUT: Duration = Duration::from_secs(600);

/// Sender side of one live connection's outgoing queue, plus a signal
/// that tells the connection task to shut the peer down
#[derive(Clone)]
struct PeerHandle {
    outgoing: Sender<Message>,
    close: Arc<Notify>,
}

/// Listens for peers, keeps connections alive and gossips node events
pub struct PeerServer {
    sync: Synchronizer,
    listen_addr: SocketAddr,
    live: Arc<RwLock<HashMap<SocketAddr, PeerHandle>>>,
}

impl PeerServer {
    /// Bind `listen_addr` and start the accept, fan-out and
    /// maintenance tasks. The returned handle is the accept loop;
    /// the bound address is available from [`PeerServer::listen_addr`]
    /// for callers that bind port 0.
    pub async fn bind(
        node: Arc<Node>,
        listen_addr: SocketAddr,
        max_peers: usize,
    ) -> Result<(Arc<Self>, JoinHandle<()>), PeerError> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let book = Arc::new(Mutex::new(PeerBook::new(max_peers, MAX_KNOWN_PEERS)));
        let server = Arc::new(Self {
            sync: Synchronizer::new(node, book),
            listen_addr: local_addr,
            live: Arc::new(RwLock::new(HashMap::new())),
        });
        log::info!("p2p listening on {}", local_addr);

        let accepting = server.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if !accepting.peers().lock().await.has_free_slot() {
                            log::debug!("at connection capacity, dropping inbound {}", addr);
                            continue;
                        }
                        log::debug!("inbound connection from {}", addr);
                        accepting.clone().spawn_peer(stream, addr).await;
                    }
                    Err(e) => log::warn!("accept failed: {}", e),
                }
            }
        });

        server.clone().spawn_event_task();
        server.clone().spawn_maintenance_task();

        Ok((server, task))
    }

    /// The address the server actually bound
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn node(&self) -> &Arc<Node> {
        self.sync.node()
    }

    pub fn peers(&self) -> &Arc<Mutex<PeerBook>> {
        self.sync.peers()
    }

    /// Dial `addr` and adopt the connection on success
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) {
        if addr == self.listen_addr || self.live.read().await.contains_key(&addr) {
            return;
        }
        {
            let mut book = self.peers().lock().await;
            if book.is_banned(&addr) {
                return;
            }
            book.add_known(addr);
        }

        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                log::info!("connected to peer {}", addr);
                self.clone().spawn_peer(stream, addr).await;
            }
            Ok(Err(e)) => {
                log::debug!("dial {} failed: {}", addr, e);
                self.peers().lock().await.connection_failed(&addr);
            }
            Err(_) => {
                log::debug!("dial {} timed out", addr);
                self.peers().lock().await.connection_failed(&addr);
            }
        }
    }

    /// Register the connection and hand it to its own task
    async fn spawn_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (tx, rx) = mpsc::channel(OUTGOING_CAPACITY);
        let close = Arc::new(Notify::new());
        self.peers().lock().await.mark_connected(addr);
        self.live.write().await.insert(
            addr,
            PeerHandle {
                outgoing: tx.clone(),
                close: close.clone(),
            },
        );

        tokio::spawn(async move {
            if let Err(e) = self.run_peer(stream, addr, tx, rx, close).await {
                log::debug!("peer {} disconnected: {}", addr, e);
            }
            self.peers().lock().await.mark_disconnected(&addr);
            self.live.write().await.remove(&addr);
        });
    }

    async fn run_peer(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        outgoing: Sender<Message>,
        rx: Receiver<Message>,
        close: Arc<Notify>,
    ) -> Result<(), PeerError> {
        let (reader, writer) = stream.into_split();

        // Introduce ourselves and ask where the peer stands
        let sample = self.peers().lock().await.gossip_sample(&addr, GOSSIP_SAMPLE);
        let greeting = vec![
            Message::Hello {
                listen_addr: Some(self.listen_addr),
                peers: sample,
            },
            Message::GetHead,
        ];

        tokio::select! {
            res = self.reader_task(reader, addr, outgoing) => res,
            res = writer_task(writer, greeting, rx) => res,
            _ = close.notified() => Ok(()),
        }
    }

    async fn reader_task(
        &self,
        mut reader: OwnedReadHalf,
        addr: SocketAddr,
        outgoing: Sender<Message>,
    ) -> Result<(), PeerError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, read_message(&mut reader)).await {
                Ok(res) => res?,
                Err(_) => return Err(PeerError::Timeout),
            };
            log::trace!("{} from {}", msg.name(), addr);

            for reply in self.sync.handle_message(addr, msg).await {
                if outgoing.send(reply).await.is_err() {
                    return Ok(());
                }
            }
            if self.sync.is_banned(&addr).await {
                log::warn!("closing connection to banned peer {}", addr);
                return Ok(());
            }
        }
    }

    /// Queue `msg` for every live connection. A peer that has stopped
    /// draining its queue is dropped; if it recovers it can reconnect
    /// and catch up from the periodic head announcement.
    async fn broadcast(&self, msg: Message) {
        let peers: Vec<(SocketAddr, PeerHandle)> = self
            .live
            .read()
            .await
            .iter()
            .map(|(addr, handle)| (*addr, handle.clone()))
            .collect();

        for (addr, handle) in peers {
            match handle.outgoing.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("peer {} stopped draining its queue, dropping it", addr);
                    handle.close.notify_one();
                    self.live.write().await.remove(&addr);
                }
                Err(TrySendError::Closed(_)) => {
                    self.live.write().await.remove(&addr);
                }
            }
        }
    }

    /// Turn node events into announcements to all peers
    fn spawn_event_task(self: Arc<Self>) {
        let mut events = self.node().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(NodeEvent::BlockAccepted { head })
                    | Ok(NodeEvent::ChainReplaced { head }) => {
                        self.broadcast(Message::AnnounceHead(head)).await;
                    }
                    Ok(NodeEvent::TransactionAccepted { tx }) => {
                        self.broadcast(Message::AnnounceTransaction(tx)).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::debug!("event stream lagged by {}, announcing current head", n);
                        let head = self.node().head_info().await;
                        self.broadcast(Message::AnnounceHead(head)).await;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    /// Periodically announce our head, dial fresh peers and prune the
    /// book
    fn spawn_maintenance_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = interval(SYNC_INTERVAL);
            loop {
                tick.tick().await;

                let head = self.node().head_info().await;
                self.broadcast(Message::AnnounceHead(head)).await;

                let candidates = {
                    let mut book = self.peers().lock().await;
                    book.prune_stale(STALE_PEER_TIMEOUT);
                    book.connect_candidates(DIAL_BATCH)
                };
                for addr in candidates {
                    let server = self.clone();
                    tokio::spawn(async move { server.connect(addr).await });
                }
            }
        });
    }
}

async fn writer_task(
    mut writer: OwnedWriteHalf,
    greeting: Vec<Message>,
    mut rx: Receiver<Message>,
) -> Result<(), PeerError> {
    for msg in greeting {
        send_frame(&mut writer, &msg).await?;
    }
    while let Some(msg) = rx.recv().await {
        send_frame(&mut writer, &msg).await?;
    }
    Ok(())
}

/// Write one frame, treating a peer that stops accepting bytes as gone
async fn send_frame(writer: &mut OwnedWriteHalf, msg: &Message) -> Result<(), PeerError> {
    match timeout(WRITE_TIMEOUT, write_message(writer, msg)).await {
        Ok(res) => res,
        Err(_) => Err(PeerError::Timeout),
    }
}
