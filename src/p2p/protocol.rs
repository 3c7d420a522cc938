//! P2P protocol messages and framing.
//!
//! Every frame is magic bytes, a little-endian u32 payload length,
//! then a bincode payload. The sync policy is head-first: peers
//! exchange `AnnounceHead` metadata and only pull block bodies when
//! the other side is strictly heavier.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::consensus::{Block, HeadInfo};
use crate::ledger::Transaction;

/// Network magic bytes ("TINC")
pub const NETWORK_MAGIC: [u8; 4] = [0x54, 0x49, 0x4E, 0x43];

/// Maximum frame payload (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Transport and framing errors. These drop the peer; they never
/// surface through consensus results.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bad network magic")]
    BadMagic,
    #[error("Frame of {0} bytes exceeds the message size limit")]
    Oversized(usize),
    #[error("Truncated frame")]
    Truncated,
    #[error("Peer i/o timed out")]
    Timeout,
    #[error("Message codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// P2P message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Introduction on connect: our listen address (if we accept
    /// inbound connections) and a sample of peers we know
    Hello {
        listen_addr: Option<SocketAddr>,
        peers: Vec<SocketAddr>,
    },
    /// Ask for the remote head metadata
    GetHead,
    /// Head metadata, sent on local head changes and as the
    /// `GetHead` reply
    AnnounceHead(HeadInfo),
    /// Ask for blocks from `from_index` through the remote head
    GetBlocks { from_index: u64 },
    /// Bulk block transfer, ascending index order
    Blocks(Vec<Block>),
    /// Gossip a pending transaction
    AnnounceTransaction(Transaction),
}

impl Message {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::GetHead => "gethead",
            Message::AnnounceHead(_) => "announcehead",
            Message::GetBlocks { .. } => "getblocks",
            Message::Blocks(_) => "blocks",
            Message::AnnounceTransaction(_) => "announcetx",
        }
    }

    /// Encode to a full frame: magic, length, payload
    pub fn to_bytes(&self) -> Result<Vec<u8>, PeerError> {
        let payload = bincode::serialize(self)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(PeerError::Oversized(payload.len()));
        }

        let mut bytes = Vec::with_capacity(8 + payload.len());
        bytes.extend_from_slice(&NETWORK_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode a full frame from a buffer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PeerError> {
        if bytes.len() < 8 {
            return Err(PeerError::Truncated);
        }
        if bytes[0..4] != NETWORK_MAGIC {
            return Err(PeerError::BadMagic);
        }

        let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::Oversized(length));
        }
        if bytes.len() < 8 + length {
            return Err(PeerError::Truncated);
        }

        Ok(bincode::deserialize(&bytes[8..8 + length])?)
    }
}

/// Read one framed message from the stream
pub async fn read_message<R>(reader: &mut R) -> Result<Message, PeerError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await?;

    if header[0..4] != NETWORK_MAGIC {
        return Err(PeerError::BadMagic);
    }
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(PeerError::Oversized(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

/// Write one framed message to the stream
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
