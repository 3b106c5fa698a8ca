// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracker protocol framing over a byte stream.

use crate::protocol::{Header, ProtocolError, ServerEntry, Update, MAX_LISTING_ENTRIES};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// A TCP session speaking the tracker protocol, used both for serving
/// listings and for polling peer trackers.
pub struct TrackerConnection<S = TcpStream> {
    stream: S,
    peer_addr: SocketAddr,
    strict_header: bool,
    read_buffer: Vec<u8>,
}

impl<S> TrackerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection.
    pub fn new(stream: S, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            strict_header: false,
            read_buffer: Vec::with_capacity(512),
        }
    }

    /// Reject headers whose magic or version differ from ours.
    pub fn with_strict_header(mut self, strict: bool) -> Self {
        self.strict_header = strict;
        self
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the handshake header from the peer.
    pub async fn read_header(&mut self) -> Result<Header, ConnectionError> {
        let mut buf = [0u8; Header::SIZE];
        self.stream.read_exact(&mut buf).await?;
        let header = Header::decode(&buf)?;
        if self.strict_header {
            header.check()?;
        }
        Ok(header)
    }

    /// Send our handshake header.
    pub async fn send_header(&mut self) -> Result<(), ConnectionError> {
        self.stream.write_all(&Header::new().encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the update announcing a server list.
    pub async fn read_update(&mut self) -> Result<Update, ConnectionError> {
        let mut buf = [0u8; Update::SIZE];
        self.stream.read_exact(&mut buf).await?;
        Ok(Update::decode(&buf)?)
    }

    /// Read one server entry.
    pub async fn read_entry(&mut self) -> Result<ServerEntry, ConnectionError> {
        self.read_buffer.clear();
        self.read_buffer.resize(ServerEntry::FIXED_SIZE + 1, 0);
        self.stream.read_exact(&mut self.read_buffer).await?;

        let name_len = self.read_buffer[ServerEntry::FIXED_SIZE] as usize;
        self.read_field(name_len).await?;
        let desc_len = self.stream.read_u8().await?;
        self.read_buffer.push(desc_len);
        self.read_field(desc_len as usize).await?;

        let (entry, _) = ServerEntry::decode(&self.read_buffer)?;
        Ok(entry)
    }

    async fn read_field(&mut self, len: usize) -> Result<(), ConnectionError> {
        let start = self.read_buffer.len();
        self.read_buffer.resize(start + len, 0);
        self.stream
            .read_exact(&mut self.read_buffer[start..])
            .await?;
        Ok(())
    }

    /// Send an update followed by every entry it describes.
    ///
    /// Entries past [`MAX_LISTING_ENTRIES`] are not sent.
    pub async fn send_listing(&mut self, entries: &[ServerEntry]) -> Result<(), ConnectionError> {
        let entries = &entries[..entries.len().min(MAX_LISTING_ENTRIES)];
        let update = Update::for_entries(entries);
        let mut out = Vec::with_capacity(Update::SIZE + update.data_size as usize);
        out.extend_from_slice(&update.encode());
        for entry in entries {
            entry.encode_into(&mut out);
        }

        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shutdown the write half of the connection.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out")]
    Timeout,

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<tokio::time::error::Elapsed> for ConnectionError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
