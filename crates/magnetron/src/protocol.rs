// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hotline tracker wire protocol.
//!
//! All messages are big-endian with no padding. The TCP side of the tracker
//! speaks `Header`, `Update` and `ServerEntry`; the UDP side only receives
//! `ServerRegistration` datagrams.
//!
//! Wire format:
//! ```text
//! Header            | magic "HTRK" (4B) | version (2B) |
//! Update            | type=1 (2B) | data size (2B) | count (2B) | count dup (2B) |
//! ServerEntry       | ipv4 (4B) | port (2B) | users (2B) | reserved (2B) |
//!                   | name len (1B) | name | desc len (1B) | desc |
//! ServerRegistration| magic (2B) | port (2B) | users (2B) | magic2 (2B) | pass id (4B) |
//!                   | name len (1B) | name | desc len (1B) | desc | pass len (1B) | pass |
//! ```

use std::net::Ipv4Addr;
use thiserror::Error;

/// "HTRK"
pub const HEADER_MAGIC: [u8; 4] = [0x48, 0x54, 0x52, 0x4B];

/// Protocol version sent by this tracker.
pub const PROTOCOL_VERSION: u16 = 1;

/// Message type carried by every `Update`.
pub const UPDATE_MESSAGE_TYPE: u16 = 1;

/// Longest name or description a one-byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Shortest datagram accepted as a server registration.
pub const MIN_REGISTRATION_LEN: usize = 17;

/// Most entries a single `Update` can announce.
pub const MAX_LISTING_ENTRIES: usize = u16::MAX as usize;

/// Protocol error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    #[error("truncated {field} field")]
    Truncated { field: &'static str },

    #[error("invalid host address: {0}")]
    InvalidHostAddress(String),

    #[error("header magic/version mismatch: {magic:02x?} v{version}")]
    HeaderMismatch { magic: [u8; 4], version: u16 },

    #[error("unexpected message type {0}")]
    UnexpectedMessageType(u16),
}

/// Bounds-checked big-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ProtocolError::Truncated { field })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length byte followed by that many bytes.
    fn pascal(&mut self, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.u8(field)? as usize;
        self.take(len, field)
    }

    fn consumed(&self) -> usize {
        self.pos
    }
}

fn put_pascal(buf: &mut Vec<u8>, bytes: &[u8]) {
    let bytes = &bytes[..bytes.len().min(MAX_FIELD_LEN)];
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

/// Parse a dotted-quad IPv4 host.
pub fn parse_host(host: &str) -> Result<Ipv4Addr, ProtocolError> {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return Err(ProtocolError::InvalidHostAddress(host.to_string()));
    }

    let mut octets = [0u8; 4];
    for (octet, part) in octets.iter_mut().zip(parts) {
        *octet = part
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidHostAddress(host.to_string()))?;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Handshake message exchanged by both sides of a TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u16,
}

impl Header {
    pub const SIZE: usize = 6;

    pub fn new() -> Self {
        Self {
            magic: HEADER_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.magic);
        buf[4..].copy_from_slice(&self.version.to_be_bytes());
        buf
    }

    /// Decode a header. Magic and version are not checked here; see [`Header::check`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let mut r = Reader::new(buf);
        let mut magic = [0u8; 4];
        magic.copy_from_slice(r.take(4, "magic")?);
        let version = r.u16("version")?;
        Ok(Self { magic, version })
    }

    /// Strict validation, only applied when the tracker runs with strict headers.
    pub fn check(&self) -> Result<(), ProtocolError> {
        if self.magic != HEADER_MAGIC || self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::HeaderMismatch {
                magic: self.magic,
                version: self.version,
            });
        }
        Ok(())
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Announces the server list that follows it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    pub msg_type: u16,
    /// Sum of the encoded sizes of the entries that follow, saturated at
    /// `u16::MAX`.
    pub data_size: u16,
    pub server_count: u16,
    /// Legacy copy of `server_count`.
    pub server_count_dup: u16,
}

impl Update {
    pub const SIZE: usize = 8;

    /// Build the update describing `entries`.
    ///
    /// Only the first [`MAX_LISTING_ENTRIES`] entries are counted; callers
    /// must not send more than that after the update.
    pub fn for_entries(entries: &[ServerEntry]) -> Self {
        let entries = &entries[..entries.len().min(MAX_LISTING_ENTRIES)];
        let data_size: usize = entries.iter().map(ServerEntry::encoded_len).sum();
        let data_size = u16::try_from(data_size).unwrap_or(u16::MAX);
        let count = entries.len() as u16;
        Self {
            msg_type: UPDATE_MESSAGE_TYPE,
            data_size,
            server_count: count,
            server_count_dup: count,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[2..4].copy_from_slice(&self.data_size.to_be_bytes());
        buf[4..6].copy_from_slice(&self.server_count.to_be_bytes());
        buf[6..8].copy_from_slice(&self.server_count_dup.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let mut r = Reader::new(buf);
        let msg_type = r.u16("message type")?;
        if msg_type != UPDATE_MESSAGE_TYPE {
            return Err(ProtocolError::UnexpectedMessageType(msg_type));
        }
        Ok(Self {
            msg_type,
            data_size: r.u16("data size")?,
            server_count: r.u16("server count")?,
            server_count_dup: r.u16("server count dup")?,
        })
    }
}

/// One row of a server listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub address: Ipv4Addr,
    pub port: u16,
    pub user_count: u16,
    pub name: String,
    pub description: String,
}

impl ServerEntry {
    /// Bytes before the name: address, port, users, reserved.
    pub const FIXED_SIZE: usize = 10;

    /// Smallest possible entry: fixed part plus two empty length prefixes.
    pub const MIN_SIZE: usize = 12;

    /// Build an entry for a host given as a dotted-quad string.
    pub fn from_host(
        host: &str,
        port: u16,
        user_count: u16,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            address: parse_host(host)?,
            port,
            user_count,
            name: name.into(),
            description: description.into(),
        })
    }

    /// Like [`ServerEntry::from_host`], but a host that is not a dotted quad
    /// is listed as `0.0.0.0` instead of failing. Used for tracker rows.
    pub fn from_host_lenient(
        host: &str,
        port: u16,
        user_count: u16,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            address: parse_host(host).unwrap_or(Ipv4Addr::UNSPECIFIED),
            port,
            user_count,
            name: name.into(),
            description: description.into(),
        }
    }

    /// Zero-address row carrying only a label, used to introduce federated listings.
    pub fn separator(label: impl Into<String>) -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            user_count: 0,
            name: label.into(),
            description: String::new(),
        }
    }

    /// Encoded size on the wire. Names and descriptions longer than
    /// [`MAX_FIELD_LEN`] bytes are cut to that length when encoded.
    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE
            + self.name.len().min(MAX_FIELD_LEN)
            + self.description.len().min(MAX_FIELD_LEN)
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.address.octets());
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.extend_from_slice(&self.user_count.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        put_pascal(buf, self.name.as_bytes());
        put_pascal(buf, self.description.as_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode one entry from the front of `buf`, returning it with the number
    /// of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if buf.len() < Self::MIN_SIZE {
            return Err(ProtocolError::MessageTooShort {
                expected: Self::MIN_SIZE,
                actual: buf.len(),
            });
        }
        let mut r = Reader::new(buf);
        let ip = r.take(4, "address")?;
        let address = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        let port = r.u16("port")?;
        let user_count = r.u16("user count")?;
        r.take(2, "reserved")?;
        let name = String::from_utf8_lossy(r.pascal("name")?).into_owned();
        let description = String::from_utf8_lossy(r.pascal("description")?).into_owned();

        Ok((
            Self {
                address,
                port,
                user_count,
                name,
                description,
            },
            r.consumed(),
        ))
    }
}

/// Registration datagram sent by a Hotline server to announce itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRegistration {
    pub magic: u16,
    pub port: u16,
    pub user_count: u16,
    pub magic2: u16,
    pub pass_id: u32,
    pub name: String,
    pub description: String,
    pub password: String,
}

impl ServerRegistration {
    /// Decode a registration datagram.
    ///
    /// Buffers shorter than [`MIN_REGISTRATION_LEN`] are rejected before any
    /// field is read. Length prefixes that point past the end of the buffer
    /// yield [`ProtocolError::Truncated`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < MIN_REGISTRATION_LEN {
            return Err(ProtocolError::MessageTooShort {
                expected: MIN_REGISTRATION_LEN,
                actual: buf.len(),
            });
        }

        let mut r = Reader::new(buf);
        let magic = r.u16("magic")?;
        let port = r.u16("port")?;
        let user_count = r.u16("user count")?;
        let magic2 = r.u16("magic2")?;
        let pass_id = r.u32("pass id")?;
        let name = String::from_utf8_lossy(r.pascal("name")?).into_owned();
        let description = String::from_utf8_lossy(r.pascal("description")?).into_owned();
        let password = String::from_utf8_lossy(r.pascal("password")?).into_owned();

        Ok(Self {
            magic,
            port,
            user_count,
            magic2,
            pass_id,
            name,
            description,
            password,
        })
    }

    /// Encode a registration the way a Hotline server sends it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            15 + self.name.len() + self.description.len() + self.password.len(),
        );
        buf.extend_from_slice(&self.magic.to_be_bytes());
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.extend_from_slice(&self.user_count.to_be_bytes());
        buf.extend_from_slice(&self.magic2.to_be_bytes());
        buf.extend_from_slice(&self.pass_id.to_be_bytes());
        put_pascal(&mut buf, self.name.as_bytes());
        put_pascal(&mut buf, self.description.as_bytes());
        put_pascal(&mut buf, self.password.as_bytes());
        buf
    }
}
