// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Magnetron Hotline Tracker
//!
//! Keeps a directory of Hotline servers and hands it to clients.
//!
//! # Features
//!
//! - **Client Listing** -- TCP service returning the current server list
//! - **Registration** -- UDP service where servers announce themselves
//! - **Federation** -- Periodic polling of peer trackers
//! - **Expiration** -- Silent servers drop out of the listing
//! - **SQLite Backend** -- Optional persistence across restarts
//!
//! # Architecture
//!
//! ```text
//! Tracker
//! +-- listing       (TCP, read path)
//! +-- registration  (UDP, write path)
//! +-- federation    (TCP client, write path)
//! +-- sweeper       (timer, eviction)
//! +-- Registry      (MemoryStore or SqliteStore)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use magnetron::{MemoryStore, Tracker, TrackerConfig};
//! use std::sync::Arc;
//!
//! let config = TrackerConfig::from_file("tracker.yaml".as_ref())?;
//! let tracker = Tracker::from_config(config, Arc::new(MemoryStore::new())).await?;
//! tracker.run().await?;
//! ```

pub mod config;
pub mod connection;
pub mod password;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;

pub use config::{ConfigError, FederationConfig, ListingEntry, PasswordConfig, TrackerConfig};
pub use connection::{ConnectionError, TrackerConnection};
pub use password::{hash_password, PasswordSet};
pub use protocol::{Header, ProtocolError, ServerEntry, ServerRegistration, Update};
pub use registry::{Registry, RegistryError};
pub use server::{ServerError, Tracker};
pub use store::{MemoryStore, RegistryStore, SqliteStore, StoreError};
