// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry store abstraction
//!
//! Four independent collections back the tracker:
//!
//! - **Static** servers from configuration, keyed by (host, port)
//! - **Registered** servers announced over UDP, keyed by pass ID
//! - **Federated trackers** from configuration, keyed by (host, port)
//! - **Federated servers** learned by polling a peer, keyed by
//!   (tracker host, tracker port, host, port)
//!
//! # Implementations
//!
//! - `MemoryStore` -- Default, process-lifetime state
//! - `SqliteStore` -- Survives restarts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod tests_common;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Host and port identifying a static server or a federated tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of a federated server: always qualified by the tracker that listed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FederatedServerKey {
    pub tracker: HostPort,
    pub server: HostPort,
}

impl fmt::Display for FederatedServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.server, self.tracker)
    }
}

/// A server listed from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticServer {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
    pub server_order: u16,
}

impl StaticServer {
    pub fn key(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.port)
    }
}

/// A server that announced itself over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredServer {
    pub pass_id: u32,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RegisteredServer {
    /// Check whether the server has not re-registered within `max_age`.
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        is_stale(self.last_seen, max_age, now)
    }
}

/// Fields carried by one registration datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub pass_id: u32,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
}

impl Registration {
    fn into_server(self, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> RegisteredServer {
        RegisteredServer {
            pass_id: self.pass_id,
            host: self.host,
            port: self.port,
            name: self.name,
            description: self.description,
            user_count: self.user_count,
            first_seen,
            last_seen,
        }
    }
}

/// A peer tracker this instance polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedTracker {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub tracker_order: u16,
}

impl FederatedTracker {
    pub fn key(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.port)
    }
}

/// A server listed by a peer tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedServer {
    pub tracker_host: String,
    pub tracker_port: u16,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
    pub server_order: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl FederatedServer {
    pub fn key(&self) -> FederatedServerKey {
        FederatedServerKey {
            tracker: HostPort::new(self.tracker_host.clone(), self.tracker_port),
            server: HostPort::new(self.host.clone(), self.port),
        }
    }

    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        is_stale(self.last_seen, max_age, now)
    }
}

/// One row received while polling a peer tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u16,
}

impl Sighting {
    fn into_server(
        self,
        tracker: &HostPort,
        order: u16,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    ) -> FederatedServer {
        FederatedServer {
            tracker_host: tracker.host.clone(),
            tracker_port: tracker.port,
            host: self.host,
            port: self.port,
            name: self.name,
            description: self.description,
            user_count: self.user_count,
            server_order: order,
            first_seen,
            last_seen,
        }
    }
}

/// Outcome of a create-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

fn is_stale(last_seen: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now.signed_duration_since(last_seen) > max_age,
        Err(_) => false,
    }
}

/// Registry store trait
///
/// Every operation is atomic with respect to a single identity. Writers to
/// the same identity are serialized; an update never changes `first_seen`.
pub trait RegistryStore: Send + Sync {
    // -- static servers --

    fn create_static_server(&self, server: &StaticServer) -> StoreResult<()>;

    fn get_static_server(&self, key: &HostPort) -> StoreResult<Option<StaticServer>>;

    /// All static servers ordered by `server_order`.
    fn list_static_servers(&self) -> StoreResult<Vec<StaticServer>>;

    fn clear_static_servers(&self) -> StoreResult<()>;

    // -- registered servers --

    fn create_registered_server(&self, server: &RegisteredServer) -> StoreResult<()>;

    /// Refresh host, port, name, description, user count and `last_seen`.
    fn update_registered_server(&self, server: &RegisteredServer) -> StoreResult<()>;

    fn get_registered_server(&self, pass_id: u32) -> StoreResult<Option<RegisteredServer>>;

    /// All registered servers ordered by `first_seen`, then pass ID.
    fn list_registered_servers(&self) -> StoreResult<Vec<RegisteredServer>>;

    /// Create the server on first registration, refresh it afterwards.
    fn upsert_registered_server(
        &self,
        registration: Registration,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert>;

    fn delete_registered_server(&self, pass_id: u32) -> StoreResult<bool>;

    /// Delete servers whose `last_seen` is older than `max_age` and return them.
    fn remove_expired_registered_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RegisteredServer>>;

    // -- federated trackers --

    fn create_federated_tracker(&self, tracker: &FederatedTracker) -> StoreResult<()>;

    fn get_federated_tracker(&self, key: &HostPort) -> StoreResult<Option<FederatedTracker>>;

    /// All federated trackers ordered by `tracker_order`.
    fn list_federated_trackers(&self) -> StoreResult<Vec<FederatedTracker>>;

    /// Set `first_seen` unless it is already set.
    fn mark_tracker_first_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()>;

    fn mark_tracker_last_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()>;

    fn clear_federated_trackers(&self) -> StoreResult<()>;

    // -- federated servers --

    fn create_federated_server(&self, server: &FederatedServer) -> StoreResult<()>;

    /// Refresh name, description, user count, order and `last_seen`.
    fn update_federated_server(&self, server: &FederatedServer) -> StoreResult<()>;

    fn get_federated_server(&self, key: &FederatedServerKey) -> StoreResult<Option<FederatedServer>>;

    /// Servers listed by `tracker`, ordered by `server_order`.
    fn list_federated_servers(&self, tracker: &HostPort) -> StoreResult<Vec<FederatedServer>>;

    /// Record a sighting at position `order` of the tracker's latest listing.
    fn upsert_federated_server(
        &self,
        tracker: &HostPort,
        sighting: Sighting,
        order: u16,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert>;

    fn remove_expired_federated_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FederatedServer>>;
}
