// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The tracker's view of every known server.
//!
//! `Registry` wraps a [`RegistryStore`] and owns the rules that sit above
//! plain storage: seeding configured entries in configuration order,
//! assembling the client-visible listing, and expiring stale rows.

use crate::config::{ConfigError, TrackerConfig};
use crate::protocol::{ServerEntry, ServerRegistration, MAX_LISTING_ENTRIES};
use crate::store::{
    FederatedServer, FederatedTracker, HostPort, Registration, RegisteredServer, RegistryStore,
    Sighting, StaticServer, StoreError, StoreResult, Upsert,
};
use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while seeding the registry from configuration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registry shared by every tracker service.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    federation_header: Option<String>,
    show_tracker_entries: bool,
}

impl Registry {
    /// Create a registry without federation listings.
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            federation_header: None,
            show_tracker_entries: false,
        }
    }

    /// Create a registry and load the configured static servers and peer trackers.
    pub fn from_config(
        store: Arc<dyn RegistryStore>,
        config: &TrackerConfig,
    ) -> Result<Self, RegistryError> {
        let fed = &config.tracker_federation;
        let mut registry = Self::new(store);
        if fed.enabled {
            registry.federation_header = Some(fed.header.clone());
            registry.show_tracker_entries = fed.show_tracker_entries;
        }
        registry.seed(config)?;
        Ok(registry)
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Replace configured rows with the entries from `config`, numbered in file order.
    pub fn seed(&self, config: &TrackerConfig) -> Result<(), RegistryError> {
        self.store.clear_static_servers()?;
        for (order, entry) in config.static_entries.iter().enumerate() {
            let (host, port) = entry.server_address()?;
            self.store.create_static_server(&StaticServer {
                host,
                port,
                name: entry.name.clone(),
                description: entry.description.clone(),
                user_count: entry.user_count,
                server_order: order as u16,
            })?;
        }

        self.store.clear_federated_trackers()?;
        for (order, entry) in config.tracker_federation.tracker_entries.iter().enumerate() {
            let (host, port) = entry.tracker_address()?;
            self.store.create_federated_tracker(&FederatedTracker {
                host,
                port,
                name: entry.name.clone(),
                description: entry.description.clone(),
                user_count: entry.user_count,
                first_seen: None,
                last_seen: None,
                tracker_order: order as u16,
            })?;
        }

        info!(
            "Loaded {} static servers and {} federated trackers",
            config.static_entries.len(),
            config.tracker_federation.tracker_entries.len()
        );
        Ok(())
    }

    /// Record a registration datagram received from `source`.
    ///
    /// The host is always the datagram's source address, never a payload field.
    pub fn register(
        &self,
        registration: &ServerRegistration,
        source: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        let outcome = self.store.upsert_registered_server(
            Registration {
                pass_id: registration.pass_id,
                host: source.to_string(),
                port: registration.port,
                name: registration.name.clone(),
                description: registration.description.clone(),
                user_count: registration.user_count,
            },
            now,
        )?;

        if outcome == Upsert::Created {
            info!(
                "Registered new server: {} ({}:{})",
                registration.name, source, registration.port
            );
        } else {
            debug!(
                "Refreshed server {} ({}:{}, {} users)",
                registration.name, source, registration.port, registration.user_count
            );
        }
        Ok(outcome)
    }

    /// Record one entry of a peer tracker's listing at position `order`.
    pub fn record_sighting(
        &self,
        tracker: &HostPort,
        entry: &ServerEntry,
        order: u16,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        self.store.upsert_federated_server(
            tracker,
            Sighting {
                host: entry.address.to_string(),
                port: entry.port,
                name: entry.name.clone(),
                description: entry.description.clone(),
                user_count: entry.user_count,
            },
            order,
            now,
        )
    }

    /// Note a successful poll of `tracker`.
    pub fn mark_tracker_seen(&self, tracker: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        self.store.mark_tracker_first_seen(tracker, now)?;
        self.store.mark_tracker_last_seen(tracker, now)
    }

    pub fn federated_trackers(&self) -> StoreResult<Vec<FederatedTracker>> {
        self.store.list_federated_trackers()
    }

    /// Remove registered servers that have been silent for longer than `max_age`.
    pub fn expire_registered(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RegisteredServer>> {
        let removed = self.store.remove_expired_registered_servers(max_age, now)?;
        for server in &removed {
            info!(
                "Removed expired server {} ({}:{})",
                server.name, server.host, server.port
            );
        }
        Ok(removed)
    }

    /// Remove federated servers no peer has listed for longer than `max_age`.
    pub fn expire_federated(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FederatedServer>> {
        let removed = self.store.remove_expired_federated_servers(max_age, now)?;
        for server in &removed {
            info!(
                "Removed expired federated server {} ({}:{} via {}:{})",
                server.name, server.host, server.port, server.tracker_host, server.tracker_port
            );
        }
        Ok(removed)
    }

    /// Build the listing sent to clients.
    ///
    /// Order: static servers, registered servers, then (with federation
    /// enabled) a separator row and each peer's servers in tracker order.
    /// A category whose store read fails is logged and left out; an entry
    /// that cannot be encoded is logged and skipped. The result holds at
    /// most [`MAX_LISTING_ENTRIES`] entries; the tail past that is dropped.
    pub fn listing(&self) -> Vec<ServerEntry> {
        let mut entries = Vec::new();

        match self.store.list_static_servers() {
            Ok(servers) => entries.extend(servers.iter().filter_map(|s| {
                encode_or_skip(&s.host, s.port, s.user_count, &s.name, &s.description)
            })),
            Err(e) => warn!("Failed to load static servers: {}", e),
        }

        match self.store.list_registered_servers() {
            Ok(servers) => entries.extend(servers.iter().filter_map(|s| {
                encode_or_skip(&s.host, s.port, s.user_count, &s.name, &s.description)
            })),
            Err(e) => warn!("Failed to load registered servers: {}", e),
        }

        if let Some(header) = &self.federation_header {
            match self.federated_listing() {
                Ok(federated) => {
                    entries.push(ServerEntry::separator(header.clone()));
                    entries.extend(federated);
                }
                Err(e) => warn!("Failed to load federated servers: {}", e),
            }
        }

        if entries.len() > MAX_LISTING_ENTRIES {
            warn!(
                "Listing truncated from {} to {} entries",
                entries.len(),
                MAX_LISTING_ENTRIES
            );
            entries.truncate(MAX_LISTING_ENTRIES);
        }

        entries
    }

    fn federated_listing(&self) -> StoreResult<Vec<ServerEntry>> {
        let mut entries = Vec::new();
        for tracker in self.store.list_federated_trackers()? {
            if self.show_tracker_entries {
                entries.push(ServerEntry::from_host_lenient(
                    &tracker.host,
                    tracker.port,
                    tracker.user_count,
                    tracker.name.clone(),
                    tracker.description.clone(),
                ));
            }
            for s in self.store.list_federated_servers(&tracker.key())? {
                entries.extend(encode_or_skip(
                    &s.host,
                    s.port,
                    s.user_count,
                    &s.name,
                    &s.description,
                ));
            }
        }
        Ok(entries)
    }
}

fn encode_or_skip(
    host: &str,
    port: u16,
    user_count: u16,
    name: &str,
    description: &str,
) -> Option<ServerEntry> {
    match ServerEntry::from_host(host, port, user_count, name, description) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Skipping server {} in listing: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListingEntry;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn entry(name: &str, address: &str) -> ListingEntry {
        ListingEntry {
            name: name.into(),
            description: format!("{} desc", name),
            address: address.into(),
            user_count: 0,
        }
    }

    fn registration(pass_id: u32, port: u16, name: &str) -> ServerRegistration {
        ServerRegistration {
            magic: 1,
            port,
            user_count: 4,
            magic2: 0,
            pass_id,
            name: name.into(),
            description: String::new(),
            password: String::new(),
        }
    }

    fn federated_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.static_entries = vec![entry("Alpha", "10.0.0.1:100")];
        config.tracker_federation.enabled = true;
        config.tracker_federation.header = "-- peers --".into();
        config.tracker_federation.tracker_entries =
            vec![entry("Peer B", "10.0.1.2"), entry("Peer A", "10.0.1.1")];
        config
    }

    #[test]
    fn test_seed_preserves_configuration_order() {
        let mut config = TrackerConfig::default();
        config.static_entries = vec![
            entry("Zed", "10.0.0.9"),
            entry("Alpha", "10.0.0.1:100"),
            entry("Mid", "10.0.0.5"),
        ];
        let registry = Registry::from_config(Arc::new(MemoryStore::new()), &config).unwrap();

        let names: Vec<String> = registry.listing().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Zed", "Alpha", "Mid"]);

        // Seeding twice does not duplicate configured rows.
        registry.seed(&config).unwrap();
        assert_eq!(registry.listing().len(), 3);
    }

    #[test]
    fn test_register_uses_source_address() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(10);

        let outcome = registry
            .register(&registration(42, 5500, "Bob"), Ipv4Addr::new(192, 0, 2, 1), t1)
            .unwrap();
        assert_eq!(outcome, Upsert::Created);

        let outcome = registry
            .register(&registration(42, 5501, "Bob"), Ipv4Addr::new(192, 0, 2, 9), t2)
            .unwrap();
        assert_eq!(outcome, Upsert::Updated);

        let server = registry.store().get_registered_server(42).unwrap().unwrap();
        assert_eq!(server.host, "192.0.2.9");
        assert_eq!(server.port, 5501);
        assert_eq!(server.first_seen, t1);
        assert_eq!(server.last_seen, t2);
    }

    #[test]
    fn test_listing_order_with_federation() {
        let registry =
            Registry::from_config(Arc::new(MemoryStore::new()), &federated_config()).unwrap();
        let now = Utc::now();
        registry
            .register(&registration(1, 5500, "Reg"), Ipv4Addr::new(10, 0, 0, 50), now)
            .unwrap();

        let peer_a = HostPort::new("10.0.1.1", 5498);
        let peer_b = HostPort::new("10.0.1.2", 5498);
        let fed = |name: &str, last: u8| {
            ServerEntry::from_host(&format!("10.0.2.{}", last), 5500, 0, name, "").unwrap()
        };
        registry.record_sighting(&peer_a, &fed("A1", 1), 0, now).unwrap();
        registry.record_sighting(&peer_b, &fed("B2", 3), 1, now).unwrap();
        registry.record_sighting(&peer_b, &fed("B1", 2), 0, now).unwrap();

        let names: Vec<String> = registry.listing().into_iter().map(|e| e.name).collect();
        // Peer B is configured first.
        assert_eq!(names, vec!["Alpha", "Reg", "-- peers --", "B1", "B2", "A1"]);

        let separator = &registry.listing()[2];
        assert_eq!(separator.address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(separator.port, 0);
        assert!(separator.description.is_empty());
    }

    #[test]
    fn test_listing_with_tracker_entries() {
        let mut config = federated_config();
        config.tracker_federation.show_tracker_entries = true;
        config.tracker_federation.tracker_entries = vec![entry("Named Peer", "peer.example.org")];
        let registry = Registry::from_config(Arc::new(MemoryStore::new()), &config).unwrap();

        let listing = registry.listing();
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "-- peers --", "Named Peer"]);
        assert_eq!(listing[2].address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(listing[2].port, 5498);
    }

    #[test]
    fn test_listing_without_federation_has_no_separator() {
        let mut config = federated_config();
        config.tracker_federation.enabled = false;
        let registry = Registry::from_config(Arc::new(MemoryStore::new()), &config).unwrap();
        assert_eq!(registry.listing().len(), 1);
    }

    #[test]
    fn test_listing_capped_at_update_limit() {
        let registry =
            Registry::from_config(Arc::new(MemoryStore::new()), &federated_config()).unwrap();
        let now = Utc::now();
        for pass_id in 0..MAX_LISTING_ENTRIES as u32 + 2 {
            registry
                .register(
                    &registration(pass_id, 5500, "Bulk"),
                    Ipv4Addr::new(10, 0, 0, 50),
                    now,
                )
                .unwrap();
        }

        let listing = registry.listing();
        assert_eq!(listing.len(), MAX_LISTING_ENTRIES);
        assert_eq!(listing[0].name, "Alpha");
        assert!(listing.iter().all(|e| e.name != "-- peers --"));
    }

    #[test]
    fn test_listing_skips_unencodable_hosts() {
        let mut config = TrackerConfig::default();
        config.static_entries = vec![
            entry("Named", "server.example.org:5500"),
            entry("Numeric", "10.0.0.2:5500"),
        ];
        let registry = Registry::from_config(Arc::new(MemoryStore::new()), &config).unwrap();

        let names: Vec<String> = registry.listing().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Numeric"]);
    }

    #[test]
    fn test_expire_registered_only_removes_stale() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        registry
            .register(
                &registration(1, 5500, "old"),
                Ipv4Addr::new(10, 0, 0, 1),
                now - ChronoDuration::seconds(400),
            )
            .unwrap();
        registry
            .register(
                &registration(2, 5500, "new"),
                Ipv4Addr::new(10, 0, 0, 2),
                now - ChronoDuration::seconds(100),
            )
            .unwrap();

        let removed = registry
            .expire_registered(Duration::from_secs(300), now)
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].pass_id, 1);
        assert!(registry.store().get_registered_server(2).unwrap().is_some());
    }

    #[test]
    fn test_mark_tracker_seen() {
        let registry =
            Registry::from_config(Arc::new(MemoryStore::new()), &federated_config()).unwrap();
        let peer = HostPort::new("10.0.1.1", 5498);
        let now = Utc::now();
        registry.mark_tracker_seen(&peer, now).unwrap();

        let tracker = registry.store().get_federated_tracker(&peer).unwrap().unwrap();
        assert_eq!(tracker.first_seen, Some(now));
        assert_eq!(tracker.last_seen, Some(now));
    }
}
