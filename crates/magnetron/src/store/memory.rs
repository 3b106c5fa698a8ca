// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory registry store.

use super::{
    FederatedServer, FederatedServerKey, FederatedTracker, HostPort, Registration,
    RegisteredServer, RegistryStore, Sighting, StaticServer, StoreError, StoreResult, Upsert,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
struct Collections {
    /// Static servers indexed by (host, port)
    static_servers: HashMap<HostPort, StaticServer>,

    /// Registered servers indexed by pass ID
    registered: HashMap<u32, RegisteredServer>,

    /// Federated trackers indexed by (host, port)
    trackers: HashMap<HostPort, FederatedTracker>,

    /// Federated servers indexed by owning tracker, then by server (host, port)
    federated: HashMap<HostPort, HashMap<HostPort, FederatedServer>>,
}

/// Registry store held entirely in process memory.
///
/// A single mutex serializes all writers, which gives per-identity atomicity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryStore {
    fn create_static_server(&self, server: &StaticServer) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let key = server.key();
        if c.static_servers.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("static server {}", key)));
        }
        c.static_servers.insert(key, server.clone());
        Ok(())
    }

    fn get_static_server(&self, key: &HostPort) -> StoreResult<Option<StaticServer>> {
        Ok(self.inner.lock().static_servers.get(key).cloned())
    }

    fn list_static_servers(&self) -> StoreResult<Vec<StaticServer>> {
        let mut servers: Vec<StaticServer> =
            self.inner.lock().static_servers.values().cloned().collect();
        servers.sort_by(|a, b| {
            a.server_order
                .cmp(&b.server_order)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(servers)
    }

    fn clear_static_servers(&self) -> StoreResult<()> {
        self.inner.lock().static_servers.clear();
        Ok(())
    }

    fn create_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        let mut c = self.inner.lock();
        if c.registered.contains_key(&server.pass_id) {
            return Err(StoreError::Duplicate(format!(
                "registered server {}",
                server.pass_id
            )));
        }
        c.registered.insert(server.pass_id, server.clone());
        Ok(())
    }

    fn update_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let existing = c
            .registered
            .get_mut(&server.pass_id)
            .ok_or_else(|| StoreError::NotFound(format!("registered server {}", server.pass_id)))?;
        let first_seen = existing.first_seen;
        *existing = server.clone();
        existing.first_seen = first_seen;
        Ok(())
    }

    fn get_registered_server(&self, pass_id: u32) -> StoreResult<Option<RegisteredServer>> {
        Ok(self.inner.lock().registered.get(&pass_id).cloned())
    }

    fn list_registered_servers(&self) -> StoreResult<Vec<RegisteredServer>> {
        let mut servers: Vec<RegisteredServer> =
            self.inner.lock().registered.values().cloned().collect();
        servers.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.pass_id.cmp(&b.pass_id))
        });
        Ok(servers)
    }

    fn upsert_registered_server(
        &self,
        registration: Registration,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        let mut c = self.inner.lock();
        match c.registered.get_mut(&registration.pass_id) {
            Some(existing) => {
                let first_seen = existing.first_seen;
                *existing = registration.into_server(first_seen, now);
                Ok(Upsert::Updated)
            }
            None => {
                c.registered
                    .insert(registration.pass_id, registration.into_server(now, now));
                Ok(Upsert::Created)
            }
        }
    }

    fn delete_registered_server(&self, pass_id: u32) -> StoreResult<bool> {
        Ok(self.inner.lock().registered.remove(&pass_id).is_some())
    }

    fn remove_expired_registered_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RegisteredServer>> {
        let mut c = self.inner.lock();
        let expired: Vec<u32> = c
            .registered
            .values()
            .filter(|s| s.is_expired(max_age, now))
            .map(|s| s.pass_id)
            .collect();

        Ok(expired
            .iter()
            .filter_map(|id| c.registered.remove(id))
            .collect())
    }

    fn create_federated_tracker(&self, tracker: &FederatedTracker) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let key = tracker.key();
        if c.trackers.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("federated tracker {}", key)));
        }
        c.trackers.insert(key, tracker.clone());
        Ok(())
    }

    fn get_federated_tracker(&self, key: &HostPort) -> StoreResult<Option<FederatedTracker>> {
        Ok(self.inner.lock().trackers.get(key).cloned())
    }

    fn list_federated_trackers(&self) -> StoreResult<Vec<FederatedTracker>> {
        let mut trackers: Vec<FederatedTracker> =
            self.inner.lock().trackers.values().cloned().collect();
        trackers.sort_by(|a, b| {
            a.tracker_order
                .cmp(&b.tracker_order)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(trackers)
    }

    fn mark_tracker_first_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let tracker = c
            .trackers
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("federated tracker {}", key)))?;
        tracker.first_seen.get_or_insert(now);
        Ok(())
    }

    fn mark_tracker_last_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let tracker = c
            .trackers
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("federated tracker {}", key)))?;
        tracker.last_seen = Some(now);
        Ok(())
    }

    fn clear_federated_trackers(&self) -> StoreResult<()> {
        self.inner.lock().trackers.clear();
        Ok(())
    }

    fn create_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let key = server.key();
        let servers = c.federated.entry(key.tracker.clone()).or_default();
        if servers.contains_key(&key.server) {
            return Err(StoreError::Duplicate(format!("federated server {}", key)));
        }
        servers.insert(key.server, server.clone());
        Ok(())
    }

    fn update_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        let mut c = self.inner.lock();
        let key = server.key();
        let existing = c
            .federated
            .get_mut(&key.tracker)
            .and_then(|servers| servers.get_mut(&key.server))
            .ok_or_else(|| StoreError::NotFound(format!("federated server {}", key)))?;
        let first_seen = existing.first_seen;
        *existing = server.clone();
        existing.first_seen = first_seen;
        Ok(())
    }

    fn get_federated_server(
        &self,
        key: &FederatedServerKey,
    ) -> StoreResult<Option<FederatedServer>> {
        Ok(self
            .inner
            .lock()
            .federated
            .get(&key.tracker)
            .and_then(|servers| servers.get(&key.server))
            .cloned())
    }

    fn list_federated_servers(&self, tracker: &HostPort) -> StoreResult<Vec<FederatedServer>> {
        let mut servers: Vec<FederatedServer> = self
            .inner
            .lock()
            .federated
            .get(tracker)
            .map(|servers| servers.values().cloned().collect())
            .unwrap_or_default();
        servers.sort_by(|a, b| {
            a.server_order
                .cmp(&b.server_order)
                .then_with(|| a.host.cmp(&b.host))
                .then_with(|| a.port.cmp(&b.port))
        });
        Ok(servers)
    }

    fn upsert_federated_server(
        &self,
        tracker: &HostPort,
        sighting: Sighting,
        order: u16,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        let mut c = self.inner.lock();
        let servers = c.federated.entry(tracker.clone()).or_default();
        let server_key = HostPort::new(sighting.host.clone(), sighting.port);

        match servers.get_mut(&server_key) {
            Some(existing) => {
                let first_seen = existing.first_seen;
                *existing = sighting.into_server(tracker, order, first_seen, now);
                Ok(Upsert::Updated)
            }
            None => {
                servers.insert(server_key, sighting.into_server(tracker, order, now, now));
                Ok(Upsert::Created)
            }
        }
    }

    fn remove_expired_federated_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FederatedServer>> {
        let mut c = self.inner.lock();
        let mut removed = Vec::new();
        for servers in c.federated.values_mut() {
            let expired: Vec<HostPort> = servers
                .iter()
                .filter(|(_, s)| s.is_expired(max_age, now))
                .map(|(k, _)| k.clone())
                .collect();
            removed.extend(expired.iter().filter_map(|k| servers.remove(k)));
        }
        c.federated.retain(|_, servers| !servers.is_empty());
        Ok(removed)
    }
}
