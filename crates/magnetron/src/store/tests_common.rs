// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Behaviour every `RegistryStore` backend must share.

use super::*;
use chrono::{Duration as ChronoDuration, Utc};

fn registration(pass_id: u32, host: &str, name: &str) -> Registration {
    Registration {
        pass_id,
        host: host.into(),
        port: 5500,
        name: name.into(),
        description: format!("{} description", name),
        user_count: 1,
    }
}

fn sighting(host: &str, port: u16, name: &str) -> Sighting {
    Sighting {
        host: host.into(),
        port,
        name: name.into(),
        description: String::new(),
        user_count: 0,
    }
}

fn tracker(host: &str, order: u16) -> FederatedTracker {
    FederatedTracker {
        host: host.into(),
        port: 5498,
        name: format!("tracker {}", order),
        description: String::new(),
        user_count: 0,
        first_seen: None,
        last_seen: None,
        tracker_order: order,
    }
}

pub fn static_servers(store: &dyn RegistryStore) {
    for (order, host) in ["10.0.0.3", "10.0.0.1", "10.0.0.2"].iter().enumerate() {
        store
            .create_static_server(&StaticServer {
                host: host.to_string(),
                port: 5500,
                name: format!("static {}", order),
                description: String::new(),
                user_count: 0,
                server_order: order as u16,
            })
            .unwrap();
    }

    let dup = store.create_static_server(&StaticServer {
        host: "10.0.0.1".into(),
        port: 5500,
        name: "again".into(),
        description: String::new(),
        user_count: 0,
        server_order: 9,
    });
    assert!(matches!(dup, Err(StoreError::Duplicate(_))));

    let hosts: Vec<String> = store
        .list_static_servers()
        .unwrap()
        .into_iter()
        .map(|s| s.host)
        .collect();
    assert_eq!(hosts, vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);

    let found = store
        .get_static_server(&HostPort::new("10.0.0.2", 5500))
        .unwrap()
        .unwrap();
    assert_eq!(found.server_order, 2);

    store.clear_static_servers().unwrap();
    assert!(store.list_static_servers().unwrap().is_empty());
}

pub fn registered_upsert_keeps_first_seen(store: &dyn RegistryStore) {
    let t1 = Utc::now();
    let t2 = t1 + ChronoDuration::seconds(30);

    let first = store
        .upsert_registered_server(registration(42, "10.0.0.1", "Bob"), t1)
        .unwrap();
    assert_eq!(first, Upsert::Created);

    let second = store
        .upsert_registered_server(registration(42, "10.0.0.2", "Bob renamed"), t2)
        .unwrap();
    assert_eq!(second, Upsert::Updated);

    let server = store.get_registered_server(42).unwrap().unwrap();
    assert_eq!(server.host, "10.0.0.2");
    assert_eq!(server.name, "Bob renamed");
    assert_eq!(server.first_seen.timestamp_millis(), t1.timestamp_millis());
    assert_eq!(server.last_seen.timestamp_millis(), t2.timestamp_millis());
    assert_eq!(store.list_registered_servers().unwrap().len(), 1);
}

pub fn registered_create_update_delete(store: &dyn RegistryStore) {
    let now = Utc::now();
    let mut server = registration(1, "10.0.0.1", "One").into_server(now, now);
    store.create_registered_server(&server).unwrap();
    assert!(matches!(
        store.create_registered_server(&server),
        Err(StoreError::Duplicate(_))
    ));

    server.user_count = 12;
    server.last_seen = now + ChronoDuration::seconds(5);
    server.first_seen = now + ChronoDuration::seconds(5);
    store.update_registered_server(&server).unwrap();

    let stored = store.get_registered_server(1).unwrap().unwrap();
    assert_eq!(stored.user_count, 12);
    assert_eq!(stored.first_seen.timestamp_millis(), now.timestamp_millis());

    let missing = registration(2, "10.0.0.2", "Two").into_server(now, now);
    assert!(matches!(
        store.update_registered_server(&missing),
        Err(StoreError::NotFound(_))
    ));

    assert!(store.delete_registered_server(1).unwrap());
    assert!(!store.delete_registered_server(1).unwrap());
    assert!(store.get_registered_server(1).unwrap().is_none());
}

pub fn registered_expiration(store: &dyn RegistryStore) {
    let now = Utc::now();
    store
        .upsert_registered_server(
            registration(1, "10.0.0.1", "stale"),
            now - ChronoDuration::seconds(600),
        )
        .unwrap();
    store
        .upsert_registered_server(
            registration(2, "10.0.0.2", "fresh"),
            now - ChronoDuration::seconds(10),
        )
        .unwrap();

    let removed = store
        .remove_expired_registered_servers(std::time::Duration::from_secs(300), now)
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].pass_id, 1);

    let left: Vec<u32> = store
        .list_registered_servers()
        .unwrap()
        .iter()
        .map(|s| s.pass_id)
        .collect();
    assert_eq!(left, vec![2]);
}

pub fn federated_trackers(store: &dyn RegistryStore) {
    store.create_federated_tracker(&tracker("10.0.1.2", 1)).unwrap();
    store.create_federated_tracker(&tracker("10.0.1.1", 0)).unwrap();
    assert!(matches!(
        store.create_federated_tracker(&tracker("10.0.1.1", 5)),
        Err(StoreError::Duplicate(_))
    ));

    let order: Vec<u16> = store
        .list_federated_trackers()
        .unwrap()
        .iter()
        .map(|t| t.tracker_order)
        .collect();
    assert_eq!(order, vec![0, 1]);

    let key = HostPort::new("10.0.1.1", 5498);
    let t1 = Utc::now();
    let t2 = t1 + ChronoDuration::seconds(60);
    store.mark_tracker_first_seen(&key, t1).unwrap();
    store.mark_tracker_first_seen(&key, t2).unwrap();
    store.mark_tracker_last_seen(&key, t2).unwrap();

    let t = store.get_federated_tracker(&key).unwrap().unwrap();
    assert_eq!(t.first_seen.map(|t| t.timestamp_millis()), Some(t1.timestamp_millis()));
    assert_eq!(t.last_seen.map(|t| t.timestamp_millis()), Some(t2.timestamp_millis()));

    assert!(matches!(
        store.mark_tracker_last_seen(&HostPort::new("10.9.9.9", 1), t2),
        Err(StoreError::NotFound(_))
    ));

    store.clear_federated_trackers().unwrap();
    assert!(store.list_federated_trackers().unwrap().is_empty());
}

pub fn federated_servers_scoped_by_tracker(store: &dyn RegistryStore) {
    let a = HostPort::new("10.0.1.1", 5498);
    let b = HostPort::new("10.0.1.2", 5498);
    let t1 = Utc::now();
    let t2 = t1 + ChronoDuration::seconds(60);

    assert_eq!(
        store
            .upsert_federated_server(&a, sighting("10.0.0.1", 5500, "shared"), 1, t1)
            .unwrap(),
        Upsert::Created
    );
    store
        .upsert_federated_server(&a, sighting("10.0.0.7", 5500, "first"), 0, t1)
        .unwrap();
    store
        .upsert_federated_server(&b, sighting("10.0.0.1", 5500, "shared"), 0, t1)
        .unwrap();

    let names: Vec<String> = store
        .list_federated_servers(&a)
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["first", "shared"]);
    assert_eq!(store.list_federated_servers(&b).unwrap().len(), 1);

    assert_eq!(
        store
            .upsert_federated_server(&a, sighting("10.0.0.1", 5500, "renamed"), 0, t2)
            .unwrap(),
        Upsert::Updated
    );
    let key = FederatedServerKey {
        tracker: a.clone(),
        server: HostPort::new("10.0.0.1", 5500),
    };
    let server = store.get_federated_server(&key).unwrap().unwrap();
    assert_eq!(server.name, "renamed");
    assert_eq!(server.server_order, 0);
    assert_eq!(server.first_seen.timestamp_millis(), t1.timestamp_millis());
    assert_eq!(server.last_seen.timestamp_millis(), t2.timestamp_millis());

    // The same server under tracker b is untouched.
    let other = store
        .get_federated_server(&FederatedServerKey {
            tracker: b.clone(),
            server: HostPort::new("10.0.0.1", 5500),
        })
        .unwrap()
        .unwrap();
    assert_eq!(other.name, "shared");

    let mut manual = server.clone();
    manual.host = "10.0.0.99".into();
    store.create_federated_server(&manual).unwrap();
    assert!(matches!(
        store.create_federated_server(&manual),
        Err(StoreError::Duplicate(_))
    ));
    manual.user_count = 77;
    store.update_federated_server(&manual).unwrap();
    assert_eq!(
        store
            .get_federated_server(&manual.key())
            .unwrap()
            .unwrap()
            .user_count,
        77
    );
}

pub fn federated_expiration(store: &dyn RegistryStore) {
    let a = HostPort::new("10.0.1.1", 5498);
    let now = Utc::now();
    store
        .upsert_federated_server(
            &a,
            sighting("10.0.0.1", 5500, "old"),
            0,
            now - ChronoDuration::seconds(3600),
        )
        .unwrap();
    store
        .upsert_federated_server(&a, sighting("10.0.0.2", 5500, "new"), 1, now)
        .unwrap();

    let removed = store
        .remove_expired_federated_servers(std::time::Duration::from_secs(900), now)
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].name, "old");
    assert_eq!(store.list_federated_servers(&a).unwrap().len(), 1);
}

/// Memory store that remembers which threads read the static collection
/// or upserted a registration.
#[derive(Default)]
pub struct ThreadRecordingStore {
    inner: MemoryStore,
    threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
}

impl ThreadRecordingStore {
    pub fn threads(&self) -> Vec<std::thread::ThreadId> {
        self.threads.lock().clone()
    }

    fn record(&self) {
        self.threads.lock().push(std::thread::current().id());
    }
}

impl RegistryStore for ThreadRecordingStore {
    fn create_static_server(&self, server: &StaticServer) -> StoreResult<()> {
        self.inner.create_static_server(server)
    }

    fn get_static_server(&self, key: &HostPort) -> StoreResult<Option<StaticServer>> {
        self.inner.get_static_server(key)
    }

    fn list_static_servers(&self) -> StoreResult<Vec<StaticServer>> {
        self.record();
        self.inner.list_static_servers()
    }

    fn clear_static_servers(&self) -> StoreResult<()> {
        self.inner.clear_static_servers()
    }

    fn create_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        self.inner.create_registered_server(server)
    }

    fn update_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        self.inner.update_registered_server(server)
    }

    fn get_registered_server(&self, pass_id: u32) -> StoreResult<Option<RegisteredServer>> {
        self.inner.get_registered_server(pass_id)
    }

    fn list_registered_servers(&self) -> StoreResult<Vec<RegisteredServer>> {
        self.inner.list_registered_servers()
    }

    fn upsert_registered_server(
        &self,
        registration: Registration,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        self.record();
        self.inner.upsert_registered_server(registration, now)
    }

    fn delete_registered_server(&self, pass_id: u32) -> StoreResult<bool> {
        self.inner.delete_registered_server(pass_id)
    }

    fn remove_expired_registered_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RegisteredServer>> {
        self.inner.remove_expired_registered_servers(max_age, now)
    }

    fn create_federated_tracker(&self, tracker: &FederatedTracker) -> StoreResult<()> {
        self.inner.create_federated_tracker(tracker)
    }

    fn get_federated_tracker(&self, key: &HostPort) -> StoreResult<Option<FederatedTracker>> {
        self.inner.get_federated_tracker(key)
    }

    fn list_federated_trackers(&self) -> StoreResult<Vec<FederatedTracker>> {
        self.inner.list_federated_trackers()
    }

    fn mark_tracker_first_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        self.inner.mark_tracker_first_seen(key, now)
    }

    fn mark_tracker_last_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        self.inner.mark_tracker_last_seen(key, now)
    }

    fn clear_federated_trackers(&self) -> StoreResult<()> {
        self.inner.clear_federated_trackers()
    }

    fn create_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        self.inner.create_federated_server(server)
    }

    fn update_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        self.inner.update_federated_server(server)
    }

    fn get_federated_server(&self, key: &FederatedServerKey) -> StoreResult<Option<FederatedServer>> {
        self.inner.get_federated_server(key)
    }

    fn list_federated_servers(&self, tracker: &HostPort) -> StoreResult<Vec<FederatedServer>> {
        self.inner.list_federated_servers(tracker)
    }

    fn upsert_federated_server(
        &self,
        tracker: &HostPort,
        sighting: Sighting,
        order: u16,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        self.inner.upsert_federated_server(tracker, sighting, order, now)
    }

    fn remove_expired_federated_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FederatedServer>> {
        self.inner.remove_expired_federated_servers(max_age, now)
    }
}
