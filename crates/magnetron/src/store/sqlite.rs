// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite registry store
//!
//! Keeps the four collections in a SQLite database so that registrations and
//! federated listings survive a restart.
//!
//! Thread-safe via internal Mutex (SQLite Connection is not Sync).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE static_servers (host, port, name, description, user_count, server_order,
//!                              PRIMARY KEY (host, port));
//! CREATE TABLE registered_servers (pass_id PRIMARY KEY, host, port, name, description,
//!                                  user_count, first_seen_ms, last_seen_ms);
//! CREATE TABLE federated_trackers (host, port, name, description, user_count,
//!                                  first_seen_ms, last_seen_ms, tracker_order,
//!                                  PRIMARY KEY (host, port));
//! CREATE TABLE federated_servers (tracker_host, tracker_port, host, port, name, description,
//!                                 user_count, server_order, first_seen_ms, last_seen_ms,
//!                                 PRIMARY KEY (tracker_host, tracker_port, host, port));
//! ```

use super::{
    FederatedServer, FederatedServerKey, FederatedTracker, HostPort, Registration,
    RegisteredServer, RegistryStore, Sighting, StaticServer, StoreError, StoreResult, Upsert,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS static_servers (
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        user_count INTEGER NOT NULL,
        server_order INTEGER NOT NULL,
        PRIMARY KEY (host, port)
    )",
    "CREATE INDEX IF NOT EXISTS idx_static_order ON static_servers(server_order)",
    "CREATE TABLE IF NOT EXISTS registered_servers (
        pass_id INTEGER PRIMARY KEY,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        user_count INTEGER NOT NULL,
        first_seen_ms INTEGER NOT NULL,
        last_seen_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_registered_last_seen ON registered_servers(last_seen_ms)",
    "CREATE TABLE IF NOT EXISTS federated_trackers (
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        user_count INTEGER NOT NULL,
        first_seen_ms INTEGER,
        last_seen_ms INTEGER,
        tracker_order INTEGER NOT NULL,
        PRIMARY KEY (host, port)
    )",
    "CREATE INDEX IF NOT EXISTS idx_tracker_order ON federated_trackers(tracker_order)",
    "CREATE TABLE IF NOT EXISTS federated_servers (
        tracker_host TEXT NOT NULL,
        tracker_port INTEGER NOT NULL,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        user_count INTEGER NOT NULL,
        server_order INTEGER NOT NULL,
        first_seen_ms INTEGER NOT NULL,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (tracker_host, tracker_port, host, port)
    )",
    "CREATE INDEX IF NOT EXISTS idx_federated_order
        ON federated_servers(tracker_host, tracker_port, server_order)",
    "CREATE INDEX IF NOT EXISTS idx_federated_last_seen ON federated_servers(last_seen_ms)",
];

const REGISTERED_COLUMNS: &str =
    "pass_id, host, port, name, description, user_count, first_seen_ms, last_seen_ms";

const FEDERATED_COLUMNS: &str = "tracker_host, tracker_port, host, port, name, description, \
                                 user_count, server_order, first_seen_ms, last_seen_ms";

/// SQLite registry store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create tables and indices for all four collections.
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        for statement in SCHEMA {
            conn.execute(statement, [])?;
        }
        Ok(())
    }

    fn row_to_registered(row: &rusqlite::Row) -> rusqlite::Result<RegisteredServer> {
        Ok(RegisteredServer {
            pass_id: row.get::<_, i64>(0)? as u32,
            host: row.get(1)?,
            port: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            user_count: row.get(5)?,
            first_seen: from_millis(row.get(6)?),
            last_seen: from_millis(row.get(7)?),
        })
    }

    fn row_to_tracker(row: &rusqlite::Row) -> rusqlite::Result<FederatedTracker> {
        Ok(FederatedTracker {
            host: row.get(0)?,
            port: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            user_count: row.get(4)?,
            first_seen: row.get::<_, Option<i64>>(5)?.map(from_millis),
            last_seen: row.get::<_, Option<i64>>(6)?.map(from_millis),
            tracker_order: row.get(7)?,
        })
    }

    fn row_to_federated(row: &rusqlite::Row) -> rusqlite::Result<FederatedServer> {
        Ok(FederatedServer {
            tracker_host: row.get(0)?,
            tracker_port: row.get(1)?,
            host: row.get(2)?,
            port: row.get(3)?,
            name: row.get(4)?,
            description: row.get(5)?,
            user_count: row.get(6)?,
            server_order: row.get(7)?,
            first_seen: from_millis(row.get(8)?),
            last_seen: from_millis(row.get(9)?),
        })
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn cutoff_millis(max_age: Duration, now: DateTime<Utc>) -> i64 {
    let age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    to_millis(now).saturating_sub(age_ms)
}

fn duplicate_or(err: rusqlite::Error, what: String) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(what)
        }
        other => StoreError::Sqlite(other),
    }
}

impl RegistryStore for SqliteStore {
    fn create_static_server(&self, server: &StaticServer) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO static_servers (host, port, name, description, user_count, server_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                server.host,
                server.port,
                server.name,
                server.description,
                server.user_count,
                server.server_order,
            ],
        )
        .map_err(|e| duplicate_or(e, format!("static server {}", server.key())))?;
        Ok(())
    }

    fn get_static_server(&self, key: &HostPort) -> StoreResult<Option<StaticServer>> {
        let conn = self.conn.lock();
        let server = conn
            .query_row(
                "SELECT host, port, name, description, user_count, server_order
                 FROM static_servers WHERE host = ?1 AND port = ?2",
                params![key.host, key.port],
                |row| {
                    Ok(StaticServer {
                        host: row.get(0)?,
                        port: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        user_count: row.get(4)?,
                        server_order: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(server)
    }

    fn list_static_servers(&self) -> StoreResult<Vec<StaticServer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT host, port, name, description, user_count, server_order
             FROM static_servers
             ORDER BY server_order ASC, host ASC, port ASC",
        )?;
        let servers = stmt
            .query_map([], |row| {
                Ok(StaticServer {
                    host: row.get(0)?,
                    port: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    user_count: row.get(4)?,
                    server_order: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(servers)
    }

    fn clear_static_servers(&self) -> StoreResult<()> {
        self.conn.lock().execute("DELETE FROM static_servers", [])?;
        Ok(())
    }

    fn create_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO registered_servers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                REGISTERED_COLUMNS
            ),
            params![
                i64::from(server.pass_id),
                server.host,
                server.port,
                server.name,
                server.description,
                server.user_count,
                to_millis(server.first_seen),
                to_millis(server.last_seen),
            ],
        )
        .map_err(|e| duplicate_or(e, format!("registered server {}", server.pass_id)))?;
        Ok(())
    }

    fn update_registered_server(&self, server: &RegisteredServer) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE registered_servers
             SET host = ?2, port = ?3, name = ?4, description = ?5, user_count = ?6,
                 last_seen_ms = ?7
             WHERE pass_id = ?1",
            params![
                i64::from(server.pass_id),
                server.host,
                server.port,
                server.name,
                server.description,
                server.user_count,
                to_millis(server.last_seen),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "registered server {}",
                server.pass_id
            )));
        }
        Ok(())
    }

    fn get_registered_server(&self, pass_id: u32) -> StoreResult<Option<RegisteredServer>> {
        let conn = self.conn.lock();
        let server = conn
            .query_row(
                &format!(
                    "SELECT {} FROM registered_servers WHERE pass_id = ?1",
                    REGISTERED_COLUMNS
                ),
                [i64::from(pass_id)],
                Self::row_to_registered,
            )
            .optional()?;
        Ok(server)
    }

    fn list_registered_servers(&self) -> StoreResult<Vec<RegisteredServer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM registered_servers ORDER BY first_seen_ms ASC, pass_id ASC",
            REGISTERED_COLUMNS
        ))?;
        let servers = stmt
            .query_map([], Self::row_to_registered)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(servers)
    }

    fn upsert_registered_server(
        &self,
        registration: Registration,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM registered_servers WHERE pass_id = ?1",
                [i64::from(registration.pass_id)],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let now_ms = to_millis(now);
        tx.execute(
            &format!(
                "INSERT INTO registered_servers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(pass_id) DO UPDATE SET
                     host = excluded.host,
                     port = excluded.port,
                     name = excluded.name,
                     description = excluded.description,
                     user_count = excluded.user_count,
                     last_seen_ms = excluded.last_seen_ms",
                REGISTERED_COLUMNS
            ),
            params![
                i64::from(registration.pass_id),
                registration.host,
                registration.port,
                registration.name,
                registration.description,
                registration.user_count,
                now_ms,
            ],
        )?;
        tx.commit()?;

        Ok(if exists {
            Upsert::Updated
        } else {
            Upsert::Created
        })
    }

    fn delete_registered_server(&self, pass_id: u32) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM registered_servers WHERE pass_id = ?1",
            [i64::from(pass_id)],
        )?;
        Ok(changed > 0)
    }

    fn remove_expired_registered_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RegisteredServer>> {
        let cutoff = cutoff_millis(max_age, now);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let expired = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM registered_servers WHERE last_seen_ms < ?1",
                REGISTERED_COLUMNS
            ))?;
            let rows = stmt
                .query_map([cutoff], Self::row_to_registered)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM registered_servers WHERE last_seen_ms < ?1",
            [cutoff],
        )?;
        tx.commit()?;
        Ok(expired)
    }

    fn create_federated_tracker(&self, tracker: &FederatedTracker) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO federated_trackers
                 (host, port, name, description, user_count, first_seen_ms, last_seen_ms,
                  tracker_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tracker.host,
                tracker.port,
                tracker.name,
                tracker.description,
                tracker.user_count,
                tracker.first_seen.map(to_millis),
                tracker.last_seen.map(to_millis),
                tracker.tracker_order,
            ],
        )
        .map_err(|e| duplicate_or(e, format!("federated tracker {}", tracker.key())))?;
        Ok(())
    }

    fn get_federated_tracker(&self, key: &HostPort) -> StoreResult<Option<FederatedTracker>> {
        let conn = self.conn.lock();
        let tracker = conn
            .query_row(
                "SELECT host, port, name, description, user_count, first_seen_ms, last_seen_ms,
                        tracker_order
                 FROM federated_trackers WHERE host = ?1 AND port = ?2",
                params![key.host, key.port],
                Self::row_to_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    fn list_federated_trackers(&self) -> StoreResult<Vec<FederatedTracker>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT host, port, name, description, user_count, first_seen_ms, last_seen_ms,
                    tracker_order
             FROM federated_trackers
             ORDER BY tracker_order ASC, host ASC, port ASC",
        )?;
        let trackers = stmt
            .query_map([], Self::row_to_tracker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trackers)
    }

    fn mark_tracker_first_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE federated_trackers SET first_seen_ms = COALESCE(first_seen_ms, ?3)
             WHERE host = ?1 AND port = ?2",
            params![key.host, key.port, to_millis(now)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("federated tracker {}", key)));
        }
        Ok(())
    }

    fn mark_tracker_last_seen(&self, key: &HostPort, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE federated_trackers SET last_seen_ms = ?3 WHERE host = ?1 AND port = ?2",
            params![key.host, key.port, to_millis(now)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("federated tracker {}", key)));
        }
        Ok(())
    }

    fn clear_federated_trackers(&self) -> StoreResult<()> {
        self.conn.lock().execute("DELETE FROM federated_trackers", [])?;
        Ok(())
    }

    fn create_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO federated_servers ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                FEDERATED_COLUMNS
            ),
            params![
                server.tracker_host,
                server.tracker_port,
                server.host,
                server.port,
                server.name,
                server.description,
                server.user_count,
                server.server_order,
                to_millis(server.first_seen),
                to_millis(server.last_seen),
            ],
        )
        .map_err(|e| duplicate_or(e, format!("federated server {}", server.key())))?;
        Ok(())
    }

    fn update_federated_server(&self, server: &FederatedServer) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE federated_servers
             SET name = ?5, description = ?6, user_count = ?7, server_order = ?8,
                 last_seen_ms = ?9
             WHERE tracker_host = ?1 AND tracker_port = ?2 AND host = ?3 AND port = ?4",
            params![
                server.tracker_host,
                server.tracker_port,
                server.host,
                server.port,
                server.name,
                server.description,
                server.user_count,
                server.server_order,
                to_millis(server.last_seen),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "federated server {}",
                server.key()
            )));
        }
        Ok(())
    }

    fn get_federated_server(
        &self,
        key: &FederatedServerKey,
    ) -> StoreResult<Option<FederatedServer>> {
        let conn = self.conn.lock();
        let server = conn
            .query_row(
                &format!(
                    "SELECT {} FROM federated_servers
                     WHERE tracker_host = ?1 AND tracker_port = ?2 AND host = ?3 AND port = ?4",
                    FEDERATED_COLUMNS
                ),
                params![key.tracker.host, key.tracker.port, key.server.host, key.server.port],
                Self::row_to_federated,
            )
            .optional()?;
        Ok(server)
    }

    fn list_federated_servers(&self, tracker: &HostPort) -> StoreResult<Vec<FederatedServer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM federated_servers
             WHERE tracker_host = ?1 AND tracker_port = ?2
             ORDER BY server_order ASC, host ASC, port ASC",
            FEDERATED_COLUMNS
        ))?;
        let servers = stmt
            .query_map(params![tracker.host, tracker.port], Self::row_to_federated)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(servers)
    }

    fn upsert_federated_server(
        &self,
        tracker: &HostPort,
        sighting: Sighting,
        order: u16,
        now: DateTime<Utc>,
    ) -> StoreResult<Upsert> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM federated_servers
                 WHERE tracker_host = ?1 AND tracker_port = ?2 AND host = ?3 AND port = ?4",
                params![tracker.host, tracker.port, sighting.host, sighting.port],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            &format!(
                "INSERT INTO federated_servers ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(tracker_host, tracker_port, host, port) DO UPDATE SET
                     name = excluded.name,
                     description = excluded.description,
                     user_count = excluded.user_count,
                     server_order = excluded.server_order,
                     last_seen_ms = excluded.last_seen_ms",
                FEDERATED_COLUMNS
            ),
            params![
                tracker.host,
                tracker.port,
                sighting.host,
                sighting.port,
                sighting.name,
                sighting.description,
                sighting.user_count,
                order,
                to_millis(now),
            ],
        )?;
        tx.commit()?;

        Ok(if exists {
            Upsert::Updated
        } else {
            Upsert::Created
        })
    }

    fn remove_expired_federated_servers(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FederatedServer>> {
        let cutoff = cutoff_millis(max_age, now);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let expired = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM federated_servers WHERE last_seen_ms < ?1",
                FEDERATED_COLUMNS
            ))?;
            let rows = stmt
                .query_map([cutoff], Self::row_to_federated)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM federated_servers WHERE last_seen_ms < ?1",
            [cutoff],
        )?;
        tx.commit()?;
        Ok(expired)
    }
}
