// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client listing service.

use crate::connection::{ConnectionError, TrackerConnection};
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How long to wait for the client's closing header.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept clients until `shutdown` is cancelled, then wait for open connections.
pub async fn serve(
    listener: Arc<TcpListener>,
    registry: Registry,
    strict_header: bool,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);

                        let conn = TrackerConnection::new(stream, peer_addr)
                            .with_strict_header(strict_header);
                        let registry = registry.clone();
                        let shutdown = shutdown.clone();

                        connections.spawn(async move {
                            tokio::select! {
                                result = handle_connection(conn, &registry) => {
                                    if let Err(e) = result {
                                        debug!("Connection error from {}: {}", peer_addr, e);
                                    }
                                }
                                _ = shutdown.cancelled() => {
                                    debug!("Connection handler shutting down: {}", peer_addr);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.cancelled() => {
                info!("Listing service shutting down");
                break;
            }
        }
    }

    while connections.join_next().await.is_some() {}
}

/// Run one listing exchange and return the number of entries sent.
///
/// A failed opening header closes the connection without a reply. The
/// listing is read from the store on the blocking pool.
pub async fn handle_connection<S>(
    mut conn: TrackerConnection<S>,
    registry: &Registry,
) -> Result<usize, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.read_header().await?;
    conn.send_header().await?;

    let entries = {
        let registry = registry.clone();
        tokio::task::spawn_blocking(move || registry.listing()).await?
    };
    conn.send_listing(&entries).await?;
    debug!("Sent {} servers to {}", entries.len(), conn.peer_addr());

    // Closing handshake; whatever the client does here is ignored.
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, conn.read_header()).await;
    let _ = conn.shutdown().await;

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Header, ServerEntry, Update};
    use crate::store::tests_common::ThreadRecordingStore;
    use crate::store::{MemoryStore, RegistryStore, StaticServer};
    use std::net::{Ipv4Addr, SocketAddr};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn registry_with(names: &[&str]) -> Registry {
        let store = Arc::new(MemoryStore::new());
        for (i, name) in names.iter().enumerate() {
            store
                .create_static_server(&StaticServer {
                    host: format!("10.0.0.{}", i + 1),
                    port: 5500,
                    name: name.to_string(),
                    description: String::new(),
                    user_count: 3,
                    server_order: i as u16,
                })
                .unwrap();
        }
        Registry::new(store)
    }

    #[tokio::test]
    async fn test_listing_exchange() {
        let (server_side, client_side) = duplex(4096);
        let registry = registry_with(&["One", "Two"]);

        let server = tokio::spawn(async move {
            handle_connection(TrackerConnection::new(server_side, peer()), &registry).await
        });

        let mut client = TrackerConnection::new(client_side, peer());
        client.send_header().await.unwrap();
        assert_eq!(client.read_header().await.unwrap(), Header::new());

        let update = client.read_update().await.unwrap();
        assert_eq!(update.server_count, 2);
        assert_eq!(update.server_count_dup, 2);

        let first = client.read_entry().await.unwrap();
        let second = client.read_entry().await.unwrap();
        assert_eq!(first.name, "One");
        assert_eq!(first.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(second.name, "Two");
        assert_eq!(
            update.data_size as usize,
            first.encoded_len() + second.encoded_len()
        );

        client.send_header().await.unwrap();
        assert_eq!(server.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_listing_read_off_runtime_thread() {
        let (server_side, client_side) = duplex(4096);
        let store = Arc::new(ThreadRecordingStore::default());
        let registry = Registry::new(store.clone());

        let server = tokio::spawn(async move {
            handle_connection(TrackerConnection::new(server_side, peer()), &registry).await
        });

        let mut client = TrackerConnection::new(client_side, peer());
        client.send_header().await.unwrap();
        client.read_header().await.unwrap();
        client.read_update().await.unwrap();
        client.send_header().await.unwrap();
        assert_eq!(server.await.unwrap().unwrap(), 0);

        let runtime_thread = std::thread::current().id();
        let threads = store.threads();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|t| *t != runtime_thread));
    }

    #[tokio::test]
    async fn test_short_header_gets_no_reply() {
        let (server_side, mut client_side) = duplex(4096);
        let registry = registry_with(&["One"]);

        client_side.write_all(b"HTR").await.unwrap();
        client_side.shutdown().await.unwrap();

        let result = handle_connection(TrackerConnection::new(server_side, peer()), &registry).await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));

        let mut reply = Vec::new();
        client_side.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_strict_header_rejects_foreign_magic() {
        let (server_side, mut client_side) = duplex(4096);
        let registry = registry_with(&["One"]);

        client_side.write_all(b"XXXX\x00\x01").await.unwrap();

        let conn = TrackerConnection::new(server_side, peer()).with_strict_header(true);
        let result = handle_connection(conn, &registry).await;
        assert!(matches!(result, Err(ConnectionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_missing_close_header_still_completes() {
        let (server_side, client_side) = duplex(4096);
        let registry = registry_with(&[]);

        let server = tokio::spawn(async move {
            handle_connection(TrackerConnection::new(server_side, peer()), &registry).await
        });

        let mut client = TrackerConnection::new(client_side, peer());
        client.send_header().await.unwrap();
        client.read_header().await.unwrap();
        let update = client.read_update().await.unwrap();
        assert_eq!(update, Update::for_entries(&[] as &[ServerEntry]));

        // Dropping the client ends the closing handshake with an error.
        drop(client);
        assert_eq!(server.await.unwrap().unwrap(), 0);
    }
}
