// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Federation poller: pulls listings from peer trackers.

use crate::connection::{ConnectionError, TrackerConnection};
use crate::registry::Registry;
use crate::store::{FederatedTracker, HostPort, Upsert};
use chrono::Utc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poller settings.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub frequency: Duration,
    /// Upper bound on one peer's poll, connect included.
    pub timeout: Duration,
    pub strict_header: bool,
}

/// Poll every peer at startup and then every `settings.frequency`.
pub async fn run(registry: Registry, settings: PollSettings, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(settings.frequency);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_all(&registry, settings, &shutdown).await;
            }
            _ = shutdown.cancelled() => {
                debug!("Federation poller shutting down");
                break;
            }
        }
    }
}

/// Run one poll cycle: every peer concurrently, each failure isolated.
///
/// Returns the number of peers polled successfully.
pub async fn poll_all(
    registry: &Registry,
    settings: PollSettings,
    shutdown: &CancellationToken,
) -> usize {
    let trackers = match registry.federated_trackers() {
        Ok(trackers) => trackers,
        Err(e) => {
            warn!("Failed to load federated trackers: {}", e);
            return 0;
        }
    };

    let mut polls = JoinSet::new();
    for tracker in trackers {
        let registry = registry.clone();
        polls.spawn(async move {
            let key = tracker.key();
            let result = poll_tracker(&registry, &tracker, settings).await;
            (key, result)
        });
    }

    let mut succeeded = 0;
    loop {
        tokio::select! {
            joined = polls.join_next() => {
                match joined {
                    Some(Ok((key, Ok(count)))) => {
                        info!("Polled {} servers from tracker {}", count, key);
                        succeeded += 1;
                    }
                    Some(Ok((key, Err(e)))) => {
                        warn!("Failed to poll tracker {}: {}", key, e);
                    }
                    Some(Err(e)) => {
                        warn!("Poll task failed: {}", e);
                    }
                    None => break,
                }
            }
            _ = shutdown.cancelled() => {
                polls.abort_all();
                while polls.join_next().await.is_some() {}
                break;
            }
        }
    }
    succeeded
}

/// Poll one peer tracker and record its listing.
pub async fn poll_tracker(
    registry: &Registry,
    tracker: &FederatedTracker,
    settings: PollSettings,
) -> Result<usize, ConnectionError> {
    let key = tracker.key();

    let count = tokio::time::timeout(settings.timeout, async {
        let stream = TcpStream::connect((tracker.host.as_str(), tracker.port)).await?;
        let peer_addr = stream.peer_addr()?;
        let mut conn =
            TrackerConnection::new(stream, peer_addr).with_strict_header(settings.strict_header);

        let result = fetch_listing(&mut conn, registry, &key).await;
        let _ = conn.shutdown().await;
        result
    })
    .await??;

    if let Err(e) = registry.mark_tracker_seen(&key, Utc::now()) {
        warn!("Failed to update tracker {}: {}", key, e);
    }
    Ok(count)
}

/// Client side of the listing exchange. Each entry is recorded as it arrives,
/// numbered by arrival order.
pub async fn fetch_listing<S>(
    conn: &mut TrackerConnection<S>,
    registry: &Registry,
    tracker: &HostPort,
) -> Result<usize, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send_header().await?;
    conn.read_header().await?;
    let update = conn.read_update().await?;

    let now = Utc::now();
    for order in 0..update.server_count {
        let entry = conn.read_entry().await?;
        match registry.record_sighting(tracker, &entry, order, now) {
            Ok(Upsert::Created) => {
                debug!("New federated server {} via {}", entry.name, tracker);
            }
            Ok(Upsert::Updated) => {}
            Err(e) => {
                warn!(
                    "Failed to record {} from tracker {}: {}",
                    entry.name, tracker, e
                );
            }
        }
    }

    Ok(update.server_count as usize)
}
