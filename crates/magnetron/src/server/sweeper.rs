// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Expiration sweeper.

use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: Duration,
    pub server_expiration: Duration,
    /// `None` when federation is disabled.
    pub federated_expiration: Option<Duration>,
}

/// Sweep every `settings.interval` until `shutdown` is cancelled.
pub async fn run(registry: Registry, settings: SweepSettings, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, &settings, Utc::now());
            }
            _ = shutdown.cancelled() => {
                debug!("Sweeper shutting down");
                break;
            }
        }
    }
}

/// Remove stale rows once. Returns the number of rows removed.
pub fn sweep(registry: &Registry, settings: &SweepSettings, now: DateTime<Utc>) -> usize {
    let mut removed = 0;

    match registry.expire_registered(settings.server_expiration, now) {
        Ok(expired) => removed += expired.len(),
        Err(e) => warn!("Failed to expire registered servers: {}", e),
    }

    if let Some(max_age) = settings.federated_expiration {
        match registry.expire_federated(max_age, now) {
            Ok(expired) => removed += expired.len(),
            Err(e) => warn!("Failed to expire federated servers: {}", e),
        }
    }

    if removed > 0 {
        info!("Removed {} expired servers", removed);
    }
    removed
}
