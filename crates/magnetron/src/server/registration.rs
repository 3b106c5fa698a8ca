// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP registration service.

use crate::password::PasswordSet;
use crate::protocol::ServerRegistration;
use crate::registry::Registry;
use crate::store::Upsert;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receive buffer size; larger datagrams are truncated by the socket.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Receive registrations until `shutdown` is cancelled.
///
/// Password checks and store writes run on the blocking pool, one datagram
/// at a time in arrival order.
pub async fn serve(
    socket: Arc<UdpSocket>,
    registry: Registry,
    passwords: Option<Arc<PasswordSet>>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, source)) => {
                        let data = buf[..len].to_vec();
                        let registry = registry.clone();
                        let passwords = passwords.clone();
                        let handled = tokio::task::spawn_blocking(move || {
                            handle_datagram(
                                &data,
                                source,
                                &registry,
                                passwords.as_deref(),
                                Utc::now(),
                            )
                        })
                        .await;
                        if let Err(e) = handled {
                            warn!("Registration task from {} failed: {}", source, e);
                        }
                    }
                    Err(e) => {
                        warn!("UDP receive error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Registration service shutting down");
                break;
            }
        }
    }
}

/// Process one datagram. Returns `None` when it was dropped.
pub fn handle_datagram(
    data: &[u8],
    source: SocketAddr,
    registry: &Registry,
    passwords: Option<&PasswordSet>,
    now: DateTime<Utc>,
) -> Option<Upsert> {
    let Some(host) = source_ipv4(source) else {
        warn!("Dropping registration from non-IPv4 source {}", source);
        return None;
    };

    let registration = match ServerRegistration::decode(data) {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Dropping malformed registration from {}: {}", source, e);
            return None;
        }
    };

    if let Some(passwords) = passwords {
        if !passwords.verify(&registration.password) {
            warn!(
                "Rejected registration for {} from {}: bad password",
                registration.name, source
            );
            return None;
        }
    }

    debug!(
        "Registration from {}: pass id {}, port {}",
        source, registration.pass_id, registration.port
    );

    match registry.register(&registration, host, now) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Failed to store registration from {}: {}", source, e);
            None
        }
    }
}

fn source_ipv4(source: SocketAddr) -> Option<Ipv4Addr> {
    match source.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}
