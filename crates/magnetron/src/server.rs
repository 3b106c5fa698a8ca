// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracker core implementation.

use crate::config::{ConfigError, PasswordConfig, TrackerConfig};
use crate::password::PasswordSet;
use crate::registry::{Registry, RegistryError};
use crate::store::RegistryStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub mod federation;
pub mod listing;
pub mod registration;
pub mod sweeper;

/// Hotline tracker: listing, registration, federation and expiration services
/// over one shared registry.
pub struct Tracker {
    config: Arc<TrackerConfig>,
    registry: Registry,
    passwords: Option<Arc<PasswordSet>>,
    listener: Arc<TcpListener>,
    socket: Arc<UdpSocket>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Tracker {
    /// Validate `config`, load passwords, seed the registry and bind both sockets.
    pub async fn from_config(
        config: TrackerConfig,
        store: Arc<dyn RegistryStore>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let passwords = match (&config.password_file, config.enable_passwords) {
            (Some(path), true) => {
                let file = PasswordConfig::from_file(path)?;
                file.validate()?;
                let set = PasswordSet::from_config(&file);
                info!("Loaded {} registration passwords", set.len());
                Some(set)
            }
            _ => None,
        };

        let registry = Registry::from_config(store, &config)?;
        Self::bind(config, registry, passwords).await
    }

    /// Bind the TCP listener and UDP socket. Failure to bind either is fatal.
    pub async fn bind(
        config: TrackerConfig,
        registry: Registry,
        passwords: Option<PasswordSet>,
    ) -> Result<Self, ServerError> {
        let client_addr = config.client_addr()?;
        let listener = TcpListener::bind(client_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: client_addr,
                source,
            })?;

        let server_addr = config.server_addr()?;
        let socket = UdpSocket::bind(server_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: server_addr,
                source,
            })?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            passwords: passwords.map(Arc::new),
            listener: Arc::new(listener),
            socket: Arc::new(socket),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Address of the client listing service.
    pub fn client_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the registration service.
    pub fn server_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token that stops every service when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal the tracker to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check if the tracker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run every service until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        info!("Listing service on {}", self.client_addr()?);
        info!("Registration service on {}", self.server_addr()?);

        let fed = &self.config.tracker_federation;
        let mut services = JoinSet::new();

        services.spawn(listing::serve(
            self.listener.clone(),
            self.registry.clone(),
            self.config.strict_header,
            self.shutdown.clone(),
        ));

        services.spawn(registration::serve(
            self.socket.clone(),
            self.registry.clone(),
            self.passwords.clone(),
            self.shutdown.clone(),
        ));

        services.spawn(sweeper::run(
            self.registry.clone(),
            sweeper::SweepSettings {
                interval: self.config.sweep_interval(),
                server_expiration: self.config.server_expiration(),
                federated_expiration: fed.enabled.then(|| fed.expiration()),
            },
            self.shutdown.clone(),
        ));

        if fed.enabled {
            services.spawn(federation::run(
                self.registry.clone(),
                federation::PollSettings {
                    frequency: fed.poll_frequency(),
                    timeout: fed.poll_timeout(),
                    strict_header: self.config.strict_header,
                },
                self.shutdown.clone(),
            ));
        }

        while let Some(result) = services.join_next().await {
            if let Err(e) = result {
                error!("Service task failed: {}", e);
            }
        }

        info!("Tracker stopped");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker already running")]
    AlreadyRunning,
}
