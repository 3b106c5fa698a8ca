// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Magnetron Hotline Tracker
//!
//! # Usage
//!
//! ```bash
//! # Write a starting configuration and run the tracker
//! magnetron config init tracker.yaml
//! magnetron serve tracker.yaml
//!
//! # Registration passwords
//! magnetron password init passwords.yaml
//! echo 'secret' | magnetron password hash
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use magnetron::password::DEFAULT_COST;
use magnetron::{
    hash_password, MemoryStore, PasswordConfig, PasswordSet, RegistryStore, SqliteStore, Tracker,
    TrackerConfig,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Magnetron - Hotline tracker
#[derive(Parser, Debug)]
#[command(name = "magnetron")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tracker
    Serve {
        /// Tracker configuration file (YAML or JSON)
        config: PathBuf,
    },
    /// Manage the tracker configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage registration passwords
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration
    Init {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check a configuration for errors
    Validate { path: PathBuf },
    /// Print the effective configuration, defaults included
    Show { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum PasswordAction {
    /// Write a password file; the first password is read from stdin
    Init {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check a password file for errors
    Validate { path: PathBuf },
    /// Hash a password read from stdin
    Hash {
        /// bcrypt cost
        #[arg(long, default_value_t = DEFAULT_COST)]
        cost: u32,
    },
    /// Test a password read from stdin against a password file
    Check { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(true)
        .init();

    match args.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Config { action } => config_command(action),
        Commands::Password { action } => password_command(action),
        Commands::Version => {
            println!("magnetron {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn serve(path: &Path) -> Result<()> {
    info!("Loading config from {:?}", path);
    let mut config = TrackerConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    // Relative password and database paths are relative to the config file.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.password_file = config.password_file.map(|p| base.join(p));
    config.database_path = config.database_path.map(|p| base.join(p));

    let store: Arc<dyn RegistryStore> = match &config.database_path {
        Some(db) => Arc::new(
            SqliteStore::new(db).with_context(|| format!("failed to open {}", db.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    print_banner(&config);

    let tracker = Arc::new(Tracker::from_config(config, store).await?);

    // Handle shutdown signals
    let token = tracker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping tracker...");
        token.cancel();
    });

    tracker.run().await?;
    Ok(())
}

fn print_banner(config: &TrackerConfig) {
    let fed = &config.tracker_federation;
    let on_off = |on: bool| if on { "enabled" } else { "disabled" };

    info!("+----------------------------------------------------+");
    info!(
        "|       Magnetron Hotline Tracker v{:18}|",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Clients:    {:37} |", config.client_host);
    info!("|  Servers:    {:37} |", config.server_host);
    info!(
        "|  Expiry:     {:37} |",
        format!("{}s", config.server_expiration_secs)
    );
    info!("|  Passwords:  {:37} |", on_off(config.enable_passwords));
    info!(
        "|  Store:      {:37} |",
        config
            .database_path
            .as_ref()
            .map_or("memory".to_string(), |p| p.display().to_string())
    );
    info!("|  Static:     {:37} |", config.static_entries.len());
    info!(
        "|  Federation: {:37} |",
        if fed.enabled {
            format!("{} trackers", fed.tracker_entries.len())
        } else {
            on_off(false).to_string()
        }
    );
    info!("+----------------------------------------------------+");
}

fn config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { path, force } => {
            refuse_overwrite(&path, force)?;
            TrackerConfig::default().to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Validate { path } => {
            let config = TrackerConfig::from_file(&path)?;
            config.validate()?;
            println!("{} is valid", path.display());
        }
        ConfigAction::Show { path } => {
            let config = TrackerConfig::from_file(&path)?;
            print!("{}", config.to_yaml()?);
        }
    }
    Ok(())
}

fn password_command(action: PasswordAction) -> Result<()> {
    match action {
        PasswordAction::Init { path, force } => {
            refuse_overwrite(&path, force)?;
            let plaintext = read_stdin_line()?;
            let config = PasswordConfig {
                password_entries: vec![magnetron::config::PasswordEntry {
                    name: "Default".into(),
                    description: "Initial registration password".into(),
                    password: hash_password(&plaintext, DEFAULT_COST)?,
                }],
            };
            config.to_file(&path)?;
            println!("Wrote password file to {}", path.display());
        }
        PasswordAction::Validate { path } => {
            let config = PasswordConfig::from_file(&path)?;
            config.validate()?;
            println!(
                "{} is valid ({} entries)",
                path.display(),
                config.password_entries.len()
            );
        }
        PasswordAction::Hash { cost } => {
            let plaintext = read_stdin_line()?;
            println!("{}", hash_password(&plaintext, cost)?);
        }
        PasswordAction::Check { path } => {
            let config = PasswordConfig::from_file(&path)?;
            let plaintext = read_stdin_line()?;
            if PasswordSet::from_config(&config).verify(&plaintext) {
                println!("Password accepted");
            } else {
                bail!("password does not match any entry in {}", path.display());
            }
        }
    }
    Ok(())
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(())
}

fn read_stdin_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if line.is_empty() {
        bail!("no password given on stdin");
    }
    Ok(line)
}
