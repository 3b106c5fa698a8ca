// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration password checking.

use crate::config::PasswordConfig;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// Cost used when hashing new passwords.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a plaintext password for the password configuration file.
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, PasswordError> {
    Ok(bcrypt::hash(plaintext, cost)?)
}

/// The set of accepted password hashes.
#[derive(Debug, Clone, Default)]
pub struct PasswordSet {
    hashes: Vec<String>,
}

impl PasswordSet {
    pub fn new(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }

    pub fn from_config(config: &PasswordConfig) -> Self {
        Self::new(config.password_entries.iter().map(|e| e.password.clone()))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Returns true if `plaintext` matches any accepted hash.
    pub fn verify(&self, plaintext: &str) -> bool {
        self.hashes
            .iter()
            .any(|hash| match bcrypt::verify(plaintext, hash) {
                Ok(matched) => matched,
                Err(e) => {
                    debug!("Skipping malformed password hash: {}", e);
                    false
                }
            })
    }
}
