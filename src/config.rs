//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The seed is never stored in the file: the config names the env var
//! holding it, resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::finality::FinalityConfig;
use crate::engine::scanner::ScanConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub confirm: ConfirmSection,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    /// Env var that may hold the seed. Prompted for when unset.
    #[serde(default = "default_seed_env")]
    pub seed_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            seed_env: default_seed_env(),
        }
    }
}

fn default_seed_env() -> String {
    "SEEDSWEEP_SEED".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches fetched concurrently per step.
    #[serde(default = "default_parallel_batches")]
    pub parallel_batches: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallel_batches: default_parallel_batches(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}

fn default_parallel_batches() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfirmSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up after this many unconfirmed polls. Unbounded when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ConfirmSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Parameters for the in-process sandbox ledger.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Balances placed on the seed's addresses at startup.
    #[serde(default)]
    pub funded: Vec<FundedAddress>,
    /// Indices reported as already spent from.
    #[serde(default)]
    pub spent: Vec<u64>,
    /// Inclusion polls (plus promotions) a bundle needs before it confirms.
    #[serde(default = "default_inclusion_after_polls")]
    pub inclusion_after_polls: u32,
    /// Polls a tail stays promotable before it needs a reattachment.
    #[serde(default = "default_promotable_polls")]
    pub promotable_polls: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            funded: Vec::new(),
            spent: Vec::new(),
            inclusion_after_polls: default_inclusion_after_polls(),
            promotable_polls: default_promotable_polls(),
        }
    }
}

fn default_inclusion_after_polls() -> u32 {
    4
}

fn default_promotable_polls() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FundedAddress {
    pub index: u64,
    pub balance: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            batch_size: self.scan.batch_size,
            parallel_batches: self.scan.parallel_batches,
        }
    }

    pub fn finality_config(&self) -> FinalityConfig {
        FinalityConfig {
            poll_interval: Duration::from_millis(self.confirm.poll_interval_ms),
            max_attempts: self.confirm.max_attempts,
        }
    }
}
