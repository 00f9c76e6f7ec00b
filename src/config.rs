//! Configuration loader using Figment for layered config merging.
//!
//! Merge order (later overrides earlier): compiled defaults, a TOML file,
//! then `RECYCLE_*` environment variables for the scalar settings.

#![allow(clippy::result_large_err)] // figment::Error is external and large

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{CatalogError, StatsTable, WasteTypeRule, default_rules};
use crate::machine::Machine;
use crate::model::MachineId;

/// Default local config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "recycle-ledger.toml";

const CLAIM_CODE_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 4..=32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid waste type in configuration: {0}")]
    Catalog(#[from] CatalogError),
    #[error("machine {0} is configured more than once")]
    DuplicateMachine(MachineId),
}

/// Top-level ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Upper bound on waiting for the ledger store, in milliseconds.
    pub store_timeout_ms: u64,
    pub redemption_ttl_days: i64,
    pub claim_code_length: usize,
    /// Prefix of the payload encoded in the kiosk's scannable code.
    pub claim_uri_prefix: String,
    pub redemption_code_attempts: u32,
    /// Waste-type → statistic bucket and grams-per-unit table.
    pub stats: StatsTable,
    /// Seed pricing rules.
    pub waste_types: Vec<WasteTypeRule>,
    /// Seed machines.
    pub machines: Vec<Machine>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 2_000,
            redemption_ttl_days: 30,
            claim_code_length: 8,
            claim_uri_prefix: "recycle://claim/".to_string(),
            redemption_code_attempts: 8,
            stats: StatsTable::default(),
            waste_types: default_rules(),
            machines: Vec::new(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be > 0".into()));
        }
        if self.redemption_ttl_days <= 0 {
            return Err(ConfigError::Invalid(
                "redemption_ttl_days must be > 0".into(),
            ));
        }
        if !CLAIM_CODE_LENGTH_RANGE.contains(&self.claim_code_length) {
            return Err(ConfigError::Invalid(format!(
                "claim_code_length must be within {}..={}",
                CLAIM_CODE_LENGTH_RANGE.start(),
                CLAIM_CODE_LENGTH_RANGE.end()
            )));
        }
        if self.redemption_code_attempts == 0 {
            return Err(ConfigError::Invalid(
                "redemption_code_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            redemption_ttl: chrono::Duration::days(self.redemption_ttl_days),
            claim_code_length: self.claim_code_length,
            claim_uri_prefix: self.claim_uri_prefix.clone(),
            redemption_code_attempts: self.redemption_code_attempts,
        }
    }
}

/// Runtime knobs the ledger reads on every operation.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub store_timeout: Duration,
    pub redemption_ttl: chrono::Duration,
    pub claim_code_length: usize,
    pub claim_uri_prefix: String,
    pub redemption_code_attempts: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerConfig::default().settings()
    }
}

/// Load configuration from `./recycle-ledger.toml` (if present) with env overrides.
pub fn load_config() -> Result<LedgerConfig, ConfigError> {
    load_config_from_path(Path::new(DEFAULT_CONFIG_FILE))
}

/// Load configuration from a TOML file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<LedgerConfig, ConfigError> {
    let config: LedgerConfig = Figment::new()
        .merge(Serialized::defaults(LedgerConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML string only (no file or env lookup).
pub fn load_config_from_str(toml_content: &str) -> Result<LedgerConfig, ConfigError> {
    let config: LedgerConfig = Figment::new()
        .merge(Serialized::defaults(LedgerConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Only scalar settings are overridable from the environment; tables
/// (stats, waste types, machines) come from files.
fn env_provider() -> Env {
    Env::prefixed("RECYCLE_").only(&[
        "store_timeout_ms",
        "redemption_ttl_days",
        "claim_code_length",
        "claim_uri_prefix",
        "redemption_code_attempts",
    ])
}
