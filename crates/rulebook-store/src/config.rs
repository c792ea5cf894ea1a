//! Adapter and connection configuration.
//!
//! # Purpose
//! Collects construction-time options into explicit structs. Values come from
//! `RULEBOOK_*` environment variables, optionally overridden by a YAML file
//! named in `RULEBOOK_CONFIG`.
//!
//! # Security notes
//! - Database URLs may embed credentials; `PostgresConfig` redacts the URL in
//!   its `Debug` output and nothing here logs it.
use crate::error::{StoreError, StoreResult};
use anyhow::{Context, Result, ensure};
use rulebook_core::MatchMode;
use serde::Deserialize;
use std::fmt;
use std::fs;

pub const DEFAULT_TABLE_NAME: &str = "casbin_policies";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Longest accepted table name. Postgres truncates identifiers past 63 bytes
/// and the index names derived from the table add up to 10 bytes
/// (`idx_{table}_ptype`), so longer names could collide after truncation.
pub const MAX_TABLE_NAME_LEN: usize = 53;

/// Behavior switches for [`crate::PolicyAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Skip table bootstrap; the caller guarantees the schema exists.
    pub skip_auto_create_table: bool,
    /// Table holding the rules. Must be a plain SQL identifier.
    pub table_name: String,
    /// How single remove/update locate the row of a rule.
    pub match_mode: MatchMode,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            skip_auto_create_table: false,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            match_mode: MatchMode::default(),
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.table_name)
    }
}

/// Connection pool settings for the Postgres backend.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish()
    }
}

/// Everything needed to stand up an adapter over Postgres.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulebookConfig {
    pub adapter: AdapterConfig,
    pub postgres: PostgresConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulebookConfigOverride {
    database_url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    table_name: Option<String>,
    skip_auto_create_table: Option<bool>,
    match_mode: Option<String>,
}

impl RulebookConfig {
    pub fn from_env() -> Result<Self> {
        Self::load(|key| std::env::var(key).ok(), None)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let contents = match std::env::var("RULEBOOK_CONFIG") {
            Ok(path) => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("read RULEBOOK_CONFIG: {path}"))?,
            ),
            Err(_) => None,
        };
        Self::load(|key| std::env::var(key).ok(), contents.as_deref())
    }

    /// Build a config from a variable lookup and an optional YAML override.
    pub fn load<F>(lookup: F, yaml: Option<&str>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut postgres = PostgresConfig::new(
            lookup("RULEBOOK_DATABASE_URL")
                .or_else(|| lookup("DATABASE_URL"))
                .unwrap_or_default(),
        );
        if let Some(value) = lookup("RULEBOOK_PG_MAX_CONNECTIONS") {
            postgres.max_connections = value
                .parse()
                .with_context(|| "parse RULEBOOK_PG_MAX_CONNECTIONS")?;
        }
        if let Some(value) = lookup("RULEBOOK_PG_CONNECT_TIMEOUT_MS") {
            postgres.connect_timeout_ms = value
                .parse()
                .with_context(|| "parse RULEBOOK_PG_CONNECT_TIMEOUT_MS")?;
        }
        if let Some(value) = lookup("RULEBOOK_PG_ACQUIRE_TIMEOUT_MS") {
            postgres.acquire_timeout_ms = value
                .parse()
                .with_context(|| "parse RULEBOOK_PG_ACQUIRE_TIMEOUT_MS")?;
        }

        let mut adapter = AdapterConfig::default();
        if let Some(value) = lookup("RULEBOOK_TABLE") {
            adapter.table_name = value;
        }
        if let Some(value) = lookup("RULEBOOK_SKIP_AUTO_CREATE_TABLE") {
            adapter.skip_auto_create_table =
                parse_flag(&value).with_context(|| "parse RULEBOOK_SKIP_AUTO_CREATE_TABLE")?;
        }
        if let Some(value) = lookup("RULEBOOK_MATCH_MODE") {
            adapter.match_mode = value
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| "parse RULEBOOK_MATCH_MODE")?;
        }

        let mut config = Self { adapter, postgres };
        if let Some(contents) = yaml {
            config.apply_yaml(contents)?;
        }
        ensure!(
            !config.postgres.url.is_empty(),
            "RULEBOOK_DATABASE_URL (or database_url) is not set"
        );
        config.adapter.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: RulebookConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse rulebook config yaml")?;
        if let Some(value) = override_cfg.database_url {
            self.postgres.url = value;
        }
        if let Some(value) = override_cfg.max_connections {
            self.postgres.max_connections = value;
        }
        if let Some(value) = override_cfg.connect_timeout_ms {
            self.postgres.connect_timeout_ms = value;
        }
        if let Some(value) = override_cfg.acquire_timeout_ms {
            self.postgres.acquire_timeout_ms = value;
        }
        if let Some(value) = override_cfg.table_name {
            self.adapter.table_name = value;
        }
        if let Some(value) = override_cfg.skip_auto_create_table {
            self.adapter.skip_auto_create_table = value;
        }
        if let Some(value) = override_cfg.match_mode {
            self.adapter.match_mode = value
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| "parse match_mode")?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

/// Reject anything that is not a plain, unquoted SQL identifier.
///
/// Table names are spliced into DDL and DML text, so only
/// `[A-Za-z_][A-Za-z0-9_]*` of at most [`MAX_TABLE_NAME_LEN`] bytes is accepted.
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_head || !valid_tail {
        return Err(StoreError::InvalidConfig(format!(
            "table name {name:?} is not a plain SQL identifier"
        )));
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(StoreError::InvalidConfig(format!(
            "table name {name:?} is longer than {MAX_TABLE_NAME_LEN} bytes"
        )));
    }
    Ok(())
}
