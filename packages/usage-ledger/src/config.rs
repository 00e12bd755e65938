use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

use crate::normalizer::DEFAULT_SERVICE_TYPE_RENAMES;

/// How the resolver decides whether an incoming event supersedes prior usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Any prior effective event for the stream is deducted and the incoming
    /// event saved, even when nothing changed.
    #[default]
    Literal,
    /// Exact duplicates are skipped; deductions follow the conflict type
    /// (value and descriptor differences).
    Classified,
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "literal" => Ok(ConflictPolicy::Literal),
            "classified" => Ok(ConflictPolicy::Classified),
            other => Err(anyhow!("unknown conflict policy: {}", other)),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Literal => write!(f, "literal"),
            ConflictPolicy::Classified => write!(f, "classified"),
        }
    }
}

/// Ledger configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub conflict_policy: ConflictPolicy,
    pub service_type_renames: HashMap<String, String>,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            service_type_renames: DEFAULT_SERVICE_TYPE_RENAMES
                .iter()
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .collect(),
            database_url: None,
            max_connections: 10,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();

        Ok(Self {
            conflict_policy: match env::var("LEDGER_CONFLICT_POLICY") {
                Ok(value) => value
                    .parse()
                    .context("LEDGER_CONFLICT_POLICY must be 'literal' or 'classified'")?,
                Err(_) => defaults.conflict_policy,
            },
            service_type_renames: match env::var("LEDGER_SERVICE_TYPE_RENAMES") {
                Ok(value) => parse_renames(&value)
                    .context("LEDGER_SERVICE_TYPE_RENAMES must look like 'old=new;old2=new2'")?,
                Err(_) => defaults.service_type_renames,
            },
            database_url: env::var("DATABASE_URL").ok(),
            max_connections: env::var("LEDGER_DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| defaults.max_connections.to_string())
                .parse()
                .context("LEDGER_DB_MAX_CONNECTIONS must be a valid number")?,
        })
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_service_type_rename(
        mut self,
        deprecated: impl Into<String>,
        successor: impl Into<String>,
    ) -> Self {
        self.service_type_renames
            .insert(deprecated.into(), successor.into());
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// The database URL, required by the Postgres store.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set")
    }
}

fn parse_renames(value: &str) -> Result<HashMap<String, String>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (old, new) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("missing '=' in rename '{}'", pair))?;
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                return Err(anyhow!("empty service type in rename '{}'", pair));
            }
            Ok((old.to_string(), new.to_string()))
        })
        .collect()
}
