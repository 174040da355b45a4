use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;
use tracing::warn;

use crate::catalog::{CatalogError, SlotCatalog};
use crate::clock::parse_utc_offset;

pub const DEFAULT_SLOTS: &str =
    "08:00-09:30,09:30-11:00,11:00-12:30,13:30-15:00,15:00-16:30,16:30-18:00";

const WAL_FILE: &str = "slotbook.wal";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("SLOTBOOK_SLOTS: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub utc_offset: FixedOffset,
    pub catalog: SlotCatalog,
    pub sweep_interval: Duration,
    pub retention_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = lookup("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into());
        let port = parsed(&lookup, "SLOTBOOK_PORT", 8080)?;
        let data_dir = lookup("SLOTBOOK_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            warn!("SLOTBOOK_DATA_DIR not set, using ./data");
            PathBuf::from("./data")
        });

        let utc_offset = match lookup("SLOTBOOK_UTC_OFFSET") {
            Some(value) => parse_utc_offset(&value).ok_or(ConfigError::Invalid {
                var: "SLOTBOOK_UTC_OFFSET",
                value,
            })?,
            None => {
                warn!("SLOTBOOK_UTC_OFFSET not set, slots are interpreted in UTC");
                FixedOffset::east_opt(0).ok_or(ConfigError::Invalid {
                    var: "SLOTBOOK_UTC_OFFSET",
                    value: "+00:00".into(),
                })?
            }
        };

        let catalog = match lookup("SLOTBOOK_SLOTS") {
            Some(value) => SlotCatalog::parse(&value)?,
            None => SlotCatalog::parse(DEFAULT_SLOTS)?,
        };

        let sweep_secs: u64 = parsed(&lookup, "SLOTBOOK_SWEEP_INTERVAL_SECS", 15)?;
        let retention_secs: u64 = parsed(&lookup, "SLOTBOOK_RETENTION_INTERVAL_SECS", 3600)?;
        let compact_threshold = parsed(&lookup, "SLOTBOOK_COMPACT_THRESHOLD", 1000)?;
        let metrics_port = match lookup("SLOTBOOK_METRICS_PORT") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                var: "SLOTBOOK_METRICS_PORT",
                value,
            })?),
            None => None,
        };

        Ok(Self {
            bind,
            port,
            data_dir,
            utc_offset,
            catalog,
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            retention_interval: Duration::from_secs(retention_secs.max(1)),
            compact_threshold,
            metrics_port,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
