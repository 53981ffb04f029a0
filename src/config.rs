use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::Level;

const TABLE_VAR: &str = "DYNAMO_MODEL_TABLE";
const LOG_LEVEL_VAR: &str = "DYNAMO_MODEL_LOG_LEVEL";
const CREATE_TABLE_VAR: &str = "DYNAMO_MODEL_CREATE_TABLE";

const DEFAULT_TABLE: &str = "testing-products";

/// Settings for the demo binary. AWS credentials and region are read
/// separately by `aws_config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub table_name: String,
    pub log_level: Level,
    pub create_table: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE.to_string(),
            log_level: Level::INFO,
            create_table: true,
        }
    }
}

impl AppConfig {
    /// Reads the process environment. Call `dotenv::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let log_level = match lookup(LOG_LEVEL_VAR) {
            Some(level) => Level::from_str(level.trim())
                .map_err(|_| anyhow!("invalid log level '{level}'"))
                .with_context(|| format!("reading {LOG_LEVEL_VAR}"))?,
            None => defaults.log_level,
        };

        let create_table = match lookup(CREATE_TABLE_VAR) {
            Some(flag) => parse_flag(&flag).with_context(|| format!("reading {CREATE_TABLE_VAR}"))?,
            None => defaults.create_table,
        };

        Ok(Self {
            table_name: lookup(TABLE_VAR)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.table_name),
            log_level,
            create_table,
        })
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, found '{other}'")),
    }
}
