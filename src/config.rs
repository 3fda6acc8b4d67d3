use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::import::ImportMode;

pub const DEFAULT_LOG_FILTER: &str = "faena=info,sqlx=warn";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const HARD_MAX_CONNECTIONS: u32 = 32;
const DB_DIR: &str = "faena";
const DB_FILE: &str = "faena.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub json: bool,
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
            dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub import_mode: ImportMode,
    pub admin_token: Option<String>,
    pub log: LogConfig,
    /// Values that were present but unusable and fell back to defaults.
    /// Reported once logging is up.
    pub warnings: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut warnings = Vec::new();

        let database_path = match get("FAENA_DATABASE_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path().context("determine database path")?,
        };

        let bind_addr = match get("FAENA_BIND_ADDR") {
            Some(raw) => raw.parse::<SocketAddr>().unwrap_or_else(|_| {
                warnings.push(format!(
                    "FAENA_BIND_ADDR={raw} is not a socket address; using {DEFAULT_BIND_ADDR}"
                ));
                default_bind_addr()
            }),
            None => default_bind_addr(),
        };

        let max_connections = match get("FAENA_MAX_CONNECTIONS") {
            Some(raw) => match raw.parse::<u32>().ok().filter(|value| *value > 0) {
                Some(value) => value.min(HARD_MAX_CONNECTIONS),
                None => {
                    warnings.push(format!(
                        "FAENA_MAX_CONNECTIONS={raw} is invalid; using {DEFAULT_MAX_CONNECTIONS}"
                    ));
                    DEFAULT_MAX_CONNECTIONS
                }
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let import_mode = match get("FAENA_IMPORT_MODE") {
            Some(raw) => raw.parse::<ImportMode>().unwrap_or_else(|err| {
                warnings.push(format!("FAENA_IMPORT_MODE: {err}; using best_effort"));
                ImportMode::default()
            }),
            None => ImportMode::default(),
        };

        let json = match get("FAENA_LOG_JSON") {
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warnings.push(format!("FAENA_LOG_JSON={raw} is not a boolean; using false"));
                false
            }),
            None => false,
        };

        Ok(Self {
            database_path,
            bind_addr,
            max_connections,
            import_mode,
            admin_token: get("FAENA_ADMIN_TOKEN"),
            log: LogConfig {
                filter: get("FAENA_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
                json,
                dir: get("FAENA_LOG_DIR").map(PathBuf::from),
            },
            warnings,
        })
    }

    pub fn report_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!(target: "faena", event = "config_fallback", msg = %warning);
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("resolve platform data directory")?;
    Ok(base.join(DB_DIR).join(DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.entry("FAENA_DATABASE_PATH".into())
            .or_insert_with(|| "/tmp/faena-test.sqlite3".into());
        Config::from_lookup(|key| vars.get(key).cloned()).expect("config")
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.import_mode, ImportMode::BestEffort);
        assert_eq!(config.admin_token, None);
        assert_eq!(config.log, LogConfig::default());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn reads_values_and_clamps_pool_size() {
        let config = load(&[
            ("FAENA_BIND_ADDR", "0.0.0.0:9000"),
            ("FAENA_MAX_CONNECTIONS", "500"),
            ("FAENA_IMPORT_MODE", "all-or-nothing"),
            ("FAENA_ADMIN_TOKEN", " s3cret "),
            ("FAENA_LOG", "debug"),
            ("FAENA_LOG_JSON", "yes"),
            ("FAENA_LOG_DIR", "/var/log/faena"),
        ]);
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_connections, HARD_MAX_CONNECTIONS);
        assert_eq!(config.import_mode, ImportMode::AllOrNothing);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.log.filter, "debug");
        assert!(config.log.json);
        assert_eq!(config.log.dir, Some(PathBuf::from("/var/log/faena")));
    }

    #[test]
    fn invalid_values_fall_back_with_warnings() {
        let config = load(&[
            ("FAENA_BIND_ADDR", "localhost"),
            ("FAENA_MAX_CONNECTIONS", "0"),
            ("FAENA_IMPORT_MODE", "sometimes"),
            ("FAENA_LOG_JSON", "maybe"),
        ]);
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.import_mode, ImportMode::BestEffort);
        assert!(!config.log.json);
        assert_eq!(config.warnings.len(), 4);
    }
}
