//! Settings for tunematch
//!
//! TOML-based configuration selecting the store backend plus the
//! fingerprint and matching parameters. Environment variables override
//! whatever the file says.

use crate::config::{FingerprintConfig, MatchingConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Complete settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

/// Store backend configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub postgresql: PostgresqlConfig,
}

/// Store backend type
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Memory,
    #[serde(alias = "postgres")]
    Postgresql,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "memory" => Ok(BackendKind::Memory),
            "postgres" | "postgresql" => Ok(BackendKind::Postgresql),
            other => Err(Error::config(format!(
                "unknown store backend '{}', expected file, memory or postgres",
                other
            ))),
        }
    }
}

/// Snapshot file backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("./tunematch.idx")
}

/// PostgreSQL backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PostgresqlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for PostgresqlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "postgres".to_string()
}
fn default_user() -> String {
    "postgres".to_string()
}
fn default_max_connections() -> u32 {
    10
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid value for {}: '{}'", name, value)))
}

fn first_var<F>(lookup: &F, names: &[&'static str]) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|&name| lookup(name).map(|value| (name, value)))
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Override fields from variables returned by `lookup`.
    ///
    /// Connection fields take `TUNEMATCH_DB_*` first, then the libpq
    /// `PG*` variable of the same meaning.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&'static str]| first_var(&lookup, names);

        if let Some((_, v)) = first(&["TUNEMATCH_DB_TYPE"]) {
            self.storage.backend = v.parse()?;
        }
        if let Some((_, v)) = first(&["TUNEMATCH_DB_PATH"]) {
            self.storage.file.path = PathBuf::from(v);
        }

        let pg = &mut self.storage.postgresql;
        if let Some((_, v)) = first(&["TUNEMATCH_DB_HOST", "PGHOST"]) {
            pg.host = v;
        }
        if let Some((name, v)) = first(&["TUNEMATCH_DB_PORT", "PGPORT"]) {
            pg.port = parse_var(name, &v)?;
        }
        if let Some((_, v)) = first(&["TUNEMATCH_DB_USER", "PGUSER"]) {
            pg.user = v;
        }
        if let Some((_, v)) = first(&["TUNEMATCH_DB_PASS", "PGPASSWORD"]) {
            pg.password = v;
        }
        if let Some((_, v)) = first(&["TUNEMATCH_DB_NAME", "PGDATABASE"]) {
            pg.database = v;
        }

        if let Some((name, v)) = first(&["TUNEMATCH_FP_LIMIT"]) {
            self.matching.fingerprint_limit = parse_var(name, &v)?;
        }
        if let Some((name, v)) = first(&["TUNEMATCH_MATCH_THRESHOLD"]) {
            self.matching.match_threshold = parse_var(name, &v)?;
        }
        if let Some((name, v)) = first(&["TUNEMATCH_STORE_TIMEOUT_MS"]) {
            self.matching.store_timeout_ms = parse_var(name, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.fingerprint.validate()?;
        self.matching.validate()?;
        if self.storage.backend == BackendKind::File && self.storage.file.path.as_os_str().is_empty() {
            return Err(Error::config("storage.file.path must not be empty"));
        }
        Ok(())
    }

    /// Settings from an optional TOML file plus the process environment
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }
}
