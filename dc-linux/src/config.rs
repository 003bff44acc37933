//! Load config from file and environment.

use std::path::PathBuf;
use std::sync::Arc;

use dc_core::config::{DEFAULT_CACHE_DIR, DEFAULT_CLOSE_DELAY_MS};
use dc_core::{CatalogStore, EngineConfig, FileCatalog, StaticCatalog};
use serde::Deserialize;

/// Which end of the socket bridge this host plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// Daemon configuration. File: ~/.config/imsdc/config.toml or /etc/imsdc/config.toml.
/// Env overrides: IMSDC_ROLE, IMSDC_HOST, IMSDC_PORT, IMSDC_CACHE_DIR, IMSDC_CATALOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bridge role (default server).
    #[serde(default = "default_role")]
    pub role: Role,
    /// Listen address for the server, peer address for the client.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bridge TCP port (default 9001).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where received files land.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_close_delay_ms")]
    pub close_delay_ms: u64,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub phone_number: String,
    /// Inline catalog string.
    #[serde(default)]
    pub catalog: Option<String>,
    /// File holding the catalog string; wins over `catalog`.
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,
}

fn default_role() -> Role {
    Role::Server
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9001
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}
fn default_close_delay_ms() -> u64 {
    DEFAULT_CLOSE_DELAY_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            host: default_host(),
            port: default_port(),
            cache_dir: default_cache_dir(),
            close_delay_ms: default_close_delay_ms(),
            call_id: String::new(),
            phone_number: String::new(),
            catalog: None,
            catalog_file: None,
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_dir: self.cache_dir.clone(),
            close_delay_ms: self.close_delay_ms,
            call_id: self.call_id.clone(),
            phone_number: self.phone_number.clone(),
        }
    }

    pub fn catalog_store(&self) -> Arc<dyn CatalogStore> {
        match (&self.catalog_file, &self.catalog) {
            (Some(path), _) => Arc::new(FileCatalog::new(path)),
            (None, Some(raw)) => Arc::new(StaticCatalog::new(raw.clone())),
            (None, None) => Arc::new(StaticCatalog::default()),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_env(c, |key| std::env::var(key).ok())
}

/// Apply overrides from `lookup`. Unparseable values are logged and ignored.
pub fn apply_env(mut c: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(s) = lookup("IMSDC_ROLE") {
        match s.parse() {
            Ok(role) => c.role = role,
            Err(e) => tracing::warn!(error = %e, "ignoring IMSDC_ROLE"),
        }
    }
    if let Some(s) = lookup("IMSDC_HOST") {
        c.host = s;
    }
    if let Some(s) = lookup("IMSDC_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(e) => tracing::warn!(value = %s, error = %e, "ignoring IMSDC_PORT"),
        }
    }
    if let Some(s) = lookup("IMSDC_CACHE_DIR") {
        c.cache_dir = PathBuf::from(s);
    }
    if let Some(s) = lookup("IMSDC_CATALOG") {
        c.catalog = Some(s);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/imsdc/config.toml"));
    }
    out.push(PathBuf::from("/etc/imsdc/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        tracing::info!(path = %p.display(), "config loaded");
                        return Some(c);
                    }
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "bad config, using defaults"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "unreadable config"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_with_defaults() {
        let c: Config = toml::from_str("role = \"client\"\nhost = \"10.0.0.2\"\n").unwrap();
        assert_eq!(c.role, Role::Client);
        assert_eq!(c.address(), "10.0.0.2:9001");
        assert_eq!(c.close_delay_ms, 1000);
        assert!(c.catalog.is_none());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("IMSDC_ROLE", "Client"),
            ("IMSDC_PORT", "9100"),
            ("IMSDC_CACHE_DIR", "/tmp/dc"),
        ]
        .into_iter()
        .collect();
        let c = apply_env(Config::default(), |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.role, Role::Client);
        assert_eq!(c.port, 9100);
        assert_eq!(c.cache_dir, PathBuf::from("/tmp/dc"));
        assert_eq!(c.engine_config().cache_dir, PathBuf::from("/tmp/dc"));
    }

    #[test]
    fn bad_env_values_ignored() {
        let c = apply_env(Config::default(), |k| match k {
            "IMSDC_PORT" => Some("ninety".into()),
            "IMSDC_ROLE" => Some("relay".into()),
            _ => None,
        });
        assert_eq!(c.port, 9001);
        assert_eq!(c.role, Role::Server);
    }

    #[test]
    fn catalog_file_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let c = Config {
            catalog: Some("garbage".into()),
            catalog_file: Some(tmp.path().join("missing.txt")),
            ..Config::default()
        };
        assert!(c.catalog_store().entries().unwrap().is_empty());
    }
}
