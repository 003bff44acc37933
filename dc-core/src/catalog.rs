//! App catalog: the persisted list of mini-app descriptors served by the directory responder.
//!
//! Storage format is one string: comma-separated items of `base64(json descriptor)&zipPath=<path>`.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};

const ZIP_PATH_SEPARATOR: &str = "&zipPath=";
const ITEM_SEPARATOR: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Installed,
    Uninstalled,
    #[serde(other)]
    Unknown,
}

/// One mini-app descriptor. Fields this crate does not interpret are kept in `extra`
/// and serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub app_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub status: AppStatus,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub e_tag: String,
    /// Package archive on local storage; not part of the descriptor.
    #[serde(skip)]
    pub package_path: PathBuf,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Read-only access to the catalog. Shared across sessions.
pub trait CatalogStore: Send + Sync {
    fn entries(&self) -> Result<Vec<CatalogEntry>, CatalogError>;

    fn find(&self, app_id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.entries()?.into_iter().find(|e| e.app_id == app_id))
    }
}

/// Catalog held in memory as the raw persisted string.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    raw: String,
}

impl StaticCatalog {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

impl CatalogStore for StaticCatalog {
    fn entries(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        Ok(parse_catalog(&self.raw))
    }
}

/// Catalog string kept in a file; re-read on every request so edits show up live.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for FileCatalog {
    fn entries(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(parse_catalog(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(CatalogError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Decode every well-formed item; bad items are skipped with a warning.
pub fn parse_catalog(raw: &str) -> Vec<CatalogEntry> {
    raw.split(ITEM_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match parse_item(item) {
            Ok(entry) => Some(entry),
            Err(reason) => {
                tracing::warn!(reason = %reason, "skipping catalog item");
                None
            }
        })
        .collect()
}

fn parse_item(item: &str) -> Result<CatalogEntry, String> {
    let (encoded, zip_path) = match item.split_once(ZIP_PATH_SEPARATOR) {
        Some((e, p)) => (e, p),
        None => (item, ""),
    };
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("base64: {e}"))?;
    let mut entry: CatalogEntry =
        serde_json::from_slice(&json).map_err(|e| format!("descriptor: {e}"))?;
    entry.package_path = PathBuf::from(zip_path.trim());
    Ok(entry)
}

/// Encode one entry in the persisted item format.
pub fn encode_item(entry: &CatalogEntry) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(entry)?;
    Ok(format!(
        "{}{ZIP_PATH_SEPARATOR}{}",
        base64::engine::general_purpose::STANDARD.encode(json),
        entry.package_path.display()
    ))
}

/// Join encoded items into a catalog string.
pub fn encode_catalog(entries: &[CatalogEntry]) -> Result<String, serde_json::Error> {
    let items = entries
        .iter()
        .map(encode_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items.join(","))
}
