//! App directory responder: paginated app listing and package download over pseudo-HTTP.

use std::fs;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{CatalogEntry, CatalogError, CatalogStore};
use crate::http::{self, ResponseHead};

const LIST_RESOURCE: &str = "applicationlist";
const PACKAGE_RESOURCE: &str = "applications?appid=";
const IF_NONE_MATCH: &str = "If-None-Match";

/// A recognised directory request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryRequest {
    List {
        begin: usize,
        count: usize,
        sdk_version: Option<String>,
    },
    Package {
        app_id: String,
        sdk_version: Option<String>,
        if_none_match: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("not a directory request")]
    UnknownResource,
    #[error("no catalog entry for {0:?}")]
    MissingEntry(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// True if the decoded text names a directory resource.
pub fn looks_like_directory(text: &str) -> bool {
    text.contains(LIST_RESOURCE) || text.contains(PACKAGE_RESOURCE)
}

/// Recognise and parse a directory request from raw channel bytes.
pub fn parse_request(bytes: &[u8]) -> Result<DirectoryRequest, DirectoryError> {
    let text = String::from_utf8_lossy(bytes);
    let head = http::parse_request_head(bytes);
    let target = match &head {
        Some(h) => h.target.as_str(),
        None => text.lines().next().unwrap_or(""),
    };
    let query = query_of(target).ok_or_else(|| {
        if looks_like_directory(&text) {
            DirectoryError::MalformedQuery("missing query string".into())
        } else {
            DirectoryError::UnknownResource
        }
    })?;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    let sdk_version = param("sdkVersion");

    if target.contains(LIST_RESOURCE) {
        let begin = number_param(param("begin-index"), "begin-index")?;
        let count = number_param(param("app-num"), "app-num")?;
        return Ok(DirectoryRequest::List {
            begin,
            count,
            sdk_version,
        });
    }
    if target.contains(PACKAGE_RESOURCE) {
        let app_id = param("appid")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DirectoryError::MalformedQuery("empty appid".into()))?;
        let if_none_match = match &head {
            Some(h) => h.header(IF_NONE_MATCH).map(str::to_string),
            None => http::find_header_loose(&text, IF_NONE_MATCH).map(str::to_string),
        }
        .filter(|v| !v.is_empty());
        return Ok(DirectoryRequest::Package {
            app_id,
            sdk_version,
            if_none_match,
        });
    }
    Err(DirectoryError::UnknownResource)
}

fn query_of(target: &str) -> Option<&str> {
    let (_, q) = target.split_once('?')?;
    Some(q.split_whitespace().next().unwrap_or(""))
}

fn number_param(value: Option<String>, name: &str) -> Result<usize, DirectoryError> {
    let value = value.ok_or_else(|| DirectoryError::MalformedQuery(format!("missing {name}")))?;
    value
        .trim()
        .parse()
        .map_err(|_| DirectoryError::MalformedQuery(format!("{name}={value}")))
}

/// List response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppListPage<'a> {
    count: usize,
    list: &'a [CatalogEntry],
    offset: usize,
    call_id: &'a str,
    has_more: bool,
    total: usize,
}

/// Serves directory requests from a shared read-only catalog.
#[derive(Clone)]
pub struct DirectoryResponder {
    catalog: Arc<dyn CatalogStore>,
    call_id: String,
}

impl DirectoryResponder {
    pub fn new(catalog: Arc<dyn CatalogStore>, call_id: impl Into<String>) -> Self {
        Self {
            catalog,
            call_id: call_id.into(),
        }
    }

    /// Outbound messages for `request`, in send order.
    pub fn respond(&self, request: &DirectoryRequest) -> Vec<Vec<u8>> {
        match request {
            DirectoryRequest::List { begin, count, .. } => self.list(*begin, *count),
            DirectoryRequest::Package {
                app_id,
                if_none_match,
                ..
            } => match self.package(app_id, if_none_match.as_deref()) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(app_id = %app_id, error = %e, "package request failed");
                    vec![http::NOT_FOUND.to_vec()]
                }
            },
        }
    }

    fn list(&self, begin: usize, count: usize) -> Vec<Vec<u8>> {
        let entries = self.catalog.entries().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "catalog unreadable, listing nothing");
            Vec::new()
        });
        let page = paginate(&entries, begin, count);
        let body = AppListPage {
            count: page.len(),
            list: page,
            offset: begin,
            call_id: &self.call_id,
            has_more: begin + page.len() < entries.len(),
            total: entries.len(),
        };
        let json = match serde_json::to_vec(&body) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "encoding app list");
                return vec![http::NOT_FOUND.to_vec()];
            }
        };
        tracing::debug!(begin, count, returned = page.len(), total = entries.len(), "app list");
        let head = ResponseHead::ok()
            .header("Content-Type", "application/json")
            .header("Content-Length", json.len().to_string());
        vec![head.to_bytes(), json]
    }

    fn package(
        &self,
        app_id: &str,
        if_none_match: Option<&str>,
    ) -> Result<Vec<Vec<u8>>, DirectoryError> {
        let entry = self
            .catalog
            .find(app_id)?
            .ok_or_else(|| DirectoryError::MissingEntry(app_id.to_string()))?;
        if if_none_match.is_some_and(|tag| !entry.e_tag.is_empty() && tag == entry.e_tag) {
            tracing::debug!(app_id, etag = %entry.e_tag, "package not modified");
            let head = ResponseHead::not_modified().header("etag", entry.e_tag.as_str());
            return Ok(vec![head.to_bytes()]);
        }
        let bytes = fs::read(&entry.package_path).map_err(|source| {
            DirectoryError::Catalog(CatalogError::Read {
                path: entry.package_path.clone(),
                source,
            })
        })?;
        tracing::info!(app_id, bytes = bytes.len(), etag = %entry.e_tag, "serving package");
        let head = ResponseHead::ok()
            .header("Content-Type", "application/zip")
            .header("Content-Length", bytes.len().to_string())
            .header("etag", entry.e_tag.as_str());
        Ok(vec![head.to_bytes(), bytes])
    }
}

/// Entries `[begin, min(begin + count, len))`.
pub fn paginate<T>(entries: &[T], begin: usize, count: usize) -> &[T] {
    let start = begin.min(entries.len());
    let end = begin.saturating_add(count).min(entries.len());
    &entries[start..end]
}
