//! Engine-level error taxonomy. Module errors roll up here; none of them is fatal.

use crate::catalog::CatalogError;
use crate::directory::DirectoryError;
use crate::header::HeaderError;
use crate::negotiate::NegotiateError;
use crate::sink::SinkError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unparseable part header; the field keeps its prior value.
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] HeaderError),
    /// File create/write/close failure; the transfer is marked incomplete.
    #[error("i/o failure: {0}")]
    IoFailure(#[from] SinkError),
    /// Text matched neither sub-protocol, or an unsupported request kind.
    #[error("unknown request shape: {0}")]
    UnknownRequestShape(String),
    /// Answered on the wire with a 404.
    #[error("missing catalog entry {0:?}")]
    MissingCatalogEntry(String),
    #[error("remote delivery failure: {0}")]
    RemoteDeliveryFailure(#[from] TransportError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<NegotiateError> for EngineError {
    fn from(e: NegotiateError) -> Self {
        EngineError::UnknownRequestShape(e.to_string())
    }
}

impl From<DirectoryError> for EngineError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::MissingEntry(id) => EngineError::MissingCatalogEntry(id),
            DirectoryError::Catalog(c) => EngineError::Catalog(c),
            other => EngineError::UnknownRequestShape(other.to_string()),
        }
    }
}

impl EngineError {
    /// Short taxonomy name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MalformedHeader(_) => "malformed_header",
            EngineError::IoFailure(_) => "io_failure",
            EngineError::UnknownRequestShape(_) => "unknown_request_shape",
            EngineError::MissingCatalogEntry(_) => "missing_catalog_entry",
            EngineError::RemoteDeliveryFailure(_) => "remote_delivery_failure",
            EngineError::Catalog(_) => "io_failure",
        }
    }
}
