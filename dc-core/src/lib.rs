//! IMS data-channel session engine.
//! Host-driven: no sockets; the host pushes inbound chunks and drains outbound buffers and events.

pub mod catalog;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod http;
pub mod integrity;
pub mod multipart;
pub mod negotiate;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use catalog::{CatalogEntry, CatalogStore, FileCatalog, StaticCatalog};
pub use config::EngineConfig;
pub use error::EngineError;
pub use multipart::{MultipartWriter, PartDescriptor};
pub use negotiate::{AcceptAll, AcceptPolicy, Decision};
pub use protocol::{BridgeKind, BridgeMessage, FileRequest, FileResponse};
pub use registry::{SessionRegistry, BOOTSTRAP_LABEL};
pub use session::{ChannelKind, EngineContext, Session, SessionEvent, SessionState};
pub use transfer::{ContentCategory, TransferMetadata};
pub use transport::{Transport, TransportError};
pub use wire::{decode_frame, encode_frame, FrameBuffer, FrameDecodeError, FrameEncodeError};
