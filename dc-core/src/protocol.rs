//! Data-channel envelopes: file request/response JSON and the bridge frame message.

use serde::{Deserialize, Serialize};

/// The only request kind the negotiator understands.
pub const REQUEST_FILE: &str = "file";

/// Inbound request envelope: `{id, timestamp, from, to, data:{request, list}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub data: RequestData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    pub request: String,
    #[serde(default)]
    pub list: Vec<FileRequestInfo>,
}

/// One offered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequestInfo {
    pub name: String,
    #[serde(default)]
    pub md5: String,
    pub size: u64,
}

/// Outbound response envelope: `{accept, list:[{name, start, end}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponse {
    pub accept: bool,
    pub list: Vec<FileResponseInfo>,
}

/// Granted byte range `[start, end)` of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponseInfo {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// Kind of a bridge frame, carried as the numeric `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// Peer created application channels (`createLabels`).
    CreateChannels,
    /// Channel payload for `dataLabel`, base64 in `data`.
    Data,
    CallAdded,
    HangUp,
    CallActive,
    Unknown(u8),
}

impl From<u8> for BridgeKind {
    fn from(v: u8) -> Self {
        match v {
            1 => BridgeKind::CreateChannels,
            2 => BridgeKind::Data,
            3 => BridgeKind::CallAdded,
            4 => BridgeKind::HangUp,
            5 => BridgeKind::CallActive,
            other => BridgeKind::Unknown(other),
        }
    }
}

impl From<BridgeKind> for u8 {
    fn from(k: BridgeKind) -> Self {
        match k {
            BridgeKind::CreateChannels => 1,
            BridgeKind::Data => 2,
            BridgeKind::CallAdded => 3,
            BridgeKind::HangUp => 4,
            BridgeKind::CallActive => 5,
            BridgeKind::Unknown(v) => v,
        }
    }
}

/// Message exchanged by two socket bridges emulating a data channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_label: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl BridgeMessage {
    pub fn kind(&self) -> BridgeKind {
        BridgeKind::from(self.kind)
    }

    pub fn create_channels(labels: Vec<String>) -> Self {
        Self {
            kind: BridgeKind::CreateChannels.into(),
            create_labels: Some(labels),
            ..Default::default()
        }
    }

    /// Wrap channel bytes for `label`; the payload travels base64-encoded.
    pub fn data(label: &str, payload: &[u8]) -> Self {
        use base64::Engine;
        Self {
            kind: BridgeKind::Data.into(),
            data_label: Some(label.to_string()),
            data: base64::engine::general_purpose::STANDARD.encode(payload),
            ..Default::default()
        }
    }

    pub fn call_event(kind: BridgeKind) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Decoded payload of a data frame.
    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(self.data.trim())
    }
}
