//! Transfer metadata: the single in-flight file of a session.

use std::path::PathBuf;

use serde::Serialize;

use crate::header::{Disposition, HeaderField};

/// Content category derived from the part's `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Image,
    Video,
    #[default]
    Generic,
}

impl ContentCategory {
    /// Classify a MIME string by prefix. Unknown prefixes are generic.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim();
        if mime.starts_with("image") {
            ContentCategory::Image
        } else if mime.starts_with("video") {
            ContentCategory::Video
        } else {
            ContentCategory::Generic
        }
    }
}

/// One file in flight. Created on first header detection, updated on every body chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferMetadata {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    /// Declared checksum (hex MD5 as sent by the peer).
    pub checksum: String,
    /// Granted range start and end, as carried in the name token.
    pub start: u64,
    pub end: u64,
    /// Declared total size; 0 when the peer's value was missing or unparseable.
    pub total_size: u64,
    /// Part `Content-Length`, if it parsed.
    pub content_length: Option<u64>,
    pub file_name: String,
    /// Final destination path (after collision renaming), set when the sink opens.
    pub path: Option<PathBuf>,
    pub category: ContentCategory,
    pub content_type: String,
    /// Body bytes committed to the sink so far.
    pub received: u64,
    /// Set once the body could not be written; the transfer is incomplete.
    pub incomplete: bool,
    /// Checksum verification result at finalization. `None` when not checked.
    pub verified: Option<bool>,
}

impl TransferMetadata {
    /// Merge one parsed header field into this record.
    pub fn apply(&mut self, field: HeaderField) {
        match field {
            HeaderField::Disposition(d) => self.apply_disposition(d),
            HeaderField::ContentLength(len) => self.content_length = len,
            HeaderField::ContentType { category, mime } => {
                self.category = category;
                self.content_type = mime;
                self.received = 0;
            }
        }
    }

    fn apply_disposition(&mut self, d: Disposition) {
        let Disposition {
            id,
            from,
            to,
            checksum,
            start,
            end,
            total_size,
            file_name,
        } = d;
        self.id = id;
        self.sender = from;
        self.recipient = to;
        self.checksum = checksum;
        self.start = start;
        self.end = end;
        self.total_size = total_size;
        self.file_name = file_name;
    }

    /// Body length of this part: `end - start` when the range is set, else `Content-Length`.
    pub fn declared_body_len(&self) -> Option<u64> {
        if self.end > self.start {
            Some(self.end - self.start)
        } else {
            self.content_length
        }
    }

    /// Fraction of the declared size received so far, if the size is known.
    pub fn progress(&self) -> Option<f64> {
        if self.total_size == 0 {
            return None;
        }
        Some(self.received as f64 / self.total_size as f64)
    }

    /// True once every declared byte has been received.
    pub fn is_complete(&self) -> bool {
        !self.incomplete && self.total_size > 0 && self.received >= self.total_size
    }
}
