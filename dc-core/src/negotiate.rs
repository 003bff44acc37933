//! File-transfer negotiation: request envelope in, accept/reject/partial response out.

use std::ops::Range;

use crate::protocol::{FileRequest, FileRequestInfo, FileResponse, FileResponseInfo, REQUEST_FILE};

#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    #[error("not a request envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("unsupported request kind {0:?}")]
    UnsupportedRequest(String),
    #[error("encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Outcome of a policy decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every file, whole.
    Accept,
    Reject,
    /// One range per offered file, in request order. Missing entries grant nothing.
    Partial(Vec<Range<u64>>),
}

/// Decides what to grant for an offered set of files.
pub trait AcceptPolicy: Send + Sync {
    fn decide(&self, request: &FileRequest) -> Decision;
}

/// Grants `[0, size)` for every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AcceptPolicy for AcceptAll {
    fn decide(&self, _request: &FileRequest) -> Decision {
        Decision::Accept
    }
}

/// Parse a request envelope from raw channel bytes.
pub fn parse_request(bytes: &[u8]) -> Result<FileRequest, NegotiateError> {
    let request: FileRequest = serde_json::from_slice(bytes)?;
    if request.data.request != REQUEST_FILE {
        return Err(NegotiateError::UnsupportedRequest(request.data.request));
    }
    Ok(request)
}

/// Build the response for `request` under `policy`.
pub fn respond(request: &FileRequest, policy: &dyn AcceptPolicy) -> FileResponse {
    let files = &request.data.list;
    match policy.decide(request) {
        Decision::Accept => FileResponse {
            accept: true,
            list: files.iter().map(|f| grant(f, 0..f.size)).collect(),
        },
        Decision::Reject => FileResponse {
            accept: false,
            list: Vec::new(),
        },
        Decision::Partial(ranges) => FileResponse {
            accept: true,
            list: files
                .iter()
                .enumerate()
                .map(|(i, f)| grant(f, ranges.get(i).cloned().unwrap_or(0..0)))
                .collect(),
        },
    }
}

/// Parse, decide and encode in one step. The encoded response is ready to send.
pub fn negotiate(bytes: &[u8], policy: &dyn AcceptPolicy) -> Result<Vec<u8>, NegotiateError> {
    let request = parse_request(bytes)?;
    tracing::info!(
        id = %request.id,
        from = request.from.as_deref().unwrap_or(""),
        files = request.data.list.len(),
        "file request"
    );
    encode_response(&respond(&request, policy))
}

pub fn encode_response(response: &FileResponse) -> Result<Vec<u8>, NegotiateError> {
    serde_json::to_vec(response).map_err(NegotiateError::Encode)
}

/// Clamp `range` into `[0, size)`.
fn grant(file: &FileRequestInfo, range: Range<u64>) -> FileResponseInfo {
    let end = range.end.min(file.size);
    let start = range.start.min(end);
    FileResponseInfo {
        name: file.name.clone(),
        start,
        end,
    }
}
