//! Multipart reassembler: boundary discovery, part headers, body routing to the file sink.
//!
//! The peer sends a multipart/form-data upload as a sequence of channel messages: the request
//! header block (carrying `boundary=`), one part header block, raw body chunks, and the final
//! `--<boundary>--` marker. Transport chunks need not line up with those messages, so header
//! text is carried over between chunks and the terminal marker is matched across chunk edges.
//!
//! One rule is kept for compatibility with the deployed peer: a chunk that contains
//! `Content-Disposition:` is consumed entirely as part headers. Bytes following the blank line
//! in that same chunk are discarded, never written as body.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::EngineError;
use crate::header::{parse_header_line, HeaderField};
use crate::integrity;
use crate::sink::{Clock, FileSink};
use crate::transfer::TransferMetadata;

/// Token whose presence makes a chunk a part header block.
pub const DISPOSITION_TOKEN: &str = "Content-Disposition:";
const MULTIPART_MARKER: &str = "multipart/form-data";
const BOUNDARY_PARAM: &str = "boundary=";
const CRLF: &[u8] = b"\r\n";

/// Header text without a line break is dropped past this size.
const MAX_HEADER_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblerState {
    ScanningBoundary,
    HeaderBlock,
    BodyStream,
    Terminated,
}

/// Notable transitions produced while feeding a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyEvent {
    /// Sink opened for a new file.
    Started(TransferMetadata),
    /// Terminal boundary seen; the file is closed.
    Completed(TransferMetadata),
}

/// Per-session multipart state. Not thread-safe; the session serializes calls.
pub struct Reassembler {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    state: ReassemblerState,
    boundary: Option<String>,
    /// Boundary of the last finalized transfer, kept so repeated terminals are recognised.
    last_boundary: Option<String>,
    /// Header bytes not yet terminated by CRLF.
    line_buf: Vec<u8>,
    /// Body bytes held back because they may start the terminal delimiter.
    body_tail: Vec<u8>,
    block_has_headers: bool,
    current: Option<TransferMetadata>,
    sink: Option<FileSink>,
}

impl Reassembler {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
            state: ReassemblerState::ScanningBoundary,
            boundary: None,
            last_boundary: None,
            line_buf: Vec::new(),
            body_tail: Vec::new(),
            block_has_headers: false,
            current: None,
            sink: None,
        }
    }

    pub fn state(&self) -> ReassemblerState {
        self.state
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// The transfer in flight, if any.
    pub fn current(&self) -> Option<&TransferMetadata> {
        self.current.as_ref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True while a multipart stream is in progress and every chunk belongs to it.
    pub fn is_engaged(&self) -> bool {
        self.boundary.is_some()
            || self.current.is_some()
            || matches!(
                self.state,
                ReassemblerState::HeaderBlock | ReassemblerState::BodyStream
            )
    }

    /// True if `text` carries the terminal marker of the current or last finalized transfer.
    pub fn is_terminal_marker(&self, text: &str) -> bool {
        self.boundary
            .iter()
            .chain(self.last_boundary.iter())
            .any(|b| text.contains(&terminal_marker(b)))
    }

    /// Process one inbound chunk in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ReassemblyEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }
        let text = String::from_utf8_lossy(chunk);
        if text.contains(DISPOSITION_TOKEN) {
            if self.state == ReassemblerState::BodyStream {
                self.flush_body_tail();
            }
            if self.state != ReassemblerState::HeaderBlock {
                // Partial text from before the part header belongs to nothing.
                self.line_buf.clear();
            }
            self.consume_header_text(chunk, true, &mut events);
            return events;
        }
        match self.state {
            ReassemblerState::BodyStream => self.write_body(chunk, &mut events),
            _ => self.consume_header_text(chunk, false, &mut events),
        }
        events
    }

    /// Drop the transfer in flight (session close). Returns it, marked incomplete.
    pub fn reset(&mut self) -> Option<TransferMetadata> {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                tracing::warn!(error = %e, "closing sink on reset");
            }
        }
        self.state = ReassemblerState::ScanningBoundary;
        self.boundary = None;
        self.line_buf.clear();
        self.body_tail.clear();
        self.block_has_headers = false;
        self.current.take().map(|mut meta| {
            meta.incomplete = true;
            tracing::info!(file = %meta.file_name, received = meta.received, "transfer dropped");
            meta
        })
    }

    fn consume_header_text(
        &mut self,
        chunk: &[u8],
        discard_rest: bool,
        events: &mut Vec<ReassemblyEvent>,
    ) {
        self.line_buf.extend_from_slice(chunk);
        let mut consumed = 0;
        while let Some(pos) = find(&self.line_buf[consumed..], CRLF) {
            let line = String::from_utf8_lossy(&self.line_buf[consumed..consumed + pos]).into_owned();
            consumed += pos + CRLF.len();
            if self.on_header_line(&line, events) {
                let rest = self.line_buf.split_off(consumed);
                self.line_buf.clear();
                if discard_rest {
                    if !rest.is_empty() {
                        tracing::debug!(
                            bytes = rest.len(),
                            "discarding bytes after part header in header chunk"
                        );
                    }
                } else {
                    self.write_body(&rest, events);
                }
                return;
            }
        }
        self.line_buf.drain(..consumed);

        // A terminal marker need not be followed by CRLF.
        if let Some(b) = &self.boundary {
            let marker = terminal_marker(b);
            if find(&self.line_buf, marker.as_bytes()).is_some() {
                self.line_buf.clear();
                self.finalize(events);
                return;
            }
        }
        if self.line_buf.len() > MAX_HEADER_BUFFER {
            tracing::warn!(bytes = self.line_buf.len(), "header text without line break, dropped");
            self.line_buf.clear();
        }
    }

    /// Handle one complete header line. Returns true when it ends the part header block.
    fn on_header_line(&mut self, line: &str, events: &mut Vec<ReassemblyEvent>) -> bool {
        let trimmed = line.trim();
        if let Some(b) = boundary_from_line(line) {
            tracing::debug!(boundary = %b, "multipart boundary learned");
            self.boundary = Some(b);
            if self.state == ReassemblerState::Terminated {
                self.state = ReassemblerState::ScanningBoundary;
            }
            return false;
        }
        if let Some(b) = &self.boundary {
            if trimmed == terminal_marker(b) {
                self.finalize(events);
                return false;
            }
            if trimmed == delimiter(b) {
                self.state = ReassemblerState::HeaderBlock;
                self.block_has_headers = false;
                return false;
            }
        } else if self.is_terminal_marker(trimmed) {
            tracing::debug!("terminal marker after finalization ignored");
            return false;
        }
        if line.contains(DISPOSITION_TOKEN) && self.state != ReassemblerState::HeaderBlock {
            self.state = ReassemblerState::HeaderBlock;
            self.block_has_headers = false;
        }
        if self.state != ReassemblerState::HeaderBlock {
            return false;
        }
        if trimmed.is_empty() {
            if self.block_has_headers {
                self.state = ReassemblerState::BodyStream;
                return true;
            }
            return false;
        }
        match parse_header_line(line) {
            Ok(Some(field)) => {
                let is_disposition = matches!(field, HeaderField::Disposition(_));
                self.current.get_or_insert_with(Default::default).apply(field);
                self.block_has_headers = true;
                if is_disposition {
                    self.open_sink_if_needed(events);
                }
            }
            Ok(None) => {}
            Err(e) => {
                let e = EngineError::from(e);
                tracing::warn!(kind = e.kind(), error = %e, line, "keeping prior header state");
            }
        }
        false
    }

    fn open_sink_if_needed(&mut self, events: &mut Vec<ReassemblyEvent>) {
        if self.sink.is_some() {
            return;
        }
        let Some(meta) = self.current.as_mut() else {
            return;
        };
        match FileSink::open(&self.dir, &meta.file_name, self.clock.as_ref()) {
            Ok(sink) => {
                meta.path = sink.path().map(Path::to_path_buf);
                tracing::info!(
                    id = %meta.id,
                    from = %meta.sender,
                    file = %meta.file_name,
                    size = meta.total_size,
                    "receive started"
                );
                self.sink = Some(sink);
                events.push(ReassemblyEvent::Started(meta.clone()));
            }
            Err(e) => {
                tracing::error!(error = %e, file = %meta.file_name, "cannot open transfer file");
                meta.incomplete = true;
            }
        }
    }

    fn write_body(&mut self, bytes: &[u8], events: &mut Vec<ReassemblyEvent>) {
        if bytes.is_empty() {
            return;
        }
        let carried = self.body_tail.len();
        self.body_tail.extend_from_slice(bytes);
        let Some(b) = self.boundary.as_deref() else {
            // Without a boundary the end cannot be detected; everything is body.
            self.flush_body_tail();
            return;
        };
        let marker = terminal_marker(b);
        if let Some(idx) = find(&self.body_tail, marker.as_bytes()) {
            // With a declared length, commit() trims the delimiter CRLF. Otherwise only a CRLF
            // arriving with the marker is taken as the delimiter's; earlier bytes are body.
            let declared = self.current.as_ref().and_then(TransferMetadata::declared_body_len);
            let mut end = idx;
            if declared.is_none()
                && end >= carried + CRLF.len()
                && &self.body_tail[end - CRLF.len()..end] == CRLF
            {
                end -= CRLF.len();
            }
            let tail = std::mem::take(&mut self.body_tail);
            self.commit(&tail[..end]);
            self.finalize(events);
            let rest = &tail[idx + marker.len()..];
            if rest.iter().any(|b| !b.is_ascii_whitespace()) {
                self.consume_header_text(rest, false, events);
            }
            return;
        }
        // Hold back what could be the start of "\r\n--<boundary>--".
        let keep = (marker.len() + CRLF.len() - 1).min(self.body_tail.len());
        let ready = self.body_tail.len() - keep;
        if ready > 0 {
            let head: Vec<u8> = self.body_tail.drain(..ready).collect();
            self.commit(&head);
        }
    }

    fn flush_body_tail(&mut self) {
        let tail = std::mem::take(&mut self.body_tail);
        self.commit(&tail);
    }

    fn commit(&mut self, bytes: &[u8]) {
        let room = self
            .current
            .as_ref()
            .and_then(|m| Some(m.declared_body_len()?.saturating_sub(m.received)));
        let bytes = match room {
            Some(room) if room < bytes.len() as u64 => {
                tracing::debug!(
                    dropped = bytes.len() as u64 - room,
                    "bytes past the declared part length dropped"
                );
                &bytes[..room as usize]
            }
            _ => bytes,
        };
        if bytes.is_empty() {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            tracing::debug!(bytes = bytes.len(), "body bytes without open file dropped");
            if let Some(meta) = self.current.as_mut() {
                meta.incomplete = true;
            }
            return;
        };
        match sink.append(bytes) {
            Ok(()) => {
                if let Some(meta) = self.current.as_mut() {
                    meta.received += bytes.len() as u64;
                    tracing::trace!(received = meta.received, total = meta.total_size, "receive progress");
                }
            }
            Err(e) => {
                let e = EngineError::from(e);
                tracing::error!(kind = e.kind(), error = %e, "transfer incomplete");
                if let Err(e) = sink.close() {
                    tracing::warn!(error = %e, "closing failed sink");
                }
                if let Some(meta) = self.current.as_mut() {
                    meta.incomplete = true;
                }
            }
        }
    }

    fn finalize(&mut self, events: &mut Vec<ReassemblyEvent>) {
        let mut checksum = None;
        let mut close_failed = false;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                tracing::error!(error = %e, "closing transfer file failed");
                close_failed = true;
            }
            checksum = Some(sink.checksum_hex());
        }
        self.last_boundary = self.boundary.take().or(self.last_boundary.take());
        self.body_tail.clear();
        self.block_has_headers = false;
        self.state = ReassemblerState::Terminated;
        let Some(mut meta) = self.current.take() else {
            tracing::debug!("terminal marker with no transfer in flight");
            return;
        };
        meta.incomplete |= close_failed;
        meta.verified = checksum.and_then(|c| integrity::verify(&c, &meta.checksum));
        if meta.verified == Some(false) {
            tracing::warn!(file = %meta.file_name, expected = %meta.checksum, "checksum mismatch");
        }
        tracing::info!(
            file = %meta.file_name,
            received = meta.received,
            total = meta.total_size,
            incomplete = meta.incomplete,
            "receive complete"
        );
        events.push(ReassemblyEvent::Completed(meta));
    }
}

/// Fields of one file part, as written by [`MultipartWriter::part_header`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    pub id: String,
    pub from: String,
    pub to: String,
    pub checksum: String,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub file_name: String,
    pub content_type: String,
}

/// Builds the messages a sending peer emits for one file.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
}

impl MultipartWriter {
    /// Fresh random boundary.
    pub fn new() -> Self {
        Self::with_boundary(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Request header block announcing the boundary.
    pub fn request_header(&self, host: &str, content_length: u64) -> Vec<u8> {
        format!(
            "POST http://{host} HTTP/1.1\r\nHost: {host}\r\nConnection: keep-alive\r\nContent-Type: {MULTIPART_MARKER}; {BOUNDARY_PARAM}{}\r\nContent-Length: {content_length}\r\n\r\n",
            self.boundary
        )
        .into_bytes()
    }

    /// Part header block: delimiter, disposition with the name token, type, length, blank line.
    pub fn part_header(&self, part: &PartDescriptor) -> Vec<u8> {
        format!(
            "{}\r\n{DISPOSITION_TOKEN} form-data; name=\"{},{},{},{},{},{},{}\"; filename=\"{}\"\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            delimiter(&self.boundary),
            part.id,
            part.from,
            part.to,
            part.checksum,
            part.start,
            part.end,
            part.total_size,
            part.file_name,
            part.content_type,
            part.end.saturating_sub(part.start),
        )
        .into_bytes()
    }

    /// Final boundary closing the upload.
    pub fn terminal(&self) -> Vec<u8> {
        format!("\r\n{}\r\n", terminal_marker(&self.boundary)).into_bytes()
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn delimiter(boundary: &str) -> String {
    format!("--{boundary}")
}

fn terminal_marker(boundary: &str) -> String {
    format!("--{boundary}--")
}

fn boundary_from_line(line: &str) -> Option<String> {
    if !line.contains(MULTIPART_MARKER) {
        return None;
    }
    let idx = line.find(BOUNDARY_PARAM)?;
    let value = line[idx + BOUNDARY_PARAM.len()..].trim();
    let value = value.split(';').next().unwrap_or("").trim().trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FixedClock;
    use crate::transfer::ContentCategory;
    use chrono::NaiveDate;
    use std::fs;

    const BOUNDARY: &str = "bd017fda-d6df-4f7e-9dfb-14ca864e7111";

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        ))
    }

    /// Deterministic body with CRLFs and dashes but never the terminal marker.
    fn body(len: usize) -> Vec<u8> {
        let mut x: u32 = 0x1234_5678;
        (0..len)
            .map(|i| match i % 97 {
                10 => b'\r',
                11 => b'\n',
                12 | 13 => b'-',
                _ => {
                    x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    (x >> 16) as u8
                }
            })
            .collect()
    }

    fn part(body: &[u8]) -> PartDescriptor {
        PartDescriptor {
            id: "15388916503_4d392ee9".into(),
            from: "15388916503".into(),
            to: "15300000000".into(),
            checksum: integrity::md5_hex(body),
            start: 0,
            end: body.len() as u64,
            total_size: body.len() as u64,
            file_name: "IMG_1.jpg".into(),
            content_type: "image/jpeg; charset=utf-8".into(),
        }
    }

    /// The messages the peer sends: request header, part header, body, terminal.
    fn messages(body: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let w = MultipartWriter::with_boundary(BOUNDARY);
        (
            w.request_header("www.test.com", body.len() as u64 + 200),
            w.part_header(&part(body)),
            w.terminal(),
        )
    }

    fn completed(events: &[ReassemblyEvent]) -> Option<&TransferMetadata> {
        events.iter().find_map(|e| match e {
            ReassemblyEvent::Completed(m) => Some(m),
            _ => None,
        })
    }

    #[test]
    fn peer_framed_stream_reassembles() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(5000);
        let (req, hdr, term) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());

        assert!(r.feed(&req).is_empty());
        assert_eq!(r.boundary(), Some(BOUNDARY));
        let ev = r.feed(&hdr);
        assert!(matches!(ev.as_slice(), [ReassemblyEvent::Started(_)]));
        assert_eq!(r.state(), ReassemblerState::BodyStream);
        assert!(r.feed(&data).is_empty());
        let ev = r.feed(&term);
        let meta = completed(&ev).expect("completed");

        assert_eq!(meta.file_name, "IMG_1.jpg");
        assert_eq!(meta.sender, "15388916503");
        assert_eq!(meta.category, ContentCategory::Image);
        assert_eq!(meta.content_length, Some(5000));
        assert_eq!(meta.received, 5000);
        assert_eq!(meta.verified, Some(true));
        assert!(meta.is_complete());
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), data);
        assert!(r.current().is_none());
        assert_eq!(r.state(), ReassemblerState::Terminated);
    }

    #[test]
    fn chunk_boundary_independence() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(1500);
        let (req, hdr, term) = messages(&data);

        let reference_dir = tmp.path().join("whole");
        let mut r = Reassembler::new(&reference_dir, clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        assert!(completed(&r.feed(&term)).is_some());
        let reference = fs::read(reference_dir.join("IMG_1.jpg")).unwrap();
        assert_eq!(reference, data);

        let mut rest = hdr.clone();
        rest.extend_from_slice(&data);
        rest.extend_from_slice(&term);
        for size in 1..=64 {
            let dir = tmp.path().join(size.to_string());
            let mut r = Reassembler::new(&dir, clock());
            r.feed(&req);
            let mut done = None;
            for chunk in rest.chunks(size) {
                if let Some(m) = completed(&r.feed(chunk)) {
                    done = Some(m.clone());
                }
            }
            let meta = done.unwrap_or_else(|| panic!("chunk size {size}: no completion"));
            assert_eq!(meta.received, data.len() as u64, "chunk size {size}");
            assert_eq!(
                fs::read(dir.join("IMG_1.jpg")).unwrap(),
                reference,
                "chunk size {size}"
            );
        }
    }

    #[test]
    fn repeated_terminal_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(100);
        let (req, hdr, term) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        assert!(completed(&r.feed(&term)).is_some());
        assert!(r.is_terminal_marker(&String::from_utf8_lossy(&term)));
        assert!(r.feed(&term).is_empty());
        assert!(r.feed(&term).is_empty());
        assert_eq!(r.state(), ReassemblerState::Terminated);
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), data);
    }

    #[test]
    fn disposition_chunk_is_all_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(64);
        let (req, mut hdr, term) = messages(&data);
        hdr.extend_from_slice(b"not body");
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        let ev = r.feed(&term);
        assert_eq!(completed(&ev).unwrap().received, 64);
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), data);
    }

    #[test]
    fn boundary_persists_across_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(10);
        let (req, hdr, _) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        // Terminal without CRLF, on its own.
        let ev = r.feed(format!("--{BOUNDARY}--").as_bytes());
        assert!(completed(&ev).is_some());
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), data);
    }

    #[test]
    fn collision_renames_second_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let first = body(20);
        let second = body(30);
        let mut r = Reassembler::new(tmp.path(), clock());
        for data in [&first, &second] {
            let (req, hdr, term) = messages(data);
            r.feed(&req);
            r.feed(&hdr);
            r.feed(data);
            assert!(completed(&r.feed(&term)).is_some());
        }
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), first);
        assert_eq!(
            fs::read(tmp.path().join("IMG_1_20240102_030405.jpg")).unwrap(),
            second
        );
    }

    #[test]
    fn malformed_disposition_keeps_session_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let (req, _, term) = messages(b"");
        let hdr = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a,b\"; filename=\"x.bin\"\r\nContent-Type: text/plain\r\n\r\n"
        );
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        assert!(r.feed(hdr.as_bytes()).is_empty());
        r.feed(b"payload");
        let ev = r.feed(&term);
        let meta = completed(&ev).unwrap();
        assert!(meta.incomplete);
        assert_eq!(meta.received, 0);
        assert!(!tmp.path().join("x.bin").exists());
    }

    #[test]
    fn reset_drops_transfer() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(10);
        let (req, hdr, _) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        let dropped = r.reset().unwrap();
        assert!(dropped.incomplete);
        assert!(!r.is_engaged());
        assert_eq!(r.state(), ReassemblerState::ScanningBoundary);
    }

    #[test]
    fn trailing_crlf_survives_bare_terminal_message() {
        let tmp = tempfile::tempdir().unwrap();
        let data = b"line1\r\nline2\r\n".to_vec();
        let (req, hdr, _) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data);
        let ev = r.feed(format!("--{BOUNDARY}--\r\n").as_bytes());
        let meta = completed(&ev).unwrap();
        assert_eq!(meta.received, 14);
        assert_eq!(meta.verified, Some(true));
        assert_eq!(fs::read(tmp.path().join("IMG_1.jpg")).unwrap(), data);
    }

    #[test]
    fn both_terminal_framings_write_same_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let data = b"row\r\n".repeat(40);
        let (req, hdr, crlf_term) = messages(&data);
        let bare_term = format!("--{BOUNDARY}--\r\n").into_bytes();
        for (name, term) in [("crlf", crlf_term), ("bare", bare_term)] {
            let dir = tmp.path().join(name);
            let mut r = Reassembler::new(&dir, clock());
            r.feed(&req);
            r.feed(&hdr);
            for chunk in data.chunks(7) {
                r.feed(chunk);
            }
            assert!(completed(&r.feed(&term)).unwrap().is_complete(), "{name}");
            assert_eq!(fs::read(dir.join("IMG_1.jpg")).unwrap(), data, "{name}");
        }
    }

    #[test]
    fn undeclared_length_keeps_crlf_from_earlier_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let (req, _, _) = messages(b"");
        let hdr = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"9,a,b,,0,0,\"; filename=\"n.txt\"\r\nContent-Type: text/plain\r\n\r\n"
        );
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(hdr.as_bytes());
        r.feed(b"abc\r\n");
        let ev = r.feed(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        assert_eq!(completed(&ev).unwrap().received, 5);
        assert_eq!(fs::read(tmp.path().join("n.txt")).unwrap(), b"abc\r\n");
    }

    #[test]
    fn unopenable_file_still_completes_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("cache");
        fs::write(&blocker, b"a regular file").unwrap();
        let data = body(300);
        let (req, hdr, term) = messages(&data);
        let mut r = Reassembler::new(&blocker, clock());
        r.feed(&req);
        assert!(r.feed(&hdr).is_empty());
        assert!(r.current().unwrap().incomplete);
        assert!(r.feed(&data).is_empty());
        let ev = r.feed(&term);
        let meta = completed(&ev).unwrap();
        assert!(meta.incomplete);
        assert_eq!(meta.received, 0);
        assert!(meta.path.is_none());
        assert_eq!(r.state(), ReassemblerState::Terminated);
    }

    #[test]
    fn failed_append_marks_transfer_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let data = body(300);
        let (req, hdr, term) = messages(&data);
        let mut r = Reassembler::new(tmp.path(), clock());
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&data[..100]);
        // Lose the handle under the reassembler: every later append fails.
        r.sink.as_mut().unwrap().close().unwrap();
        r.feed(&data[100..]);
        let ev = r.feed(&term);
        let meta = completed(&ev).unwrap();
        assert!(meta.incomplete);
        assert!(meta.received < 300);
        assert!(!meta.is_complete());

        // The next upload on the same reassembler is unaffected.
        let next = body(50);
        let (req, hdr, term) = messages(&next);
        r.feed(&req);
        r.feed(&hdr);
        r.feed(&next);
        let meta = completed(&r.feed(&term)).unwrap().clone();
        assert!(meta.is_complete());
        assert_eq!(fs::read(meta.path.unwrap()).unwrap(), next);
    }

    #[test]
    fn writer_part_header_round_trips_through_parser() {
        let w = MultipartWriter::new();
        assert_eq!(w.boundary().len(), 36);
        let hdr = String::from_utf8(w.part_header(&part(b"abc"))).unwrap();
        let line = hdr.lines().nth(1).unwrap();
        let Some(HeaderField::Disposition(d)) = parse_header_line(line).unwrap() else {
            panic!("expected disposition");
        };
        assert_eq!(d.file_name, "IMG_1.jpg");
        assert_eq!(d.total_size, 3);
    }
}
