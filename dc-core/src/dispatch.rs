//! Content sniffing: decides which sub-protocol an inbound chunk belongs to.

use crate::directory::{self, DirectoryError, DirectoryRequest};
use crate::multipart::{Reassembler, DISPOSITION_TOKEN};
use crate::negotiate::{self, NegotiateError};
use crate::protocol::FileRequest;

const MULTIPART_MARKER: &str = "multipart/form-data";

/// Classified inbound chunk.
#[derive(Debug)]
pub enum Inbound {
    /// Part of a multipart upload; feed to the reassembler.
    Multipart,
    /// JSON envelope with a `data` member.
    FileRequest(Result<FileRequest, NegotiateError>),
    Directory(Result<DirectoryRequest, DirectoryError>),
    Unknown,
}

/// Classify one chunk. An engaged reassembler claims every chunk until its transfer ends.
pub fn classify(bytes: &[u8], reassembler: &Reassembler) -> Inbound {
    if reassembler.is_engaged() {
        return Inbound::Multipart;
    }
    let text = String::from_utf8_lossy(bytes);
    if text.contains(MULTIPART_MARKER)
        || text.contains(DISPOSITION_TOKEN)
        || reassembler.is_terminal_marker(&text)
    {
        return Inbound::Multipart;
    }
    if is_envelope(&text) {
        return Inbound::FileRequest(negotiate::parse_request(bytes));
    }
    if directory::looks_like_directory(&text) {
        return Inbound::Directory(directory::parse_request(bytes));
    }
    Inbound::Unknown
}

fn is_envelope(text: &str) -> bool {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .map(|v| v.get("data").is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SystemClock;
    use std::sync::Arc;

    fn idle() -> Reassembler {
        Reassembler::new("unused", Arc::new(SystemClock))
    }

    #[test]
    fn multipart_request_header() {
        let chunk = b"POST http://www.test.com HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b1\r\n\r\n";
        assert!(matches!(classify(chunk, &idle()), Inbound::Multipart));
    }

    #[test]
    fn part_header_without_request_header() {
        let chunk = b"--b1\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\n";
        assert!(matches!(classify(chunk, &idle()), Inbound::Multipart));
    }

    #[test]
    fn file_request_envelope() {
        let chunk = br#"{"id":"1","data":{"request":"file","list":[]}}"#;
        assert!(matches!(classify(chunk, &idle()), Inbound::FileRequest(Ok(_))));
        let other = br#"{"id":"1","data":{"request":"call"}}"#;
        assert!(matches!(
            classify(other, &idle()),
            Inbound::FileRequest(Err(NegotiateError::UnsupportedRequest(_)))
        ));
    }

    #[test]
    fn json_without_data_is_unknown() {
        assert!(matches!(classify(br#"{"ping":1}"#, &idle()), Inbound::Unknown));
    }

    #[test]
    fn directory_requests() {
        assert!(matches!(
            classify(b"http:/applicationlist?begin-index=0&app-num=5&sdkVersion=1", &idle()),
            Inbound::Directory(Ok(DirectoryRequest::List { .. }))
        ));
        assert!(matches!(
            classify(b"http:/applicationlist?begin-index=&app-num=5", &idle()),
            Inbound::Directory(Err(DirectoryError::MalformedQuery(_)))
        ));
    }

    #[test]
    fn engaged_reassembler_claims_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = Reassembler::new(tmp.path(), Arc::new(SystemClock));
        r.feed(b"Content-Type: multipart/form-data; boundary=b1\r\n\r\n");
        assert!(r.is_engaged());
        assert!(matches!(
            classify(b"http:/applicationlist?begin-index=0&app-num=1", &r),
            Inbound::Multipart
        ));
    }

    #[test]
    fn binary_noise_is_unknown() {
        assert!(matches!(classify(&[0xff, 0x00, 0x13], &idle()), Inbound::Unknown));
    }
}
