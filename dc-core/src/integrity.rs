//! Integrity: running MD5 over received body bytes, verified against the declared checksum.

use md5::{Digest, Md5};

/// Incremental digest fed by the file sink as bytes are appended.
#[derive(Clone, Default)]
pub struct RunningChecksum {
    hasher: Md5,
}

impl RunningChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Lowercase hex digest of everything seen so far.
    pub fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Hash a whole payload. Returns lowercase hex.
pub fn md5_hex(payload: &[u8]) -> String {
    let mut c = RunningChecksum::new();
    c.update(payload);
    c.hex()
}

/// Compare a computed digest with the peer's declared checksum.
/// Returns `None` when the declared value is not a 32-digit hex MD5 (nothing to check).
pub fn verify(computed_hex: &str, declared: &str) -> Option<bool> {
    let declared = declared.trim();
    if declared.len() != 32 || !declared.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(computed_hex.eq_ignore_ascii_case(declared))
}
