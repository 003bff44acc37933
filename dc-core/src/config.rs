//! Engine configuration shared by every session of a call.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default directory for received files.
pub const DEFAULT_CACHE_DIR: &str = "./dc-cache";

/// Default delay between `Closing` and `Closed`.
pub const DEFAULT_CLOSE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where received files are written.
    pub cache_dir: PathBuf,
    pub close_delay_ms: u64,
    /// Peer call identifier, echoed in app list responses.
    pub call_id: String,
    pub phone_number: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            close_delay_ms: DEFAULT_CLOSE_DELAY_MS,
            call_id: String::new(),
            phone_number: String::new(),
        }
    }
}

impl EngineConfig {
    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms)
    }
}
