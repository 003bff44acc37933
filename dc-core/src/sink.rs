//! File sink: one destination file per transfer, collision-safe naming.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::integrity::RunningChecksum;

/// Suffix format appended before the extension when the name is taken.
const COLLISION_SUFFIX_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_COLLISION_ATTEMPTS: u32 = 1000;

/// Wall clock used for collision suffixes. Injectable so naming is deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("create file {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("no free file name for {0}")]
    NameExhausted(PathBuf),
    #[error("write: {0}")]
    Write(#[source] io::Error),
    #[error("close: {0}")]
    Close(#[source] io::Error),
    #[error("sink is not open")]
    NotOpen,
}

/// Owns the destination handle of the current transfer.
pub struct FileSink {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    written: u64,
    checksum: RunningChecksum,
}

impl FileSink {
    /// Create the directory if needed and open a new file for `desired_name`.
    /// An existing file is never overwritten: the new one gets a timestamp suffix.
    pub fn open(dir: &Path, desired_name: &str, clock: &dyn Clock) -> Result<Self, SinkError> {
        ensure_dir(dir)?;
        let mut candidate = dir.join(desired_name);
        let mut attempt = 0u32;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(file) => {
                    tracing::debug!(path = %candidate.display(), "sink opened");
                    return Ok(Self {
                        writer: Some(BufWriter::new(file)),
                        path: Some(candidate),
                        written: 0,
                        checksum: RunningChecksum::new(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt >= MAX_COLLISION_ATTEMPTS {
                        return Err(SinkError::NameExhausted(dir.join(desired_name)));
                    }
                    candidate = dir.join(collision_name(desired_name, clock.now(), attempt));
                    attempt += 1;
                }
                Err(source) => {
                    return Err(SinkError::Create {
                        path: candidate,
                        source,
                    })
                }
            }
        }
    }

    /// Write bytes verbatim.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotOpen)?;
        writer.write_all(bytes).map_err(SinkError::Write)?;
        self.checksum.update(bytes);
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Flush and release the handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush().map_err(SinkError::Close)?;
        writer
            .into_inner()
            .map_err(|e| SinkError::Close(e.into_error()))?
            .sync_all()
            .map_err(SinkError::Close)
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Hex MD5 of every byte appended so far.
    pub fn checksum_hex(&self) -> String {
        self.checksum.hex()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing sink on drop");
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<(), SinkError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|source| SinkError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %dir.display(), "created transfer directory");
    Ok(())
}

/// `photo.jpg` → `photo_20231028_110641.jpg`; later attempts add `_N`.
fn collision_name(name: &str, now: NaiveDateTime, attempt: u32) -> String {
    let stamp = now.format(COLLISION_SUFFIX_FORMAT);
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    if attempt == 0 {
        format!("{stem}_{stamp}{ext}")
    } else {
        format!("{stem}_{stamp}_{attempt}{ext}")
    }
}
