//! Fallback ledger: the durable, append-only record of attempted fallbacks.
//!
//! [`JsonFileLedger`] keeps every event in one JSON document,
//! `{ "fallbacks": [ ... ] }`. Each append is a read/append/write-back under
//! an exclusive lock on a sidecar `<file>.lock`, so concurrent runs against
//! the same file never drop each other's events. The document is replaced
//! through a temp file and rename, so readers never see a partial write.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use cascade_types::{CascadeError, FallbackEvent, Result};

#[async_trait]
pub trait FallbackLedger: Send + Sync {
    /// Durably record one event. Never rewrites or drops earlier events.
    async fn append(&self, event: &FallbackEvent) -> Result<()>;

    /// Events whose timestamp falls within the trailing `window`, oldest first.
    async fn recent(&self, window: Duration) -> Result<Vec<FallbackEvent>>;
}

/// Start of the trailing window, or `None` when the window reaches past the
/// representable range (every event qualifies).
fn window_start(window: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(window).ok()?;
    Utc::now().checked_sub_signed(delta)
}

fn within(events: impl IntoIterator<Item = FallbackEvent>, window: Duration) -> Vec<FallbackEvent> {
    let start = window_start(window);
    events
        .into_iter()
        .filter(|e| start.map_or(true, |s| e.timestamp >= s))
        .collect()
}

// ---------------------------------------------------------------------------
// JsonFileLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    fallbacks: Vec<FallbackEvent>,
}

/// JSON-file ledger shared safely between processes.
#[derive(Debug, Clone)]
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every event ever recorded, oldest first.
    pub async fn all(&self) -> Result<Vec<FallbackEvent>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = LedgerLock::shared(&path)?;
            Ok(read_document(&path)?.fallbacks)
        })
        .await
        .map_err(|e| CascadeError::Join(e.to_string()))?
    }
}

#[async_trait]
impl FallbackLedger for JsonFileLedger {
    async fn append(&self, event: &FallbackEvent) -> Result<()> {
        let path = self.path.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || append_blocking(&path, event))
            .await
            .map_err(|e| CascadeError::Join(e.to_string()))?
    }

    async fn recent(&self, window: Duration) -> Result<Vec<FallbackEvent>> {
        Ok(within(self.all().await?, window))
    }
}

fn append_blocking(path: &Path, event: FallbackEvent) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let _lock = LedgerLock::exclusive(path)?;
    let mut document = read_document(path)?;
    document.fallbacks.push(event);
    write_document(path, &document)?;
    tracing::debug!(
        path = %path.display(),
        total = document.fallbacks.len(),
        "Fallback event appended"
    );
    Ok(())
}

/// A missing or empty file is an empty ledger.
fn read_document(path: &Path) -> Result<LedgerDocument> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LedgerDocument::default()),
        Err(e) => return Err(e.into()),
    };
    if data.trim().is_empty() {
        return Ok(LedgerDocument::default());
    }
    Ok(serde_json::from_str(&data)?)
}

fn write_document(path: &Path, document: &LedgerDocument) -> Result<()> {
    let tmp = sidecar(path, "tmp");
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Advisory lock held on `<ledger>.lock` for as long as the guard lives.
#[derive(Debug)]
struct LedgerLock {
    file: File,
}

impl LedgerLock {
    fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive().map_err(|e| lock_error(path, e))?;
        Ok(Self { file })
    }

    fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        FileExt::lock_shared(&file).map_err(|e| lock_error(path, e))?;
        Ok(Self { file })
    }

    fn open(path: &Path) -> Result<File> {
        let lock_path = sidecar(path, "lock");
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| lock_error(&lock_path, e))
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_error(path: &Path, err: std::io::Error) -> CascadeError {
    CascadeError::LockFailed {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// In-process ledger for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Mutex<Vec<FallbackEvent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<FallbackEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FallbackLedger for MemoryLedger {
    async fn append(&self, event: &FallbackEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| CascadeError::Other("fallback ledger lock poisoned".into()))?
            .push(event.clone());
        Ok(())
    }

    async fn recent(&self, window: Duration) -> Result<Vec<FallbackEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| CascadeError::Other("fallback ledger lock poisoned".into()))?
            .clone();
        Ok(within(events, window))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
