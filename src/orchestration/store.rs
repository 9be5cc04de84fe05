//! Durable history persistence
//!
//! An instance's history is the only state the engine keeps. The JSONL store
//! writes one file per instance, one event per line, and flushes every append
//! before the engine acts on it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::errors::HistoryError;
use super::history::HistoryEvent;

/// Storage for append-only instance histories
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append events; they must be durable when this returns
    async fn append(&self, instance_id: &str, events: &[HistoryEvent]) -> Result<(), HistoryError>;

    /// Full history of an instance; empty when the instance is unknown
    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, HistoryError>;

    async fn exists(&self, instance_id: &str) -> Result<bool, HistoryError>;

    /// Known instance ids, sorted
    async fn list_instances(&self) -> Result<Vec<String>, HistoryError>;
}

/// Reject ids that could escape the history directory
pub fn validate_instance_id(instance_id: &str) -> Result<(), HistoryError> {
    let valid = !instance_id.is_empty()
        && instance_id.len() <= 128
        && instance_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(HistoryError::InvalidInstanceId(instance_id.to_string()))
    }
}

/// Process-local history store, used by tests and `run` without a state dir
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    histories: Arc<RwLock<HashMap<String, Vec<HistoryEvent>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, instance_id: &str, events: &[HistoryEvent]) -> Result<(), HistoryError> {
        validate_instance_id(instance_id)?;
        let mut histories = self.histories.write().await;
        histories
            .entry(instance_id.to_string())
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, HistoryError> {
        let histories = self.histories.read().await;
        Ok(histories.get(instance_id).cloned().unwrap_or_default())
    }

    async fn exists(&self, instance_id: &str) -> Result<bool, HistoryError> {
        Ok(self.histories.read().await.contains_key(instance_id))
    }

    async fn list_instances(&self) -> Result<Vec<String>, HistoryError> {
        let mut ids: Vec<String> = self.histories.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// File-backed store: `<dir>/<instance_id>.jsonl`
pub struct JsonlHistoryStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, instance_id: &str) -> Result<PathBuf, HistoryError> {
        validate_instance_id(instance_id)?;
        Ok(self.dir.join(format!("{}.jsonl", instance_id)))
    }
}

/// Parse JSONL history, tolerating a torn final line from an interrupted write
fn parse_history(instance_id: &str, content: &str) -> Result<Vec<HistoryEvent>, HistoryError> {
    let lines: Vec<&str> = content.lines().collect();
    let last_index = lines.len().saturating_sub(1);
    let mut events = Vec::with_capacity(lines.len());

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) if index == last_index && !content.ends_with('\n') => {
                warn!(
                    "Ignoring incomplete trailing history line for {}: {}",
                    instance_id, e
                );
            }
            Err(e) => {
                return Err(HistoryError::Corrupt {
                    instance_id: instance_id.to_string(),
                    line: index + 1,
                    reason: e.to_string(),
                })
            }
        }
    }

    Ok(events)
}

struct FileEnd {
    len: u64,
    truncated: bool,
}

/// Cut a partially written last line so the next event starts on its own line
async fn discard_torn_tail(file: &mut File) -> std::io::Result<FileEnd> {
    const CHUNK: u64 = 4096;

    let len = file.metadata().await?.len();
    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            end = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    if end != len {
        file.set_len(end).await?;
    }
    Ok(FileEnd {
        len: end,
        truncated: end != len,
    })
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, instance_id: &str, events: &[HistoryEvent]) -> Result<(), HistoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let path = self.path_for(instance_id)?;

        let mut buffer = String::new();
        for event in events {
            buffer.push_str(&serde_json::to_string(event)?);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        let end = discard_torn_tail(&mut file).await?;
        if end.truncated {
            warn!(
                "Dropped incomplete trailing history line for {} before appending",
                instance_id
            );
        }
        file.seek(SeekFrom::Start(end.len)).await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        debug!("Appended {} event(s) to {:?}", events.len(), path);
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, HistoryError> {
        let path = self.path_for(instance_id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => parse_history(instance_id, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, instance_id: &str) -> Result<bool, HistoryError> {
        let path = self.path_for(instance_id)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn list_instances(&self) -> Result<Vec<String>, HistoryError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
