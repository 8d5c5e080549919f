//! File-backed conversation state: per-pair transcripts and the recent-chats index.
//!
//! Both stores follow the same discipline: read the whole JSON file, modify in memory,
//! write a sibling temp file and rename it over the original. Writers are serialized
//! in-process so concurrent turns never lose each other's updates.

pub mod history;
pub mod recent;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub use history::HistoryStore;
pub use recent::{AssetResolver, RecentChatEntry, RecentChatsIndex};

/// Sentinel the UI sends when it has no id for one side of the conversation.
pub const UNKNOWN_ID: &str = "unknown";

/// Conversation identity: (character_id, persona_id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub character_id: String,
    pub persona_id: String,
}

impl ConversationKey {
    /// Returns `None` for ids that must not be persisted: empty, the `"unknown"` sentinel,
    /// or anything that could escape the history directory.
    pub fn new(character_id: &str, persona_id: &str) -> Option<Self> {
        if is_valid_id(character_id) && is_valid_id(persona_id) {
            Some(Self {
                character_id: character_id.to_string(),
                persona_id: persona_id.to_string(),
            })
        } else {
            None
        }
    }

    /// `{character_id}_{persona_id}.json`, with `%` and `_` inside each id percent-encoded
    /// so the first `_` is always the separator and distinct pairs never share a file.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            encode_id(&self.character_id),
            encode_id(&self.persona_id)
        )
    }

    /// File name prefix shared by every transcript of `character_id`.
    pub fn character_prefix(character_id: &str) -> String {
        format!("{}_", encode_id(character_id))
    }
}

fn encode_id(id: &str) -> String {
    id.replace('%', "%25").replace('_', "%5F")
}

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != UNKNOWN_ID
        && !id.contains(['/', '\\'])
        && !id.contains("..")
}

/// Logs a failed bookkeeping step and discards it. Used for every side effect that must
/// not change the reply the caller sees.
pub fn log_best_effort(operation: &str, result: Result<()>) {
    if let Err(error) = result {
        tracing::warn!("{} failed (non-fatal): {:#}", operation, error);
    }
}

/// One async mutex per key, created on first use. Entries nobody holds are pruned on the
/// next lookup, so the map only tracks keys with a writer in flight.
pub(crate) struct KeyedLocks<K> {
    locks: std::sync::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut guard = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|existing, lock| existing == key || Arc::strong_count(lock) > 1);
        guard
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Reads a JSON document; a missing file is `Ok(None)`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("Failed to read {:?}", path));
        }
    };
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(value))
}

/// Pretty-prints `value` into a temp file next to `path`, then renames it into place so a
/// reader sees either the old document or the new one, never a partial write.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("store");
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(error) = write_synced(&tmp_path, json.as_bytes()).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(error).with_context(|| format!("Failed to write {:?}", tmp_path));
    }
    if let Err(error) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(error).with_context(|| format!("Failed to replace {:?}", path));
    }
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
