use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{log_best_effort, read_json, write_json_atomic, ConversationKey, KeyedLocks};
use crate::conversation::{HistoryEntry, Role};

/// Bounded transcripts, one JSON file per (character, persona) pair.
pub struct HistoryStore {
    dir: PathBuf,
    limit: usize,
    locks: KeyedLocks<PathBuf>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            dir: dir.into(),
            limit,
            locks: KeyedLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ConversationKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Records one turn. Never fails: invalid ids and I/O errors are logged and dropped.
    pub async fn append(
        &self,
        character_id: &str,
        persona_id: &str,
        user_message: &str,
        ai_message: &str,
        timestamp: &str,
    ) {
        let Some(key) = ConversationKey::new(character_id, persona_id) else {
            tracing::info!(
                "Skipping history write for invalid ids (character_id={:?}, persona_id={:?})",
                character_id,
                persona_id
            );
            return;
        };
        log_best_effort(
            "History append",
            self.try_append(&key, user_message, ai_message, timestamp)
                .await,
        );
    }

    pub async fn try_append(
        &self,
        key: &ConversationKey,
        user_message: &str,
        ai_message: &str,
        timestamp: &str,
    ) -> Result<()> {
        let path = self.path_for(key);
        let lock = self.locks.lock_for(&path);
        let _guard = lock.lock().await;

        let mut entries = match read_json::<Vec<HistoryEntry>>(&path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    "Unreadable transcript {:?}, starting a fresh one: {:#}",
                    path,
                    error
                );
                Vec::new()
            }
        };

        entries.push(HistoryEntry::new(Role::User, user_message, timestamp));
        entries.push(HistoryEntry::new(Role::Assistant, ai_message, timestamp));
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }

        write_json_atomic(&path, &entries)
            .await
            .with_context(|| format!("Failed to persist transcript for {}", key.file_name()))?;
        tracing::debug!("Transcript {:?} now holds {} entries", path, entries.len());
        Ok(())
    }

    /// The stored transcript, or an empty one when absent, unreadable or keyed by invalid ids.
    pub async fn read(&self, character_id: &str, persona_id: &str) -> Vec<HistoryEntry> {
        let Some(key) = ConversationKey::new(character_id, persona_id) else {
            return Vec::new();
        };
        let path = self.path_for(&key);
        match read_json::<Vec<HistoryEntry>>(&path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("Failed to load transcript {:?}: {:#}", path, error);
                Vec::new()
            }
        }
    }

    /// Removes one transcript. Returns whether a file was deleted.
    pub async fn delete(&self, key: &ConversationKey) -> Result<bool> {
        self.delete_path(&self.path_for(key)).await
    }

    async fn delete_path(&self, path: &Path) -> Result<bool> {
        let lock = self.locks.lock_for(&path.to_path_buf());
        let _guard = lock.lock().await;
        remove_if_present(path).await
    }

    /// Removes every transcript belonging to `character_id`, whatever the persona.
    pub async fn delete_all_for_character(&self, character_id: &str) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to list history dir {:?}", self.dir));
            }
        };

        let prefix = ConversationKey::character_prefix(character_id);
        let mut removed = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("Failed to list history dir {:?}", self.dir))?
        {
            let file_name = entry.file_name();
            // Encoded ids contain no `_`, so the remainder must be a bare persona part.
            let owned = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(".json"))
                .is_some_and(|persona| !persona.is_empty() && !persona.contains('_'));
            if owned && self.delete_path(&entry.path()).await? {
                removed += 1;
            }
        }

        tracing::info!(
            "Removed {} transcript(s) for character {}",
            removed,
            character_id
        );
        Ok(removed)
    }
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error).with_context(|| format!("Failed to remove {:?}", path)),
    }
}
