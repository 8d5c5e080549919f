use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{log_best_effort, read_json, write_json_atomic, ConversationKey};
use crate::config::AssetConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentChatEntry {
    pub character_id: String,
    pub persona_id: String,
    pub name: String,
    pub img: String,
    /// Unix timestamp, seconds.
    pub last_used: i64,
}

impl RecentChatEntry {
    fn matches(&self, key: &ConversationKey) -> bool {
        self.character_id == key.character_id && self.persona_id == key.persona_id
    }
}

/// Maps a character image reference onto a path the UI can load.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    public_root: PathBuf,
    asset_prefix: String,
    default_image: String,
}

impl AssetResolver {
    pub fn new(config: &AssetConfig) -> Self {
        let mut asset_prefix = config.asset_prefix.trim().to_string();
        if !asset_prefix.starts_with('/') {
            asset_prefix.insert(0, '/');
        }
        if !asset_prefix.ends_with('/') {
            asset_prefix.push('/');
        }
        Self {
            public_root: PathBuf::from(&config.public_dir),
            asset_prefix,
            default_image: config.default_image.clone(),
        }
    }

    /// `aria.png`, `/aria.png` and `/assets/characters/aria.png` all become
    /// `/assets/characters/aria.png`.
    pub fn normalize(&self, img: &str) -> String {
        let img = img.trim();
        if img.starts_with(&self.asset_prefix) {
            return img.to_string();
        }
        let relative_prefix = self.asset_prefix.trim_start_matches('/');
        let bare = img.trim_start_matches('/');
        let bare = bare.strip_prefix(relative_prefix).unwrap_or(bare);
        format!("{}{}", self.asset_prefix, bare)
    }

    /// The normalized path when the file exists under the public root, else the default image.
    pub async fn resolve(&self, img: Option<&str>) -> String {
        let Some(img) = img.map(str::trim).filter(|i| !i.is_empty()) else {
            return self.default_image.clone();
        };

        let normalized = self.normalize(img);
        if normalized.contains("..") {
            return self.default_image.clone();
        }
        let on_disk = self.public_root.join(normalized.trim_start_matches('/'));
        match tokio::fs::try_exists(&on_disk).await {
            Ok(true) => normalized,
            _ => {
                tracing::debug!(
                    "Character image {:?} not found under {:?}, using default",
                    normalized,
                    self.public_root
                );
                self.default_image.clone()
            }
        }
    }
}

/// Most-recently-used conversations, newest first, persisted as a single JSON file.
pub struct RecentChatsIndex {
    path: PathBuf,
    limit: usize,
    assets: AssetResolver,
    lock: Mutex<()>,
}

impl RecentChatsIndex {
    pub fn new(path: impl Into<PathBuf>, limit: usize, assets: AssetResolver) -> Self {
        Self {
            path: path.into(),
            limit,
            assets,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that a conversation was just used. Never fails; problems are logged.
    pub async fn upsert(
        &self,
        character_id: &str,
        persona_id: &str,
        name: &str,
        img: Option<&str>,
        timestamp: i64,
    ) {
        let Some(key) = ConversationKey::new(character_id, persona_id) else {
            tracing::info!(
                "Skipping recent-chats update for invalid ids (character_id={:?}, persona_id={:?})",
                character_id,
                persona_id
            );
            return;
        };
        log_best_effort(
            "Recent chats upsert",
            self.try_upsert(&key, name, img, timestamp).await,
        );
    }

    pub async fn try_upsert(
        &self,
        key: &ConversationKey,
        name: &str,
        img: Option<&str>,
        timestamp: i64,
    ) -> Result<()> {
        let img = self.assets.resolve(img).await;

        let _guard = self.lock.lock().await;
        let mut entries = self.load_for_update().await;

        let entry = RecentChatEntry {
            character_id: key.character_id.clone(),
            persona_id: key.persona_id.clone(),
            name: name.to_string(),
            img,
            last_used: timestamp,
        };
        // The touched conversation goes to the front so it wins ties in the stable sort.
        entries.retain(|existing| !existing.matches(key));
        entries.insert(0, entry);
        entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        entries.truncate(self.limit);

        write_json_atomic(&self.path, &entries).await
    }

    /// Current index, newest first; empty when missing or unreadable.
    pub async fn list(&self) -> Vec<RecentChatEntry> {
        match read_json::<Vec<RecentChatEntry>>(&self.path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("Failed to load recent chats {:?}: {:#}", self.path, error);
                Vec::new()
            }
        }
    }

    /// Drops entries matching `predicate`; returns how many were removed.
    pub async fn remove_where<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&RecentChatEntry) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_for_update().await;
        let before = entries.len();
        entries.retain(|entry| !predicate(entry));
        let removed = before - entries.len();
        if removed > 0 {
            write_json_atomic(&self.path, &entries).await?;
        }
        Ok(removed)
    }

    pub async fn remove(&self, key: &ConversationKey) -> Result<bool> {
        Ok(self.remove_where(|entry| entry.matches(key)).await? > 0)
    }

    pub async fn remove_character(&self, character_id: &str) -> Result<usize> {
        self.remove_where(|entry| entry.character_id == character_id)
            .await
    }

    async fn load_for_update(&self) -> Vec<RecentChatEntry> {
        match read_json::<Vec<RecentChatEntry>>(&self.path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    "Unreadable recent chats {:?}, rebuilding: {:#}",
                    self.path,
                    error
                );
                Vec::new()
            }
        }
    }
}
