use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A character record as the UI saves it in `characters.json`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCharacter {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub img: String,
}

/// Lookup of stored characters by id.
#[async_trait]
pub trait CharacterCatalog: Send + Sync {
    async fn find(&self, character_id: &str) -> Result<Option<CatalogCharacter>>;
}

/// Reads the catalog file on every lookup so edits from the UI are picked up immediately.
pub struct JsonCharacterCatalog {
    path: PathBuf,
}

impl JsonCharacterCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<CatalogCharacter>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read character catalog {:?}", self.path));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse character catalog {:?}", self.path))
    }
}

#[async_trait]
impl CharacterCatalog for JsonCharacterCatalog {
    async fn find(&self, character_id: &str) -> Result<Option<CatalogCharacter>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|character| character.id == character_id))
    }
}
