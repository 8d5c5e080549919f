use std::sync::Arc;

use anyhow::Result;

use crate::character_catalog::{CharacterCatalog, JsonCharacterCatalog};
use crate::config::ServiceConfig;
use crate::llm_client::{InferenceBackend, LlmClient};
use crate::store::{AssetResolver, HistoryStore, RecentChatsIndex};
use crate::turn::TurnService;

pub struct BackendRuntime {
    pub config: ServiceConfig,
    pub turns: Arc<TurnService>,
}

pub struct BackendRuntimeBuilder {
    config: ServiceConfig,
    backend: Option<Arc<dyn InferenceBackend>>,
    catalog: Option<Arc<dyn CharacterCatalog>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            backend: None,
            catalog: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CharacterCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;

        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(LlmClient::from_config(&config)) as Arc<dyn InferenceBackend>
        });
        let catalog = self.catalog.unwrap_or_else(|| {
            Arc::new(JsonCharacterCatalog::new(config.storage.characters_path()))
                as Arc<dyn CharacterCatalog>
        });

        let history = Arc::new(HistoryStore::new(
            config.storage.history_dir(),
            config.storage.history_limit,
        ));
        let recent = Arc::new(RecentChatsIndex::new(
            config.storage.recent_chats_path(),
            config.storage.recent_limit,
            AssetResolver::new(&config.assets),
        ));
        tracing::info!(
            "History in {:?} (cap {}), recent chats in {:?} (cap {})",
            history.dir(),
            config.storage.history_limit,
            recent.path(),
            config.storage.recent_limit
        );

        let turns = Arc::new(TurnService::new(&config, backend, history, recent, catalog));

        Ok(BackendRuntime { config, turns })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: ServiceConfig) -> Result<Self> {
        BackendRuntimeBuilder::new(config).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character_catalog::CatalogCharacter;
    use crate::config::GenerationOptions;
    use crate::llm_client::InferenceResult;
    use crate::turn::{TurnRequest, TurnStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedBackend;

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn infer(
            &self,
            model: &str,
            _prompt: &str,
            _options: &GenerationOptions,
            _timeout: Duration,
        ) -> InferenceResult {
            InferenceResult::Success {
                text: format!("from {model}"),
            }
        }
    }

    struct OneCharacter;

    #[async_trait]
    impl CharacterCatalog for OneCharacter {
        async fn find(&self, character_id: &str) -> Result<Option<CatalogCharacter>> {
            Ok(Some(CatalogCharacter {
                id: character_id.to_string(),
                name: "Catalog Name".to_string(),
                img: String::new(),
            }))
        }
    }

    fn temp_config(dir: &tempfile::TempDir) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.storage.data_dir = dir.path().join("data").to_string_lossy().to_string();
        config.storage.history_limit = 4;
        config.llm_model = "test-model".to_string();
        config
    }

    #[tokio::test]
    async fn builder_wires_injected_collaborators_and_config_caps() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = BackendRuntimeBuilder::new(temp_config(&dir))
            .with_backend(Arc::new(FixedBackend))
            .with_catalog(Arc::new(OneCharacter))
            .build()
            .unwrap();

        let request = TurnRequest {
            kind: Some("character".to_string()),
            character_id: Some("c1".to_string()),
            persona_id: Some("p1".to_string()),
            user_message: Some("hi".to_string()),
            ..TurnRequest::default()
        };
        for _ in 0..3 {
            let outcome = runtime.turns.run_turn(Some(request.clone())).await;
            assert_eq!(outcome.response.status, TurnStatus::Success);
            assert_eq!(outcome.response.response, "from test-model");
        }

        assert_eq!(runtime.turns.history().read("c1", "p1").await.len(), 4);
        let recent = runtime.turns.recent().list().await;
        assert_eq!(recent[0].name, "Catalog Name");
    }

    #[test]
    fn bootstrap_uses_configured_paths() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = BackendRuntime::bootstrap(temp_config(&dir)).unwrap();
        assert_eq!(
            runtime.turns.history().dir(),
            dir.path().join("data").join("history")
        );
        assert_eq!(runtime.turns.default_model(), "test-model");
    }
}
