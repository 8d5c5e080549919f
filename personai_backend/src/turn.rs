//! One chat turn end to end: prompt, inference, cleanup, bookkeeping.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::character_catalog::{CatalogCharacter, CharacterCatalog};
use crate::config::{GenerationOptions, ServiceConfig};
use crate::conversation::{non_blank, ConversationContext, HistoryEntry, MoodContext};
use crate::llm_client::{InferenceBackend, InferenceResult, GENERATE_API};
use crate::prompt::{PromptBuilder, PromptMode};
use crate::sanitizer;
use crate::store::{ConversationKey, HistoryStore, RecentChatsIndex};

pub const NO_DATA_MESSAGE: &str = "No data received";
pub const TIMEOUT_MESSAGE: &str = "[Timeout - the model took too long to respond]";

/// Inbound chat turn as posted by the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub character_description: Option<String>,
    #[serde(default)]
    pub character_personality: Option<String>,
    #[serde(default)]
    pub character_background: Option<String>,
    #[serde(default)]
    pub memory: Vec<HistoryEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub character_img: Option<String>,
    #[serde(default)]
    pub scene_type: Option<String>,
    #[serde(default)]
    pub mood: Option<MoodContext>,
}

impl TurnRequest {
    /// True when nothing at all was supplied (e.g. `{}`).
    pub fn is_empty(&self) -> bool {
        let text_fields = [
            &self.kind,
            &self.prompt,
            &self.model,
            &self.character_id,
            &self.persona_id,
            &self.character_name,
            &self.character_description,
            &self.character_personality,
            &self.character_background,
            &self.user_message,
            &self.character_img,
            &self.scene_type,
        ];
        text_fields
            .iter()
            .all(|field| non_blank(field.as_deref()).is_none())
            && self.memory.is_empty()
            && self.tags.is_empty()
            && self.mood.as_ref().map_or(true, MoodContext::is_empty)
    }

    fn conversation_key(&self) -> Option<ConversationKey> {
        ConversationKey::new(
            self.character_id.as_deref().unwrap_or_default(),
            self.persona_id.as_deref().unwrap_or_default(),
        )
    }

    fn to_context(&self) -> ConversationContext {
        ConversationContext {
            prompt: self.prompt.clone(),
            character_name: self.character_name.clone(),
            character_description: self.character_description.clone(),
            character_personality: self.character_personality.clone(),
            character_background: self.character_background.clone(),
            tags: self.tags.clone(),
            memory: self.memory.clone(),
            user_message: self.user_message.clone(),
            scene_type: self.scene_type.clone(),
            mood_context: self.mood.clone(),
        }
    }

    /// What the user actually said this turn, for the transcript.
    fn user_text(&self) -> &str {
        non_blank(self.user_message.as_deref())
            .or_else(|| non_blank(self.prompt.as_deref()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Success,
    Error,
    Timeout,
}

/// Outbound JSON. `model_used`/`api_used` are only present on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_used: Option<String>,
    pub status: TurnStatus,
}

impl TurnResponse {
    pub fn success(text: String, model: &str) -> Self {
        Self {
            response: text,
            model_used: Some(model.to_string()),
            api_used: Some(GENERATE_API.to_string()),
            status: TurnStatus::Success,
        }
    }

    pub fn failure(message: String, status: TurnStatus) -> Self {
        Self {
            response: message,
            model_used: None,
            api_used: None,
            status,
        }
    }

    pub fn no_data() -> Self {
        Self::failure(NO_DATA_MESSAGE.to_string(), TurnStatus::Error)
    }

    fn from_failed_inference(result: InferenceResult) -> Self {
        match result {
            InferenceResult::Timeout => {
                Self::failure(TIMEOUT_MESSAGE.to_string(), TurnStatus::Timeout)
            }
            InferenceResult::HttpError { status, body } => Self::failure(
                format!("[Backend error HTTP {}] - {}", status, body),
                TurnStatus::Error,
            ),
            InferenceResult::TransportError { message } => Self::failure(
                format!("[Backend call failed: {}]", message),
                TurnStatus::Error,
            ),
            InferenceResult::Success { text } => Self::failure(text, TurnStatus::Error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    ReceivedInput,
    PromptBuilt,
    AwaitingInference,
    InferenceSucceeded,
    InferenceFailed,
    Persisted,
    PersistSkipped,
    Responded,
}

/// The reply plus the phases the turn went through.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: TurnResponse,
    pub phases: Vec<TurnPhase>,
}

struct PhaseTrace(Vec<TurnPhase>);

impl PhaseTrace {
    fn start() -> Self {
        Self(vec![TurnPhase::ReceivedInput])
    }

    fn enter(&mut self, phase: TurnPhase) {
        tracing::debug!("Turn phase {:?} -> {:?}", self.0.last(), phase);
        self.0.push(phase);
    }

    fn respond(mut self, response: TurnResponse) -> TurnOutcome {
        self.enter(TurnPhase::Responded);
        TurnOutcome {
            response,
            phases: self.0,
        }
    }
}

pub struct TurnService {
    builder: PromptBuilder,
    backend: Arc<dyn InferenceBackend>,
    history: Arc<HistoryStore>,
    recent: Arc<RecentChatsIndex>,
    catalog: Arc<dyn CharacterCatalog>,
    default_model: String,
    options: GenerationOptions,
    timeout: Duration,
}

impl TurnService {
    pub fn new(
        config: &ServiceConfig,
        backend: Arc<dyn InferenceBackend>,
        history: Arc<HistoryStore>,
        recent: Arc<RecentChatsIndex>,
        catalog: Arc<dyn CharacterCatalog>,
    ) -> Self {
        Self {
            builder: PromptBuilder::new(config.prompt.clone()),
            backend,
            history,
            recent,
            catalog,
            default_model: config.llm_model.clone(),
            options: config.generation.clone(),
            timeout: config.llm_timeout(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn recent(&self) -> &RecentChatsIndex {
        &self.recent
    }

    pub async fn run_turn(&self, request: Option<TurnRequest>) -> TurnOutcome {
        let mut trace = PhaseTrace::start();

        let Some(request) = request.filter(|r| !r.is_empty()) else {
            tracing::info!("Rejecting turn with empty payload");
            return trace.respond(TurnResponse::no_data());
        };

        let mode = PromptMode::from_type_field(request.kind.as_deref());
        let key = request.conversation_key();
        let mut context = request.to_context();
        if mode == PromptMode::Character && context.memory.is_empty() {
            if let Some(key) = key.as_ref() {
                context.memory = self
                    .history
                    .read(&key.character_id, &key.persona_id)
                    .await;
            }
        }
        let prompt = self.builder.build(&context, mode);
        trace.enter(TurnPhase::PromptBuilt);

        let model = non_blank(request.model.as_deref())
            .unwrap_or(&self.default_model)
            .to_string();
        tracing::info!(
            "Turn ({:?}) for character={:?} persona={:?} using model {}",
            mode,
            request.character_id,
            request.persona_id,
            model
        );
        tracing::debug!("Prompt:\n{}", prompt);

        trace.enter(TurnPhase::AwaitingInference);
        let result = self
            .backend
            .infer(&model, &prompt, &self.options, self.timeout)
            .await;

        let text = match result {
            InferenceResult::Success { text } => {
                trace.enter(TurnPhase::InferenceSucceeded);
                sanitizer::clean(&text)
            }
            failed => {
                tracing::warn!("Inference failed: {:?}", failed);
                trace.enter(TurnPhase::InferenceFailed);
                trace.enter(TurnPhase::PersistSkipped);
                return trace.respond(TurnResponse::from_failed_inference(failed));
            }
        };

        match key {
            Some(key) => {
                self.record_turn(&request, &key, &text).await;
                trace.enter(TurnPhase::Persisted);
            }
            None => {
                tracing::debug!("No usable conversation ids; turn not recorded");
                trace.enter(TurnPhase::PersistSkipped);
            }
        }

        trace.respond(TurnResponse::success(text, &model))
    }

    /// Transcript append and recent-chats upsert. Both stores swallow their own failures.
    async fn record_turn(&self, request: &TurnRequest, key: &ConversationKey, reply: &str) {
        let supplied_img = non_blank(request.character_img.as_deref());
        let supplied_name = non_blank(request.character_name.as_deref());
        let catalog_entry = if supplied_img.is_none() || supplied_name.is_none() {
            self.lookup_character(&key.character_id).await
        } else {
            None
        };

        let img = supplied_img.map(str::to_string).or_else(|| {
            catalog_entry
                .as_ref()
                .and_then(|c| non_blank(Some(c.img.as_str())))
                .map(str::to_string)
        });
        let name = supplied_name
            .map(str::to_string)
            .or_else(|| {
                catalog_entry
                    .as_ref()
                    .and_then(|c| non_blank(Some(c.name.as_str())))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| key.character_id.clone());

        let now = Utc::now();
        self.history
            .append(
                &key.character_id,
                &key.persona_id,
                request.user_text(),
                reply,
                &now.to_rfc3339(),
            )
            .await;
        self.recent
            .upsert(
                &key.character_id,
                &key.persona_id,
                &name,
                img.as_deref(),
                now.timestamp(),
            )
            .await;
    }

    async fn lookup_character(&self, character_id: &str) -> Option<CatalogCharacter> {
        match self.catalog.find(character_id).await {
            Ok(found) => found,
            Err(error) => {
                tracing::debug!("Character catalog lookup failed (ignored): {:#}", error);
                None
            }
        }
    }
}
