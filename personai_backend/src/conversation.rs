use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

/// One line of a transcript. Inbound memory carries no timestamp, so it defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "type")]
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodContext {
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub energy: Option<String>,
    #[serde(default)]
    pub relationship_state: Option<String>,
    #[serde(default)]
    pub tension: Option<String>,
}

impl MoodContext {
    pub fn is_empty(&self) -> bool {
        [
            &self.mood,
            &self.energy,
            &self.relationship_state,
            &self.tension,
        ]
        .iter()
        .all(|field| non_blank(field.as_deref()).is_none())
    }
}

/// Everything the prompt builder needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    /// Free text used verbatim in plain mode.
    pub prompt: Option<String>,
    pub character_name: Option<String>,
    pub character_description: Option<String>,
    pub character_personality: Option<String>,
    pub character_background: Option<String>,
    pub tags: Vec<String>,
    pub memory: Vec<HistoryEntry>,
    pub user_message: Option<String>,
    pub scene_type: Option<String>,
    pub mood_context: Option<MoodContext>,
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
