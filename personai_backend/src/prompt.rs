//! Turns a [`ConversationContext`] into the text sent to the model.

use serde::{Deserialize, Serialize};

use crate::config::PromptConfig;
use crate::conversation::{non_blank, ConversationContext, HistoryEntry, MoodContext, Role};

pub const HEADER_MARKER: &str = "### Character Roleplay Instructions ###";
pub const PROFILE_MARKER: &str = "**Character Profile:**";
pub const CONTEXT_MARKER: &str = "**Conversation Context:**";
pub const HINTS_MARKER: &str = "**Scene Hints:**";
pub const MESSAGE_MARKER: &str = "**User Message:**";
pub const INSTRUCTIONS_MARKER: &str = "**Instructions:**";
pub const RESPONSE_MARKER: &str = "**Response:**";

/// Section headers the backend is known to echo back; the sanitizer strips all of them.
pub const PROMPT_ECHO_MARKERS: [&str; 7] = [
    HEADER_MARKER,
    PROFILE_MARKER,
    CONTEXT_MARKER,
    HINTS_MARKER,
    MESSAGE_MARKER,
    INSTRUCTIONS_MARKER,
    RESPONSE_MARKER,
];

pub const UNKNOWN_NAME: &str = "Unknown";
pub const NO_DESCRIPTION: &str = "No description";
pub const DEFAULT_PERSONALITY: &str = "Friendly";
pub const UNKNOWN_BACKGROUND: &str = "Unknown background";
pub const NO_TAGS: &str = "No specific context";
pub const NO_HISTORY: &str = "No previous messages.";
pub const NO_MESSAGE: &str = "(no message)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    Plain,
    Character,
}

impl PromptMode {
    /// Anything other than `character` falls back to plain text.
    pub fn from_type_field(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("character") => PromptMode::Character,
            _ => PromptMode::Plain,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, context: &ConversationContext, mode: PromptMode) -> String {
        match mode {
            PromptMode::Plain => context.prompt.clone().unwrap_or_default(),
            PromptMode::Character => self.build_character_prompt(context),
        }
    }

    fn build_character_prompt(&self, context: &ConversationContext) -> String {
        let name = non_blank(context.character_name.as_deref());
        let profile_name = name.unwrap_or(UNKNOWN_NAME);
        let speaker = name.unwrap_or("the character");

        let mut hints = vec![format!("{} {}", HINTS_MARKER, format_tags(&context.tags))];
        hints.extend(context_hints(context));

        format!(
            "{header}\n\n\
             You are {speaker}. Fully take on this role and answer only as {speaker} would.\n\n\
             {profile}\n\
             - Name: {name}\n\
             - Description: {description}\n\
             - Personality: {personality}\n\
             - Background: {background}\n\n\
             {context_marker}\n\
             {history}\n\n\
             {hints}\n\n\
             {message_marker}\n\
             {message}\n\n\
             {instructions}\n\
             - Write in third person narrative, describing {speaker}'s actions and thoughts from the outside\n\
             - Put spoken dialogue in \"double quotes\" and physical actions in *asterisks*\n\
             - {length_target}\n\
             - Stay in character and never mention being an AI\n\n\
             {response}",
            header = HEADER_MARKER,
            speaker = speaker,
            profile = PROFILE_MARKER,
            name = profile_name,
            description =
                non_blank(context.character_description.as_deref()).unwrap_or(NO_DESCRIPTION),
            personality =
                non_blank(context.character_personality.as_deref()).unwrap_or(DEFAULT_PERSONALITY),
            background =
                non_blank(context.character_background.as_deref()).unwrap_or(UNKNOWN_BACKGROUND),
            context_marker = CONTEXT_MARKER,
            history = self.summarize_memory(&context.memory, profile_name),
            hints = hints.join("\n"),
            message_marker = MESSAGE_MARKER,
            message = non_blank(context.user_message.as_deref()).unwrap_or(NO_MESSAGE),
            instructions = INSTRUCTIONS_MARKER,
            length_target = self.config.length_target,
            response = RESPONSE_MARKER,
        )
    }

    fn summarize_memory(&self, memory: &[HistoryEntry], character: &str) -> String {
        let start = memory.len().saturating_sub(self.config.memory_window);
        let lines = memory[start..]
            .iter()
            .map(|entry| match entry.role {
                Role::User => format!("User: \"{}\"", entry.content),
                Role::Assistant => format!(
                    "{}: {}",
                    character,
                    excerpt(entry.content.trim(), self.config.assistant_excerpt_chars)
                ),
            })
            .collect::<Vec<_>>();

        if lines.is_empty() {
            NO_HISTORY.to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn format_tags(tags: &[String]) -> String {
    let tags = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>();
    if tags.is_empty() {
        NO_TAGS.to_string()
    } else {
        tags.join(", ")
    }
}

/// Scene type and mood compose onto the tag line; each is omitted when absent.
fn context_hints(context: &ConversationContext) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(scene) = non_blank(context.scene_type.as_deref()) {
        hints.push(format!("Scene type: {}", scene));
    }
    if let Some(mood) = context.mood_context.as_ref().filter(|m| !m.is_empty()) {
        hints.push(format_mood(mood));
    }
    hints
}

fn format_mood(mood: &MoodContext) -> String {
    [
        ("Mood", &mood.mood),
        ("Energy", &mood.energy),
        ("Relationship", &mood.relationship_state),
        ("Tension", &mood.tension),
    ]
    .iter()
    .filter_map(|(label, value)| non_blank(value.as_deref()).map(|v| format!("{}: {}", label, v)))
    .collect::<Vec<_>>()
    .join(" | ")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
