use serde::{Deserialize, Serialize};

// One diagnosed condition in a canned answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub concept_name: String,
    pub condition_start_date: Option<String>,
    pub condition_end_date: Option<String>,
}

// A scripted question with its query result and plain-language answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEntry {
    pub question: String,
    #[serde(default)]
    pub response_sql: Vec<Condition>,
    pub response_easy_language: String,
}

// Chat-completion wire types
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}
