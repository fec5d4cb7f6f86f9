use crate::config::SimulationConfig;
use crate::llm::models::{Condition, FixtureEntry};
use crate::llm::{LlmError, SqlGenerator};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const UNKNOWN_QUESTION: &str = "I don't have information about this patient in the database. \
Please contact the hospital for more information.";

/// Answers from a static fixture so the UI can be demoed without API keys.
pub struct SimulationProvider {
    entries: Vec<FixtureEntry>,
    delay: Duration,
}

impl SimulationProvider {
    pub fn new(config: &SimulationConfig) -> Result<Self, LlmError> {
        let entries = load_fixture(&config.fixture)?;
        info!(
            "Loaded {} simulated answers from {}",
            entries.len(),
            config.fixture.display()
        );
        Ok(Self::from_entries(entries, Duration::from_millis(config.delay_ms)))
    }

    pub fn from_entries(entries: Vec<FixtureEntry>, delay: Duration) -> Self {
        Self { entries, delay }
    }

    fn lookup(&self, question: &str) -> Option<&FixtureEntry> {
        let question = question.trim();
        self.entries.iter().find(|entry| entry.question.trim() == question)
    }

    async fn think(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn load_fixture(path: &Path) -> Result<Vec<FixtureEntry>, LlmError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        LlmError::ConfigError(format!("cannot read simulation fixture {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        LlmError::ConfigError(format!("invalid simulation fixture {}: {}", path.display(), e))
    })
}

/// Numbered list, one condition per line: `1. name (start, end)`.
pub fn format_conditions(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{}. {} ({}, {})",
                i + 1,
                c.concept_name,
                c.condition_start_date.as_deref().unwrap_or("None"),
                c.condition_end_date.as_deref().unwrap_or("None")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SqlGenerator for SimulationProvider {
    async fn generate_sql(&self, question: &str) -> Result<String, LlmError> {
        self.think().await;
        match self.lookup(question) {
            Some(entry) => Ok(format_conditions(&entry.response_sql)),
            None => {
                debug!("No simulated answer for question: {}", question);
                Ok(UNKNOWN_QUESTION.to_string())
            }
        }
    }

    // Canned explanations are keyed by question, the generated text is ignored
    async fn explain(&self, question: &str, _sql: &str) -> Result<String, LlmError> {
        self.think().await;
        Ok(self
            .lookup(question)
            .map(|entry| entry.response_easy_language.clone())
            .unwrap_or_else(|| UNKNOWN_QUESTION.to_string()))
    }
}
