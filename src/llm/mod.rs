pub mod models;
pub mod providers;

use crate::config::{ModelConfig, SimulationConfig};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

/// Reply used when the model produced no usable query.
pub const NO_SELECT_FOUND: &str = "No SELECT statement could be found in the SQL code";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, question: &str) -> Result<String, LlmError>;

    /// Plain-language explanation of a previously generated answer.
    async fn explain(&self, question: &str, sql: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    backend: String,
    generator: Box<dyn SqlGenerator>,
}

impl LlmManager {
    pub fn new(config: &ModelConfig, simulation: &SimulationConfig) -> Result<Self, LlmError> {
        let generator: Box<dyn SqlGenerator> = match config.backend.as_str() {
            "mistral" => Box::new(providers::mistral::MistralProvider::new(config)?),
            "simulation" => Box::new(providers::simulation::SimulationProvider::new(simulation)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self {
            backend: config.backend.clone(),
            generator,
        })
    }

    /// Wraps an already constructed generator.
    pub fn with_generator(backend: impl Into<String>, generator: Box<dyn SqlGenerator>) -> Self {
        Self {
            backend: backend.into(),
            generator,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub async fn generate_sql(&self, question: &str) -> Result<String, LlmError> {
        self.generator.generate_sql(question).await
    }

    pub async fn explain(&self, question: &str, sql: &str) -> Result<String, LlmError> {
        self.generator.explain(question, sql).await
    }
}

/// Pulls the SQL out of a free-form model reply.
pub fn extract_sql(content: &str) -> String {
    // Try to extract SQL from between ```sql and ``` markers
    if let Some(start) = content.find("```sql") {
        let after = &content[start + 6..];
        if let Some(end) = after.find("```") {
            debug!("Extracted SQL from sql code block");
            return after[..end].trim().to_string();
        }
    }

    // Try alternate syntax without a language specifier: ``` and ```
    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        if let Some(end) = after.find("```") {
            debug!("Extracted SQL from plain code block");
            return after[..end].trim().to_string();
        }
    }

    // Look for a line starting with SELECT, WITH, or another SQL keyword
    let sql_keywords = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];
    let lines: Vec<&str> = content.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim().to_uppercase();
        if sql_keywords.iter().any(|kw| trimmed.starts_with(kw)) {
            let mut sql = line.trim().to_string();
            if !sql.ends_with(';') {
                for next in &lines[i + 1..] {
                    let next = next.trim();
                    if next.is_empty() || next.starts_with("```") {
                        break;
                    }
                    sql.push(' ');
                    sql.push_str(next);
                    if next.ends_with(';') {
                        break;
                    }
                }
            }
            debug!("Extracted SQL using line scanning");
            return sql;
        }
    }

    info!("Could not find SQL markers in model reply, using it as-is");
    content.trim().to_string()
}

static SELECT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

/// True when the text contains a read query worth previewing.
pub fn has_select(sql: &str) -> bool {
    SELECT_KEYWORD.is_match(sql)
}
