use crate::config::ModelConfig;
use crate::llm::models::{ChatMessage, ChatRequest, ChatResponse};
use crate::llm::{extract_sql, has_select, LlmError, SqlGenerator, NO_SELECT_FOUND};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_API_URL: &str = "https://api.mistral.ai/v1/chat/completions";

/// Client for a (fine-tuned) Mistral model behind the chat-completions API.
pub struct MistralProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl MistralProvider {
    pub fn new(config: &ModelConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                LlmError::ConfigError("API key is required for the mistral backend".to_string())
            })?;

        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model: config.model.clone(),
        })
    }

    fn explain_prompt(&self, question: &str, sql: &str) -> String {
        format!(
            r#"The question `{}` was answered with this SQL query:
```sql
{}
```
Explain in plain language, for someone who does not know SQL, what the query does and what its result means."#,
            question, sql
        )
    }

    async fn chat(&self, content: String) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(content)],
            temperature: 0.1,
        };

        info!("Sending request to Mistral with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Mistral API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}{}",
                status, error_body
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))
    }
}

#[async_trait]
impl SqlGenerator for MistralProvider {
    async fn generate_sql(&self, question: &str) -> Result<String, LlmError> {
        // The fine-tuned model takes the bare question, no prompt template
        let content = self.chat(question.to_string()).await?;
        debug!("Raw reply from Mistral: {}", content);

        let sql = extract_sql(&content);
        if sql.is_empty() || !has_select(&sql) {
            info!("Model reply contained no SELECT statement");
            return Ok(NO_SELECT_FOUND.to_string());
        }
        Ok(sql)
    }

    async fn explain(&self, question: &str, sql: &str) -> Result<String, LlmError> {
        let content = self.chat(self.explain_prompt(question, sql)).await?;
        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn config(api_key: Option<&str>, api_url: Option<String>) -> ModelConfig {
        ModelConfig {
            backend: "mistral".to_string(),
            model: "ft:test".to_string(),
            api_key: api_key.map(str::to_string),
            api_url,
            timeout_secs: 5,
        }
    }

    /// Serves canned chat completions on an ephemeral port; echoes the
    /// request's model and bearer token back so the test can check them.
    async fn fake_api(reply: &'static str) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let content = if auth == "Bearer secret" && body["model"] == "ft:test" {
                    reply.to_string()
                } else {
                    format!("bad request: {} {}", auth, body["model"])
                };
                Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[test]
    fn missing_key_fails_fast() {
        assert!(matches!(
            MistralProvider::new(&config(None, None)),
            Err(LlmError::ConfigError(_))
        ));
        assert!(matches!(
            MistralProvider::new(&config(Some("  "), None)),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    fn defaults_to_public_endpoint() {
        let provider = MistralProvider::new(&config(Some("k"), None)).unwrap();
        assert_eq!(provider.api_url, DEFAULT_API_URL);
    }

    #[tokio::test]
    async fn generates_sql_from_fenced_reply() {
        let url = fake_api("```sql\nSELECT * FROM person WHERE person_id = 35;\n```").await;
        let provider = MistralProvider::new(&config(Some("secret"), Some(url))).unwrap();

        let sql = provider
            .generate_sql("Please retrieve the medical record of patient 35")
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM person WHERE person_id = 35;");
    }

    #[tokio::test]
    async fn reply_without_select_yields_sentinel() {
        let url = fake_api("I am not sure what you mean.").await;
        let provider = MistralProvider::new(&config(Some("secret"), Some(url))).unwrap();

        assert_eq!(provider.generate_sql("hello").await.unwrap(), NO_SELECT_FOUND);
    }

    #[tokio::test]
    async fn explain_returns_the_reply_text() {
        let url = fake_api("  It lists every diagnosis of the patient.  ").await;
        let provider = MistralProvider::new(&config(Some("secret"), Some(url))).unwrap();

        let explanation = provider.explain("q", "SELECT 1").await.unwrap();
        assert_eq!(explanation, "It lists every diagnosis of the patient.");
    }

    #[tokio::test]
    async fn http_errors_are_response_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new()).await.unwrap();
        });

        let provider = MistralProvider::new(&config(
            Some("secret"),
            Some(format!("http://{}/missing", addr)),
        ))
        .unwrap();
        let err = provider.generate_sql("q").await.unwrap_err();
        assert!(matches!(err, LlmError::ResponseError(ref m) if m.contains("404")));
    }
}
