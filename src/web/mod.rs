// Axum start-up code. The chat page and its assets are served from the
// binary; everything the page does goes through the JSON API under /api.
pub mod handlers;
pub mod routes;
pub mod state;
pub mod static_files;
pub mod templates;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::WebConfig;
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::ui_routes()
        .merge(routes::api_routes())
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::{DatabaseManager, DbError, Record, RecordSet, Value};
    use crate::llm::providers::simulation::SimulationProvider;
    use crate::llm::{LlmError, LlmManager, SqlGenerator, NO_SELECT_FOUND};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value as Json};
    use std::path::Path;
    use std::time::Duration;
    use tower::util::ServiceExt;

    /// Answers every question with the same reply.
    struct FixedGenerator(&'static str);

    #[async_trait]
    impl SqlGenerator for FixedGenerator {
        async fn generate_sql(&self, _question: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }

        async fn explain(&self, question: &str, sql: &str) -> Result<String, LlmError> {
            Ok(format!("'{}' runs {}", question, sql))
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl SqlGenerator for DownGenerator {
        async fn generate_sql(&self, _question: &str) -> Result<String, LlmError> {
            Err(LlmError::ConnectionError("model unreachable".to_string()))
        }

        async fn explain(&self, _question: &str, _sql: &str) -> Result<String, LlmError> {
            Err(LlmError::ConnectionError("model unreachable".to_string()))
        }
    }

    /// Five person rows for any SELECT, except queries mentioning `missing`.
    /// Remembers the limit of every bounded read.
    #[derive(Default)]
    struct FakeDatabase {
        limits: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DatabaseManager for FakeDatabase {
        async fn execute(&self, _query: &str) -> crate::db::Result<u64> {
            Ok(0)
        }

        async fn select(&self, query: &str, _params: Option<&Record>) -> crate::db::Result<RecordSet> {
            if query.contains("missing") {
                return Err(DbError::Query(
                    "ERROR: relation \"missing\" does not exist".to_string(),
                ));
            }
            let mut records = RecordSet::new(vec!["person_id".to_string()]);
            for id in 1..=5 {
                records.push_row(vec![Value::Integer(id)]);
            }
            Ok(records)
        }

        async fn select_head(
            &self,
            query: &str,
            params: Option<&Record>,
            limit: usize,
        ) -> crate::db::Result<RecordSet> {
            self.limits.lock().unwrap().push(limit);
            Ok(self.select(query, params).await?.head(limit))
        }

        async fn insert_many(&self, _: &str, _: &str, _: &[Record], _: &str) -> crate::db::Result<u64> {
            Ok(0)
        }

        async fn update(&self, _: &str, _: &str, _: &[Record], _: &str) -> crate::db::Result<u64> {
            Ok(0)
        }

        async fn delete(&self, _: &str, _: &str, _: &str) -> crate::db::Result<u64> {
            Ok(0)
        }

        async fn execute_script(&self, _: &Path) -> crate::db::Result<()> {
            Ok(())
        }

        async fn copy(&self, _: &Path, _: &str, _: &str, _: &[String], _: char) -> crate::db::Result<bool> {
            Ok(true)
        }
    }

    fn app(generator: Box<dyn SqlGenerator>, database: Option<Arc<dyn DatabaseManager>>) -> Router {
        let llm = LlmManager::with_generator("test", generator);
        let state = AppState::new(AppConfig::default(), database, llm).unwrap();
        router(Arc::new(state))
    }

    fn simulated_app() -> Router {
        let entries = serde_json::from_value(json!([{
            "question": "patient 35",
            "response_sql": [{"concept_name": "Diabetes", "condition_start_date": "2020-01-01"}],
            "response_easy_language": "Patient 35 has diabetes."
        }]))
        .unwrap();
        app(
            Box::new(SimulationProvider::from_entries(entries, Duration::ZERO)),
            None,
        )
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Json::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ));
        (status, json)
    }

    async fn start_session(app: &Router) -> String {
        let (status, session) = send(
            app,
            "POST",
            "/api/sessions",
            Some(json!({"user_name": "Ana", "avatar": "🐼"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        session["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn index_page_renders() {
        let app = simulated_app();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("Reporter"));
        assert!(html.contains("paciente 35"));
    }

    #[tokio::test]
    async fn static_assets_are_served() {
        let app = simulated_app();
        let response = app
            .oneshot(Request::builder().uri("/static/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_pages_render_the_error_template() {
        let app = simulated_app();
        let (status, body) = send(&app, "GET", "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let html = body.as_str().unwrap();
        assert!(html.contains("No page at"));
        assert!(html.contains("nowhere"));
    }

    #[tokio::test]
    async fn session_lifecycle_with_simulated_answers() {
        let app = simulated_app();
        let id = start_session(&app).await;

        let (status, session) = send(&app, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["messages"][0]["content"], crate::chat::GREETING);
        assert_eq!(session["explanation_ready"], false);

        let (status, _) = send(&app, "POST", &format!("/api/sessions/{}/explain", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, answer) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "patient 35"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["sql"], "1. Diabetes (2020-01-01, None)");
        assert!(answer.get("preview").is_none());
        assert_eq!(answer["messages"].as_array().unwrap().len(), 3);

        let (status, explained) =
            send(&app, "POST", &format!("/api/sessions/{}/explain", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(explained["explanation"], "Patient 35 has diabetes.");
        assert_eq!(explained["messages"][3]["kind"], "explanation");
    }

    #[tokio::test]
    async fn rejects_bad_session_requests() {
        let app = simulated_app();

        let (status, _) = send(
            &app,
            "POST",
            "/api/sessions",
            Some(json!({"user_name": "  ", "avatar": "🐼"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = uuid::Uuid::new_v4();
        let (status, _) = send(&app, "GET", &format!("/api/sessions/{}", unknown), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", unknown),
            Some(json!({"question": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = start_session(&app).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn answers_are_previewed_against_the_database() {
        let fake = Arc::new(FakeDatabase::default());
        let database: Arc<dyn DatabaseManager> = fake.clone();
        let app = app(
            Box::new(FixedGenerator("SELECT person_id FROM person")),
            Some(database),
        );
        let id = start_session(&app).await;

        let (status, answer) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "all patients"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["preview"]["columns"], json!(["person_id"]));
        assert_eq!(answer["preview"]["rows"], json!([[1], [2], [3]]));
        // Only the preview rows are read from the database
        assert_eq!(*fake.limits.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn preview_failures_are_reported_not_fatal() {
        let database: Arc<dyn DatabaseManager> = Arc::new(FakeDatabase::default());
        let app = app(Box::new(FixedGenerator("SELECT * FROM missing")), Some(database));
        let id = start_session(&app).await;

        let (status, answer) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "q"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(answer.get("preview").is_none());
        assert!(answer["preview_error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn sentinel_answer_is_not_previewed() {
        let database: Arc<dyn DatabaseManager> = Arc::new(FakeDatabase::default());
        let app = app(Box::new(FixedGenerator(NO_SELECT_FOUND)), Some(database));
        let id = start_session(&app).await;

        let (status, answer) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["sql"], NO_SELECT_FOUND);
        assert!(answer.get("preview").is_none());
        assert!(answer.get("preview_error").is_none());
    }

    #[tokio::test]
    async fn model_failures_are_bad_gateway() {
        let app = app(Box::new(DownGenerator), None);
        let id = start_session(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/sessions/{}/ask", id),
            Some(json!({"question": "q"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (_, session) = send(&app, "GET", &format!("/api/sessions/{}", id), None).await;
        let messages = session["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(session["explanation_ready"], false);
    }

    #[tokio::test]
    async fn report_and_status() {
        let app = simulated_app();

        let (status, report) = send(
            &app,
            "POST",
            "/api/report",
            Some(json!({"text": "SINTOMA : fiebre| ENFERMEDAD : diabetes"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["columns"], json!(["ENFERMEDAD", "SINTOMA", "PROCEDIMIENTO"]));
        assert_eq!(report["rows"], json!([["diabetes", "fiebre", null]]));

        start_session(&app).await;
        let (status, info) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["backend"], "test");
        assert_eq!(info["database_configured"], false);
        assert_eq!(info["session_count"], 1);
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    }
}
