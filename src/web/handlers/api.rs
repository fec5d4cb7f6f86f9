use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::{ChatMessage, ChatSession, MessageKind};
use crate::db::RecordSet;
use crate::llm::{has_select, NO_SELECT_FOUND};
use crate::report::parse_report;
use crate::web::state::AppState;

type ApiError = (StatusCode, String);

// Session types

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_name: String,
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<RecordSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_error: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ExplainResponse {
    pub explanation: String,
    pub messages: Vec<ChatMessage>,
}

// Report types

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub text: String,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub backend: String,
    pub database_configured: bool,
    pub session_count: usize,
}

fn session_not_found(id: &Uuid) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Session '{}' not found", id))
}

// API Implementations

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let session = ChatSession::new(&payload.user_name, &payload.avatar)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    info!("Starting chat session {} for {}", session.id, session.user_name);
    let session = state.sessions.insert(session).await;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatSession>, ApiError> {
    state
        .sessions
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| session_not_found(&id))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = payload.question.trim().to_string();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question must not be empty".to_string()));
    }

    state
        .sessions
        .update(&id, |session| session.push_user(&question))
        .await
        .ok_or_else(|| session_not_found(&id))?;

    let start_time = Instant::now();
    let sql = match state.llm_manager.generate_sql(&question).await {
        Ok(sql) => sql,
        Err(e) => {
            error!("Failed to generate SQL: {}", e);
            let reply = format!("Sorry, I could not answer that: {}", e);
            state
                .sessions
                .update(&id, |session| session.push_assistant(MessageKind::Text, &reply))
                .await;
            return Err((StatusCode::BAD_GATEWAY, e.to_string()));
        }
    };
    info!(
        "Generated answer for session {} in {}ms",
        id,
        start_time.elapsed().as_millis()
    );

    let (preview, preview_error) = preview(&state, &sql).await;

    let messages = state
        .sessions
        .update(&id, |session| {
            session.record_answer(&question, &sql);
            session.messages.clone()
        })
        .await
        .ok_or_else(|| session_not_found(&id))?;

    Ok(Json(AskResponse {
        sql,
        preview,
        preview_error,
        messages,
    }))
}

// First rows of the answer, when there is a database and something to run
async fn preview(state: &AppState, sql: &str) -> (Option<RecordSet>, Option<String>) {
    let Some(database) = &state.database else {
        return (None, None);
    };
    if sql == NO_SELECT_FOUND || !has_select(sql) {
        return (None, None);
    }

    match database.select_head(sql, None, state.preview_rows()).await {
        Ok(records) => (Some(records), None),
        Err(e) => {
            warn!("Preview query failed: {}", e);
            (None, Some(e.to_string()))
        }
    }
}

pub async fn explain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| session_not_found(&id))?;

    let (question, sql) = session.can_explain().ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            "Ask a question before requesting an explanation".to_string(),
        )
    })?;

    let explanation = state
        .llm_manager
        .explain(question, sql)
        .await
        .map_err(|e| {
            error!("Failed to explain answer: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;

    let messages = state
        .sessions
        .update(&id, |session| {
            session.push_assistant(MessageKind::Explanation, &explanation);
            session.messages.clone()
        })
        .await
        .ok_or_else(|| session_not_found(&id))?;

    Ok(Json(ExplainResponse {
        explanation,
        messages,
    }))
}

pub async fn report(Json(payload): Json<ReportRequest>) -> Json<RecordSet> {
    Json(parse_report(&payload.text))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        backend: state.llm_manager.backend().to_string(),
        database_configured: state.database.is_some(),
        session_count: state.sessions.len().await,
    })
}
