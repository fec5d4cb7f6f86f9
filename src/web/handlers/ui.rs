use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse},
};
use minijinja::context;
use std::sync::Arc;

use crate::chat::{AVATARS, GREETING};
use crate::web::state::AppState;
use crate::web::templates::render_template;

pub const EXAMPLE_QUESTIONS: [&str; 2] = [
    "Por favor, recupera el expediente médico del paciente 35",
    "Indica cuántos pacientes han sido diagnosticados con diabetes entre los años 2020 y 2024",
];

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(render_template(
        &state.template_env,
        "index.html",
        context! {
            title => state.config.ui.title,
            backend => state.llm_manager.backend(),
            avatars => AVATARS,
            examples => EXAMPLE_QUESTIONS,
            greeting => GREETING,
        },
    ))
}

pub async fn not_found_handler(State(state): State<Arc<AppState>>, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Html(render_template(
            &state.template_env,
            "error.html",
            context! {
                title => state.config.ui.title,
                message => format!("No page at {}", uri.path()),
            },
        )),
    )
}
