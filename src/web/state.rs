use crate::chat::SessionStore;
use crate::config::AppConfig;
use crate::db::DatabaseManager;
use crate::llm::LlmManager;
use crate::web::templates::init_templates;
use minijinja::Environment;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    /// `None` when no database is configured; answers are then not previewed
    pub database: Option<Arc<dyn DatabaseManager>>,
    pub llm_manager: LlmManager,
    pub sessions: SessionStore,
    pub template_env: Environment<'static>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        database: Option<Arc<dyn DatabaseManager>>,
        llm_manager: LlmManager,
    ) -> Result<Self, minijinja::Error> {
        let sessions = SessionStore::with_limits(
            Duration::from_secs(config.web.session_ttl_secs),
            config.web.max_sessions,
        );
        Ok(Self {
            config,
            database,
            llm_manager,
            sessions,
            template_env: init_templates()?,
            startup_time: chrono::Utc::now(),
        })
    }

    pub fn preview_rows(&self) -> usize {
        self.config.database.preview_rows
    }
}
