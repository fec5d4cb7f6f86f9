use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod chat;
mod config;
mod db;
mod llm;
mod report;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs, Command};
use crate::db::credentials::{provider_from_config, CredentialProvider, StaticCredentials};
use crate::db::postgres::DatabasePostgres;
use crate::db::DatabaseManager;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::RunScript { path } => {
            let database = database_for_cli(&config);
            database.execute_script(&path).await?;
            info!("Script {} applied", path.display());
            Ok(())
        }
        Command::Copy {
            file,
            schema,
            table,
            columns,
            delimiter,
        } => {
            let database = database_for_cli(&config);
            database
                .copy(&file, &table, &schema, &columns, delimiter)
                .await?;
            info!("Loaded {} into {}.{}", file.display(), schema, table);
            Ok(())
        }
        Command::Query { sql } => {
            let database = database_for_cli(&config);
            let records = database.select(&sql, None).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.model.backend);
    let llm_manager = LlmManager::new(&config.model, &config.simulation)?;

    let database: Option<Arc<dyn DatabaseManager>> = if config.database.is_configured() {
        Some(Arc::new(DatabasePostgres::new(provider_from_config(
            &config.database,
        ))))
    } else {
        warn!("No database configured, answers will not be previewed");
        None
    };

    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, database, llm_manager)?);

    // Start the web server
    info!("Starting server on {}:{}", web_config.host, web_config.port);
    match web::run_server(web_config, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

// Command-line tools fall back to a local default server when nothing is configured
fn database_for_cli(config: &AppConfig) -> DatabasePostgres {
    let credentials: Box<dyn CredentialProvider> = if config.database.is_configured() {
        provider_from_config(&config.database)
    } else {
        warn!("No database configured, using local defaults");
        Box::new(StaticCredentials)
    };
    DatabasePostgres::new(credentials)
}
