use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod assistant;
mod config;
mod db;
mod llm;
mod util;
mod web;

use crate::assistant::prompt::PromptBuilder;
use crate::assistant::Assistant;
use crate::config::{AppConfig, CliArgs};
use crate::db::executor::DuckDbExecutor;
use crate::db::schema::load_description;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(config.logging.json);

    info!("Loading schema description from source: {}", config.schema.source);
    let schema = load_description(&config.schema, &config.database.path).await?;

    let prompts = PromptBuilder::new(&config.prompt, schema)?;
    info!("Prompt style: {:?}, end marker: {}", prompts.style(), prompts.end_marker());

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;

    info!(
        "Using database {} (read-only: {}, max rows: {})",
        config.database.path, config.executor.read_only, config.executor.max_rows
    );
    let executor = DuckDbExecutor::new(
        config.database.path.clone(),
        config.executor.read_only,
        config.executor.max_rows,
    );

    let assistant = Assistant::new(
        Arc::new(llm_manager),
        Arc::new(prompts),
        Arc::new(executor),
        config.assistant.max_repairs,
    );

    let app_state = Arc::new(AppState::new(config, assistant));

    // Start the web server
    match web::run_server(app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
