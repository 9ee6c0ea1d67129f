use crate::assistant::Assistant;
use crate::config::AppConfig;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub assistant: Assistant,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, assistant: Assistant) -> Self {
        Self {
            config,
            assistant,
            startup_time: chrono::Utc::now(),
        }
    }
}
