use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the DuckDB file queries run against.
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Decoding parameters forwarded to the completion backend.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repetition_penalty: f32,
    /// When false the backend is asked for greedy decoding.
    pub do_sample: bool,
}

impl GenerationParams {
    /// Temperature actually sent to a backend.
    pub fn effective_temperature(&self) -> f32 {
        if self.do_sample { self.temperature } else { 0.0 }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            temperature: 1.5,
            top_p: None,
            top_k: None,
            repetition_penalty: 2.0,
            do_sample: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "ollama" or "remote"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub generation: GenerationParams,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    pub style: String, // "instruct" or "sqlcoder"
    /// Directory holding `initial.txt` and `repair.txt` overriding the built-in style.
    pub template_dir: Option<String>,
    /// Marker separating prompt from completion; defaults to the style's own.
    pub end_marker: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaConfig {
    pub source: String, // "builtin", "file" or "introspect"
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutorConfig {
    pub read_only: bool,
    /// Row cap per result; 0 disables it.
    pub max_rows: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssistantConfig {
    pub max_repairs: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub prompt: PromptConfig,
    pub schema: SchemaConfig,
    pub executor: ExecutorConfig,
    pub assistant: AssistantConfig,
    pub logging: LoggingConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// DuckDB database file to query
    #[arg(long)]
    pub database: Option<String>,

    /// Completion backend ("ollama" or "remote")
    #[arg(long)]
    pub backend: Option<String>,

    /// Model name passed to the backend
    #[arg(long)]
    pub model: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Defaults first so a config file only has to name what it changes
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql-assistant/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLSQL__LLM__API_KEY=... style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLSQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.path = database.clone();
        }
        if let Some(backend) = &args.backend {
            config.llm.backend = backend.clone();
        }
        if let Some(model) = &args.model {
            config.llm.model = model.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "sample.duckdb".to_string(),
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            llm: LlmConfig {
                backend: "ollama".to_string(),
                model: "sql-assistant".to_string(),
                api_key: None,
                api_url: None,
                timeout_secs: 120,
                generation: GenerationParams::default(),
            },
            prompt: PromptConfig {
                style: "instruct".to_string(),
                template_dir: None,
                end_marker: None,
            },
            schema: SchemaConfig {
                source: "builtin".to_string(),
                path: None,
            },
            executor: ExecutorConfig {
                read_only: true,
                max_rows: 1000,
            },
            assistant: AssistantConfig { max_repairs: 1 },
            logging: LoggingConfig { json: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_survive_a_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[llm]\nbackend = \"remote\"\napi_url = \"http://gpu-box:8080/v1/completions\"").unwrap();
        writeln!(file, "[llm.generation]\nmax_new_tokens = 64").unwrap();

        let args = CliArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = AppConfig::new(&args).unwrap();

        assert_eq!(config.llm.backend, "remote");
        assert_eq!(config.llm.generation.max_new_tokens, 64);
        assert_eq!(config.llm.generation.repetition_penalty, 2.0);
        assert_eq!(config.web.port, 8000);
        assert!(config.executor.read_only);
        assert_eq!(config.assistant.max_repairs, 1);
    }

    #[test]
    fn cli_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[web]\nport = 9000\n").unwrap();

        let args = CliArgs {
            config: Some(path),
            port: Some(9100),
            database: Some("course.duckdb".to_string()),
            ..Default::default()
        };
        let config = AppConfig::new(&args).unwrap();

        assert_eq!(config.web.port, 9100);
        assert_eq!(config.database.path, "course.duckdb");
    }

    #[test]
    fn greedy_decoding_zeroes_temperature() {
        let mut params = GenerationParams::default();
        assert_eq!(params.effective_temperature(), 0.0);
        params.do_sample = true;
        assert_eq!(params.effective_temperature(), 1.5);
    }
}
