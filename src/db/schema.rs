use crate::config::SchemaConfig;
use crate::db::executor::open_connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Description of the course-project database the assistant was trained against.
pub const COURSE_PROJECT_SCHEMA: &str = include_str!("../../schema/course_projects.txt");

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown schema source: {0}")]
    UnknownSource(String),
    #[error("schema.path is required when schema.source = \"file\"")]
    MissingPath,
    #[error("failed to read schema description {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to introspect database: {0}")]
    Database(#[from] duckdb::Error),
    #[error("introspection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("database has no tables to describe")]
    Empty,
}

/// Loads the schema text handed to the prompt builder. Called once at startup;
/// the result is immutable for the life of the process.
pub async fn load_description(config: &SchemaConfig, db_path: &str) -> Result<String, SchemaError> {
    match config.source.as_str() {
        "builtin" => Ok(COURSE_PROJECT_SCHEMA.to_string()),
        "file" => {
            let path = config.path.as_deref().ok_or(SchemaError::MissingPath)?;
            info!("Reading schema description from {}", path);
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SchemaError::Io {
                    path: path.to_string(),
                    source,
                })
        }
        "introspect" => {
            info!("Introspecting schema from {}", db_path);
            let path = PathBuf::from(db_path);
            tokio::task::spawn_blocking(move || introspect(&path)).await?
        }
        other => Err(SchemaError::UnknownSource(other.to_string())),
    }
}

#[derive(Default)]
struct TableInfo {
    columns: Vec<(String, String, bool)>,
    foreign_keys: Vec<String>,
}

fn introspect(path: &Path) -> Result<String, SchemaError> {
    let conn = open_connection(path, true)?;
    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();

    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type, is_nullable
         FROM information_schema.columns
         WHERE table_schema = 'main'
         ORDER BY table_name, ordinal_position",
    )?;
    let columns = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)? == "YES",
        ))
    })?;
    for column in columns {
        let (table, name, data_type, nullable) = column?;
        tables.entry(table).or_default().columns.push((name, data_type, nullable));
    }

    let mut stmt = conn.prepare(
        "SELECT table_name, constraint_text
         FROM duckdb_constraints()
         WHERE schema_name = 'main' AND constraint_type = 'FOREIGN KEY'",
    )?;
    let foreign_keys = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for foreign_key in foreign_keys {
        let (table, text) = foreign_key?;
        if let Some(info) = tables.get_mut(&table) {
            info.foreign_keys.push(text);
        }
    }

    if tables.is_empty() {
        return Err(SchemaError::Empty);
    }

    debug!("Found {} tables: {:?}", tables.len(), tables.keys().collect::<Vec<_>>());
    Ok(render(&tables))
}

fn render(tables: &BTreeMap<String, TableInfo>) -> String {
    let mut description = String::from("TABLE STRUCTURES:\n");

    for (i, (name, info)) in tables.iter().enumerate() {
        description.push_str(&format!("\n{}. {}\n", i + 1, name));
        for (column, data_type, nullable) in &info.columns {
            let null_str = if *nullable { "" } else { " NOT NULL" };
            description.push_str(&format!("   - {}: {}{}\n", column, data_type, null_str));
        }
        for foreign_key in &info.foreign_keys {
            description.push_str(&format!("   - {}\n", foreign_key));
        }
    }

    description
}
