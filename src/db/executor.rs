use crate::db::guard;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use duckdb::types::{TimeUnit, Value};
use duckdb::{AccessMode, Config, Connection};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Rows returned by a successful statement, column order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
    /// Set when the store had more rows than the executor was allowed to return.
    pub truncated: bool,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows as column-name → value objects. A repeated column name (two
    /// `name` columns from a join) gets a numeric suffix instead of
    /// overwriting the first.
    pub fn to_objects(&self) -> Vec<Map<String, Json>> {
        let keys = unique_keys(&self.columns);
        self.rows
            .iter()
            .map(|row| keys.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

fn unique_keys(columns: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        let mut key = column.clone();
        let mut n = 2;
        while keys.contains(&key) {
            key = format!("{}_{}", column, n);
            n += 1;
        }
        keys.push(key);
    }
    keys
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The store refused the statement; the message is the store's own.
    Syntax,
    /// The read-only guard refused the statement before it reached the store.
    Rejected,
    /// Anything else: the store could not be opened, the worker died.
    Execution,
}

impl FailureKind {
    /// Whether feeding the message back to the model can plausibly fix it.
    pub fn is_repairable(self) -> bool {
        matches!(self, FailureKind::Syntax | FailureKind::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Syntax, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Rejected, message: message.into() }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Execution, message: message.into() }
    }
}

pub type ExecutionOutcome = Result<ResultSet, ExecutionFailure>;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> ExecutionOutcome;
}

/// Runs statements against a DuckDB file, one connection per call.
pub struct DuckDbExecutor {
    path: PathBuf,
    read_only: bool,
    max_rows: usize,
}

impl DuckDbExecutor {
    pub fn new(path: impl Into<PathBuf>, read_only: bool, max_rows: usize) -> Self {
        Self {
            path: path.into(),
            read_only,
            max_rows,
        }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbExecutor {
    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        info!("Executing SQL query: {}", sql);

        if self.read_only {
            guard::ensure_read_only(sql).map_err(|reason| {
                warn!("Refused statement: {}", reason);
                ExecutionFailure::rejected(reason)
            })?;
        }

        let path = self.path.clone();
        let read_only = self.read_only;
        let max_rows = self.max_rows;
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || run_statement(&path, read_only, &sql, max_rows))
            .await
            .map_err(|join_err| {
                error!("Task join error: {}", join_err);
                ExecutionFailure::execution(format!("Database task execution failed: {}", join_err))
            })?
    }
}

pub(crate) fn open_connection(path: &Path, read_only: bool) -> duckdb::Result<Connection> {
    if read_only {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        Connection::open_with_flags(path, config)
    } else {
        Connection::open(path)
    }
}

// The connection lives only for this call and is dropped on every return path.
fn run_statement(path: &Path, read_only: bool, sql: &str, max_rows: usize) -> ExecutionOutcome {
    let start_time = Instant::now();

    let conn = open_connection(path, read_only).map_err(|e| {
        error!("Failed to open database at {}: {}", path.display(), e);
        ExecutionFailure::execution(format!("Database connection error: {}", e))
    })?;

    let mut stmt = conn.prepare(sql).map_err(store_error)?;
    let mut rows = stmt.query([]).map_err(store_error)?;

    let columns = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();
    let mut result = ResultSet {
        columns,
        ..ResultSet::default()
    };

    while let Some(row) = rows.next().map_err(store_error)? {
        if max_rows > 0 && result.rows.len() == max_rows {
            result.truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(result.columns.len());
        for i in 0..result.columns.len() {
            let value: Value = row.get(i).map_err(store_error)?;
            values.push(to_json(value));
        }
        result.rows.push(values);
    }

    if result.truncated {
        warn!("Result truncated to {} rows", max_rows);
    }
    info!(
        "Query executed successfully. Row count: {}, Execution time: {}ms",
        result.row_count(),
        start_time.elapsed().as_millis()
    );

    Ok(result)
}

fn store_error(e: duckdb::Error) -> ExecutionFailure {
    debug!("Store rejected statement: {}", e);
    ExecutionFailure::syntax(e.to_string())
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::TinyInt(v) => Json::from(v),
        Value::SmallInt(v) => Json::from(v),
        Value::Int(v) => Json::from(v),
        Value::BigInt(v) => Json::from(v),
        Value::HugeInt(v) => i64::try_from(v).map(Json::from).unwrap_or_else(|_| Json::String(v.to_string())),
        Value::UTinyInt(v) => Json::from(v),
        Value::USmallInt(v) => Json::from(v),
        Value::UInt(v) => Json::from(v),
        Value::UBigInt(v) => Json::from(v),
        Value::Float(v) => serde_json::Number::from_f64(f64::from(v)).map_or(Json::Null, Json::Number),
        Value::Double(v) => serde_json::Number::from_f64(v).map_or(Json::Null, Json::Number),
        Value::Decimal(d) => Json::String(d.to_string()),
        Value::Text(s) | Value::Enum(s) => Json::String(s),
        Value::Blob(bytes) => Json::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
        Value::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days.saturating_add(719_163))
            .map_or(Json::Null, |d| Json::String(d.to_string())),
        Value::Timestamp(unit, v) => DateTime::<Utc>::from_timestamp_micros(to_micros(unit, v))
            .map_or(Json::Null, |ts| Json::String(ts.naive_utc().to_string())),
        Value::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            )
            .map_or(Json::Null, |t| Json::String(t.to_string()))
        }
        Value::List(items) => Json::Array(items.into_iter().map(to_json).collect()),
        other => Json::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_store() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("course.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE project (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE student (sid INTEGER PRIMARY KEY, name TEXT, team INTEGER, project INTEGER REFERENCES project(id), team_rating DOUBLE, created DATE);
             INSERT INTO project VALUES (1, 'AI Chatbot'), (2, 'Data Analytics Platform');
             INSERT INTO student VALUES (1, 'John Smith', 3, 1, 4.5, DATE '2024-01-05'), (2, 'Emma Davis', 1, 2, NULL, DATE '2024-02-11');",
        )
        .unwrap();
        drop(conn);
        (dir, path)
    }

    #[tokio::test]
    async fn returns_rows_with_column_names() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 100);

        let result = executor
            .execute("select name, team_rating, created from student where team = 3;")
            .await
            .unwrap();

        assert_eq!(result.columns, ["name", "team_rating", "created"]);
        assert_eq!(result.rows, vec![vec![json!("John Smith"), json!(4.5), json!("2024-01-05")]]);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 100);

        let result = executor.execute("select name from student where team = 8;").await.unwrap();
        assert_eq!(result.columns, ["name"]);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn store_errors_keep_the_literal_message() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 100);

        let failure = executor.execute("select name form student;").await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert!(!failure.message.is_empty());

        let failure = executor.execute("select nickname from student;").await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert!(failure.message.contains("nickname"), "{}", failure.message);
    }

    #[tokio::test]
    async fn writes_are_refused_in_read_only_mode() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 100);

        let failure = executor.execute("delete from student;").await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Rejected);

        let remaining = executor.execute("select count(*) as n from student;").await.unwrap();
        assert_eq!(remaining.rows, vec![vec![json!(2)]]);
    }

    #[tokio::test]
    async fn writes_run_when_guard_is_off() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, false, 100);

        executor.execute("update student set team = 2 where sid = 1;").await.unwrap();
        let result = executor.execute("select team from student where sid = 1;").await.unwrap();
        assert_eq!(result.rows, vec![vec![json!(2)]]);
    }

    #[tokio::test]
    async fn missing_database_is_an_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = DuckDbExecutor::new(dir.path().join("absent.duckdb"), true, 100);

        let failure = executor.execute("select 1;").await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Execution);
        assert!(!failure.kind.is_repairable());
    }

    #[tokio::test]
    async fn caps_rows_at_max() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 1);

        let result = executor.execute("select sid from student order by sid;").await.unwrap();
        assert_eq!(result.rows, vec![vec![json!(1)]]);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn zero_max_rows_means_uncapped() {
        let (_dir, path) = seeded_store();
        let executor = DuckDbExecutor::new(&path, true, 0);

        let result = executor.execute("select sid from student order by sid;").await.unwrap();
        assert_eq!(result.rows, vec![vec![json!(1)], vec![json!(2)]]);
        assert!(!result.truncated);
    }

    #[test]
    fn objects_keep_column_order_and_disambiguate() {
        let result = ResultSet {
            columns: vec!["name".to_string(), "name".to_string(), "team".to_string()],
            rows: vec![vec![json!("John Smith"), json!("AI Chatbot"), json!(3)]],
            truncated: false,
        };

        let objects = result.to_objects();
        let keys: Vec<&String> = objects[0].keys().collect();
        assert_eq!(keys, ["name", "name_2", "team"]);
        assert_eq!(objects[0]["name_2"], json!("AI Chatbot"));
    }

    #[test]
    fn renders_temporal_values() {
        assert_eq!(to_json(Value::Date32(0)), json!("1970-01-01"));
        assert_eq!(
            to_json(Value::Timestamp(TimeUnit::Microsecond, 1_704_067_200_000_000)),
            json!("2024-01-01 00:00:00")
        );
        assert_eq!(to_json(Value::Time64(TimeUnit::Microsecond, 3_600_000_000)), json!("01:00:00"));
        assert_eq!(to_json(Value::Double(f64::NAN)), Json::Null);
        assert_eq!(to_json(Value::Blob(vec![0xde, 0xad])), json!("dead"));
    }
}
