use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::assistant::AssistantError;
use crate::db::executor::{FailureKind, ResultSet};
use crate::llm::models::GenerationRequest;
use crate::web::state::AppState;

// Query types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQueryRequest {
    pub question: String,
    #[serde(default, alias = "previous_error")]
    pub previous_error: Option<String>,
    #[serde(default, alias = "previous_query")]
    pub previous_query: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQueryResponse {
    pub sql_query: String,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowFormat {
    /// Column name → value per row
    #[default]
    Object,
    /// Positional values per row
    Array,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryRequest {
    pub query: String,
    #[serde(default, alias = "row_format")]
    pub row_format: RowFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryResponse {
    pub results: Vec<Value>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub question: String,
    pub sql_query: String,
    pub results: Vec<Value>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub truncated: bool,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskFailure {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub schema: String,
}

// System status

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub backend: String,
    pub model: String,
    pub prompt_style: String,
    pub read_only: bool,
}

fn rows(result: &ResultSet, format: RowFormat) -> Vec<Value> {
    match format {
        RowFormat::Object => result.to_objects().into_iter().map(Value::Object).collect(),
        RowFormat::Array => result.rows.iter().cloned().map(Value::Array).collect(),
    }
}

fn require_question(question: &str) -> Result<(), (StatusCode, String)> {
    if question.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question must not be empty".to_string()));
    }
    Ok(())
}

// API Implementations

// SQL generation only; the caller decides whether to run it
pub async fn generate_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateQueryRequest>,
) -> Result<Json<GenerateQueryResponse>, (StatusCode, String)> {
    require_question(&payload.question)?;

    let request = GenerationRequest::from_parts(payload.question, payload.previous_query, payload.previous_error);
    debug!("Generation request (repair: {}): {}", request.is_repair(), request.question);

    let sql_query = state.assistant.generate(&request).await.map_err(|e| {
        error!("SQL generation failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(GenerateQueryResponse { sql_query }))
}

// Query execution
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteQueryRequest>,
) -> Result<Json<ExecuteQueryResponse>, (StatusCode, String)> {
    let start_time = Instant::now();

    let result = state
        .assistant
        .executor()
        .execute(&payload.query)
        .await
        .map_err(|failure| {
            error!("Query failed ({:?}): {}", failure.kind, failure.message);
            let status = match failure.kind {
                FailureKind::Syntax | FailureKind::Rejected => StatusCode::BAD_REQUEST,
                FailureKind::Execution => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, failure.message)
        })?;

    Ok(Json(ExecuteQueryResponse {
        results: rows(&result, payload.row_format),
        row_count: result.row_count(),
        truncated: result.truncated,
        columns: result.columns,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    }))
}

// Full question → rows cycle including the repair pass
pub async fn ask(State(state): State<Arc<AppState>>, Json(payload): Json<AskRequest>) -> Response {
    if let Err(rejection) = require_question(&payload.question) {
        return rejection.into_response();
    }

    info!("NL question: {}", payload.question);

    match state.assistant.handle(&payload.question).await {
        Ok(answer) => Json(AskResponse {
            results: rows(&answer.result, RowFormat::Object),
            row_count: answer.result.row_count(),
            truncated: answer.result.truncated,
            columns: answer.result.columns,
            question: answer.question,
            sql_query: answer.sql,
            attempts: answer.attempts,
        })
        .into_response(),
        Err(AssistantError::Unanswered { sql, failure, attempts }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(AskFailure {
                error: failure.message,
                error_kind: Some(failure.kind),
                sql_query: Some(sql),
                attempts: Some(attempts),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Question could not be processed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AskFailure {
                    error: e.to_string(),
                    error_kind: None,
                    sql_query: None,
                    attempts: None,
                }),
            )
                .into_response()
        }
    }
}

// Schema
pub async fn get_schema(State(state): State<Arc<AppState>>) -> Json<SchemaResponse> {
    Json(SchemaResponse {
        schema: state.assistant.prompts().schema().to_string(),
    })
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();
    let llm = state.assistant.llm();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        backend: llm.backend().to_string(),
        model: llm.model().to_string(),
        prompt_style: state.config.prompt.style.clone(),
        read_only: state.config.executor.read_only,
    })
}
