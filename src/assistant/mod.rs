//! Question → SQL → rows, with one self-repair pass on store errors.

pub mod extract;
pub mod prompt;

use crate::db::executor::{ExecutionFailure, QueryExecutor, ResultSet};
use crate::llm::models::GenerationRequest;
use crate::llm::{LlmError, LlmManager};
use extract::extract_sql;
use prompt::{PromptBuilder, PromptError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A question answered by an executed statement.
#[derive(Debug, Clone)]
pub struct Answer {
    pub question: String,
    pub sql: String,
    pub result: ResultSet,
    /// Provider calls it took, initial attempt included.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Every permitted attempt failed; carries the most recent failure.
    #[error("{failure}")]
    Unanswered {
        sql: String,
        failure: ExecutionFailure,
        attempts: u32,
    },
}

pub struct Assistant {
    llm: Arc<LlmManager>,
    prompts: Arc<PromptBuilder>,
    executor: Arc<dyn QueryExecutor>,
    max_repairs: u32,
}

impl Assistant {
    pub fn new(
        llm: Arc<LlmManager>,
        prompts: Arc<PromptBuilder>,
        executor: Arc<dyn QueryExecutor>,
        max_repairs: u32,
    ) -> Self {
        Self {
            llm,
            prompts,
            executor,
            max_repairs,
        }
    }

    /// One prompt → completion → extraction pass. Provider errors are not retried.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, AssistantError> {
        let prompt = self.prompts.build(request)?;
        let raw = self.llm.complete(&prompt).await?;
        let sql = extract_sql(&raw, self.prompts.end_marker());
        info!("Candidate SQL: {}", sql);
        Ok(sql)
    }

    /// Answers `question`, feeding store errors back to the model up to
    /// `max_repairs` times. Generations run strictly one after another since
    /// each repair prompt needs the previous error.
    pub async fn handle(&self, question: &str) -> Result<Answer, AssistantError> {
        let mut request = GenerationRequest::initial(question);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let sql = self.generate(&request).await?;

            let failure = match self.executor.execute(&sql).await {
                Ok(result) => {
                    info!("Answered after {} attempt(s), {} rows", attempts, result.row_count());
                    return Ok(Answer {
                        question: question.to_string(),
                        sql,
                        result,
                        attempts,
                    });
                }
                Err(failure) => failure,
            };

            if !failure.kind.is_repairable() || attempts > self.max_repairs {
                warn!("Giving up after {} attempt(s): {}", attempts, failure);
                return Err(AssistantError::Unanswered {
                    sql,
                    failure,
                    attempts,
                });
            }

            warn!("Attempt {} failed, asking for a repair: {}", attempts, failure);
            request = GenerationRequest::repair(question, sql, failure.message);
        }
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }
}
