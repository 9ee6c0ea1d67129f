use crate::config::PromptConfig;
use crate::llm::models::GenerationRequest;
use minijinja::{context, Environment, UndefinedBehavior};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

const INITIAL: &str = "initial.txt";
const REPAIR: &str = "repair.txt";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unknown prompt style: {0}")]
    UnknownStyle(String),
    #[error("prompt template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("template {template} does not end with the end marker {marker:?}; set prompt.end_marker")]
    MarkerMismatch { template: &'static str, marker: String },
}

/// Built-in prompt framings. Each pairs its templates with the marker that
/// closes the prompt, which is where the completion starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// `[INST] ... [/INST]` framing used by the fine-tuned Llama adapter.
    Instruct,
    /// `### Instructions / ### Response` framing ending in an open sql fence.
    Sqlcoder,
}

impl PromptStyle {
    pub fn end_marker(self) -> &'static str {
        match self {
            PromptStyle::Instruct => "[/INST]",
            PromptStyle::Sqlcoder => "```sql",
        }
    }

    fn templates(self) -> (&'static str, &'static str) {
        match self {
            PromptStyle::Instruct => (
                include_str!("../../templates/instruct/initial.txt"),
                include_str!("../../templates/instruct/repair.txt"),
            ),
            PromptStyle::Sqlcoder => (
                include_str!("../../templates/sqlcoder/initial.txt"),
                include_str!("../../templates/sqlcoder/repair.txt"),
            ),
        }
    }
}

impl FromStr for PromptStyle {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instruct" => Ok(PromptStyle::Instruct),
            "sqlcoder" => Ok(PromptStyle::Sqlcoder),
            other => Err(PromptError::UnknownStyle(other.to_string())),
        }
    }
}

/// Turns a [`GenerationRequest`] into prompt text.
///
/// Holds the schema description for the life of the process. Templates are
/// compiled up front, so a broken template fails at startup rather than on
/// the first request.
pub struct PromptBuilder {
    env: Environment<'static>,
    schema: String,
    end_marker: String,
    style: PromptStyle,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig, schema: String) -> Result<Self, PromptError> {
        let style: PromptStyle = config.style.parse()?;
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        match &config.template_dir {
            Some(dir) => {
                info!("Loading prompt templates from {}", dir);
                env.set_loader(minijinja::path_loader(dir));
            }
            None => {
                let (initial, repair) = style.templates();
                env.add_template(INITIAL, initial)?;
                env.add_template(REPAIR, repair)?;
            }
        }

        // Compile both now
        env.get_template(INITIAL)?;
        env.get_template(REPAIR)?;

        let end_marker = config
            .end_marker
            .clone()
            .unwrap_or_else(|| style.end_marker().to_string());

        let builder = Self {
            env,
            schema,
            end_marker,
            style,
        };
        builder.check_end_marker()?;
        Ok(builder)
    }

    // Extraction splits the completion on the marker, so every rendered
    // prompt has to close with it.
    fn check_end_marker(&self) -> Result<(), PromptError> {
        let samples = [
            (INITIAL, GenerationRequest::initial("How many rows?")),
            (REPAIR, GenerationRequest::repair("How many rows?", "select 1;", "error")),
        ];

        for (template, request) in samples {
            let rendered = self.build(&request)?;
            if !rendered.trim_end().ends_with(&self.end_marker) {
                return Err(PromptError::MarkerMismatch {
                    template,
                    marker: self.end_marker.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn build(&self, request: &GenerationRequest) -> Result<String, PromptError> {
        let prompt = match &request.repair {
            Some(repair) => {
                debug!("Building repair prompt");
                self.env.get_template(REPAIR)?.render(context! {
                    question => &request.question,
                    query => &repair.query,
                    error => &repair.error,
                })?
            }
            None => self.env.get_template(INITIAL)?.render(context! {
                question => &request.question,
                schema => &self.schema,
            })?,
        };

        Ok(prompt)
    }

    pub fn end_marker(&self) -> &str {
        &self.end_marker
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }
}
