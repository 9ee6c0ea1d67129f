/// A previously failed statement together with the store's complaint about it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairContext {
    pub query: String,
    pub error: String,
}

/// Input for one prompt: the user's question and, on a repair attempt,
/// the failed query plus its error. Both are carried together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub question: String,
    pub repair: Option<RepairContext>,
}

impl GenerationRequest {
    pub fn initial(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            repair: None,
        }
    }

    pub fn repair(question: impl Into<String>, query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            repair: Some(RepairContext {
                query: query.into(),
                error: error.into(),
            }),
        }
    }

    /// Builds a request from loosely supplied parts; a lone query or a lone
    /// error is not enough to repair from, so it falls back to an initial request.
    pub fn from_parts(question: String, previous_query: Option<String>, previous_error: Option<String>) -> Self {
        match (previous_query, previous_error) {
            (Some(query), Some(error)) if !query.trim().is_empty() && !error.trim().is_empty() => {
                Self::repair(question, query, error)
            }
            _ => Self::initial(question),
        }
    }

    pub fn is_repair(&self) -> bool {
        self.repair.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_error_is_not_a_repair() {
        let request = GenerationRequest::from_parts("q".to_string(), None, Some("boom".to_string()));
        assert!(!request.is_repair());

        let request = GenerationRequest::from_parts("q".to_string(), Some("select 1;".to_string()), Some(" ".to_string()));
        assert!(!request.is_repair());
    }

    #[test]
    fn both_parts_make_a_repair() {
        let request = GenerationRequest::from_parts(
            "q".to_string(),
            Some("select name form student;".to_string()),
            Some("syntax error".to_string()),
        );
        assert_eq!(
            request.repair,
            Some(RepairContext {
                query: "select name form student;".to_string(),
                error: "syntax error".to_string(),
            })
        );
    }
}
