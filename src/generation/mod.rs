//! Structured-generation capability
//!
//! The pipeline depends on this contract only. `crate::llm::LlmClient`
//! satisfies it with a hosted model; `rules::RuleBasedGenerator` satisfies it
//! offline with keyword and pattern rules.

pub mod rules;

pub use rules::RuleBasedGenerator;

use crate::conversation::ConversationTurn;
use crate::execution::ResultSet;
use crate::intent::{QuerySpecification, SpecificationDraft};
use crate::metadata::DatasetProfile;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),

    #[error("malformed generator output: {0}")]
    MalformedOutput(String),

    #[error("generator transport failure: {0}")]
    Transport(String),

    #[error("generator does not support {0}")]
    Unsupported(&'static str),
}

/// Everything a generator may use to draft a specification
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub question: String,
    pub profile: Arc<DatasetProfile>,
    pub history: Vec<ConversationTurn>,
    /// Failure text from the previous attempt for this question
    pub feedback: Option<String>,
}

impl ResolutionContext {
    pub fn last_specification(&self) -> Option<&QuerySpecification> {
        self.history.last().map(|t| &t.specification)
    }
}

/// Request for repaired SQL after the engine rejected a compiled query
#[derive(Debug, Clone)]
pub struct SqlRepairContext {
    pub specification: QuerySpecification,
    pub profile: Arc<DatasetProfile>,
    pub previous_sql: String,
    pub feedback: String,
}

/// Request to phrase a computed answer in natural language
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub question: String,
    pub result: ResultSet,
    /// Deterministic rendering of the result, already business-formatted
    pub draft_answer: String,
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Draft a query specification for a question
    async fn draft_specification(
        &self,
        context: &ResolutionContext,
    ) -> std::result::Result<SpecificationDraft, CapabilityError>;

    /// Produce repaired SQL text for a specification
    async fn repair_sql(&self, _context: &SqlRepairContext) -> std::result::Result<String, CapabilityError> {
        Err(CapabilityError::Unsupported("SQL repair"))
    }

    /// Phrase an answer from an already formatted draft
    async fn phrase_answer(&self, _context: &AnswerContext) -> std::result::Result<String, CapabilityError> {
        Err(CapabilityError::Unsupported("answer phrasing"))
    }
}

/// Strip markdown code fences a model may wrap around SQL
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = if let Some(s) = trimmed.strip_prefix("```sql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```") {
        s
    } else {
        trimmed
    };
    inner.strip_suffix("```").unwrap_or(inner).trim().to_string()
}
