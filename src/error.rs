use crate::execution::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Profiling error: {0}")]
    Profiling(String),

    #[error("Could not ground '{concept}' in the dataset: {detail}")]
    UnresolvableIntent { concept: String, detail: String },

    #[error("Synthesis error: {detail}")]
    Synthesis { detail: String, spec_at_fault: bool },

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("No dataset has been uploaded")]
    NoDataset,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl PipelineError {
    pub fn unresolvable(concept: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::UnresolvableIntent {
            concept: concept.into(),
            detail: detail.into(),
        }
    }

    /// Synthesis failure caused by an incomplete specification.
    pub fn incomplete_spec(detail: impl Into<String>) -> Self {
        PipelineError::Synthesis {
            detail: detail.into(),
            spec_at_fault: true,
        }
    }

    /// Synthesis failure caused by the produced SQL itself.
    pub fn rejected_sql(detail: impl Into<String>) -> Self {
        PipelineError::Synthesis {
            detail: detail.into(),
            spec_at_fault: false,
        }
    }
}

impl From<polars::prelude::PolarsError> for PipelineError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        PipelineError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
