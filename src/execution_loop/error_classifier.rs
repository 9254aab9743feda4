//! Error Classifier
//!
//! Maps raw engine failures onto the gateway taxonomy and maps pipeline
//! errors onto the outcomes the state machine transitions on.

use crate::error::PipelineError;
use crate::execution::ExecutionError;
use crate::execution_loop::state_machine::StageOutcome;
use polars::prelude::PolarsError;

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a Polars SQL failure into the gateway taxonomy
    pub fn classify_engine_error(&self, error: &PolarsError) -> ExecutionError {
        let message = error.to_string();

        // The SQL context wraps planning failures, e.g. "not found: profit: 'select' failed"
        let mut root = error;
        while let PolarsError::Context { error: inner, .. } = root {
            root = inner.as_ref();
        }

        match root {
            PolarsError::ColumnNotFound(_) | PolarsError::SchemaFieldNotFound(_) => {
                return ExecutionError::Schema(message);
            }
            PolarsError::SchemaMismatch(_) | PolarsError::InvalidOperation(_) => {
                return ExecutionError::Syntax(message);
            }
            _ => {}
        }

        self.classify_message(&message)
    }

    /// Pattern matching on engine messages for errors without a dedicated variant
    pub fn classify_message(&self, message: &str) -> ExecutionError {
        let error_msg = message.to_lowercase();

        if error_msg.starts_with("not found:") {
            return ExecutionError::Schema(message.to_string());
        }

        if (error_msg.contains("column") || error_msg.contains("table") || error_msg.contains("relation"))
            && (error_msg.contains("not found")
                || error_msg.contains("does not exist")
                || error_msg.contains("unable to find")
                || error_msg.contains("unknown")
                || error_msg.contains("not registered"))
        {
            return ExecutionError::Schema(message.to_string());
        }

        if error_msg.contains("sql")
            && (error_msg.contains("parse")
                || error_msg.contains("syntax")
                || error_msg.contains("expected")
                || error_msg.contains("unsupported")
                || error_msg.contains("not supported"))
        {
            return ExecutionError::Syntax(message.to_string());
        }

        if error_msg.contains("syntax") || error_msg.contains("parser") {
            return ExecutionError::Syntax(message.to_string());
        }

        // Default to engine error
        ExecutionError::Engine(message.to_string())
    }

    /// Classify a stage failure into the outcome the controller transitions on
    pub fn outcome_for(&self, error: &PipelineError) -> StageOutcome {
        match error {
            PipelineError::UnresolvableIntent { .. } => StageOutcome::ResolutionFailed,
            PipelineError::Synthesis { spec_at_fault, .. } => StageOutcome::SynthesisFailed {
                spec_at_fault: *spec_at_fault,
            },
            PipelineError::Execution(exec) => self.outcome_for_execution(exec),
            _ => StageOutcome::EngineFault,
        }
    }

    pub fn outcome_for_execution(&self, error: &ExecutionError) -> StageOutcome {
        match error {
            ExecutionError::Syntax(_) | ExecutionError::Schema(_) => StageOutcome::InvalidSql,
            ExecutionError::EmptyResult { .. } => StageOutcome::EmptyResult,
            ExecutionError::Engine(_) => StageOutcome::EngineFault,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_column_not_found() {
        let classifier = ErrorClassifier::new();
        let error = PolarsError::ColumnNotFound("profit".into());
        assert!(matches!(
            classifier.classify_engine_error(&error),
            ExecutionError::Schema(_)
        ));
    }

    #[test]
    fn test_classify_wrapped_column_not_found() {
        let classifier = ErrorClassifier::new();
        let error = PolarsError::ColumnNotFound("profit".into()).context("'select' failed".into());
        assert!(matches!(
            classifier.classify_engine_error(&error),
            ExecutionError::Schema(_)
        ));
        assert!(matches!(
            classifier.classify_message("not found: profit: 'select' failed"),
            ExecutionError::Schema(_)
        ));
    }

    #[test]
    fn test_classify_table_message() {
        let classifier = ErrorClassifier::new();
        assert!(matches!(
            classifier.classify_message("relation 'orders' was not found"),
            ExecutionError::Schema(_)
        ));
    }

    #[test]
    fn test_classify_sql_syntax() {
        let classifier = ErrorClassifier::new();
        assert!(matches!(
            classifier.classify_message("sql parser error: Expected an expression, found: FROM"),
            ExecutionError::Syntax(_)
        ));
    }

    #[test]
    fn test_classify_default_engine() {
        let classifier = ErrorClassifier::new();
        assert!(matches!(
            classifier.classify_message("out of memory"),
            ExecutionError::Engine(_)
        ));
    }

    #[test]
    fn test_outcome_for_errors() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.outcome_for(&PipelineError::unresolvable("state", "no such column")),
            StageOutcome::ResolutionFailed
        );
        assert_eq!(
            classifier.outcome_for_execution(&ExecutionError::Engine("boom".to_string())),
            StageOutcome::EngineFault
        );
        assert_eq!(
            classifier.outcome_for_execution(&ExecutionError::Schema("x".to_string())),
            StageOutcome::InvalidSql
        );
    }
}
