pub mod gateway;
pub mod result;
pub mod store;

pub use gateway::ExecutionGateway;
pub use result::{Cell, ResultSet};
pub use store::TabularStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured execution failure as classified by the gateway
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("malformed SQL: {0}")]
    Syntax(String),

    #[error("unknown table or column: {0}")]
    Schema(String),

    #[error("query returned no rows")]
    EmptyResult { columns: Vec<String> },

    #[error("engine failure: {0}")]
    Engine(String),
}

impl ExecutionError {
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionError::Syntax(_) => "SyntaxError",
            ExecutionError::Schema(_) => "SchemaError",
            ExecutionError::EmptyResult { .. } => "EmptyResultError",
            ExecutionError::Engine(_) => "EngineError",
        }
    }
}

/// Outcome of one execution pass
pub type ExecutionResult = std::result::Result<ResultSet, ExecutionError>;
