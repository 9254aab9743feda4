pub mod agent_prompts;
pub mod answer_formatter;
pub mod config;
pub mod conversation;
pub mod data_assistant;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod fuzzy_matcher;
pub mod generation;
pub mod intent;
pub mod llm;
pub mod metadata;
pub mod profiler;
pub mod resolver;
pub mod sql_compiler;
pub mod sql_guard;
pub mod summary;

pub use config::PipelineConfig;
pub use data_assistant::DataAssistant;
pub use error::{PipelineError, Result};
pub use execution_loop::controller::{PipelineController, PipelineRun, RunOutcome};
pub use generation::{RuleBasedGenerator, StructuredGenerator};
pub use llm::LlmClient;
pub use summary::ExecutiveSummary;
