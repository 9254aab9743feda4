//! Pipeline configuration
//!
//! Defaults match the product behaviour; every field can be overridden from
//! `INSIGHTS_*` environment variables (a `.env` file is honoured by the binary).

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TABLE_NAME: &str = "dataset";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name the dataset is registered under in the execution store
    pub table_name: String,
    pub max_resolution_attempts: u32,
    pub max_synthesis_attempts: u32,
    /// Upper bound for a single structured-generation call
    pub capability_timeout_secs: u64,
    /// Upper bound for a single SQL execution
    pub execution_timeout_secs: u64,
    pub summary_questions: usize,
    pub summary_workers: usize,
    /// Number of completed turns offered as follow-up context
    pub history_window: usize,
    pub sample_values: usize,
    pub high_cardinality_threshold: usize,
    pub currency_symbol: Option<String>,
    pub llm_model: String,
    pub llm_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            max_resolution_attempts: 2,
            max_synthesis_attempts: 2,
            capability_timeout_secs: 30,
            execution_timeout_secs: 15,
            summary_questions: 10,
            summary_workers: 4,
            history_window: 5,
            sample_values: 5,
            high_cardinality_threshold: 50,
            currency_symbol: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("INSIGHTS_TABLE_NAME") {
            if !is_plain_identifier(&name) {
                return Err(PipelineError::Config(format!(
                    "INSIGHTS_TABLE_NAME must be a plain identifier, got '{}'",
                    name
                )));
            }
            config.table_name = name;
        }
        if let Some(v) = env_number("INSIGHTS_MAX_RESOLUTION_ATTEMPTS")? {
            config.max_resolution_attempts = narrow("INSIGHTS_MAX_RESOLUTION_ATTEMPTS", v)?;
        }
        if let Some(v) = env_number("INSIGHTS_MAX_SYNTHESIS_ATTEMPTS")? {
            config.max_synthesis_attempts = narrow("INSIGHTS_MAX_SYNTHESIS_ATTEMPTS", v)?;
        }
        if let Some(v) = env_number("INSIGHTS_CAPABILITY_TIMEOUT_SECS")? {
            config.capability_timeout_secs = v;
        }
        if let Some(v) = env_number("INSIGHTS_EXECUTION_TIMEOUT_SECS")? {
            config.execution_timeout_secs = v;
        }
        if let Some(v) = env_number("INSIGHTS_SUMMARY_QUESTIONS")? {
            config.summary_questions = narrow("INSIGHTS_SUMMARY_QUESTIONS", v)?;
        }
        if let Some(v) = env_number("INSIGHTS_SUMMARY_WORKERS")? {
            config.summary_workers = narrow("INSIGHTS_SUMMARY_WORKERS", v)?;
        }
        if let Some(v) = env_number("INSIGHTS_HISTORY_WINDOW")? {
            config.history_window = narrow("INSIGHTS_HISTORY_WINDOW", v)?;
        }
        if let Ok(symbol) = std::env::var("INSIGHTS_CURRENCY_SYMBOL") {
            config.currency_symbol = Some(symbol);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.llm_model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.llm_base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_resolution_attempts == 0 || self.max_synthesis_attempts == 0 {
            return Err(PipelineError::Config(
                "retry budgets must allow at least one attempt per stage".to_string(),
            ));
        }
        if self.summary_workers == 0 {
            return Err(PipelineError::Config("summary_workers must be positive".to_string()));
        }
        Ok(())
    }

    /// Summary batch size, clamped to the supported 8..=12 range
    pub fn summary_batch_size(&self) -> usize {
        self.summary_questions.clamp(8, 12)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{} is not a number: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Fit an environment number into a narrower field without truncating it
fn narrow<T: TryFrom<u64>>(key: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| PipelineError::Config(format!("{} is out of range: {}", key, value)))
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
