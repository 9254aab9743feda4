use crate::agent_prompts::{
    build_answer_prompt, build_interpretation_prompt, build_sql_repair_prompt, ANSWER_SYSTEM_PROMPT,
    INTERPRETATION_SYSTEM_PROMPT, SQL_REPAIR_SYSTEM_PROMPT,
};
use crate::config::PipelineConfig;
use crate::generation::{
    strip_code_fences, AnswerContext, CapabilityError, ResolutionContext, SqlRepairContext, StructuredGenerator,
};
use crate::intent::SpecificationDraft;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRepair {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Chat-completions client for an OpenAI-compatible endpoint
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(api_key: String, config: &PipelineConfig) -> Self {
        Self {
            api_key,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, system: &str, prompt: &str, json_mode: bool) -> CapabilityResult<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "max_tokens": 1000
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Transport(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedOutput(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CapabilityError::MalformedOutput("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl StructuredGenerator for LlmClient {
    fn name(&self) -> &str {
        "llm"
    }

    async fn draft_specification(&self, context: &ResolutionContext) -> CapabilityResult<SpecificationDraft> {
        let prompt = build_interpretation_prompt(
            &context.question,
            &context.profile,
            &context.history,
            context.feedback.as_deref(),
        );
        let response = self.call_llm(INTERPRETATION_SYSTEM_PROMPT, &prompt, true).await?;
        debug!("LLM specification draft: {}", response);

        parse_draft(&response)
    }

    async fn repair_sql(&self, context: &SqlRepairContext) -> CapabilityResult<String> {
        let prompt = build_sql_repair_prompt(
            &context.specification,
            &context.profile,
            &context.previous_sql,
            &context.feedback,
        );
        let response = self.call_llm(SQL_REPAIR_SYSTEM_PROMPT, &prompt, true).await?;
        let repair: SqlRepair = serde_json::from_str(strip_code_fences(&response).as_str())
            .map_err(|e| CapabilityError::MalformedOutput(format!("Failed to parse SQL repair: {}", e)))?;
        if let Some(explanation) = &repair.explanation {
            debug!("LLM SQL repair: {}", explanation);
        }
        Ok(strip_code_fences(&repair.sql))
    }

    async fn phrase_answer(&self, context: &AnswerContext) -> CapabilityResult<String> {
        let prompt = build_answer_prompt(&context.question, &context.result, &context.draft_answer);
        let response = self.call_llm(ANSWER_SYSTEM_PROMPT, &prompt, false).await?;
        let phrased = response.trim();
        if phrased.is_empty() {
            warn!("LLM returned an empty answer, keeping the draft");
            return Err(CapabilityError::MalformedOutput("empty answer".to_string()));
        }
        Ok(phrased.to_string())
    }
}

/// Parse a specification draft, tolerating code fences around the JSON
pub fn parse_draft(response: &str) -> CapabilityResult<SpecificationDraft> {
    let cleaned = strip_code_fences(response);
    let cleaned = cleaned.strip_prefix("json").unwrap_or(&cleaned).trim();
    serde_json::from_str(cleaned)
        .map_err(|e| CapabilityError::MalformedOutput(format!("Failed to parse specification: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;

    #[test]
    fn test_parse_draft_with_fences() {
        let raw = "```json\n{\"intent\": \"aggregate\", \"metrics\": [{\"column\": \"revenue\", \"aggregation\": \"sum\"}]}\n```";
        let draft = parse_draft(raw).unwrap();
        assert_eq!(draft.intent, Some(IntentKind::Aggregate));
        assert_eq!(draft.metrics.len(), 1);
    }

    #[test]
    fn test_parse_draft_rejects_prose() {
        let err = parse_draft("I think you want revenue").unwrap_err();
        assert!(matches!(err, CapabilityError::MalformedOutput(_)));
    }

    #[test]
    fn test_client_uses_configured_model() {
        let mut config = PipelineConfig::default();
        config.llm_model = "gpt-4o".to_string();
        config.llm_base_url = "http://localhost:8080/v1/".to_string();
        let client = LlmClient::from_config("key".to_string(), &config);
        assert_eq!(client.model(), "gpt-4o");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
