//! Agent Prompts - System prompts for the hosted generator
//!
//! These prompts give the model the dataset metadata, the specification
//! schema it must return, the previous turn for follow-ups, and the failure
//! text of the previous attempt when a stage is retried.

use crate::conversation::ConversationTurn;
use crate::execution::ResultSet;
use crate::intent::QuerySpecification;
use crate::metadata::{DatasetProfile, SemanticType};

/// System prompt for question interpretation
pub const INTERPRETATION_SYSTEM_PROMPT: &str = r#"You are a business data analyst who translates questions about a single table into a structured query specification.

## Your Role

Read the question, the dataset metadata and the recent conversation, then return ONLY a JSON object describing what must be computed. You never write SQL.

## Specification Schema

{
  "follow_up": false,
  "intent": "aggregate | rank | filter | trend | lookup",
  "metrics": [{"column": "revenue", "aggregation": "sum | avg | count | min | max"}],
  "columns": ["column shown as-is for lookup or filter"],
  "dimensions": ["column to group by"],
  "filters": [{"column": "category", "operator": "equals | not_equals | greater_than | less_than | greater_or_equal | less_or_equal | in | between", "value": "Electronics", "date_part": "year | month | day (optional)"}],
  "remove_filters": ["column whose previous filter is dropped"],
  "order": "asc | desc",
  "limit": 5,
  "granularity": "day | month | year",
  "time_column": "date column for trends",
  "unresolved": ["business term with no matching column"],
  "comments": "one short sentence"
}

## Interpretation Rules

1. Use exact column names from the metadata. Never invent columns.
2. "best", "top" or "performance" without a metric means the first monetary column, ranked descending.
3. "how many <things>" counts rows with column "*", or distinct values of a named column.
4. Years such as 2022 become a filter on the date column with "date_part": "year" and a numeric value.
5. A category value named in the question becomes an "equals" filter on the column that contains it.
6. Trends group by the date column at month granularity unless the question says otherwise.
7. If a term cannot be mapped to any column or value, list it in "unresolved" instead of guessing.

## Follow-ups

When the question modifies the previous one ("same but for 2022", "only electronics", "now by region"), set "follow_up": true and include ONLY the fields that change. Omitted fields are inherited from the previous specification. Use "remove_filters" to drop a previous filter, and "dimensions": [] to remove the grouping.

Only return the JSON, no other text."#;

/// System prompt for SQL repair after the engine rejected a query
pub const SQL_REPAIR_SYSTEM_PROMPT: &str = r#"You repair read-only SQL for an analytical engine.

Rules:
- One SELECT statement over the single table named in the request. No DDL or DML, no semicolons.
- Quote every column with double quotes exactly as listed.
- Compare text case-insensitively with LOWER("column") = 'value'.
- Use EXTRACT(YEAR FROM "column") for calendar parts. Count rows per group with COUNT("column"), not COUNT(*).
- Only these functions exist: SUM, AVG, COUNT, MIN, MAX, MEDIAN, LOWER, UPPER, TRIM, CAST, ROUND, ABS, COALESCE, EXTRACT, LEFT, DATE.
- Keep the aggregation, grouping, filters, ordering and limit of the specification.

Return JSON:
{"sql": "SELECT ...", "explanation": "what changed"}

Only return the JSON, no other text."#;

/// System prompt for phrasing answers
pub const ANSWER_SYSTEM_PROMPT: &str = r#"You rewrite computed analytics answers for business users.

Rules:
- Keep every number exactly as written in the draft, including separators and currency symbols.
- Never mention SQL, tables, queries or column identifiers.
- Two sentences at most. Plain text, no markdown."#;

/// Metadata block describing the dataset columns
pub fn build_metadata_context(profile: &DatasetProfile) -> String {
    let mut out = format!(
        "## Dataset\n\nName: {}\nTable: {}\nRows: {}\n",
        profile.name, profile.table_name, profile.row_count
    );
    if !profile.description.is_empty() {
        out.push_str(&format!("Description: {}\n", profile.description));
    }
    out.push_str("\n## Columns\n\n");

    for column in &profile.columns {
        out.push_str(&format!(
            "- \"{}\" ({}, {}, {} distinct, {} nulls)",
            column.name, column.semantic_type, column.dtype, column.distinct_count, column.null_count
        ));
        match column.semantic_type {
            SemanticType::Categorical if !column.categories.is_empty() => {
                out.push_str(&format!(" values: {}", column.categories.join(", ")));
            }
            SemanticType::Numeric => {
                if let Some(stats) = &column.stats {
                    if let (Some(min), Some(max)) = (stats.min, stats.max) {
                        out.push_str(&format!(" range: {} to {}", min, max));
                    }
                }
                if column.looks_monetary() {
                    out.push_str(" [monetary]");
                }
            }
            _ if !column.sample_values.is_empty() => {
                out.push_str(&format!(" e.g. {}", column.sample_values.join(", ")));
            }
            _ => {}
        }
        if column.high_cardinality {
            out.push_str(" [high cardinality]");
        }
        out.push('\n');
    }
    out
}

/// Recent turns plus the previous specification as JSON
pub fn build_follow_up_context(history: &[ConversationTurn]) -> String {
    let Some(last) = history.last() else {
        return "## Conversation\n\nNo previous questions.\n".to_string();
    };

    let mut out = String::from("## Conversation\n\n");
    for turn in history {
        out.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
    }
    let spec_json = serde_json::to_string_pretty(&last.specification).unwrap_or_else(|_| "{}".to_string());
    out.push_str(&format!("\nPrevious specification:\n{}\n", spec_json));
    out
}

/// Prompt for drafting a specification
pub fn build_interpretation_prompt(
    question: &str,
    profile: &DatasetProfile,
    history: &[ConversationTurn],
    feedback: Option<&str>,
) -> String {
    let mut prompt = build_metadata_context(profile);
    prompt.push('\n');
    prompt.push_str(&build_follow_up_context(history));

    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\n## Previous Attempt Failed\n\n{}\nCorrect the specification. If a term truly has no matching column, list it in \"unresolved\".\n",
            feedback
        ));
    }

    prompt.push_str(&format!("\n## Question\n\n\"{}\"\n\nReturn the specification JSON.", question));
    prompt
}

/// Prompt for repairing SQL that the engine rejected
pub fn build_sql_repair_prompt(
    specification: &QuerySpecification,
    profile: &DatasetProfile,
    previous_sql: &str,
    feedback: &str,
) -> String {
    let spec_json = serde_json::to_string_pretty(specification).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n## Specification\n\n{}\n\n## Rejected SQL\n\n{}\n\n## Engine Error\n\n{}\n\nReturn the repaired SQL JSON for table \"{}\".",
        build_metadata_context(profile),
        spec_json,
        previous_sql,
        feedback,
        profile.table_name
    )
}

/// Prompt for phrasing an answer from its deterministic draft
pub fn build_answer_prompt(question: &str, result: &ResultSet, draft_answer: &str) -> String {
    let preview: Vec<String> = result
        .rows
        .iter()
        .take(10)
        .map(|row| row.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" | "))
        .collect();
    format!(
        "Question: \"{}\"\n\nResult ({} rows):\n{}\n{}\n\nDraft answer: {}\n\nRewrite the draft answer.",
        question,
        result.row_count(),
        result.columns.join(" | "),
        preview.join("\n"),
        draft_answer
    )
}
