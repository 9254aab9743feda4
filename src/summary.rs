//! Summary Generator
//!
//! Composes a fixed batch of exploratory questions from the dataset profile,
//! runs each one independently through the pipeline (no conversation
//! history, same retry budgets) on a bounded worker pool, and assembles the
//! answers into a markdown executive summary. Questions that fail are left
//! out and counted.

use crate::execution_loop::controller::{PipelineController, PipelineRun};
use crate::intent::QuerySpecification;
use crate::metadata::{ColumnProfile, DatasetProfile, SemanticType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Dimensions with more distinct values than this are not used for
/// rankings or distributions
const MAX_SUMMARY_DIMENSION_VALUES: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SummarySection {
    Totals,
    Rankings,
    Trends,
    Distributions,
}

impl SummarySection {
    pub const ALL: [SummarySection; 4] = [
        SummarySection::Totals,
        SummarySection::Rankings,
        SummarySection::Trends,
        SummarySection::Distributions,
    ];
}

impl fmt::Display for SummarySection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummarySection::Totals => write!(f, "Totals"),
            SummarySection::Rankings => write!(f, "Rankings"),
            SummarySection::Trends => write!(f, "Trends"),
            SummarySection::Distributions => write!(f, "Distributions"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryQuestion {
    pub section: SummarySection,
    pub question: String,
}

impl SummaryQuestion {
    pub fn new(section: SummarySection, question: impl Into<String>) -> Self {
        Self {
            section,
            question: question.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryInsight {
    pub section: SummarySection,
    pub question: String,
    pub specification: QuerySpecification,
    pub answer: String,
}

/// Report produced once per upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub dataset: String,
    pub description: String,
    /// In question order
    pub insights: Vec<SummaryInsight>,
    /// Questions that reached FAILED and were left out
    pub unavailable: usize,
}

impl ExecutiveSummary {
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# Executive Summary: {}\n\n", self.dataset);
        if !self.description.is_empty() {
            out.push_str(&format!("{}\n\n", self.description));
        }

        for section in SummarySection::ALL {
            let insights: Vec<&SummaryInsight> = self.insights.iter().filter(|i| i.section == section).collect();
            if insights.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n\n", section));
            for insight in insights {
                out.push_str(&format!("### {}\n\n{}\n\n", insight.question, insight.answer));
            }
        }

        if self.insights.is_empty() {
            out.push_str("No insights could be computed for this dataset.\n\n");
        }
        if self.unavailable > 0 {
            let noun = if self.unavailable == 1 { "insight" } else { "insights" };
            out.push_str(&format!("_{} {} unavailable._\n", self.unavailable, noun));
        }
        out.trim_end().to_string() + "\n"
    }
}

impl fmt::Display for ExecutiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_markdown())
    }
}

pub struct SummaryGenerator {
    controller: Arc<PipelineController>,
    batch_size: usize,
    workers: usize,
}

impl SummaryGenerator {
    pub fn new(controller: Arc<PipelineController>, batch_size: usize, workers: usize) -> Self {
        Self {
            controller,
            batch_size,
            workers: workers.max(1),
        }
    }

    /// Compose and run the exploratory batch for a freshly profiled dataset
    pub async fn generate(&self, profile: Arc<DatasetProfile>) -> ExecutiveSummary {
        let questions = compose_questions(&profile, self.batch_size);
        info!("Generating executive summary with {} questions", questions.len());
        self.run_questions(profile, questions).await
    }

    /// Run a batch concurrently. Each question keeps its own sequential
    /// pipeline and retry budget; the report keeps question order.
    pub async fn run_questions(&self, profile: Arc<DatasetProfile>, questions: Vec<SummaryQuestion>) -> ExecutiveSummary {
        let total = questions.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, item) in questions.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let controller = Arc::clone(&self.controller);
            let profile = Arc::clone(&profile);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let run = controller.run(&item.question, profile, Vec::new()).await;
                (index, item, run)
            });
        }

        let mut finished: Vec<(usize, SummaryQuestion, PipelineRun)> = Vec::with_capacity(total);
        let mut unavailable = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => {
                    debug!("Summary question {} finished: {:?}", entry.0, entry.2.trace.last());
                    finished.push(entry);
                }
                Err(e) => {
                    warn!("Summary task aborted: {}", e);
                    unavailable += 1;
                }
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut insights = Vec::new();
        for (_, item, run) in finished {
            match (run.is_done(), run.specification()) {
                (true, Some(spec)) => insights.push(SummaryInsight {
                    section: item.section,
                    question: item.question,
                    specification: spec.clone(),
                    answer: run.message().to_string(),
                }),
                _ => {
                    warn!("Summary question dropped: '{}' ({})", item.question, run.message());
                    unavailable += 1;
                }
            }
        }

        info!("Executive summary ready: {}/{} insights", insights.len(), total);
        ExecutiveSummary {
            dataset: profile.name.clone(),
            description: profile.description.clone(),
            insights,
            unavailable,
        }
    }
}

/// Exploratory questions for a profile: totals first, then rankings, a trend
/// when a date column exists, and distributions. Capped at `batch_size`.
pub fn compose_questions(profile: &DatasetProfile, batch_size: usize) -> Vec<SummaryQuestion> {
    let metrics = summary_metrics(profile);
    let dimensions = summary_dimensions(profile);
    let time_column = profile.primary_time_column();

    let mut primary = Vec::new();
    let mut extra = Vec::new();

    primary.push(SummaryQuestion::new(
        SummarySection::Totals,
        "How many records are in the dataset?",
    ));
    for metric in metrics.iter().take(2) {
        primary.push(SummaryQuestion::new(
            SummarySection::Totals,
            format!("What is the total {}?", phrase(metric)),
        ));
    }
    if let Some(metric) = metrics.first() {
        extra.push(SummaryQuestion::new(
            SummarySection::Totals,
            format!("What is the average {}?", phrase(metric)),
        ));
    }

    if let Some(metric) = metrics.first() {
        for dimension in dimensions.iter().take(2) {
            primary.push(SummaryQuestion::new(
                SummarySection::Rankings,
                format!("What are the top 5 {} by {}?", phrase(dimension), phrase(metric)),
            ));
        }
        for dimension in dimensions.iter().take(1) {
            extra.push(SummaryQuestion::new(
                SummarySection::Rankings,
                format!("What are the bottom 5 {} by {}?", phrase(dimension), phrase(metric)),
            ));
        }
    }

    if let (Some(time), Some(metric)) = (time_column, metrics.first()) {
        primary.push(SummaryQuestion::new(
            SummarySection::Trends,
            format!("Show the monthly {} trend by {}", phrase(metric), phrase(time)),
        ));
    }

    for dimension in dimensions.iter().take(2) {
        primary.push(SummaryQuestion::new(
            SummarySection::Distributions,
            format!("How many records are in each {}?", phrase(dimension)),
        ));
        if let Some(metric) = metrics.first() {
            extra.push(SummaryQuestion::new(
                SummarySection::Distributions,
                format!("What is the total {} by {}?", phrase(metric), phrase(dimension)),
            ));
        }
    }
    for metric in metrics.iter().skip(1).take(1) {
        if let Some(dimension) = dimensions.first() {
            extra.push(SummaryQuestion::new(
                SummarySection::Distributions,
                format!("What is the average {} by {}?", phrase(metric), phrase(dimension)),
            ));
        }
    }

    primary.extend(extra);
    let mut seen = std::collections::HashSet::new();
    primary.retain(|q| seen.insert(q.question.clone()));
    primary.truncate(batch_size);
    primary.sort_by_key(|q| q.section);
    primary
}

/// Numeric columns worth summing, monetary ones first
fn summary_metrics(profile: &DatasetProfile) -> Vec<&ColumnProfile> {
    let mut metrics: Vec<&ColumnProfile> = profile
        .columns_of(SemanticType::Numeric)
        .filter(|c| !is_identifier(c))
        .collect();
    metrics.sort_by_key(|c| !c.looks_monetary());
    metrics
}

/// Categorical columns with a readable number of values, fewest first
fn summary_dimensions(profile: &DatasetProfile) -> Vec<&ColumnProfile> {
    let mut dimensions: Vec<&ColumnProfile> = profile
        .columns_of(SemanticType::Categorical)
        .filter(|c| c.distinct_count > 1 && c.distinct_count <= MAX_SUMMARY_DIMENSION_VALUES)
        .collect();
    dimensions.sort_by_key(|c| c.distinct_count);
    dimensions
}

fn is_identifier(column: &ColumnProfile) -> bool {
    let lower = column.name.to_lowercase();
    lower == "id" || lower.ends_with("_id") || lower.ends_with(" id") || (lower.ends_with("id") && lower.len() <= 4)
}

/// Column name as it would be written in a question
fn phrase(column: &ColumnProfile) -> String {
    column.name.replace(['_', '-'], " ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, semantic_type: SemanticType, distinct: usize) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            semantic_type,
            dtype: String::new(),
            distinct_count: distinct,
            null_count: 0,
            nullable: false,
            high_cardinality: distinct > 50,
            sample_values: vec![],
            categories: vec![],
            stats: None,
        }
    }

    fn profile() -> DatasetProfile {
        DatasetProfile {
            name: "sales".to_string(),
            description: String::new(),
            table_name: "dataset".to_string(),
            row_count: 100,
            columns: vec![
                column("order_id", SemanticType::Numeric, 100),
                column("order_date", SemanticType::Datetime, 90),
                column("region", SemanticType::Categorical, 4),
                column("category", SemanticType::Categorical, 3),
                column("customer", SemanticType::Text, 80),
                column("quantity", SemanticType::Numeric, 10),
                column("revenue", SemanticType::Numeric, 95),
            ],
        }
    }

    #[test]
    fn test_compose_covers_every_section() {
        let questions = compose_questions(&profile(), 10);
        assert_eq!(questions.len(), 10);
        for section in SummarySection::ALL {
            assert!(questions.iter().any(|q| q.section == section), "missing {}", section);
        }
        assert_eq!(questions[1].question, "What is the total revenue?");
        assert!(questions
            .iter()
            .any(|q| q.question == "What are the top 5 category by revenue?"));
        assert!(!questions.iter().any(|q| q.question.contains("order id")));
    }

    #[test]
    fn test_compose_respects_batch_size() {
        assert_eq!(compose_questions(&profile(), 8).len(), 8);
        let questions = compose_questions(&profile(), 12);
        assert!(questions.len() <= 12);
        let mut unique: Vec<&str> = questions.iter().map(|q| q.question.as_str()).collect();
        unique.dedup();
        assert_eq!(unique.len(), questions.len());
    }

    #[test]
    fn test_markdown_notes_unavailable() {
        let summary = ExecutiveSummary {
            dataset: "sales".to_string(),
            description: String::new(),
            insights: vec![SummaryInsight {
                section: SummarySection::Totals,
                question: "What is the total revenue?".to_string(),
                specification: QuerySpecification::new(crate::intent::IntentKind::Aggregate),
                answer: "The total revenue is 10.00.".to_string(),
            }],
            unavailable: 2,
        };
        let markdown = summary.to_markdown();
        assert!(markdown.contains("## Totals"));
        assert!(markdown.contains("### What is the total revenue?"));
        assert!(markdown.contains("2 insights unavailable."));
        assert!(!markdown.contains("## Trends"));
    }
}
