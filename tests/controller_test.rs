use async_trait::async_trait;
use insights_assistant::execution::TabularStore;
use insights_assistant::execution_loop::{PipelineController, PipelineState};
use insights_assistant::generation::{CapabilityError, ResolutionContext, SqlRepairContext, StructuredGenerator};
use insights_assistant::intent::{Aggregation, IntentKind, MetricRef, SpecificationDraft};
use insights_assistant::metadata::DatasetProfile;
use insights_assistant::profiler::DatasetProfiler;
use insights_assistant::summary::{SummaryGenerator, SummaryQuestion, SummarySection};
use insights_assistant::{PipelineConfig, RuleBasedGenerator};
use polars::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns the same draft every time and, optionally, the same repaired SQL
#[derive(Default)]
struct ScriptedGenerator {
    draft: SpecificationDraft,
    repair: Option<String>,
    delay: Option<Duration>,
    draft_calls: AtomicUsize,
    repair_calls: AtomicUsize,
    feedback: Mutex<Vec<Option<String>>>,
}

impl ScriptedGenerator {
    fn drafting(draft: SpecificationDraft) -> Self {
        Self {
            draft,
            ..Default::default()
        }
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn draft_specification(
        &self,
        context: &ResolutionContext,
    ) -> Result<SpecificationDraft, CapabilityError> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        self.feedback.lock().unwrap().push(context.feedback.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.draft.clone())
    }

    async fn repair_sql(&self, _context: &SqlRepairContext) -> Result<String, CapabilityError> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        self.repair
            .clone()
            .ok_or(CapabilityError::Unsupported("SQL repair"))
    }
}

fn sales_frame() -> DataFrame {
    df![
        "date" => ["2022-01-15", "2022-03-02", "2023-02-11", "2023-07-21"],
        "category" => ["Toys", "Books", "Toys", "Games"],
        "region" => ["North", "South", "South", "North"],
        "revenue" => [12000.25, 8000.25, 15000.00, 13213.00],
        "quantity" => [3i64, 5, 2, 4]
    ]
    .unwrap()
}

/// Profile of `frame`, with the frame registered in a fresh store
fn profiled(frame: DataFrame) -> (Arc<DatasetProfile>, Arc<TabularStore>) {
    let store = Arc::new(TabularStore::new("dataset"));
    let profile = DatasetProfiler::new(&PipelineConfig::default())
        .profile_frame("sales", frame, &store)
        .unwrap();
    (Arc::new(profile), store)
}

fn total_of(column: &str) -> SpecificationDraft {
    SpecificationDraft {
        intent: Some(IntentKind::Aggregate),
        metrics: vec![MetricRef::new(column, Aggregation::Sum)],
        ..Default::default()
    }
}

fn controller(config: &PipelineConfig, generator: Arc<dyn StructuredGenerator>, store: Arc<TabularStore>) -> PipelineController {
    PipelineController::new(config, generator, store)
}

#[tokio::test]
async fn test_happy_path_trace() {
    let (profile, store) = profiled(sales_frame());
    let generator = Arc::new(ScriptedGenerator::drafting(total_of("revenue")));
    let controller = controller(&PipelineConfig::default(), generator.clone(), store);

    let run = controller.run("total revenue", profile, Vec::new()).await;
    assert!(run.is_done(), "{}", run.message());
    assert!(run.message().contains("48,213.50"));
    assert_eq!(
        run.trace,
        vec![
            PipelineState::Resolve,
            PipelineState::Synthesize,
            PipelineState::Execute,
            PipelineState::Validate,
            PipelineState::Format,
            PipelineState::Done
        ]
    );
    assert_eq!(generator.draft_calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.repair_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_engine_error_fails_without_retry() {
    let (profile, _) = profiled(sales_frame());
    // Nothing registered in this store, so the engine itself fails
    let empty_store = Arc::new(TabularStore::new("dataset"));
    let generator = Arc::new(ScriptedGenerator::drafting(total_of("revenue")));
    let controller = controller(&PipelineConfig::default(), generator.clone(), empty_store);

    let run = controller.run("total revenue", profile, Vec::new()).await;
    assert!(!run.is_done());
    assert_eq!(
        run.trace,
        vec![
            PipelineState::Resolve,
            PipelineState::Synthesize,
            PipelineState::Execute,
            PipelineState::Validate,
            PipelineState::Failed
        ]
    );
    assert_eq!(run.retry.resolution_attempts, 1);
    assert_eq!(run.retry.synthesis_attempts, 1);
    assert!(run.message().contains("analysis engine failed"), "{}", run.message());
}

#[tokio::test]
async fn test_schema_errors_exhaust_synthesis_budget() {
    // The profile knows a `profit` column the executed frame does not have
    let mut with_profit = sales_frame();
    with_profit
        .with_column(Series::new("profit", &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    let (profile, _) = profiled(with_profit);
    let (_, store) = profiled(sales_frame());

    let generator = Arc::new(ScriptedGenerator {
        draft: total_of("profit"),
        repair: Some(r#"SELECT SUM("profit") AS "total_profit" FROM dataset"#.to_string()),
        ..Default::default()
    });
    let controller = controller(&PipelineConfig::default(), generator.clone(), store);

    let run = controller.run("total profit", profile, Vec::new()).await;
    assert!(!run.is_done());
    assert_eq!(run.trace.last(), Some(&PipelineState::Failed));
    assert_eq!(run.retry.synthesis_attempts, 2);
    assert_eq!(run.retry.resolution_attempts, 1);
    assert_eq!(generator.repair_calls.load(Ordering::SeqCst), 1);
    let synth_entries = run.trace.iter().filter(|s| **s == PipelineState::Synthesize).count();
    assert_eq!(synth_entries, 2);
}

#[tokio::test]
async fn test_invalid_sql_is_repaired() {
    let mut with_profit = sales_frame();
    with_profit
        .with_column(Series::new("profit", &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    let (profile, _) = profiled(with_profit);
    let (_, store) = profiled(sales_frame());

    let generator = Arc::new(ScriptedGenerator {
        draft: total_of("profit"),
        repair: Some(r#"```sql
SELECT SUM("revenue") AS "total_profit" FROM dataset
```"#
            .to_string()),
        ..Default::default()
    });
    let controller = controller(&PipelineConfig::default(), generator.clone(), store);

    let run = controller.run("total profit", profile, Vec::new()).await;
    assert!(run.is_done(), "{}", run.message());
    assert_eq!(
        run.trace,
        vec![
            PipelineState::Resolve,
            PipelineState::Synthesize,
            PipelineState::Execute,
            PipelineState::Validate,
            PipelineState::Synthesize,
            PipelineState::Execute,
            PipelineState::Validate,
            PipelineState::Format,
            PipelineState::Done
        ]
    );
    assert_eq!(run.sql(), Some(r#"SELECT SUM("revenue") AS "total_profit" FROM dataset"#));
}

#[tokio::test]
async fn test_unsafe_repair_is_rejected() {
    let mut with_profit = sales_frame();
    with_profit
        .with_column(Series::new("profit", &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    let (profile, _) = profiled(with_profit);
    let (_, store) = profiled(sales_frame());

    let generator = Arc::new(ScriptedGenerator {
        draft: total_of("profit"),
        repair: Some("DROP TABLE dataset".to_string()),
        ..Default::default()
    });
    let controller = controller(&PipelineConfig::default(), generator.clone(), store.clone());

    let run = controller.run("total profit", profile, Vec::new()).await;
    assert!(!run.is_done());
    assert_eq!(run.retry.synthesis_attempts, 2);
    assert!(store.is_loaded());
}

#[tokio::test]
async fn test_unresolvable_draft_is_bounded() {
    let (profile, store) = profiled(sales_frame());
    let generator = Arc::new(ScriptedGenerator::drafting(SpecificationDraft {
        unresolved: vec!["weather".to_string()],
        ..Default::default()
    }));
    let mut config = PipelineConfig::default();
    config.max_resolution_attempts = 3;
    let controller = controller(&config, generator.clone(), store);

    let run = controller.run("what is the weather", profile, Vec::new()).await;
    assert!(!run.is_done());
    assert_eq!(
        run.trace,
        vec![
            PipelineState::Resolve,
            PipelineState::Resolve,
            PipelineState::Resolve,
            PipelineState::Failed
        ]
    );
    assert_eq!(generator.draft_calls.load(Ordering::SeqCst), 3);
    assert!(run.message().contains("\"weather\""));

    // Retries carry the previous failure as feedback
    let feedback = generator.feedback.lock().unwrap();
    assert!(feedback[0].is_none());
    assert!(feedback[1].as_deref().unwrap_or_default().contains("weather"));
}

#[tokio::test]
async fn test_capability_timeout_counts_against_budget() {
    let (profile, store) = profiled(sales_frame());
    let generator = Arc::new(ScriptedGenerator {
        draft: total_of("revenue"),
        delay: Some(Duration::from_secs(10)),
        ..Default::default()
    });
    let mut config = PipelineConfig::default();
    config.capability_timeout_secs = 1;
    let controller = controller(&config, generator.clone(), store);

    let run = controller.run("total revenue", profile, Vec::new()).await;
    assert!(!run.is_done());
    assert_eq!(
        run.trace,
        vec![PipelineState::Resolve, PipelineState::Resolve, PipelineState::Failed]
    );
    assert_eq!(run.retry.resolution_attempts, 2);
}

#[tokio::test]
async fn test_summary_drops_failed_questions() {
    let (profile, store) = profiled(sales_frame());
    let config = PipelineConfig::default();
    let generator: Arc<dyn StructuredGenerator> = Arc::new(RuleBasedGenerator::new());
    let controller = Arc::new(PipelineController::new(&config, generator, store));

    let questions = vec![
        SummaryQuestion::new(SummarySection::Totals, "What is the total revenue?"),
        SummaryQuestion::new(SummarySection::Totals, "What is the total quantity?"),
        SummaryQuestion::new(SummarySection::Totals, "What is the average revenue?"),
        SummaryQuestion::new(SummarySection::Totals, "How many records are in the dataset?"),
        SummaryQuestion::new(SummarySection::Rankings, "What are the top 2 categories by revenue?"),
        SummaryQuestion::new(SummarySection::Rankings, "Show top 5 states by sales"),
        SummaryQuestion::new(SummarySection::Distributions, "What is the total revenue by region?"),
        SummaryQuestion::new(SummarySection::Distributions, "What is the total revenue for toys?"),
        SummaryQuestion::new(SummarySection::Distributions, "How many records are in each category?"),
        SummaryQuestion::new(SummarySection::Distributions, "What is the weather like?"),
    ];

    let summary = SummaryGenerator::new(controller, 10, 4)
        .run_questions(profile, questions)
        .await;

    assert_eq!(summary.insights.len(), 8);
    assert_eq!(summary.unavailable, 2);
    let markdown = summary.to_markdown();
    assert_eq!(markdown.matches("### ").count(), 8);
    assert!(markdown.contains("2 insights unavailable."));
    assert!(!markdown.contains("states"));
    assert_eq!(summary.insights[0].question, "What is the total revenue?");
}
