use insights_assistant::execution_loop::PipelineState;
use insights_assistant::intent::{FilterOperator, IntentKind, Predicate, Scalar};
use insights_assistant::metadata::SemanticType;
use insights_assistant::{DataAssistant, PipelineConfig, PipelineError, RuleBasedGenerator};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Four orders whose revenue sums to 48,213.50
fn sales_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("sales")
        .suffix(".csv")
        .tempfile()
        .unwrap();
    writeln!(file, "order_date,category,region,revenue,quantity").unwrap();
    writeln!(file, "2022-01-15,Toys,North,12000.25,3").unwrap();
    writeln!(file, "2022-03-02,Books,South,8000.25,5").unwrap();
    writeln!(file, "2023-02-11,Toys,South,15000.00,2").unwrap();
    writeln!(file, "2023-07-21,Games,North,13213.00,4").unwrap();
    file.flush().unwrap();
    file
}

/// US-style dates under a header with spaces
fn us_dates_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("orders")
        .suffix(".csv")
        .tempfile()
        .unwrap();
    writeln!(file, "Order Date,Category,Sales").unwrap();
    writeln!(file, "01/15/2022,Toys,100.50").unwrap();
    writeln!(file, "03/02/2022,Books,200.00").unwrap();
    writeln!(file, "02/11/2023,Toys,50.25").unwrap();
    file.flush().unwrap();
    file
}

fn assistant() -> DataAssistant {
    DataAssistant::new(PipelineConfig::default(), Arc::new(RuleBasedGenerator::new())).unwrap()
}

#[test]
fn test_profile_from_csv() {
    let file = sales_csv();
    let mut assistant = assistant();
    let profile = assistant.load_csv(file.path()).unwrap();

    assert_eq!(profile.row_count, 4);
    assert_eq!(
        profile.column_names(),
        vec!["order_date", "category", "region", "revenue", "quantity"]
    );
    assert_eq!(profile.column("order_date").unwrap().semantic_type, SemanticType::Datetime);
    assert_eq!(profile.column("category").unwrap().semantic_type, SemanticType::Categorical);
    assert_eq!(profile.column("category").unwrap().distinct_count, 3);
    assert_eq!(profile.column("revenue").unwrap().semantic_type, SemanticType::Numeric);
    assert_eq!(profile.default_metric().map(|c| c.name.as_str()), Some("revenue"));
}

#[test]
fn test_non_tabular_input_is_profiling_error() {
    let file = NamedTempFile::new().unwrap();
    let mut assistant = assistant();
    assert!(matches!(assistant.load_csv(file.path()), Err(PipelineError::Profiling(_))));
}

#[tokio::test]
async fn test_total_revenue_answer() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("What is the total revenue?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    assert!(run.message().contains("48,213.50"), "{}", run.message());
    assert_eq!(run.trace.last(), Some(&PipelineState::Done));
    assert_eq!(run.retry.resolution_attempts, 1);
    assert_eq!(run.retry.synthesis_attempts, 1);
}

#[tokio::test]
async fn test_unknown_dimension_fails_with_explanation() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("Show top 5 states by sales").await.unwrap();
    assert!(!run.is_done());
    assert_eq!(
        run.trace,
        vec![PipelineState::Resolve, PipelineState::Resolve, PipelineState::Failed]
    );
    assert!(run.message().contains("\"state\""), "{}", run.message());
    assert!(run.message().contains("region"));
    assert!(assistant.conversation().is_empty());
}

#[tokio::test]
async fn test_follow_up_merges_previous_specification() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let first = assistant.ask("What is the total revenue for toys?").await.unwrap();
    assert!(first.message().contains("27,000.25"), "{}", first.message());

    let second = assistant.ask("Same as above but only for 2022").await.unwrap();
    assert!(second.is_done(), "{}", second.message());
    let spec = second.specification().unwrap();
    assert_eq!(spec.intent, IntentKind::Aggregate);
    assert_eq!(spec.metrics[0].column, "revenue");
    assert!(spec.filters.contains(&Predicate::new(
        "category",
        FilterOperator::Equals,
        Scalar::Text("Toys".to_string())
    )));
    assert!(spec.filters.contains(&Predicate::year("order_date", 2022)));
    assert!(second.message().contains("12,000.25"), "{}", second.message());
    assert_eq!(assistant.conversation().len(), 2);
}

#[tokio::test]
async fn test_ranking_answer_lists_groups() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("What are the top 2 categories by revenue?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    let sql = run.sql().unwrap();
    assert!(sql.contains("GROUP BY \"category\""), "{}", sql);
    assert!(sql.contains("LIMIT 2"), "{}", sql);
    let toys = run.message().find("Toys").unwrap();
    let games = run.message().find("Games").unwrap();
    assert!(toys < games);
}

#[tokio::test]
async fn test_no_matching_rows_is_a_valid_answer() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("What is the total revenue for toys in 2019?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    assert!(run.message().starts_with("No records matched"), "{}", run.message());
    assert_eq!(run.retry.resolution_attempts, 2);
}

#[tokio::test]
async fn test_upload_builds_summary() {
    let file = sales_csv();
    let mut assistant = assistant();
    let summary = assistant.upload(file.path()).await.unwrap();

    assert!(!summary.insights.is_empty());
    let markdown = summary.to_markdown();
    assert!(markdown.contains("## Totals"), "{}", markdown);
    assert!(markdown.contains("### What is the total revenue?"), "{}", markdown);
    assert!(markdown.contains("48,213.50"), "{}", markdown);
    assert!(markdown.contains("## Trends"), "{}", markdown);
    assert!(!markdown.contains("unavailable"), "{}", markdown);
    assert!(assistant.conversation().is_empty());
}

#[tokio::test]
async fn test_monthly_trend_runs_on_engine() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("Show the monthly revenue trend").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    assert_eq!(run.retry.synthesis_attempts, 1);
    let message = run.message();
    assert!(message.contains("- 2022-01: 12,000.25"), "{}", message);
    assert!(message.contains("- 2023-07: 13,213.00"), "{}", message);
    assert!(message.find("2022-03").unwrap() < message.find("2023-02").unwrap());
}

#[tokio::test]
async fn test_year_filter_on_recovered_dates() {
    let file = us_dates_csv();
    let mut assistant = assistant();
    let profile = assistant.load_csv(file.path()).unwrap();
    assert_eq!(profile.column("Order Date").unwrap().semantic_type, SemanticType::Datetime);

    let run = assistant.ask("What is the total sales in 2022?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    assert!(run.sql().unwrap().contains(r#"EXTRACT(YEAR FROM "Order Date") = 2022"#));
    assert!(run.message().contains("300.50"), "{}", run.message());

    let trend = assistant.ask("Show the yearly sales trend").await.unwrap();
    assert!(trend.is_done(), "{}", trend.message());
    assert!(trend.message().contains("- 2022: 300.50"), "{}", trend.message());
    assert!(trend.message().contains("- 2023: 50.25"), "{}", trend.message());
}

#[tokio::test]
async fn test_grouped_record_counts_are_per_group() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("How many records are in each category?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    let message = run.message();
    assert!(message.contains("- Toys: 2"), "{}", message);
    assert!(message.contains("- Books: 1"), "{}", message);
    assert!(message.contains("- Games: 1"), "{}", message);
}

#[tokio::test]
async fn test_latest_date_is_a_maximum() {
    let file = sales_csv();
    let mut assistant = assistant();
    assistant.load_csv(file.path()).unwrap();

    let run = assistant.ask("What is the highest order date?").await.unwrap();
    assert!(run.is_done(), "{}", run.message());
    assert_eq!(run.specification().unwrap().intent, IntentKind::Aggregate);
    assert!(run.message().contains("2023-07-21"), "{}", run.message());
}
