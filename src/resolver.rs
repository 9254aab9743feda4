//! Query Specification Resolver
//!
//! Turns a generator draft into a grounded `QuerySpecification`: follow-ups
//! are merged onto the previous turn, every column reference is mapped onto a
//! profile column, intent defaults are applied, and filter literals are
//! checked against the column types. Anything that cannot be grounded fails
//! here with `UnresolvableIntent` naming the term, before synthesis.

use crate::error::{PipelineError, Result};
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::generation::{CapabilityError, ResolutionContext, StructuredGenerator};
use crate::intent::{
    Aggregation, FilterOperator, FilterValue, IntentKind, MetricRef, Predicate, QuerySpecification, Scalar,
    SortDirection, SpecificationDraft, TimeGranularity,
};
use crate::metadata::{ColumnProfile, DatasetProfile, SemanticType};
use crate::sql_compiler::{parse_date_literal, DEFAULT_RANK_LIMIT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct QueryResolver {
    generator: Arc<dyn StructuredGenerator>,
    matcher: FuzzyMatcher,
    timeout: Duration,
}

impl QueryResolver {
    pub fn new(generator: Arc<dyn StructuredGenerator>, timeout: Duration) -> Self {
        Self {
            generator,
            matcher: FuzzyMatcher::default(),
            timeout,
        }
    }

    pub async fn resolve(&self, context: &ResolutionContext) -> Result<QuerySpecification> {
        let draft = match tokio::time::timeout(self.timeout, self.generator.draft_specification(context)).await {
            Ok(Ok(draft)) => draft,
            Ok(Err(e)) => return Err(capability_failure(e)),
            Err(_) => return Err(capability_failure(CapabilityError::Timeout(self.timeout.as_secs()))),
        };

        let spec = self.ground(draft, context)?;
        info!(
            "Resolved '{}' as {} over {:?}",
            context.question,
            spec.intent,
            spec.referenced_columns()
        );
        Ok(spec)
    }

    /// Ground a draft against the profile and the conversation
    pub fn ground(&self, draft: SpecificationDraft, context: &ResolutionContext) -> Result<QuerySpecification> {
        let profile = context.profile.as_ref();

        if let Some(term) = draft.unresolved.first() {
            return Err(PipelineError::unresolvable(
                term.clone(),
                format!("no column or value in '{}' matches '{}'", profile.name, term),
            ));
        }

        let follow_up = draft.follow_up;
        let merged = match (follow_up, context.last_specification()) {
            (true, Some(prior)) => {
                debug!("Merging follow-up onto previous specification");
                Some(draft.merge_onto(prior))
            }
            _ => draft.into_fresh(),
        };
        let mut spec = merged.ok_or_else(|| {
            PipelineError::unresolvable("question", "the question does not ask for anything this dataset can compute")
        })?;

        spec.metrics = spec
            .metrics
            .iter()
            .map(|m| self.ground_metric(m, profile))
            .collect::<Result<_>>()?;
        spec.dimensions = spec
            .dimensions
            .iter()
            .map(|d| self.ground_name(d, profile, &[SemanticType::Categorical, SemanticType::Text, SemanticType::Datetime]))
            .collect::<Result<_>>()?;
        spec.columns = spec
            .columns
            .iter()
            .map(|c| self.ground_name(c, profile, &[]))
            .collect::<Result<_>>()?;
        spec.filters = spec
            .filters
            .iter()
            .map(|p| self.ground_predicate(p, profile))
            .collect::<Result<_>>()?;
        if let Some(time_column) = spec.time_column.take() {
            let name = self.ground_name(&time_column, profile, &[SemanticType::Datetime])?;
            require_type(profile, &name, &[SemanticType::Datetime], "is not a date column")?;
            spec.time_column = Some(name);
        }

        self.apply_defaults(&mut spec, profile)?;
        Ok(spec)
    }

    fn ground_name(&self, term: &str, profile: &DatasetProfile, kinds: &[SemanticType]) -> Result<String> {
        match self.matcher.ground_column(term, profile, kinds) {
            Some((column, score)) => {
                if column.name != term {
                    debug!("Grounded '{}' to column '{}' ({:.2})", term, column.name, score);
                }
                Ok(column.name.clone())
            }
            None => Err(PipelineError::unresolvable(
                term,
                format!("no column in '{}' matches '{}'", profile.name, term),
            )),
        }
    }

    fn ground_metric(&self, metric: &MetricRef, profile: &DatasetProfile) -> Result<MetricRef> {
        if metric.counts_rows() {
            return Ok(MetricRef::new(metric.column.clone(), Aggregation::Count));
        }
        let kinds: &[SemanticType] = match metric.aggregation {
            Aggregation::Sum | Aggregation::Avg => &[SemanticType::Numeric],
            Aggregation::Min | Aggregation::Max => &[SemanticType::Numeric, SemanticType::Datetime],
            Aggregation::Count => &[],
        };
        let name = self.ground_name(&metric.column, profile, kinds)?;
        if !kinds.is_empty() {
            require_type(
                profile,
                &name,
                kinds,
                &format!("cannot be used for the {} because it is not numeric", metric.aggregation.business_word()),
            )?;
        }
        Ok(MetricRef::new(name, metric.aggregation))
    }

    fn ground_predicate(&self, predicate: &Predicate, profile: &DatasetProfile) -> Result<Predicate> {
        let name = self.ground_name(&predicate.column, profile, &[])?;
        let column = profile
            .column(&name)
            .ok_or_else(|| PipelineError::unresolvable(name.clone(), "column disappeared from the profile"))?;

        let scalars: Vec<Scalar> = predicate
            .value
            .scalars()
            .into_iter()
            .map(|s| self.check_literal(s, predicate, column))
            .collect::<Result<_>>()?;

        let value = match predicate.operator {
            FilterOperator::In => FilterValue::List(scalars),
            FilterOperator::Between => {
                if scalars.len() != 2 {
                    return Err(PipelineError::unresolvable(
                        column.label(),
                        "a range filter needs exactly two values",
                    ));
                }
                FilterValue::List(scalars)
            }
            _ => match <[Scalar; 1]>::try_from(scalars) {
                Ok([single]) => FilterValue::Single(single),
                Err(_) => {
                    return Err(PipelineError::unresolvable(
                        column.label(),
                        format!("'{}' filters compare against a single value", predicate.operator.business_phrase()),
                    ))
                }
            },
        };

        Ok(Predicate {
            column: name,
            operator: predicate.operator,
            value,
            date_part: predicate.date_part,
        })
    }

    /// Type-check one literal, returning its canonical form
    fn check_literal(&self, value: &Scalar, predicate: &Predicate, column: &ColumnProfile) -> Result<Scalar> {
        let mismatch = |expected: &str| {
            PipelineError::unresolvable(
                value.to_string(),
                format!("'{}' is not {} for {}", value, expected, column.label()),
            )
        };

        if predicate.date_part.is_some() {
            if !column.is_temporal() {
                return Err(PipelineError::unresolvable(column.label(), "is not a date column"));
            }
            let number = match value {
                Scalar::Number(n) => Some(*n),
                Scalar::Text(s) => s.trim().parse::<f64>().ok(),
                Scalar::Bool(_) => None,
            };
            return match number {
                Some(n) if n.fract() == 0.0 => Ok(Scalar::Number(n)),
                _ => Err(mismatch("a whole number")),
            };
        }

        match column.semantic_type {
            SemanticType::Numeric => match value {
                Scalar::Number(_) | Scalar::Bool(_) => Ok(value.clone()),
                Scalar::Text(s) => s
                    .trim()
                    .replace(',', "")
                    .parse::<f64>()
                    .map(Scalar::Number)
                    .map_err(|_| mismatch("a number")),
            },
            SemanticType::Datetime => match value {
                Scalar::Text(s) if parse_date_literal(s).is_some() => Ok(value.clone()),
                _ => Err(mismatch("a date")),
            },
            SemanticType::Categorical | SemanticType::Text => match value {
                Scalar::Text(s) => Ok(Scalar::Text(
                    self.matcher
                        .ground_category(s, column)
                        .map(str::to_string)
                        .unwrap_or_else(|| s.clone()),
                )),
                Scalar::Number(_) => Ok(Scalar::Text(value.to_string())),
                Scalar::Bool(_) => Err(mismatch("text")),
            },
        }
    }

    fn apply_defaults(&self, spec: &mut QuerySpecification, profile: &DatasetProfile) -> Result<()> {
        match spec.intent {
            IntentKind::Rank => {
                if spec.metrics.is_empty() {
                    let metric = profile
                        .default_metric()
                        .ok_or_else(|| PipelineError::unresolvable("metric", "the dataset has no numeric column to rank by"))?;
                    spec.metrics.push(MetricRef::new(metric.name.clone(), Aggregation::Sum));
                }
                if spec.dimensions.is_empty() && spec.columns.is_empty() {
                    return Err(PipelineError::unresolvable("ranking", "the question does not say what to rank"));
                }
                spec.limit = Some(spec.limit.unwrap_or(DEFAULT_RANK_LIMIT).max(1));
                spec.order = Some(spec.order.unwrap_or(SortDirection::Desc));
            }
            IntentKind::Trend => {
                if spec.time_column.is_none() {
                    let column = profile
                        .primary_time_column()
                        .ok_or_else(|| PipelineError::unresolvable("date", "the dataset has no date column for a trend"))?;
                    spec.time_column = Some(column.name.clone());
                }
                if spec.granularity.is_none() {
                    spec.granularity = Some(TimeGranularity::Month);
                }
                if spec.metrics.is_empty() {
                    let metric = profile
                        .default_metric()
                        .ok_or_else(|| PipelineError::unresolvable("metric", "the dataset has no numeric column to trend"))?;
                    spec.metrics.push(MetricRef::new(metric.name.clone(), Aggregation::Sum));
                }
            }
            IntentKind::Aggregate => {
                if spec.metrics.is_empty() {
                    return Err(PipelineError::unresolvable("metric", "no measure to aggregate was named"));
                }
            }
            IntentKind::Filter => {
                if spec.filters.is_empty() {
                    return Err(PipelineError::unresolvable("condition", "no condition to filter on was named"));
                }
            }
            IntentKind::Lookup => {
                if spec.columns.is_empty() && spec.metrics.is_empty() {
                    return Err(PipelineError::unresolvable("column", "no column to look up was named"));
                }
            }
        }
        Ok(())
    }
}

fn require_type(profile: &DatasetProfile, name: &str, kinds: &[SemanticType], reason: &str) -> Result<()> {
    match profile.column(name) {
        Some(column) if kinds.contains(&column.semantic_type) => Ok(()),
        Some(column) => Err(PipelineError::unresolvable(column.label(), reason.to_string())),
        None => Err(PipelineError::unresolvable(name, "no such column")),
    }
}

fn capability_failure(error: CapabilityError) -> PipelineError {
    warn!("Interpretation capability failed: {}", error);
    PipelineError::unresolvable("your question", format!("interpretation failed: {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationTurn;
    use crate::generation::RuleBasedGenerator;
    use crate::intent::ALL_ROWS;

    fn column(name: &str, semantic_type: SemanticType, categories: &[&str]) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            semantic_type,
            dtype: String::new(),
            distinct_count: categories.len(),
            null_count: 0,
            nullable: false,
            high_cardinality: false,
            sample_values: vec![],
            categories: categories.iter().map(|s| s.to_string()).collect(),
            stats: None,
        }
    }

    fn context(question: &str, history: Vec<ConversationTurn>) -> ResolutionContext {
        ResolutionContext {
            question: question.to_string(),
            profile: Arc::new(DatasetProfile {
                name: "sales".to_string(),
                description: String::new(),
                table_name: "dataset".to_string(),
                row_count: 10,
                columns: vec![
                    column("Order Date", SemanticType::Datetime, &[]),
                    column("category", SemanticType::Categorical, &["Electronics", "Toys"]),
                    column("revenue", SemanticType::Numeric, &[]),
                ],
            }),
            history,
            feedback: None,
        }
    }

    fn resolver() -> QueryResolver {
        QueryResolver::new(Arc::new(RuleBasedGenerator::new()), Duration::from_secs(5))
    }

    #[test]
    fn test_grounds_fuzzy_names_and_canonical_values() {
        let draft = SpecificationDraft {
            intent: Some(IntentKind::Aggregate),
            metrics: vec![MetricRef::new("Revenue", Aggregation::Sum)],
            filters: vec![Predicate::new("categories", FilterOperator::Equals, Scalar::Text("toys".to_string()))],
            ..Default::default()
        };
        let spec = resolver().ground(draft, &context("q", vec![])).unwrap();
        assert_eq!(spec.metrics[0].column, "revenue");
        assert_eq!(spec.filters[0].column, "category");
        assert_eq!(spec.filters[0].value, FilterValue::Single(Scalar::Text("Toys".to_string())));
    }

    #[test]
    fn test_unknown_column_names_concept() {
        let draft = SpecificationDraft {
            intent: Some(IntentKind::Rank),
            metrics: vec![MetricRef::new("revenue", Aggregation::Sum)],
            dimensions: Some(vec!["state".to_string()]),
            ..Default::default()
        };
        match resolver().ground(draft, &context("q", vec![])) {
            Err(PipelineError::UnresolvableIntent { concept, .. }) => assert_eq!(concept, "state"),
            other => panic!("expected unresolvable, got {:?}", other),
        }
    }

    #[test]
    fn test_sum_of_text_column_rejected() {
        let draft = SpecificationDraft {
            intent: Some(IntentKind::Aggregate),
            metrics: vec![MetricRef::new("category", Aggregation::Sum)],
            ..Default::default()
        };
        assert!(resolver().ground(draft, &context("q", vec![])).is_err());
    }

    #[test]
    fn test_rank_and_trend_defaults() {
        let rank = SpecificationDraft {
            intent: Some(IntentKind::Rank),
            dimensions: Some(vec!["category".to_string()]),
            ..Default::default()
        };
        let spec = resolver().ground(rank, &context("q", vec![])).unwrap();
        assert_eq!(spec.limit, Some(5));
        assert_eq!(spec.order, Some(SortDirection::Desc));
        assert_eq!(spec.metrics, vec![MetricRef::new("revenue", Aggregation::Sum)]);

        let trend = SpecificationDraft {
            intent: Some(IntentKind::Trend),
            metrics: vec![MetricRef::new(ALL_ROWS, Aggregation::Count)],
            ..Default::default()
        };
        let spec = resolver().ground(trend, &context("q", vec![])).unwrap();
        assert_eq!(spec.time_column.as_deref(), Some("Order Date"));
        assert_eq!(spec.granularity, Some(TimeGranularity::Month));
    }

    #[test]
    fn test_literal_type_checks() {
        let bad_number = SpecificationDraft {
            intent: Some(IntentKind::Filter),
            filters: vec![Predicate::new("revenue", FilterOperator::GreaterThan, Scalar::Text("lots".to_string()))],
            ..Default::default()
        };
        assert!(resolver().ground(bad_number, &context("q", vec![])).is_err());

        let bad_year = SpecificationDraft {
            intent: Some(IntentKind::Filter),
            filters: vec![Predicate::year("category", 2022)],
            ..Default::default()
        };
        assert!(resolver().ground(bad_year, &context("q", vec![])).is_err());
    }

    #[tokio::test]
    async fn test_follow_up_merges_with_previous_turn() {
        let prior = QuerySpecification::new(IntentKind::Aggregate)
            .with_metric(MetricRef::new("revenue", Aggregation::Sum))
            .with_filter(Predicate::new("category", FilterOperator::Equals, Scalar::Text("Toys".to_string())));
        let history = vec![ConversationTurn::new("total revenue for toys", prior, "The total revenue is 10.00.")];

        let spec = resolver()
            .resolve(&context("Same as above but only for 2022", history))
            .await
            .unwrap();
        assert_eq!(spec.filters.len(), 2);
        assert_eq!(spec.filters[0].column, "category");
        assert_eq!(spec.filters[1], Predicate::year("Order Date", 2022));
        assert_eq!(spec.metrics, vec![MetricRef::new("revenue", Aggregation::Sum)]);
    }
}
