//! Query specification model
//!
//! `QuerySpecification` is the grounded, typed intent the synthesizer
//! compiles. Generators return a `SpecificationDraft`, which may be partial
//! when it modifies the previous turn; `SpecificationDraft::merge_onto`
//! performs the structural follow-up merge.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Aggregate,
    Rank,
    Filter,
    Trend,
    Lookup,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentKind::Aggregate => "aggregate",
            IntentKind::Rank => "rank",
            IntentKind::Filter => "filter",
            IntentKind::Trend => "trend",
            IntentKind::Lookup => "lookup",
        };
        write!(f, "{}", name)
    }
}

/// Whitelisted aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Aggregation {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Count => "COUNT",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    /// Wording used in answers, e.g. "total revenue"
    pub fn business_word(&self) -> &'static str {
        match self {
            Aggregation::Sum => "total",
            Aggregation::Avg => "average",
            Aggregation::Count => "number of",
            Aggregation::Min => "lowest",
            Aggregation::Max => "highest",
        }
    }

    fn alias_prefix(&self) -> &'static str {
        match self {
            Aggregation::Sum => "total",
            Aggregation::Avg => "average",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

/// Column used as `COUNT(*)` target
pub const ALL_ROWS: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricRef {
    pub column: String,
    pub aggregation: Aggregation,
}

impl MetricRef {
    pub fn new(column: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            column: column.into(),
            aggregation,
        }
    }

    pub fn counts_rows(&self) -> bool {
        self.column == ALL_ROWS
    }

    /// Result column alias, e.g. `total_revenue` or `count_rows`
    pub fn alias(&self) -> String {
        let target = if self.counts_rows() {
            "rows".to_string()
        } else {
            self.column
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
        };
        format!("{}_{}", self.aggregation.alias_prefix(), target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    In,
    Between,
}

impl FilterOperator {
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "<>",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::In => "IN",
            FilterOperator::Between => "BETWEEN",
        }
    }

    pub fn business_phrase(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "is",
            FilterOperator::NotEquals => "is not",
            FilterOperator::GreaterThan => "above",
            FilterOperator::LessThan => "below",
            FilterOperator::GreaterOrEqual => "at least",
            FilterOperator::LessOrEqual => "at most",
            FilterOperator::In => "is one of",
            FilterOperator::Between => "between",
        }
    }
}

/// Scalar literal carried by a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<Scalar>),
    Single(Scalar),
}

impl FilterValue {
    pub fn scalars(&self) -> Vec<&Scalar> {
        match self {
            FilterValue::Single(s) => vec![s],
            FilterValue::List(items) => items.iter().collect(),
        }
    }
}

/// Calendar component of a datetime column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Year,
    Month,
    Day,
}

impl DatePart {
    pub fn sql_name(&self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
        }
    }

    /// Field name for `EXTRACT(<field> FROM ...)`
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
    /// Compare a calendar component of the column instead of the column itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_part: Option<DatePart>,
}

impl Predicate {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Scalar) -> Self {
        Self {
            column: column.into(),
            operator,
            value: FilterValue::Single(value),
            date_part: None,
        }
    }

    pub fn year(column: impl Into<String>, year: i32) -> Self {
        Self {
            column: column.into(),
            operator: FilterOperator::Equals,
            value: FilterValue::Single(Scalar::Number(year as f64)),
            date_part: Some(DatePart::Year),
        }
    }

    /// Two predicates constrain the same thing when column and date part match
    pub fn same_target(&self, other: &Predicate) -> bool {
        self.column == other.column && self.date_part == other.date_part
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Day,
    Month,
    Year,
}

impl TimeGranularity {
    /// Length of the ISO date prefix naming one period, e.g. `2022-03`
    pub fn label_length(&self) -> usize {
        match self {
            TimeGranularity::Day => 10,
            TimeGranularity::Month => 7,
            TimeGranularity::Year => 4,
        }
    }

    pub fn alias(&self) -> &'static str {
        match self {
            TimeGranularity::Day => "day",
            TimeGranularity::Month => "month",
            TimeGranularity::Year => "year",
        }
    }
}

/// Grounded query intent. Immutable once produced; a retry builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpecification {
    pub intent: IntentKind,
    #[serde(default)]
    pub metrics: Vec<MetricRef>,
    /// Plain columns projected by lookup and filter intents
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Predicate>,
    #[serde(default)]
    pub order: Option<SortDirection>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub granularity: Option<TimeGranularity>,
    #[serde(default)]
    pub time_column: Option<String>,
}

impl QuerySpecification {
    pub fn new(intent: IntentKind) -> Self {
        Self {
            intent,
            metrics: Vec::new(),
            columns: Vec::new(),
            dimensions: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
            granularity: None,
            time_column: None,
        }
    }

    pub fn with_metric(mut self, metric: MetricRef) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: SortDirection) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_trend(mut self, time_column: impl Into<String>, granularity: TimeGranularity) -> Self {
        self.time_column = Some(time_column.into());
        self.granularity = Some(granularity);
        self
    }

    /// Ungrouped aggregate, answered by a single row of metric values
    pub fn is_scalar_aggregate(&self) -> bool {
        self.intent == IntentKind::Aggregate && !self.metrics.is_empty() && self.dimensions.is_empty()
    }

    /// Every column the specification refers to, excluding `*`
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        cols.extend(
            self.metrics
                .iter()
                .filter(|m| !m.counts_rows())
                .map(|m| m.column.as_str()),
        );
        cols.extend(self.columns.iter().map(String::as_str));
        cols.extend(self.dimensions.iter().map(String::as_str));
        cols.extend(self.filters.iter().map(|p| p.column.as_str()));
        if let Some(tc) = &self.time_column {
            cols.push(tc.as_str());
        }
        cols
    }
}

/// Generator output. Fields left empty/`None` on a follow-up are inherited
/// from the previous specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecificationDraft {
    #[serde(default)]
    pub follow_up: bool,
    #[serde(default)]
    pub intent: Option<IntentKind>,
    #[serde(default)]
    pub metrics: Vec<MetricRef>,
    #[serde(default)]
    pub columns: Vec<String>,
    /// `Some(vec![])` clears the grouping, `None` keeps it
    #[serde(default)]
    pub dimensions: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Vec<Predicate>,
    /// Columns whose existing filters the follow-up drops
    #[serde(default)]
    pub remove_filters: Vec<String>,
    #[serde(default)]
    pub order: Option<SortDirection>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub granularity: Option<TimeGranularity>,
    #[serde(default)]
    pub time_column: Option<String>,
    /// Business terms the generator could not map to the dataset
    #[serde(default)]
    pub unresolved: Vec<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

impl SpecificationDraft {
    /// Build a specification from a standalone draft; `None` without an intent.
    pub fn into_fresh(self) -> Option<QuerySpecification> {
        let intent = self.intent?;
        Some(QuerySpecification {
            intent,
            metrics: self.metrics,
            columns: self.columns,
            dimensions: self.dimensions.unwrap_or_default(),
            filters: self.filters,
            order: self.order,
            limit: self.limit,
            granularity: self.granularity,
            time_column: self.time_column,
        })
    }

    /// Structural follow-up merge. Field precedence:
    /// - `intent`, `order`, `limit`, `granularity`, `time_column`: draft value wins when present.
    /// - `metrics`, `columns`: replaced when the draft names any, else inherited.
    /// - `dimensions`: replaced when `Some`, inherited when `None`.
    /// - `filters`: prior filters are kept unless named in `remove_filters` or
    ///   overridden by a draft filter on the same column and date part; draft
    ///   filters are appended after them.
    pub fn merge_onto(self, prior: &QuerySpecification) -> QuerySpecification {
        let mut filters: Vec<Predicate> = prior
            .filters
            .iter()
            .filter(|p| !self.remove_filters.iter().any(|c| c == &p.column))
            .filter(|p| !self.filters.iter().any(|n| n.same_target(p)))
            .cloned()
            .collect();
        filters.extend(self.filters);

        QuerySpecification {
            intent: self.intent.unwrap_or(prior.intent),
            metrics: if self.metrics.is_empty() {
                prior.metrics.clone()
            } else {
                self.metrics
            },
            columns: if self.columns.is_empty() {
                prior.columns.clone()
            } else {
                self.columns
            },
            dimensions: self.dimensions.unwrap_or_else(|| prior.dimensions.clone()),
            filters,
            order: self.order.or(prior.order),
            limit: self.limit.or(prior.limit),
            granularity: self.granularity.or(prior.granularity),
            time_column: self.time_column.or_else(|| prior.time_column.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior() -> QuerySpecification {
        QuerySpecification::new(IntentKind::Aggregate)
            .with_metric(MetricRef::new("revenue", Aggregation::Sum))
            .with_dimension("region")
            .with_filter(Predicate::new(
                "category",
                FilterOperator::Equals,
                Scalar::Text("Electronics".to_string()),
            ))
    }

    #[test]
    fn test_follow_up_adds_year_filter_and_keeps_category() {
        let draft = SpecificationDraft {
            follow_up: true,
            filters: vec![Predicate::year("date", 2022)],
            ..Default::default()
        };

        let merged = draft.merge_onto(&prior());
        assert_eq!(merged.filters.len(), 2);
        assert_eq!(merged.filters[0].column, "category");
        assert_eq!(merged.filters[1], Predicate::year("date", 2022));
        assert_eq!(merged.metrics, prior().metrics);
        assert_eq!(merged.dimensions, vec!["region"]);
    }

    #[test]
    fn test_follow_up_replaces_same_target_filter() {
        let base = prior().with_filter(Predicate::year("date", 2021));
        let draft = SpecificationDraft {
            follow_up: true,
            filters: vec![Predicate::year("date", 2022)],
            ..Default::default()
        };
        let merged = draft.merge_onto(&base);
        let years: Vec<_> = merged.filters.iter().filter(|p| p.date_part.is_some()).collect();
        assert_eq!(years.len(), 1);
        assert_eq!(years[0], &Predicate::year("date", 2022));
    }

    #[test]
    fn test_follow_up_removes_and_clears() {
        let draft = SpecificationDraft {
            follow_up: true,
            dimensions: Some(vec![]),
            remove_filters: vec!["category".to_string()],
            ..Default::default()
        };
        let merged = draft.merge_onto(&prior());
        assert!(merged.filters.is_empty());
        assert!(merged.dimensions.is_empty());
    }

    #[test]
    fn test_fresh_requires_intent() {
        assert!(SpecificationDraft::default().into_fresh().is_none());
    }

    #[test]
    fn test_metric_alias() {
        assert_eq!(MetricRef::new("Order Amount", Aggregation::Sum).alias(), "total_order_amount");
        assert_eq!(MetricRef::new(ALL_ROWS, Aggregation::Count).alias(), "count_rows");
    }

    #[test]
    fn test_draft_deserializes_from_generator_json() {
        let json = r#"{
            "follow_up": false,
            "intent": "rank",
            "metrics": [{"column": "revenue", "aggregation": "sum"}],
            "dimensions": ["category"],
            "filters": [{"column": "date", "operator": "equals", "value": 2022, "date_part": "year"}],
            "order": "desc",
            "limit": 3
        }"#;
        let draft: SpecificationDraft = serde_json::from_str(json).unwrap();
        let spec = draft.into_fresh().unwrap();
        assert_eq!(spec.intent, IntentKind::Rank);
        assert_eq!(spec.filters[0], Predicate::year("date", 2022));
        assert_eq!(spec.limit, Some(3));
    }
}
