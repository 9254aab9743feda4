//! SQL Synthesizer
//!
//! Compiles a grounded `QuerySpecification` into a single read-only SELECT
//! over the registered table. Compilation is deterministic; generator-assisted
//! repair is only used when a compiled query was rejected by the engine.

use crate::error::{PipelineError, Result};
use crate::generation::{CapabilityError, SqlRepairContext, StructuredGenerator};
use crate::intent::{
    Aggregation, FilterOperator, IntentKind, MetricRef, Predicate, QuerySpecification, Scalar, SortDirection,
};
use crate::metadata::{DatasetProfile, SemanticType};
use crate::sql_guard::SqlGuard;
use chrono::NaiveDate;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of rows for a ranking without an explicit limit
pub const DEFAULT_RANK_LIMIT: usize = 5;

/// Row count carried by filtered totals, so a total over no matching rows
/// can be told apart from a real zero
pub const MATCHED_ROWS: &str = "matched_rows";

/// Validated SQL plus the specification it was compiled from
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    sql: String,
    specification: QuerySpecification,
}

impl SqlQuery {
    /// Validate SQL against the profile and bind it to its specification
    pub fn validated(sql: &str, specification: QuerySpecification, profile: &DatasetProfile) -> Result<Self> {
        let sql = SqlGuard::for_profile(profile).validate(sql)?;
        Ok(Self { sql, specification })
    }

    #[cfg(test)]
    pub(crate) fn unchecked(sql: &str, specification: QuerySpecification) -> Self {
        Self {
            sql: sql.to_string(),
            specification,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn specification(&self) -> &QuerySpecification {
        &self.specification
    }
}

/// Previous rejected SQL and the engine's complaint about it
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub previous_sql: String,
    pub feedback: String,
}

pub struct SqlSynthesizer {
    generator: Arc<dyn StructuredGenerator>,
    timeout: Duration,
}

impl SqlSynthesizer {
    pub fn new(generator: Arc<dyn StructuredGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Produce a validated query. With a repair request the generator is
    /// asked for corrected SQL first; generators without SQL support fall
    /// back to deterministic compilation.
    pub async fn synthesize(
        &self,
        specification: &QuerySpecification,
        profile: &Arc<DatasetProfile>,
        repair: Option<&RepairRequest>,
    ) -> Result<SqlQuery> {
        if let Some(request) = repair {
            let context = SqlRepairContext {
                specification: specification.clone(),
                profile: Arc::clone(profile),
                previous_sql: request.previous_sql.clone(),
                feedback: request.feedback.clone(),
            };
            let outcome = match tokio::time::timeout(self.timeout, self.generator.repair_sql(&context)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(self.timeout.as_secs())),
            };
            match outcome {
                Ok(sql) => {
                    info!("Generator '{}' repaired SQL", self.generator.name());
                    return SqlQuery::validated(&sql, specification.clone(), profile);
                }
                Err(CapabilityError::Unsupported(what)) => {
                    debug!("Generator '{}' does not support {}, recompiling", self.generator.name(), what);
                }
                Err(e) => {
                    warn!("SQL repair failed: {}", e);
                    return Err(PipelineError::rejected_sql(format!("SQL repair failed: {}", e)));
                }
            }
        }

        let sql = compile(specification, profile)?;
        SqlQuery::validated(&sql, specification.clone(), profile)
    }
}

/// Deterministic compilation of a specification
pub fn compile(spec: &QuerySpecification, profile: &DatasetProfile) -> Result<String> {
    let table = profile.table_name.as_str();
    let where_clause = compile_where(&spec.filters, profile)?;

    let sql = match spec.intent {
        IntentKind::Aggregate => {
            if spec.metrics.is_empty() {
                return Err(PipelineError::incomplete_spec("aggregate intent without a metric"));
            }
            let row_key = grouped_row_key(&spec.dimensions, profile);
            let mut select: Vec<String> = spec.dimensions.iter().map(|d| quote_ident(d)).collect();
            select.extend(spec.metrics.iter().map(|m| metric_expr(m, row_key)));
            if spec.dimensions.is_empty() && !spec.filters.is_empty() {
                select.push(format!("COUNT(*) AS {}", quote_ident(MATCHED_ROWS)));
            }
            let mut sql = format!("SELECT {} FROM {}{}", select.join(", "), table, where_clause);
            if !spec.dimensions.is_empty() {
                sql.push_str(&group_by(&spec.dimensions));
                let direction = spec.order.unwrap_or(SortDirection::Desc);
                sql.push_str(&format!(
                    " ORDER BY {} {}",
                    quote_ident(&spec.metrics[0].alias()),
                    direction.sql_keyword()
                ));
            }
            if let Some(limit) = spec.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            sql
        }
        IntentKind::Rank => {
            let metric = spec
                .metrics
                .first()
                .ok_or_else(|| PipelineError::incomplete_spec("rank intent without a metric"))?;
            let direction = spec.order.unwrap_or(SortDirection::Desc);
            let limit = spec.limit.unwrap_or(DEFAULT_RANK_LIMIT);

            if spec.dimensions.is_empty() {
                // Rank individual rows by the metric column
                if metric.counts_rows() || spec.columns.is_empty() {
                    return Err(PipelineError::incomplete_spec("rank intent without anything to rank"));
                }
                let mut select: Vec<String> = spec.columns.iter().map(|c| quote_ident(c)).collect();
                if !spec.columns.contains(&metric.column) {
                    select.push(quote_ident(&metric.column));
                }
                format!(
                    "SELECT {} FROM {}{} ORDER BY {} {} LIMIT {}",
                    select.join(", "),
                    table,
                    where_clause,
                    quote_ident(&metric.column),
                    direction.sql_keyword(),
                    limit
                )
            } else {
                let row_key = grouped_row_key(&spec.dimensions, profile);
                let mut select: Vec<String> = spec.dimensions.iter().map(|d| quote_ident(d)).collect();
                select.extend(spec.metrics.iter().map(|m| metric_expr(m, row_key)));
                format!(
                    "SELECT {} FROM {}{}{} ORDER BY {} {} LIMIT {}",
                    select.join(", "),
                    table,
                    where_clause,
                    group_by(&spec.dimensions),
                    quote_ident(&metric.alias()),
                    direction.sql_keyword(),
                    limit
                )
            }
        }
        IntentKind::Trend => {
            if spec.metrics.is_empty() {
                return Err(PipelineError::incomplete_spec("trend intent without a metric"));
            }
            let time_column = spec
                .time_column
                .as_deref()
                .ok_or_else(|| PipelineError::incomplete_spec("trend intent without a time column"))?;
            let granularity = spec.granularity.unwrap_or(crate::intent::TimeGranularity::Month);
            let period = quote_ident(granularity.alias());

            // Periods are ISO date prefixes, bucketed in a derived table so the
            // outer query groups on a plain column
            let mut inner = vec![format!(
                "LEFT(CAST({} AS VARCHAR), {}) AS {}",
                quote_ident(time_column),
                granularity.label_length(),
                period
            )];
            let mut carried: Vec<&str> = spec.dimensions.iter().map(String::as_str).collect();
            carried.extend(spec.metrics.iter().filter(|m| !m.counts_rows()).map(|m| m.column.as_str()));
            let row_key = profile.complete_column().map(|c| c.name.as_str()).unwrap_or(time_column);
            if spec.metrics.iter().any(MetricRef::counts_rows) {
                carried.push(row_key);
            }
            inner.extend(carried.into_iter().unique().map(quote_ident));

            let mut select = vec![period.clone()];
            select.extend(spec.dimensions.iter().map(|d| quote_ident(d)));
            select.extend(spec.metrics.iter().map(|m| metric_expr(m, Some(row_key))));
            let mut group = vec![period.clone()];
            group.extend(spec.dimensions.iter().map(|d| quote_ident(d)));

            let mut sql = format!(
                "SELECT {} FROM (SELECT {} FROM {}{}) AS buckets GROUP BY {} ORDER BY {} ASC",
                select.join(", "),
                inner.join(", "),
                table,
                where_clause,
                group.join(", "),
                period
            );
            if let Some(limit) = spec.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            sql
        }
        IntentKind::Filter | IntentKind::Lookup => {
            if spec.intent == IntentKind::Filter && spec.filters.is_empty() {
                return Err(PipelineError::incomplete_spec("filter intent without a predicate"));
            }
            if spec.intent == IntentKind::Lookup && spec.columns.is_empty() && spec.metrics.is_empty() {
                return Err(PipelineError::incomplete_spec("lookup intent without columns"));
            }

            let row_key = grouped_row_key(&spec.columns, profile);
            let mut select: Vec<String> = spec.columns.iter().map(|c| quote_ident(c)).collect();
            select.extend(spec.metrics.iter().map(|m| metric_expr(m, row_key)));
            let projection = if select.is_empty() {
                "*".to_string()
            } else {
                select.join(", ")
            };
            let mut sql = format!("SELECT {} FROM {}{}", projection, table, where_clause);
            if !spec.metrics.is_empty() && !spec.columns.is_empty() {
                sql.push_str(&group_by(&spec.columns));
            }
            if let Some(direction) = spec.order {
                if let Some(metric) = spec.metrics.first() {
                    sql.push_str(&format!(
                        " ORDER BY {} {}",
                        quote_ident(&metric.alias()),
                        direction.sql_keyword()
                    ));
                }
            }
            if let Some(limit) = spec.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            sql
        }
    };

    debug!("Compiled {} specification: {}", spec.intent, sql);
    Ok(sql)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Column counted in place of `*` when rows are counted per group: a column
/// with no nulls when the profile has one, otherwise the first group key
fn grouped_row_key<'a>(keys: &'a [String], profile: &'a DatasetProfile) -> Option<&'a str> {
    let first = keys.first()?;
    Some(profile.complete_column().map(|c| c.name.as_str()).unwrap_or(first))
}

/// `row_key` is set for grouped queries, where the engine evaluates
/// `COUNT(*)` once for the whole frame rather than per group
fn metric_expr(metric: &MetricRef, row_key: Option<&str>) -> String {
    let expr = match (metric.aggregation, metric.counts_rows()) {
        (Aggregation::Count, true) => match row_key {
            Some(key) => format!("COUNT({})", quote_ident(key)),
            None => "COUNT(*)".to_string(),
        },
        (Aggregation::Count, false) => format!("COUNT(DISTINCT {})", quote_ident(&metric.column)),
        (agg, _) => format!("{}({})", agg.sql_name(), quote_ident(&metric.column)),
    };
    format!("{} AS {}", expr, quote_ident(&metric.alias()))
}

fn group_by(columns: &[String]) -> String {
    format!(" GROUP BY {}", columns.iter().map(|c| quote_ident(c)).join(", "))
}

fn compile_where(filters: &[Predicate], profile: &DatasetProfile) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let clauses: Vec<String> = filters
        .iter()
        .map(|p| compile_predicate(p, profile))
        .collect::<Result<_>>()?;
    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

/// How literals compare against a column
#[derive(Debug, Clone, Copy, PartialEq)]
enum LiteralKind {
    Number,
    Date,
    Text,
}

fn compile_predicate(predicate: &Predicate, profile: &DatasetProfile) -> Result<String> {
    let column = profile.column(&predicate.column).ok_or_else(|| {
        PipelineError::incomplete_spec(format!("filter on unknown column '{}'", predicate.column))
    })?;

    let (lhs, kind) = match (predicate.date_part, column.semantic_type) {
        (Some(part), _) => (
            format!("EXTRACT({} FROM {})", part.sql_keyword(), quote_ident(&column.name)),
            LiteralKind::Number,
        ),
        (None, SemanticType::Numeric) => (quote_ident(&column.name), LiteralKind::Number),
        (None, SemanticType::Datetime) => (quote_ident(&column.name), LiteralKind::Date),
        (None, _) => (format!("LOWER({})", quote_ident(&column.name)), LiteralKind::Text),
    };

    let values: Vec<String> = predicate
        .value
        .scalars()
        .into_iter()
        .map(|s| render_literal(s, kind, &column.name))
        .collect::<Result<_>>()?;

    match predicate.operator {
        FilterOperator::In => {
            if values.is_empty() {
                return Err(PipelineError::incomplete_spec(format!(
                    "IN filter on '{}' without values",
                    column.name
                )));
            }
            Ok(format!("{} IN ({})", lhs, values.join(", ")))
        }
        FilterOperator::Between => match values.as_slice() {
            [low, high] => Ok(format!("{} BETWEEN {} AND {}", lhs, low, high)),
            _ => Err(PipelineError::incomplete_spec(format!(
                "BETWEEN filter on '{}' needs exactly two values",
                column.name
            ))),
        },
        op => match values.as_slice() {
            [value] => Ok(format!("{} {} {}", lhs, op.sql_symbol(), value)),
            _ => Err(PipelineError::incomplete_spec(format!(
                "{} filter on '{}' needs a single value",
                op.sql_symbol(),
                column.name
            ))),
        },
    }
}

fn render_literal(value: &Scalar, kind: LiteralKind, column: &str) -> Result<String> {
    match (kind, value) {
        (LiteralKind::Number, Scalar::Number(n)) => Ok(format_number(*n)),
        (LiteralKind::Number, Scalar::Bool(b)) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        (LiteralKind::Number, Scalar::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(format_number)
            .map_err(|_| PipelineError::incomplete_spec(format!("'{}' is not a number for '{}'", s, column))),
        (LiteralKind::Date, Scalar::Text(s)) => {
            let date = parse_date_literal(s).ok_or_else(|| {
                PipelineError::incomplete_spec(format!("'{}' is not a date for '{}'", s, column))
            })?;
            Ok(format!("CAST('{}' AS DATE)", date.format("%Y-%m-%d")))
        }
        (LiteralKind::Date, other) => Err(PipelineError::incomplete_spec(format!(
            "'{}' is not a date for '{}'",
            other, column
        ))),
        (LiteralKind::Text, scalar) => Ok(quote_literal(&scalar.to_string().to_lowercase())),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Accepted date literal formats, ISO first
pub fn parse_date_literal(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%m/%d/%Y", "%d/%m/%Y", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}
