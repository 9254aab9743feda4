//! Answer Formatter
//!
//! Renders a result set as a business answer: labels come from the profile
//! rather than raw identifiers, and numbers are formatted by what the metric
//! measures (money, percentages, counts). A generator may polish the wording
//! afterwards; the deterministic rendering is always the fallback.

use crate::execution::{Cell, ResultSet};
use crate::generation::{AnswerContext, CapabilityError, StructuredGenerator};
use crate::intent::{
    Aggregation, DatePart, FilterOperator, IntentKind, MetricRef, Predicate, QuerySpecification, SortDirection,
};
use crate::metadata::DatasetProfile;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rows listed in answers for filter and lookup questions
const MAX_LISTED_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueStyle {
    Money,
    Percent,
    Count,
    Decimal,
    Plain,
}

pub struct AnswerFormatter {
    currency_symbol: Option<String>,
    phrasing: Option<(Arc<dyn StructuredGenerator>, Duration)>,
}

impl AnswerFormatter {
    pub fn new(currency_symbol: Option<String>) -> Self {
        Self {
            currency_symbol,
            phrasing: None,
        }
    }

    /// Let a generator rephrase the deterministic answer
    pub fn with_phrasing(mut self, generator: Arc<dyn StructuredGenerator>, timeout: Duration) -> Self {
        self.phrasing = Some((generator, timeout));
        self
    }

    pub async fn answer(
        &self,
        question: &str,
        spec: &QuerySpecification,
        result: &ResultSet,
        profile: &DatasetProfile,
    ) -> String {
        let draft = self.render(spec, result, profile);
        let Some((generator, timeout)) = &self.phrasing else {
            return draft;
        };

        let context = AnswerContext {
            question: question.to_string(),
            result: result.clone(),
            draft_answer: draft.clone(),
        };
        match tokio::time::timeout(*timeout, generator.phrase_answer(&context)).await {
            Ok(Ok(text)) => text,
            Ok(Err(CapabilityError::Unsupported(_))) => draft,
            Ok(Err(e)) => {
                warn!("Answer phrasing failed, using formatted answer: {}", e);
                draft
            }
            Err(_) => {
                warn!("Answer phrasing timed out after {}s, using formatted answer", timeout.as_secs());
                draft
            }
        }
    }

    /// Deterministic rendering of a non-empty result
    pub fn render(&self, spec: &QuerySpecification, result: &ResultSet, profile: &DatasetProfile) -> String {
        let scope = describe_filters(&spec.filters, profile);
        debug!("Rendering {} answer over {} rows", spec.intent, result.row_count());

        match spec.intent {
            IntentKind::Aggregate if spec.dimensions.is_empty() => self.render_totals(spec, result, profile, &scope),
            IntentKind::Aggregate | IntentKind::Rank if !spec.dimensions.is_empty() => {
                self.render_groups(spec, result, profile, &scope)
            }
            IntentKind::Trend => self.render_trend(spec, result, profile, &scope),
            _ => self.render_rows(result, profile, &scope),
        }
    }

    /// Answer for a query that legitimately matched nothing
    pub fn render_empty(&self, spec: &QuerySpecification, profile: &DatasetProfile) -> String {
        let scope = describe_filters(&spec.filters, profile);
        match spec.metrics.first() {
            Some(metric) => format!(
                "No records matched{}, so there is no {} to report.",
                scope,
                metric_label(metric, profile)
            ),
            None => format!("No records matched{}.", scope),
        }
    }

    fn render_totals(&self, spec: &QuerySpecification, result: &ResultSet, profile: &DatasetProfile, scope: &str) -> String {
        let parts: Vec<String> = spec
            .metrics
            .iter()
            .enumerate()
            .map(|(idx, metric)| {
                let value = metric_cell(result, 0, metric, idx)
                    .map(|cell| self.format_cell(cell, metric_style(metric, profile)))
                    .unwrap_or_else(|| "not available".to_string());
                format!("the {}{} is {}", metric_label(metric, profile), scope, value)
            })
            .collect();
        capitalize(&format!("{}.", parts.join(" and ")))
    }

    fn render_groups(&self, spec: &QuerySpecification, result: &ResultSet, profile: &DatasetProfile, scope: &str) -> String {
        let Some(metric) = spec.metrics.first() else {
            return self.render_rows(result, profile, scope);
        };
        let style = metric_style(metric, profile);
        let dimension_label = spec
            .dimensions
            .iter()
            .map(|d| profile.label_for(d))
            .collect::<Vec<_>>()
            .join(" and ");
        let label = metric_label(metric, profile);

        let entries: Vec<(String, String)> = (0..result.row_count())
            .map(|row| {
                let key = spec
                    .dimensions
                    .iter()
                    .map(|d| result.value(row, d).map(Cell::to_string).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(" / ");
                let value = metric_cell(result, row, metric, spec.dimensions.len())
                    .map(|cell| self.format_cell(cell, style))
                    .unwrap_or_else(|| "n/a".to_string());
                (key, value)
            })
            .collect();

        if spec.intent == IntentKind::Rank && entries.len() == 1 {
            let superlative = match spec.order {
                Some(SortDirection::Asc) => "lowest",
                _ => "highest",
            };
            let (key, value) = &entries[0];
            return format!("{} has the {} {}{} at {}.", key, superlative, label, scope, value);
        }

        let heading = if spec.intent == IntentKind::Rank {
            let edge = match spec.order {
                Some(SortDirection::Asc) => "Bottom",
                _ => "Top",
            };
            format!("{} {} {} by {}{}:", edge, entries.len(), dimension_label, label, scope)
        } else {
            capitalize(&format!("{} by {}{}:", label, dimension_label, scope))
        };

        let lines: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, (key, value))| {
                if spec.intent == IntentKind::Rank {
                    format!("{}. {}: {}", i + 1, key, value)
                } else {
                    format!("- {}: {}", key, value)
                }
            })
            .collect();
        format!("{}\n{}", heading, lines.join("\n"))
    }

    fn render_trend(&self, spec: &QuerySpecification, result: &ResultSet, profile: &DatasetProfile, scope: &str) -> String {
        let Some(metric) = spec.metrics.first() else {
            return self.render_rows(result, profile, scope);
        };
        let style = metric_style(metric, profile);
        let period = spec.granularity.map(|g| g.alias()).unwrap_or("month");
        let metric_idx = 1 + spec.dimensions.len();

        let points: Vec<(String, Option<f64>, String)> = (0..result.row_count())
            .map(|row| {
                let key = result.value(row, period).map(Cell::to_string).unwrap_or_default();
                let cell = metric_cell(result, row, metric, metric_idx);
                let number = cell.and_then(Cell::as_f64);
                let shown = cell.map(|c| self.format_cell(c, style)).unwrap_or_else(|| "n/a".to_string());
                (key, number, shown)
            })
            .collect();

        let mut out = capitalize(&format!("{} by {}{}:", metric_label(metric, profile), period, scope));
        for (key, _, shown) in &points {
            out.push_str(&format!("\n- {}: {}", key, shown));
        }

        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if points.len() >= 2 && spec.dimensions.is_empty() {
                if let (Some(a), Some(b)) = (first.1, last.1) {
                    let direction = if b > a {
                        "rose"
                    } else if b < a {
                        "fell"
                    } else {
                        "held steady"
                    };
                    let change = if a != 0.0 {
                        format!(" ({:+.1}%)", (b - a) / a.abs() * 100.0)
                    } else {
                        String::new()
                    };
                    out.push_str(&format!(
                        "\nFrom {} to {} it {} from {} to {}{}.",
                        first.0, last.0, direction, first.2, last.2, change
                    ));
                }
            }
        }
        out
    }

    fn render_rows(&self, result: &ResultSet, profile: &DatasetProfile, scope: &str) -> String {
        let labels: Vec<String> = result.columns.iter().map(|c| profile.label_for(c)).collect();
        let style_for = |idx: usize| -> ValueStyle {
            profile
                .column(&result.columns[idx])
                .map(column_style)
                .unwrap_or(ValueStyle::Plain)
        };

        if result.row_count() == 1 && result.columns.len() == 1 {
            let value = self.format_cell(&result.rows[0][0], style_for(0));
            return format!("The {}{} is {}.", labels[0], scope, value);
        }

        let noun = if result.row_count() == 1 { "record" } else { "records" };
        let mut out = format!("Found {} matching {}{}.", result.row_count(), noun, scope);
        for row in result.rows.iter().take(MAX_LISTED_ROWS) {
            let fields: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(idx, cell)| format!("{}: {}", labels[idx], self.format_cell(cell, style_for(idx))))
                .collect();
            out.push_str(&format!("\n- {}", fields.join(", ")));
        }
        if result.row_count() > MAX_LISTED_ROWS {
            out.push_str(&format!("\n...and {} more.", result.row_count() - MAX_LISTED_ROWS));
        }
        out
    }

    pub fn format_cell(&self, cell: &Cell, style: ValueStyle) -> String {
        match cell.as_f64() {
            Some(value) => self.format_amount(value, style),
            None => cell.to_string(),
        }
    }

    pub fn format_amount(&self, value: f64, style: ValueStyle) -> String {
        match style {
            ValueStyle::Money => {
                let symbol = self.currency_symbol.as_deref().unwrap_or("");
                if value < 0.0 {
                    format!("-{}{}", symbol, group_thousands(value.abs(), 2))
                } else {
                    format!("{}{}", symbol, group_thousands(value, 2))
                }
            }
            ValueStyle::Percent => format!("{}%", group_thousands(value, 2)),
            ValueStyle::Count => group_thousands(value.round(), 0),
            ValueStyle::Decimal => group_thousands(value, 2),
            ValueStyle::Plain if value.fract() == 0.0 => group_thousands(value, 0),
            ValueStyle::Plain => group_thousands(value, 2),
        }
    }
}

/// `48213.5` with two decimals becomes `48,213.50`
pub fn group_thousands(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }

    let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
    if value < 0.0 && !is_zero {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn metric_label(metric: &MetricRef, profile: &DatasetProfile) -> String {
    if metric.counts_rows() {
        return "number of records".to_string();
    }
    let label = profile.label_for(&metric.column);
    match metric.aggregation {
        Aggregation::Count => format!("number of distinct {} values", label),
        agg => format!("{} {}", agg.business_word(), label),
    }
}

fn metric_style(metric: &MetricRef, profile: &DatasetProfile) -> ValueStyle {
    if metric.aggregation == Aggregation::Count {
        return ValueStyle::Count;
    }
    match profile.column(&metric.column) {
        Some(column) if column.looks_monetary() => ValueStyle::Money,
        Some(column) if column.looks_percentage() => ValueStyle::Percent,
        _ if metric.aggregation == Aggregation::Avg => ValueStyle::Decimal,
        _ => ValueStyle::Plain,
    }
}

fn column_style(column: &crate::metadata::ColumnProfile) -> ValueStyle {
    if column.looks_monetary() {
        ValueStyle::Money
    } else if column.looks_percentage() {
        ValueStyle::Percent
    } else {
        ValueStyle::Plain
    }
}

/// Metric value by alias, falling back to its position in the projection
fn metric_cell<'a>(result: &'a ResultSet, row: usize, metric: &MetricRef, position: usize) -> Option<&'a Cell> {
    result
        .value(row, &metric.alias())
        .or_else(|| result.rows.get(row).and_then(|r| r.get(position)))
}

/// Filter scope in parentheses, e.g. ` (category is Toys, year 2022)`
fn describe_filters(filters: &[Predicate], profile: &DatasetProfile) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|p| {
            let values: Vec<String> = p.value.scalars().iter().map(|s| s.to_string()).collect();
            let shown = match p.operator {
                FilterOperator::Between => values.join(" and "),
                FilterOperator::In => values.join(", "),
                _ => values.join(""),
            };
            match (p.date_part, p.operator) {
                (Some(DatePart::Year), FilterOperator::Equals) => format!("year {}", shown),
                (Some(part), op) => format!("{} {} {}", part.sql_name(), op.business_phrase(), shown),
                (None, op) => format!("{} {} {}", profile.label_for(&p.column), op.business_phrase(), shown),
            }
        })
        .collect();
    format!(" ({})", parts.join(", "))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
