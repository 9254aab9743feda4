//! Rule-based generator
//!
//! Deterministic keyword and pattern interpretation of common business
//! questions: totals, averages, counts, top/bottom-N rankings, trends, year
//! and category filters, and follow-ups that modify the previous question.
//! Terms it cannot map are passed through unchanged so the resolver reports
//! them by name.

use crate::fuzzy_matcher::FuzzyMatcher;
use crate::generation::{CapabilityError, ResolutionContext, StructuredGenerator};
use crate::intent::{
    Aggregation, DatePart, FilterOperator, FilterValue, IntentKind, MetricRef, Predicate, Scalar, SortDirection,
    SpecificationDraft, TimeGranularity, ALL_ROWS,
};
use crate::metadata::{is_monetary_name, DatasetProfile, SemanticType};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref YEAR: Regex = Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid year pattern");
    static ref COMPARISON: Regex = Regex::new(
        r"([a-z][a-z0-9_]*)\s+(?:is\s+|of\s+)?(over|above|greater than|more than|exceeding|at least|under|below|less than|at most)\s+(-?\d+(?:\.\d+)?)"
    )
    .expect("valid comparison pattern");
    static ref FOLLOW_UP: Regex = Regex::new(
        r"^(and|but|only|just|now|also|what about|how about)\b|\b(same as|as above|same but|the same|instead|previous)\b"
    )
    .expect("valid follow-up pattern");
}

const RANK_DESC: &[&str] = &["top", "best", "highest", "largest", "most", "biggest"];
const RANK_ASC: &[&str] = &["bottom", "worst", "lowest", "smallest", "least", "fewest"];
const TREND_WORDS: &[&str] = &["trend", "trends", "monthly", "yearly", "annual", "annually", "daily", "over time"];
const TIME_UNITS: &[&str] = &["day", "days", "month", "months", "year", "years", "date", "time"];
const SPLIT_WORDS: &[&str] = &["by", "per", "each", "across"];
const PHRASE_STOP: &[&str] = &[
    "by", "in", "for", "with", "of", "during", "where", "over", "and", "based", "on", "from", "than", "this",
];
const FILLER: &[&str] = &[
    "performing", "selling", "performance", "the", "a", "an", "all", "my", "our", "do", "we", "have",
];
const MONEY_WORDS: &[&str] = &["sales", "revenue", "money", "earnings", "income", "turnover", "performing", "performance"];
const ROW_WORDS: &[&str] = &["orders", "order", "transactions", "records", "rows", "entries", "purchases"];
const STOP_WORDS: &[&str] = &[
    "what", "is", "are", "the", "a", "an", "of", "show", "me", "give", "list", "which", "how", "was", "were",
    "tell", "about", "our", "my", "in", "for", "please", "can", "you", "by", "to", "there", "do", "does",
];

pub struct RuleBasedGenerator {
    matcher: FuzzyMatcher,
}

impl RuleBasedGenerator {
    pub fn new() -> Self {
        Self {
            matcher: FuzzyMatcher::default(),
        }
    }

    /// Interpret a question into a draft
    pub fn interpret(&self, context: &ResolutionContext) -> SpecificationDraft {
        let profile = context.profile.as_ref();
        let raw = context.question.to_lowercase();
        let text = self.matcher.normalize_string(&context.question);
        let words: Vec<&str> = text.split_whitespace().collect();

        let follow_up = context.last_specification().is_some() && FOLLOW_UP.is_match(&text);
        let mut draft = SpecificationDraft {
            follow_up,
            ..Default::default()
        };

        let aggregation = detect_aggregation(&words, &text);
        let rank = detect_rank(&words);
        let trend_granularity = detect_trend(&words, &text);

        let latest = rank.and_then(|(idx, direction, explicit_limit)| {
            let term = self.dimension_term(&phrase_after(&words, idx + 1))?;
            let (col, _) = self.matcher.ground_column(&term, profile, &[SemanticType::Datetime])?;
            (explicit_limit.is_none() && col.semantic_type == SemanticType::Datetime).then(|| (col.name.clone(), direction))
        });

        if let Some((time_column, direction)) = latest {
            // "highest order date" asks for an extreme date, not a ranking
            draft.intent = Some(IntentKind::Aggregate);
            let agg = match direction {
                SortDirection::Desc => Aggregation::Max,
                SortDirection::Asc => Aggregation::Min,
            };
            draft.metrics.push(MetricRef::new(time_column, agg));
        } else if let Some((idx, direction, explicit_limit)) = rank {
            draft.intent = Some(IntentKind::Rank);
            draft.order = Some(direction);
            let dim_start = if explicit_limit.is_some() { idx + 2 } else { idx + 1 };
            let dim_words = phrase_after(&words, dim_start);
            if let Some(term) = self.dimension_term(&dim_words) {
                let plural = self.matcher.singularize(&term) != term;
                draft.limit = explicit_limit.or(Some(if plural { 5 } else { 1 }));
                draft.dimensions = Some(vec![self.ground_dimension(&term, profile)]);
            } else {
                draft.limit = explicit_limit;
            }
            let metric_words = words
                .iter()
                .position(|w| *w == "by")
                .map(|by| phrase_after(&words, by + 1))
                .unwrap_or_default();
            let metric = self
                .metric_from_phrase(&metric_words, aggregation.unwrap_or(Aggregation::Sum), profile)
                .or_else(|| self.mentioned_metric(&text, aggregation.unwrap_or(Aggregation::Sum), profile))
                .or_else(|| self.default_metric(aggregation.unwrap_or(Aggregation::Sum), profile, follow_up));
            draft.metrics.extend(metric);
        } else if let Some(granularity) = trend_granularity {
            draft.intent = Some(IntentKind::Trend);
            draft.granularity = Some(granularity);
            match self.mentioned_time_column(&text, profile) {
                Some(col) => draft.time_column = Some(col),
                None if !follow_up => draft.unresolved.push("date".to_string()),
                None => {}
            }
            let agg = aggregation.unwrap_or(Aggregation::Sum);
            let metric = self
                .mentioned_metric(&text, agg, profile)
                .or_else(|| self.default_metric(agg, profile, follow_up));
            draft.metrics.extend(metric);
        } else if let Some(agg) = aggregation {
            draft.intent = Some(IntentKind::Aggregate);
            let metric = self
                .mentioned_metric(&text, agg, profile)
                .or_else(|| self.count_target(&words, agg, profile))
                .or_else(|| self.default_metric(agg, profile, follow_up))
                .or_else(|| self.unnamed_metric(&words, agg, follow_up));
            draft.metrics.extend(metric);
            if let Some(term) = self.split_term(&words) {
                draft.dimensions = Some(vec![self.ground_dimension(&term, profile)]);
            }
        } else if !follow_up {
            // No aggregation language: a listing of matching rows
            draft.intent = Some(IntentKind::Filter);
            draft.columns = self.mentioned_columns(&text, profile);
        }

        self.collect_filters(&raw, &text, profile, &mut draft);

        if draft.intent == Some(IntentKind::Filter) && draft.filters.is_empty() && draft.columns.is_empty() {
            draft.intent = None;
            draft.unresolved.push(main_concept(&words));
        }
        if draft.intent.is_none() && !follow_up && draft.unresolved.is_empty() {
            draft.unresolved.push(main_concept(&words));
        }

        draft.comments = Some(format!(
            "rule-based interpretation: intent={:?}, follow_up={}",
            draft.intent, draft.follow_up
        ));
        debug!("Rule-based draft for '{}': {:?}", context.question, draft);
        draft
    }

    fn dimension_term(&self, words: &[&str]) -> Option<String> {
        let kept: Vec<&str> = words.iter().copied().filter(|w| !FILLER.contains(w)).collect();
        if kept.is_empty() || kept.iter().all(|w| w.parse::<f64>().is_ok()) {
            return None;
        }
        Some(kept.join(" "))
    }

    /// Grounded column name, or the singular term itself when nothing matches
    fn ground_dimension(&self, term: &str, profile: &DatasetProfile) -> String {
        let kinds = [SemanticType::Categorical, SemanticType::Text, SemanticType::Datetime];
        if let Some((col, _)) = self.matcher.ground_column(term, profile, &kinds) {
            return col.name.clone();
        }
        for word in term.split_whitespace().rev() {
            if let Some((col, _)) = self.matcher.ground_column(word, profile, &kinds) {
                return col.name.clone();
            }
        }
        term.split_whitespace()
            .map(|w| self.matcher.singularize(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn split_term(&self, words: &[&str]) -> Option<String> {
        let idx = words.iter().position(|w| SPLIT_WORDS.contains(w))?;
        let phrase = phrase_after(words, idx + 1);
        let term = self.dimension_term(&phrase)?;
        if TIME_UNITS.contains(&term.as_str()) {
            return None;
        }
        Some(term)
    }

    fn metric_from_phrase(&self, words: &[&str], agg: Aggregation, profile: &DatasetProfile) -> Option<MetricRef> {
        let kept: Vec<&str> = words.iter().copied().filter(|w| !FILLER.contains(w)).collect();
        if kept.is_empty() {
            return None;
        }
        let term = kept.join(" ");
        if let Some((col, _)) = self.matcher.ground_column(&term, profile, &[SemanticType::Numeric]) {
            return Some(MetricRef::new(col.name.clone(), agg));
        }
        if kept.iter().any(|w| ROW_WORDS.contains(w)) {
            return Some(MetricRef::new(ALL_ROWS, Aggregation::Count));
        }
        if kept.iter().any(|w| MONEY_WORDS.contains(w)) {
            return profile.default_metric().map(|c| MetricRef::new(c.name.clone(), agg));
        }
        // Pass the unknown term through so resolution names it
        Some(MetricRef::new(term, agg))
    }

    fn mentioned_metric(&self, text: &str, agg: Aggregation, profile: &DatasetProfile) -> Option<MetricRef> {
        let padded = format!(" {} ", text);
        profile
            .columns_of(SemanticType::Numeric)
            .find(|c| {
                let name = self.matcher.normalize_string(&c.name);
                padded.contains(&format!(" {} ", name))
                    || padded.contains(&format!(" {}s ", name))
            })
            .map(|c| MetricRef::new(c.name.clone(), agg))
    }

    fn count_target(&self, words: &[&str], agg: Aggregation, profile: &DatasetProfile) -> Option<MetricRef> {
        if agg != Aggregation::Count {
            return None;
        }
        // "how many categories" counts distinct values of a column
        let start = words
            .iter()
            .position(|w| *w == "many" || *w == "of" || *w == "count")
            .map(|i| i + 1)?;
        let phrase = phrase_after(words, start);
        if let Some(term) = self.dimension_term(&phrase) {
            let kinds = [SemanticType::Categorical, SemanticType::Text];
            if let Some((col, _)) = self.matcher.ground_column(&term, profile, &kinds) {
                return Some(MetricRef::new(col.name.clone(), Aggregation::Count));
            }
        }
        Some(MetricRef::new(ALL_ROWS, Aggregation::Count))
    }

    fn default_metric(&self, agg: Aggregation, profile: &DatasetProfile, follow_up: bool) -> Option<MetricRef> {
        if follow_up {
            return None;
        }
        profile
            .default_metric()
            .filter(|c| is_monetary_name(&c.name) || profile.columns_of(SemanticType::Numeric).count() == 1)
            .map(|c| MetricRef::new(c.name.clone(), agg))
    }

    /// "total profit" on a dataset without a profit column keeps `profit`
    fn unnamed_metric(&self, words: &[&str], agg: Aggregation, follow_up: bool) -> Option<MetricRef> {
        if follow_up {
            return None;
        }
        let keyword = words.iter().position(|w| {
            matches!(*w, "total" | "sum" | "average" | "avg" | "mean" | "minimum" | "min" | "maximum" | "max")
        })?;
        let phrase = phrase_after(words, keyword + 1);
        let term = self.dimension_term(&phrase)?;
        Some(MetricRef::new(term, agg))
    }

    fn mentioned_time_column(&self, text: &str, profile: &DatasetProfile) -> Option<String> {
        let padded = format!(" {} ", text);
        profile
            .columns_of(SemanticType::Datetime)
            .find(|c| padded.contains(&format!(" {} ", self.matcher.normalize_string(&c.name))))
            .or_else(|| profile.primary_time_column())
            .map(|c| c.name.clone())
    }

    fn mentioned_columns(&self, text: &str, profile: &DatasetProfile) -> Vec<String> {
        let padded = format!(" {} ", text);
        profile
            .columns
            .iter()
            .filter(|c| padded.contains(&format!(" {} ", self.matcher.normalize_string(&c.name))))
            .map(|c| c.name.clone())
            .collect()
    }

    fn collect_filters(&self, raw: &str, text: &str, profile: &DatasetProfile, draft: &mut SpecificationDraft) {
        // Calendar years
        let years: Vec<i32> = YEAR
            .captures_iter(raw)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect();
        if !years.is_empty() {
            match profile.primary_time_column() {
                Some(col) if years.len() == 1 => draft.filters.push(Predicate::year(col.name.clone(), years[0])),
                Some(col) => draft.filters.push(Predicate {
                    column: col.name.clone(),
                    operator: FilterOperator::In,
                    value: FilterValue::List(years.iter().map(|y| Scalar::Number(*y as f64)).collect()),
                    date_part: Some(DatePart::Year),
                }),
                None => draft.unresolved.push("date".to_string()),
            }
        }

        // Category values named in the question
        let padded = format!(" {} ", text);
        let grouped: Vec<String> = draft.dimensions.clone().unwrap_or_default();
        for column in profile.columns_of(SemanticType::Categorical) {
            if grouped.contains(&column.name) {
                continue;
            }
            let matches: Vec<&String> = column
                .categories
                .iter()
                .filter(|v| {
                    let value = self.matcher.normalize_string(v);
                    !value.is_empty() && value.parse::<f64>().is_err() && padded.contains(&format!(" {} ", value))
                })
                .collect();
            match matches.as_slice() {
                [] => {}
                [single] => draft.filters.push(Predicate::new(
                    column.name.clone(),
                    FilterOperator::Equals,
                    Scalar::Text((*single).clone()),
                )),
                many => draft.filters.push(Predicate {
                    column: column.name.clone(),
                    operator: FilterOperator::In,
                    value: FilterValue::List(many.iter().map(|v| Scalar::Text((*v).clone())).collect()),
                    date_part: None,
                }),
            }
        }

        // Numeric comparisons: "revenue over 1000"
        for caps in COMPARISON.captures_iter(raw) {
            let (Some(term), Some(op), Some(number)) = (caps.get(1), caps.get(2), caps.get(3)) else {
                continue;
            };
            let Ok(value) = number.as_str().parse::<f64>() else {
                continue;
            };
            let operator = match op.as_str() {
                "over" | "above" | "greater than" | "more than" | "exceeding" => FilterOperator::GreaterThan,
                "at least" => FilterOperator::GreaterOrEqual,
                "at most" => FilterOperator::LessOrEqual,
                _ => FilterOperator::LessThan,
            };
            let column = self
                .matcher
                .ground_column(term.as_str(), profile, &[SemanticType::Numeric])
                .map(|(c, _)| c.name.clone())
                .or_else(|| {
                    MONEY_WORDS
                        .contains(&term.as_str())
                        .then(|| profile.default_metric().map(|c| c.name.clone()))
                        .flatten()
                })
                .unwrap_or_else(|| term.as_str().to_string());
            draft.filters.push(Predicate::new(column, operator, Scalar::Number(value)));
        }
    }
}

impl Default for RuleBasedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StructuredGenerator for RuleBasedGenerator {
    fn name(&self) -> &str {
        "rules"
    }

    async fn draft_specification(
        &self,
        context: &ResolutionContext,
    ) -> std::result::Result<SpecificationDraft, CapabilityError> {
        Ok(self.interpret(context))
    }
}

fn detect_aggregation(words: &[&str], text: &str) -> Option<Aggregation> {
    if text.contains("how many") || text.contains("number of") || words.contains(&"count") {
        return Some(Aggregation::Count);
    }
    for word in words {
        match *word {
            "average" | "avg" | "mean" => return Some(Aggregation::Avg),
            "total" | "sum" | "overall" => return Some(Aggregation::Sum),
            "minimum" | "min" => return Some(Aggregation::Min),
            "maximum" | "max" => return Some(Aggregation::Max),
            _ => {}
        }
    }
    None
}

/// Position of the ranking keyword, its direction and an explicit N
fn detect_rank(words: &[&str]) -> Option<(usize, SortDirection, Option<usize>)> {
    words.iter().enumerate().find_map(|(i, w)| {
        let direction = if RANK_DESC.contains(w) {
            SortDirection::Desc
        } else if RANK_ASC.contains(w) {
            SortDirection::Asc
        } else {
            return None;
        };
        let limit = words.get(i + 1).and_then(|n| n.parse::<usize>().ok()).filter(|n| *n > 0);
        Some((i, direction, limit))
    })
}

fn detect_trend(words: &[&str], text: &str) -> Option<TimeGranularity> {
    let split_on_time = words.windows(2).find_map(|pair| {
        if SPLIT_WORDS.contains(&pair[0]) || pair[0] == "over" {
            match pair[1] {
                "day" | "days" => Some(TimeGranularity::Day),
                "month" | "months" => Some(TimeGranularity::Month),
                "year" | "years" => Some(TimeGranularity::Year),
                _ => None,
            }
        } else {
            None
        }
    });
    if split_on_time.is_some() {
        return split_on_time;
    }
    if !TREND_WORDS.iter().any(|t| text.contains(t)) {
        return None;
    }
    if text.contains("daily") {
        Some(TimeGranularity::Day)
    } else if text.contains("yearly") || text.contains("annual") {
        Some(TimeGranularity::Year)
    } else {
        Some(TimeGranularity::Month)
    }
}

fn phrase_after<'a>(words: &[&'a str], start: usize) -> Vec<&'a str> {
    words
        .iter()
        .skip(start)
        .copied()
        .take_while(|w| !PHRASE_STOP.contains(w))
        .collect()
}

/// First content word, used to name what could not be understood
fn main_concept(words: &[&str]) -> String {
    words
        .iter()
        .copied()
        .find(|w| !STOP_WORDS.contains(w) && w.parse::<f64>().is_err())
        .map(|w| w.to_string())
        .unwrap_or_else(|| "question".to_string())
}
