//! Dataset metadata produced by the profiler and shared by every stage.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Numeric => write!(f, "numeric"),
            SemanticType::Categorical => write!(f, "categorical"),
            SemanticType::Datetime => write!(f, "datetime"),
            SemanticType::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Physical engine type, e.g. `Float64` or `Date`
    pub dtype: String,
    pub distinct_count: usize,
    pub null_count: usize,
    pub nullable: bool,
    pub high_cardinality: bool,
    /// First distinct values in file order
    pub sample_values: Vec<String>,
    /// Complete value list for low-cardinality text columns
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub stats: Option<NumericStats>,
}

impl ColumnProfile {
    /// Business-friendly label derived from the raw column name
    pub fn label(&self) -> String {
        business_label(&self.name)
    }

    pub fn is_numeric(&self) -> bool {
        self.semantic_type == SemanticType::Numeric
    }

    pub fn is_temporal(&self) -> bool {
        self.semantic_type == SemanticType::Datetime
    }

    /// True for columns whose values read as money amounts
    pub fn looks_monetary(&self) -> bool {
        self.is_numeric() && is_monetary_name(&self.name)
    }

    pub fn looks_percentage(&self) -> bool {
        let lower = self.name.to_lowercase();
        self.is_numeric()
            && ["percent", "pct", "rate", "ratio", "share", "margin"]
                .iter()
                .any(|k| lower.contains(k))
    }
}

/// Immutable description of the active dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub name: String,
    pub description: String,
    pub table_name: String,
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
}

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn columns_of(&self, semantic_type: SemanticType) -> impl Iterator<Item = &ColumnProfile> {
        self.columns
            .iter()
            .filter(move |c| c.semantic_type == semantic_type)
    }

    /// Metric used when a question asks for "best" or "performance" without naming one:
    /// the first monetary column, else the first numeric column.
    pub fn default_metric(&self) -> Option<&ColumnProfile> {
        self.columns
            .iter()
            .find(|c| c.looks_monetary())
            .or_else(|| self.columns_of(SemanticType::Numeric).next())
    }

    /// First column without nulls
    pub fn complete_column(&self) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.null_count == 0)
    }

    pub fn primary_time_column(&self) -> Option<&ColumnProfile> {
        self.columns_of(SemanticType::Datetime).next()
    }

    /// Label for a column, falling back to a label built from the raw name
    pub fn label_for(&self, name: &str) -> String {
        self.column(name)
            .map(|c| c.label())
            .unwrap_or_else(|| business_label(name))
    }
}

const MONETARY_KEYWORDS: &[&str] = &[
    "revenue", "sales", "amount", "amt", "price", "cost", "profit", "income", "spend", "value",
    "gmv", "payment",
];

pub fn is_monetary_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    MONETARY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// `ship-service_level` becomes `ship service level`, `OrderDate` becomes `order date`.
pub fn business_label(raw: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in raw.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, semantic_type: SemanticType) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            semantic_type,
            dtype: "String".to_string(),
            distinct_count: 3,
            null_count: 0,
            nullable: false,
            high_cardinality: false,
            sample_values: vec![],
            categories: vec![],
            stats: None,
        }
    }

    #[test]
    fn test_business_label() {
        assert_eq!(business_label("ship-service_level"), "ship service level");
        assert_eq!(business_label("OrderDate"), "order date");
        assert_eq!(business_label("Order ID"), "order id");
        assert_eq!(business_label("revenue"), "revenue");
    }

    #[test]
    fn test_default_metric_prefers_money() {
        let profile = DatasetProfile {
            name: "sales".to_string(),
            description: String::new(),
            table_name: "dataset".to_string(),
            row_count: 10,
            columns: vec![
                column("qty", SemanticType::Numeric),
                column("category", SemanticType::Categorical),
                column("revenue", SemanticType::Numeric),
            ],
        };
        assert_eq!(profile.default_metric().map(|c| c.name.as_str()), Some("revenue"));
    }
}
