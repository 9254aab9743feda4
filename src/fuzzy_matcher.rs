use crate::metadata::{ColumnProfile, DatasetProfile, SemanticType};
use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"[\s_\-\.]+").expect("valid separator pattern");
}

/// Fuzzy matcher that grounds business terms in dataset column names
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for considering two strings as matches
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Normalize a term or column name for comparison
    /// - Converts to lowercase
    /// - Treats `_`, `-`, `.` and whitespace as one separator
    /// - Removes remaining punctuation
    pub fn normalize_string(&self, s: &str) -> String {
        let lowered = s.to_lowercase();
        let spaced = SEPARATORS.replace_all(&lowered, " ");
        spaced
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Naive English singular: `categories` -> `category`, `states` -> `state`
    pub fn singularize(&self, word: &str) -> String {
        if let Some(stem) = word.strip_suffix("ies") {
            if !stem.is_empty() {
                return format!("{}y", stem);
            }
        }
        if word.ends_with("ss") || word.len() <= 3 {
            return word.to_string();
        }
        if let Some(stem) = word.strip_suffix("es") {
            if stem.ends_with("ch") || stem.ends_with("sh") || stem.ends_with('x') {
                return stem.to_string();
            }
        }
        word.strip_suffix('s').unwrap_or(word).to_string()
    }

    fn canonical(&self, s: &str) -> String {
        self.normalize_string(s)
            .split_whitespace()
            .map(|w| self.singularize(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Calculate similarity between two strings
    /// Returns a score between 0.0 and 1.0 (higher = more similar)
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        let norm1 = self.canonical(s1);
        let norm2 = self.canonical(s2);

        if norm1.is_empty() || norm2.is_empty() {
            return 0.0;
        }
        if norm1 == norm2 {
            return 1.0;
        }

        let jw_score = jaro_winkler(&norm1, &norm2);

        // Whole-word containment ("order amount" vs "amount")
        let words1: Vec<&str> = norm1.split_whitespace().collect();
        let words2: Vec<&str> = norm2.split_whitespace().collect();
        let contained = words1.iter().all(|w| words2.contains(w)) || words2.iter().all(|w| words1.contains(w));
        let containment_bonus = if contained {
            let len_diff = (norm1.len() as f64 - norm2.len() as f64).abs();
            let max_len = norm1.len().max(norm2.len()) as f64;
            (1.0 - (len_diff / max_len)) * 0.1
        } else {
            0.0
        };

        (jw_score + containment_bonus).min(1.0)
    }

    /// Check if two strings are similar enough to be considered a match
    pub fn is_match(&self, s1: &str, s2: &str) -> bool {
        self.similarity(s1, s2) >= self.similarity_threshold
    }

    /// Find the column a term refers to. Exact names always win; otherwise
    /// the most similar column above the threshold, restricted to `kinds`
    /// when given.
    pub fn ground_column<'a>(
        &self,
        term: &str,
        profile: &'a DatasetProfile,
        kinds: &[SemanticType],
    ) -> Option<(&'a ColumnProfile, f64)> {
        if let Some(exact) = profile.column(term) {
            return Some((exact, 1.0));
        }

        profile
            .columns
            .iter()
            .filter(|c| kinds.is_empty() || kinds.contains(&c.semantic_type))
            .map(|c| (c, self.similarity(term, &c.name)))
            .filter(|(_, score)| *score >= self.similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Find a category value mentioned by a term (case-insensitive)
    pub fn ground_category<'a>(&self, term: &str, column: &'a ColumnProfile) -> Option<&'a str> {
        let wanted = self.normalize_string(term);
        column
            .categories
            .iter()
            .find(|v| self.normalize_string(v) == wanted)
            .map(String::as_str)
    }
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
            categories: vec!["Electronics".to_string(), "Home Goods".to_string()],
            stats: None,
        }
    }

    fn profile() -> DatasetProfile {
        DatasetProfile {
            name: "orders".to_string(),
            description: String::new(),
            table_name: "dataset".to_string(),
            row_count: 3,
            columns: vec![
                column("Order Date", SemanticType::Datetime),
                column("ship-state", SemanticType::Categorical),
                column("Amount", SemanticType::Numeric),
            ],
        }
    }

    #[test]
    fn test_singularize() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.singularize("states"), "state");
        assert_eq!(matcher.singularize("categories"), "category");
        assert_eq!(matcher.singularize("boxes"), "box");
        assert_eq!(matcher.singularize("sales"), "sale");
        assert_eq!(matcher.singularize("class"), "class");
    }

    #[test]
    fn test_ground_normalized_names() {
        let matcher = FuzzyMatcher::default();
        let profile = profile();
        let (col, _) = matcher.ground_column("order_date", &profile, &[]).unwrap();
        assert_eq!(col.name, "Order Date");
        let (col, _) = matcher.ground_column("amount", &profile, &[SemanticType::Numeric]).unwrap();
        assert_eq!(col.name, "Amount");
    }

    #[test]
    fn test_ground_rejects_unrelated_terms() {
        let matcher = FuzzyMatcher::default();
        let profile = profile();
        assert!(matcher.ground_column("customer", &profile, &[]).is_none());
        assert!(matcher
            .ground_column("amount", &profile, &[SemanticType::Categorical])
            .is_none());
    }

    #[test]
    fn test_ground_category() {
        let matcher = FuzzyMatcher::default();
        let col = column("category", SemanticType::Categorical);
        assert_eq!(matcher.ground_category("home goods", &col), Some("Home Goods"));
        assert_eq!(matcher.ground_category("toys", &col), None);
    }
}
