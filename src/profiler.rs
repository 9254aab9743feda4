//! Dataset Profiler
//!
//! Loads a delimited file, recovers date columns stored as text, derives the
//! per-column metadata every later stage grounds against, and registers the
//! frame in the session's tabular store.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::execution::result::series_to_cell;
use crate::execution::TabularStore;
use crate::metadata::{ColumnProfile, DatasetProfile, NumericStats, SemanticType};
use chrono::NaiveDate;
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Text date layouts recognised during date recovery, ISO first
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%m-%d-%y", "%m/%d/%Y", "%d/%m/%Y", "%d.%m.%Y"];

const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

pub struct DatasetProfiler {
    sample_values: usize,
    high_cardinality_threshold: usize,
}

impl DatasetProfiler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            sample_values: config.sample_values,
            high_cardinality_threshold: config.high_cardinality_threshold,
        }
    }

    /// Load, profile and register a CSV file
    pub fn profile_csv(&self, path: impl AsRef<Path>, store: &TabularStore) -> Result<DatasetProfile> {
        let path = path.as_ref();
        let frame = self.load_csv(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();
        let mut profile = self.profile_frame(&name, frame, store)?;
        profile.description = format!(
            "{} rows and {} columns loaded from {}",
            profile.row_count,
            profile.columns.len(),
            path.display()
        );
        Ok(profile)
    }

    pub fn load_csv(&self, path: &Path) -> Result<DataFrame> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| PipelineError::Profiling(format!("cannot open {}: {}", path.display(), e)))?;
        if metadata.len() == 0 {
            return Err(PipelineError::Profiling(format!("{} is empty", path.display())));
        }

        let separator = sniff_delimiter(path)?;
        debug!("Reading {} with delimiter {:?}", path.display(), separator as char);

        LazyCsvReader::new(path)
            .with_has_header(true)
            .with_separator(separator)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .and_then(|lf| lf.collect())
            .map_err(|e| PipelineError::Profiling(format!("{} is not a readable table: {}", path.display(), e)))
    }

    /// Profile an in-memory frame and register it as the active table
    pub fn profile_frame(&self, name: &str, frame: DataFrame, store: &TabularStore) -> Result<DatasetProfile> {
        if frame.width() == 0 {
            return Err(PipelineError::Profiling(format!("{} has no columns", name)));
        }
        if frame.height() == 0 {
            return Err(PipelineError::Profiling(format!("{} has no rows", name)));
        }

        info!("Profiling '{}' ({} rows x {} columns)", name, frame.height(), frame.width());
        let frame = recover_dates(frame)?;

        let columns = frame
            .get_columns()
            .iter()
            .map(|series| self.profile_column(series))
            .collect::<Result<Vec<_>>>()?;

        let profile = DatasetProfile {
            name: name.to_string(),
            description: String::new(),
            table_name: store.table_name().to_string(),
            row_count: frame.height(),
            columns,
        };
        store.register(frame);

        info!(
            "Profiled '{}': {} numeric, {} categorical, {} date, {} text columns",
            name,
            profile.columns_of(SemanticType::Numeric).count(),
            profile.columns_of(SemanticType::Categorical).count(),
            profile.columns_of(SemanticType::Datetime).count(),
            profile.columns_of(SemanticType::Text).count()
        );
        Ok(profile)
    }

    fn profile_column(&self, series: &Series) -> Result<ColumnProfile> {
        let dtype = series.dtype().clone();
        let null_count = series.null_count();
        let non_null = series.drop_nulls();
        let distinct = non_null.unique_stable()?;
        let distinct_count = distinct.len();
        let high_cardinality = distinct_count > self.high_cardinality_threshold;

        let semantic_type = match &dtype {
            DataType::Date | DataType::Datetime(_, _) => SemanticType::Datetime,
            DataType::Boolean => SemanticType::Categorical,
            dt if dt.is_numeric() => SemanticType::Numeric,
            _ if high_cardinality => SemanticType::Text,
            _ => SemanticType::Categorical,
        };

        let values_of = |limit: usize| -> Result<Vec<String>> {
            (0..distinct.len().min(limit))
                .map(|i| series_to_cell(&distinct, i).map(|c| c.to_string()))
                .collect()
        };
        let sample_values = values_of(self.sample_values)?;
        let categories = if semantic_type == SemanticType::Categorical {
            values_of(distinct_count)?
        } else {
            Vec::new()
        };

        let stats = if semantic_type == SemanticType::Numeric {
            let floats = non_null.cast(&DataType::Float64)?;
            let ca = floats.f64()?;
            Some(NumericStats {
                min: ca.min(),
                max: ca.max(),
                mean: ca.mean(),
            })
        } else {
            None
        };

        Ok(ColumnProfile {
            name: series.name().to_string(),
            semantic_type,
            dtype: dtype.to_string(),
            distinct_count,
            null_count,
            nullable: null_count > 0,
            high_cardinality,
            sample_values,
            categories,
            stats,
        })
    }
}

/// Pick the delimiter that splits the first records into the most, equally
/// sized fields
pub fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut best = (b',', 1usize);

    for &delimiter in CANDIDATE_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::Profiling(format!("cannot read {}: {}", path.display(), e)))?;

        let widths: Vec<usize> = reader
            .records()
            .take(20)
            .filter_map(|r| r.ok())
            .map(|r| r.len())
            .collect();
        let Some(&first) = widths.first() else {
            continue;
        };
        if first > best.1 && widths.iter().all(|w| *w == first) {
            best = (delimiter, first);
        }
    }
    Ok(best.0)
}

/// Convert text columns whose every value parses with one date layout
fn recover_dates(frame: DataFrame) -> Result<DataFrame> {
    let mut conversions = Vec::new();
    for series in frame.get_columns() {
        if series.dtype() != &DataType::String {
            continue;
        }
        if let Some(format) = detect_date_format(series.str()?) {
            debug!("Recovered date column '{}' ({})", series.name(), format);
            conversions.push(col(series.name()).str().to_date(StrptimeOptions {
                format: Some(format.into()),
                strict: true,
                ..Default::default()
            }));
        }
    }
    if conversions.is_empty() {
        return Ok(frame);
    }
    Ok(frame.lazy().with_columns(conversions).collect()?)
}

fn detect_date_format(values: &StringChunked) -> Option<&'static str> {
    let present: Vec<&str> = values.into_iter().flatten().map(str::trim).collect();
    if present.is_empty() {
        return None;
    }
    DATE_FORMATS.iter().copied().find(|fmt| {
        present
            .iter()
            .all(|v| NaiveDate::parse_from_str(v, fmt).is_ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profiler() -> DatasetProfiler {
        DatasetProfiler::new(&PipelineConfig::default())
    }

    fn sales_frame() -> DataFrame {
        df![
            "date" => ["2022-01-15", "2022-02-10", "2023-01-05", "2023-03-20"],
            "category" => ["Toys", "Books", "Toys", "Electronics"],
            "revenue" => [100.0, 250.5, 80.0, 400.0]
        ]
        .unwrap()
    }

    #[test]
    fn test_profile_frame_types_and_stats() {
        let store = TabularStore::new("dataset");
        let profile = profiler().profile_frame("sales", sales_frame(), &store).unwrap();

        assert_eq!(profile.row_count, 4);
        assert_eq!(profile.table_name, "dataset");
        let date = profile.column("date").unwrap();
        assert_eq!(date.semantic_type, SemanticType::Datetime);
        let category = profile.column("category").unwrap();
        assert_eq!(category.semantic_type, SemanticType::Categorical);
        assert_eq!(category.categories, vec!["Toys", "Books", "Electronics"]);
        let revenue = profile.column("revenue").unwrap();
        assert_eq!(revenue.semantic_type, SemanticType::Numeric);
        let stats = revenue.stats.as_ref().unwrap();
        assert_eq!(stats.min, Some(80.0));
        assert_eq!(stats.max, Some(400.0));
        assert!(store.is_loaded());
    }

    #[test]
    fn test_profiling_is_idempotent() {
        let store = TabularStore::new("dataset");
        let first = profiler().profile_frame("sales", sales_frame(), &store).unwrap();
        let second = profiler().profile_frame("sales", sales_frame(), &store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_empty_frame() {
        let store = TabularStore::new("dataset");
        let empty = DataFrame::empty();
        assert!(matches!(
            profiler().profile_frame("empty", empty, &store),
            Err(PipelineError::Profiling(_))
        ));
    }

    #[test]
    fn test_recovers_non_iso_dates() {
        let frame = df![
            "day" => ["15/01/2022", "28/02/2022"],
            "units" => [3i64, 4]
        ]
        .unwrap();
        let store = TabularStore::new("dataset");
        let profile = profiler().profile_frame("units", frame, &store).unwrap();
        assert_eq!(profile.column("day").unwrap().semantic_type, SemanticType::Datetime);
    }

    #[test]
    fn test_sniffs_semicolon_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "region;amount").unwrap();
        writeln!(file, "North;10.5").unwrap();
        writeln!(file, "South;20").unwrap();
        file.flush().unwrap();

        assert_eq!(sniff_delimiter(file.path()).unwrap(), b';');
        let store = TabularStore::new("dataset");
        let profile = profiler().profile_csv(file.path(), &store).unwrap();
        assert_eq!(profile.column_names(), vec!["region", "amount"]);
        assert!(profile.column("amount").unwrap().looks_monetary());
    }

    #[test]
    fn test_empty_file_is_profiling_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = TabularStore::new("dataset");
        assert!(matches!(
            profiler().profile_csv(file.path(), &store),
            Err(PipelineError::Profiling(_))
        ));
    }
}
