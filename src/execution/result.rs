//! Query Result - typed rows and columns returned by the gateway

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed value in a result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "n/a"),
            Cell::Bool(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Successful query output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub execution_time_ms: u64,
}

impl ResultSet {
    pub fn from_dataframe(df: &DataFrame, execution_time_ms: u64) -> Result<Self> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = Vec::with_capacity(df.height());

        for row_idx in 0..df.height() {
            let mut row = Vec::with_capacity(columns.len());
            for col_name in &columns {
                let series = df.column(col_name)?;
                row.push(series_to_cell(series, row_idx)?);
            }
            rows.push(row);
        }

        Ok(Self {
            columns,
            rows,
            execution_time_ms,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at (row, column name)
    pub fn value(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// True when rows exist but every cell is null, as an aggregate over
    /// zero matching rows returns
    pub fn all_null(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().flatten().all(Cell::is_null)
    }
}

pub(crate) fn series_to_cell(series: &Series, row_idx: usize) -> Result<Cell> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| PipelineError::Polars(format!("Failed to get value: {}", e)))?;

    let cell = match any_val {
        AnyValue::Null => Cell::Null,
        AnyValue::Boolean(b) => Cell::Bool(b),
        AnyValue::String(s) => Cell::Text(s.to_string()),
        AnyValue::Int8(i) => Cell::Int(i as i64),
        AnyValue::Int16(i) => Cell::Int(i as i64),
        AnyValue::Int32(i) => Cell::Int(i as i64),
        AnyValue::Int64(i) => Cell::Int(i),
        AnyValue::UInt8(u) => Cell::Int(u as i64),
        AnyValue::UInt16(u) => Cell::Int(u as i64),
        AnyValue::UInt32(u) => Cell::Int(u as i64),
        AnyValue::UInt64(u) => Cell::Int(u as i64),
        AnyValue::Float32(f) => Cell::Float(f as f64),
        AnyValue::Float64(f) => Cell::Float(f),
        AnyValue::Date(days) => match epoch_days_to_date(days) {
            Some(d) => Cell::Date(d),
            None => Cell::Text(days.to_string()),
        },
        other => Cell::Text(other.to_string().trim_matches('"').to_string()),
    };
    Ok(cell)
}

fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(days as i64))
}
