//! In-memory tabular store
//!
//! Holds the single active dataset for a session. The frame is replaced
//! wholesale on upload and never mutated afterwards, so executions only
//! ever need a cheap clone of the current frame.

use polars::prelude::*;
use polars::sql::SQLContext;
use std::sync::RwLock;
use tracing::info;

pub struct TabularStore {
    table_name: String,
    frame: RwLock<Option<DataFrame>>,
}

impl TabularStore {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            frame: RwLock::new(None),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Register (or replace) the active dataset
    pub fn register(&self, frame: DataFrame) {
        info!(
            "Registering dataset as '{}' ({} rows x {} columns)",
            self.table_name,
            frame.height(),
            frame.width()
        );
        let mut guard = match self.frame.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(frame);
    }

    pub fn snapshot(&self) -> Option<DataFrame> {
        match self.frame.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Run a read-only SQL statement against a snapshot of the dataset.
    /// Blocking; callers on the async runtime go through the gateway.
    pub fn query(&self, sql: &str) -> PolarsResult<DataFrame> {
        let frame = self
            .snapshot()
            .ok_or_else(|| PolarsError::ComputeError("no dataset has been registered".into()))?;

        let mut ctx = SQLContext::new();
        ctx.register(&self.table_name, frame.lazy());
        ctx.execute(sql)?.collect()
    }
}
