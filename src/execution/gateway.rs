//! Execution Gateway
//!
//! Runs validated SQL against the session's tabular store (Polars SQL engine)
//! and turns engine failures into the structured categories the retry
//! controller understands.

use crate::execution::result::{Cell, ResultSet};
use crate::execution::store::TabularStore;
use crate::execution::{ExecutionError, ExecutionResult};
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::sql_compiler::{SqlQuery, MATCHED_ROWS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct ExecutionGateway {
    store: Arc<TabularStore>,
    timeout: Duration,
    classifier: ErrorClassifier,
}

impl ExecutionGateway {
    pub fn new(store: Arc<TabularStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn store(&self) -> &Arc<TabularStore> {
        &self.store
    }

    /// Execute a synthesized query. Empty results, and ungrouped aggregates
    /// that matched no rows or came back entirely null, are reported as
    /// `EmptyResult` so the controller can decide whether to re-resolve. Row
    /// listings keep their null cells.
    pub async fn execute(&self, query: &SqlQuery) -> ExecutionResult {
        let start_time = Instant::now();
        info!("Executing SQL: {}", query.sql());

        let store = Arc::clone(&self.store);
        let sql = query.sql().to_string();
        let task = tokio::task::spawn_blocking(move || store.query(&sql));

        let frame = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!("Execution timed out after {:?}", self.timeout);
                return Err(ExecutionError::Engine(format!(
                    "execution timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(join_error)) => {
                return Err(ExecutionError::Engine(format!(
                    "execution task failed: {}",
                    join_error
                )));
            }
            Ok(Ok(Err(polars_error))) => {
                let classified = self.classifier.classify_engine_error(&polars_error);
                warn!("Execution failed ({}): {}", classified.category(), polars_error);
                return Err(classified);
            }
            Ok(Ok(Ok(frame))) => frame,
        };

        let elapsed = start_time.elapsed().as_millis() as u64;
        let result = ResultSet::from_dataframe(&frame, elapsed)
            .map_err(|e| ExecutionError::Engine(e.to_string()))?;

        debug!("Execution returned {} rows in {}ms", result.row_count(), elapsed);

        let matched_nothing = result.value(0, MATCHED_ROWS).and_then(Cell::as_f64) == Some(0.0);
        let null_aggregate =
            query.specification().is_scalar_aggregate() && (result.all_null() || matched_nothing);
        if result.is_empty() || null_aggregate {
            return Err(ExecutionError::EmptyResult {
                columns: result.columns,
            });
        }
        Ok(result)
    }
}
