//! Query execution with the full result set materialized in memory

use crate::db::connection::{QueryTarget, RowMap};
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub rows: Vec<RowMap>,
    /// Driver message when execution failed; `rows` is empty in that case
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Run the statement once. Failures are reported in the outcome, never raised.
pub async fn execute(target: &dyn QueryTarget, sanitized_sql: &str) -> ExecutionOutcome {
    match target.fetch_all(sanitized_sql).await {
        Ok(rows) => {
            info!("Query returned {} row(s)", rows.len());
            ExecutionOutcome { rows, error: None }
        }
        Err(e) => {
            warn!("Query execution failed: {}", e);
            let message = match e {
                GateError::Database(msg) => msg,
                other => other.to_string(),
            };
            ExecutionOutcome {
                rows: Vec::new(),
                error: Some(if message.is_empty() {
                    "unknown execution error".to_string()
                } else {
                    message
                }),
            }
        }
    }
}
