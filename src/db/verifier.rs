//! Plan verification: ask the target's planner about a statement without running it

use crate::db::connection::QueryTarget;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
}

/// Best-effort dry run. Any failure is absorbed into `verified = false`.
pub async fn verify(target: &dyn QueryTarget, sanitized_sql: &str) -> VerificationOutcome {
    let plan = target.dialect().explain_plan(sanitized_sql);
    match target.explain(&plan).await {
        Ok(()) => {
            debug!("Plan verification succeeded ({})", target.dialect());
            VerificationOutcome { verified: true }
        }
        Err(e) => {
            warn!("Plan verification failed: {}", e);
            VerificationOutcome { verified: false }
        }
    }
}
