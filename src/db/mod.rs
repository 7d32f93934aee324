//! Target database access: dialects, connections, plan verification and execution

pub mod connection;
pub mod dialect;
pub mod executor;
pub mod verifier;

pub use connection::{DatabaseRegistry, DriverPool, QueryTarget, RowMap, SqlxTarget};
pub use dialect::{Dialect, ExplainPlan};
pub use executor::{execute, ExecutionOutcome};
pub use verifier::{verify, VerificationOutcome};
