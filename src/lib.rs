pub mod config;
pub mod db;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod monitor;
pub mod orchestrator;
pub mod semantic;
pub mod sqlgen;

pub use config::AppConfig;
pub use error::{GateError, Result};
pub use guardrails::{validate_sql, Guardrails, ValidationResult};
pub use monitor::{InteractionRecorder, InteractionStats};
pub use orchestrator::{AskRequest, AskResponse, Orchestrator, RequestError};
