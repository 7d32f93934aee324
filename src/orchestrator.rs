//! Request orchestration
//!
//! One request runs `Received -> Validating -> {Blocked | Sanitized} ->
//! Verifying -> Executing -> {Succeeded | ExecutionFailed}`. Each terminal
//! state writes exactly one interaction record before the caller gets an
//! answer. Verification never blocks execution.

use crate::config::AppConfig;
use crate::db::{self, DatabaseRegistry, QueryTarget, RowMap};
use crate::error::GateError;
use crate::guardrails::Guardrails;
use crate::monitor::{InteractionRecorder, InteractionStats, NewInteraction};
use crate::sqlgen::{SqlGenerator, SqlSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Received,
    Validating,
    Blocked,
    Sanitized,
    Verifying,
    Executing,
    Succeeded,
    ExecutionFailed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Blocked | RequestState::Succeeded | RequestState::ExecutionFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub user_text: String,
    pub db_key: String,
    #[serde(default)]
    pub schema_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub sql: String,
    pub verified: bool,
    pub rows: Vec<RowMap>,
    pub latency_ms: u64,
}

/// Why a request did not produce rows
#[derive(Error, Debug)]
pub enum RequestError {
    /// Guardrails rejected the SQL; nothing reached the database
    #[error("Blocked for safety: {reason}")]
    Blocked { reason: String, sql: String },

    /// The database rejected the statement during real execution
    #[error("Execution error: {message}")]
    Execution { message: String, sql: String },

    /// Unknown database key or unusable configuration
    #[error("{0}")]
    Configuration(GateError),

    #[error("SQL generation failed: {0}")]
    Generation(GateError),

    #[error("Failed to record interaction: {0}")]
    Recording(GateError),
}

impl RequestError {
    /// HTTP-style status category; blocked and execution failures stay distinguishable by `stage`.
    pub fn status_code(&self) -> u16 {
        match self {
            RequestError::Blocked { .. } | RequestError::Execution { .. } => 400,
            RequestError::Configuration(GateError::UnknownDatabase(_)) => 404,
            RequestError::Configuration(_)
            | RequestError::Generation(_)
            | RequestError::Recording(_) => 500,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            RequestError::Blocked { .. } => "blocked",
            RequestError::Execution { .. } => "execution",
            RequestError::Configuration(_) => "configuration",
            RequestError::Generation(_) => "generation",
            RequestError::Recording(_) => "recording",
        }
    }
}

pub struct Orchestrator {
    guardrails: Guardrails,
    registry: DatabaseRegistry,
    source: Arc<dyn SqlSource>,
    recorder: Arc<InteractionRecorder>,
}

impl Orchestrator {
    pub fn new(
        guardrails: Guardrails,
        registry: DatabaseRegistry,
        source: Arc<dyn SqlSource>,
        recorder: Arc<InteractionRecorder>,
    ) -> Self {
        Self {
            guardrails,
            registry,
            source,
            recorder,
        }
    }

    /// Wire every collaborator from configuration. Must be called inside a tokio runtime.
    pub fn from_config(config: &AppConfig) -> crate::error::Result<Self> {
        Ok(Self::new(
            Guardrails::new(&config.guardrails)?,
            DatabaseRegistry::from_config(&config.databases)?,
            Arc::new(SqlGenerator::new(config)),
            Arc::new(InteractionRecorder::open(&config.monitoring.db_path)?),
        ))
    }

    pub fn databases(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Aggregate counters over the interaction log, read off the async workers.
    pub async fn stats(&self) -> crate::error::Result<InteractionStats> {
        let recorder = self.recorder.clone();
        tokio::task::spawn_blocking(move || recorder.stats())
            .await
            .map_err(|e| GateError::Recorder(format!("stats task failed: {}", e)))?
    }

    pub fn recorder(&self) -> &InteractionRecorder {
        &self.recorder
    }

    /// Generate, guard, verify, execute and record one question.
    #[tracing::instrument(
        skip(self, request),
        fields(request_id = %Uuid::new_v4(), db_key = %request.db_key)
    )]
    pub async fn handle(&self, request: &AskRequest) -> Result<AskResponse, RequestError> {
        let started = Instant::now();
        info!("Received question: {}", request.user_text);

        let target = self
            .registry
            .resolve(&request.db_key)
            .map_err(RequestError::Configuration)?;
        let raw_sql = self
            .source
            .generate(&request.user_text, &request.schema_hint)
            .await
            .map_err(RequestError::Generation)?;

        self.run(started, request, target.as_ref(), &raw_sql).await
    }

    /// Pipeline for an already generated draft statement.
    pub async fn handle_sql(
        &self,
        request: &AskRequest,
        raw_sql: &str,
    ) -> Result<AskResponse, RequestError> {
        let started = Instant::now();
        let target = self
            .registry
            .resolve(&request.db_key)
            .map_err(RequestError::Configuration)?;
        self.run(started, request, target.as_ref(), raw_sql).await
    }

    async fn run(
        &self,
        started: Instant,
        request: &AskRequest,
        target: &dyn QueryTarget,
        raw_sql: &str,
    ) -> Result<AskResponse, RequestError> {
        let mut state = RequestState::Received;
        advance(&mut state, RequestState::Validating);

        let validation = self.guardrails.validate(raw_sql);
        if !validation.accepted {
            advance(&mut state, RequestState::Blocked);
            warn!("Blocked: {}", validation.rejection_reason);
            self.record(NewInteraction {
                user_text: request.user_text.clone(),
                db_key: request.db_key.clone(),
                generated_sql: validation.sanitized_sql.clone(),
                valid: false,
                blocked_reason: validation.rejection_reason.clone(),
                latency_ms: elapsed_ms(started),
                rows_returned: 0,
                verified: false,
                error: String::new(),
            })
            .await?;
            return Err(RequestError::Blocked {
                reason: validation.rejection_reason,
                sql: validation.sanitized_sql,
            });
        }
        advance(&mut state, RequestState::Sanitized);
        let sql = validation.sanitized_sql;

        advance(&mut state, RequestState::Verifying);
        let verification = db::verify(target, &sql).await;

        advance(&mut state, RequestState::Executing);
        let outcome = db::execute(target, &sql).await;

        let latency_ms = elapsed_ms(started);
        let error = outcome.error.clone().unwrap_or_default();
        advance(
            &mut state,
            if outcome.is_error() {
                RequestState::ExecutionFailed
            } else {
                RequestState::Succeeded
            },
        );

        self.record(NewInteraction {
            user_text: request.user_text.clone(),
            db_key: request.db_key.clone(),
            generated_sql: sql.clone(),
            valid: true,
            blocked_reason: String::new(),
            latency_ms,
            rows_returned: outcome.rows.len() as u64,
            verified: verification.verified,
            error: error.clone(),
        })
        .await?;

        if outcome.is_error() {
            return Err(RequestError::Execution { message: error, sql });
        }

        info!(
            "Answered with {} row(s) in {} ms (verified: {})",
            outcome.rows.len(),
            latency_ms,
            verification.verified
        );
        Ok(AskResponse {
            sql,
            verified: verification.verified,
            rows: outcome.rows,
            latency_ms,
        })
    }

    /// Append the request's single record; the blocking insert runs off the async workers.
    async fn record(&self, entry: NewInteraction) -> Result<(), RequestError> {
        let recorder = self.recorder.clone();
        tokio::task::spawn_blocking(move || recorder.record(&entry))
            .await
            .map_err(|e| {
                RequestError::Recording(GateError::Recorder(format!("record task failed: {}", e)))
            })?
            .map(|_| ())
            .map_err(RequestError::Recording)
    }
}

fn advance(state: &mut RequestState, next: RequestState) {
    debug_assert!(!state.is_terminal(), "no transition out of {:?}", state);
    debug!("{:?} -> {:?}", state, next);
    *state = next;
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
