//! Pipeline state persistence and the transition event log.
//!
//! Per-request, per-environment state lives in an explicit store keyed by
//! `(request_id, environment)` — there is no process-wide "current
//! deployment" pointer. Every state transition is appended as a
//! [`TransitionEvent`], the record consumed by the observability sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DeploymentRequest, EnvStatus, EnvironmentState};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-level errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("pipeline run not found: {request_id}")]
    RunNotFound { request_id: Uuid },

    #[error("environment {environment} not found for run {request_id}")]
    EnvironmentNotFound {
        request_id: Uuid,
        environment: String,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

/// One structured record per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub request_id: Uuid,
    pub environment: String,
    pub from: EnvStatus,
    pub to: EnvStatus,
    pub timestamp: DateTime<Utc>,
    /// Which component drove the transition (gate, broker, orchestrator,
    /// or an external approver/operator identity).
    pub actor: String,
}

/// Persistence for pipeline runs.
///
/// Backend-agnostic; an in-memory implementation for tests and dry-runs
/// lives in [`crate::fakes::MemoryStateStore`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Register a new run with all environments `Pending`.
    async fn create_run(&self, request: &DeploymentRequest) -> StoreResult<()>;

    /// Replace the stored snapshot for one environment of a run.
    async fn update_environment(
        &self,
        request_id: &Uuid,
        state: EnvironmentState,
    ) -> StoreResult<()>;

    /// Append a transition event to the run's log.
    async fn append_transition(&self, event: TransitionEvent) -> StoreResult<()>;

    /// Environment snapshots in request order.
    async fn get_environments(&self, request_id: &Uuid) -> StoreResult<Vec<EnvironmentState>>;

    /// Transition events in append order.
    async fn get_transitions(&self, request_id: &Uuid) -> StoreResult<Vec<TransitionEvent>>;
}
