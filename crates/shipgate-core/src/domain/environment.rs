//! Per-environment deployment state and the pipeline-level result.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an environment ended `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The request's source ref is not in the environment's allow-list.
    RefNotAllowed,
    /// The approval deadline passed without a quorum.
    ApprovalTimeout,
    /// Credential issuance was denied by policy.
    AuthorizationDenied,
    /// The caller's identity assertion had already expired.
    AssertionExpired,
    /// The federation provider stayed unavailable through all retries.
    ProviderUnavailable,
    /// The service never reached steady state; left as-is for inspection.
    HealthCheckTimeout,
    /// The scoped credential expired before the deploy could use it.
    CredentialExpired,
    /// The compute platform rejected or failed a request.
    PlatformError,
    /// The run was aborted while this environment was still in flight.
    Interrupted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::RefNotAllowed => "source ref not allowed",
            FailureReason::ApprovalTimeout => "approval deadline expired",
            FailureReason::AuthorizationDenied => "credential issuance denied",
            FailureReason::AssertionExpired => "identity assertion expired",
            FailureReason::ProviderUnavailable => "federation provider unavailable",
            FailureReason::HealthCheckTimeout => "health check timed out",
            FailureReason::CredentialExpired => "scoped credential expired",
            FailureReason::PlatformError => "compute platform error",
            FailureReason::Interrupted => "run aborted mid-flight",
        };
        write!(f, "{s}")
    }
}

/// Status of one (request, environment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvStatus {
    /// Not yet attempted.
    Pending,
    /// Waiting for the required approval quorum.
    AwaitingApproval,
    /// Deploy in progress (credential issued, rollout under way).
    Deploying,
    /// Service reached steady state on the requested artifact.
    Healthy,
    /// Terminal failure; halts the pipeline for later environments.
    Failed { reason: FailureReason },
    /// Health check timed out and the prior revision was restored.
    RolledBack,
}

impl EnvStatus {
    /// Whether this status is terminal for the environment.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Healthy | Self::Failed { .. } | Self::RolledBack)
    }

    /// Whether reaching this status halts the pipeline for all
    /// subsequent environments.
    pub fn halts_pipeline(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::RolledBack)
    }

    /// Short label for logs and transition events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Deploying => "deploying",
            Self::Healthy => "healthy",
            Self::Failed { .. } => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Operator-facing outcome for one environment: exactly one of
/// not-attempted, succeeded, failed-with-reason, or rolled-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvOutcome {
    NotAttempted,
    Succeeded,
    Failed { reason: FailureReason },
    RolledBack,
}

/// Mutable per-(request, environment) state. Written only by the gate and
/// the orchestrator via the pipeline controller; external callers read
/// snapshots through the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub name: String,
    pub status: EnvStatus,
    /// Approver identities counted toward this environment's quorum.
    pub approvals: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EnvironmentState {
    /// Fresh, unattempted state.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EnvStatus::Pending,
            approvals: BTreeSet::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Collapse the state into its operator-facing outcome.
    ///
    /// In-flight states (`AwaitingApproval`, `Deploying`) only appear in
    /// aborted histories and report as interrupted failures.
    pub fn outcome(&self) -> EnvOutcome {
        match &self.status {
            EnvStatus::Pending => EnvOutcome::NotAttempted,
            EnvStatus::Healthy => EnvOutcome::Succeeded,
            EnvStatus::RolledBack => EnvOutcome::RolledBack,
            EnvStatus::Failed { reason } => EnvOutcome::Failed { reason: *reason },
            EnvStatus::AwaitingApproval | EnvStatus::Deploying => EnvOutcome::Failed {
                reason: FailureReason::Interrupted,
            },
        }
    }
}

/// Overall pipeline verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
    Aborted,
}

/// Immutable result of a complete pipeline run: ordered environment
/// snapshots plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub status: PipelineStatus,
    /// Snapshots in request order, including never-attempted environments.
    pub environments: Vec<EnvironmentState>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Per-environment outcomes in request order.
    pub fn outcomes(&self) -> Vec<(String, EnvOutcome)> {
        self.environments
            .iter()
            .map(|e| (e.name.clone(), e.outcome()))
            .collect()
    }

    /// Snapshot for a named environment, if present in the request.
    pub fn environment(&self, name: &str) -> Option<&EnvironmentState> {
        self.environments.iter().find(|e| e.name == name)
    }
}
