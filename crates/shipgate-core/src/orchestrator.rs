//! Single-environment deploy-verify-rollback orchestration.
//!
//! One deploy cycle: register a revision for the artifact, re-point the
//! service, then poll service health with bounded attempts until steady
//! state or timeout. The scoped credential is borrowed for exactly this
//! cycle and checked fail-closed before any platform call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::ScopedCredential;
use crate::cancel::{cancelled, is_cancelled};
use crate::domain::ArtifactRef;

/// Identifier of a registered revision (task/service definition version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl RevisionId {
    /// Generate a new random revision id.
    pub fn new() -> Self {
        RevisionId(Uuid::new_v4().to_string())
    }
}

impl Default for RevisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Revision definition registered with the compute platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionDefinition {
    pub service_name: String,
    pub artifact_ref: String,
}

/// Rollout state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Running revision matches desired revision, no rollout in progress.
    Steady,
    /// A rollout is under way.
    RollingOut,
    /// The platform reports the service unhealthy.
    Degraded,
}

/// Point-in-time view of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceView {
    pub status: ServiceStatus,
    pub running_revision: Option<RevisionId>,
    /// Artifact the running revision was registered with, when known.
    pub running_artifact: Option<String>,
}

/// Platform-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("service not found in {environment}: {service}")]
    ServiceNotFound {
        environment: String,
        service: String,
    },

    #[error("platform request failed: {0}")]
    RequestFailed(String),
}

/// Narrow interface to the compute platform, scoped per environment.
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    async fn register_revision(
        &self,
        environment: &str,
        def: RevisionDefinition,
    ) -> Result<RevisionId, PlatformError>;

    async fn update_service(
        &self,
        environment: &str,
        service_name: &str,
        revision: &RevisionId,
    ) -> Result<(), PlatformError>;

    async fn describe_service(
        &self,
        environment: &str,
        service_name: &str,
    ) -> Result<ServiceView, PlatformError>;
}

/// Bounded health-polling and rollback policy for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// On health-check timeout, re-point the service at the prior healthy
    /// revision instead of leaving it for operator inspection.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_auto_rollback() -> bool {
    true
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            auto_rollback: default_auto_rollback(),
        }
    }
}

/// Terminal outcome of one deploy cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Service reached steady state on the requested artifact.
    Healthy {
        revision: RevisionId,
        /// The artifact was already running steady; no rollout was
        /// triggered (idempotent re-deploy).
        already_deployed: bool,
    },
    /// Health check timed out; prior revision restored per policy.
    RolledBack {
        attempted: RevisionId,
        restored: Option<RevisionId>,
    },
    /// Health check timed out; service left as-is for inspection.
    FailedNeedsIntervention { revision: RevisionId },
}

/// Deploy-cycle errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("scoped credential for {role_arn} expired at {expired_at}")]
    CredentialExpired {
        role_arn: String,
        expired_at: DateTime<Utc>,
    },

    #[error("deploy cancelled while {phase}")]
    Cancelled { phase: &'static str },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Drives a single environment's deploy-verify-rollback cycle.
pub struct Deployer {
    platform: Arc<dyn ComputePlatform>,
}

impl Deployer {
    pub fn new(platform: Arc<dyn ComputePlatform>) -> Self {
        Self { platform }
    }

    /// Apply `artifact_ref` to the named service and verify health.
    ///
    /// Idempotent: if the service is already steady on the same artifact,
    /// reports `Healthy` without re-triggering a rollout, so retries at
    /// the controller layer are always safe. Cancellation interrupts the
    /// health poll without rolling back — a post-cancel rollback is an
    /// explicit operator action, never automatic.
    pub async fn deploy(
        &self,
        environment: &str,
        service_name: &str,
        artifact_ref: &ArtifactRef,
        credential: &ScopedCredential,
        policy: &HealthPolicy,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DeployOutcome, DeployError> {
        // Fail closed: an expired credential must never reach the platform.
        let now = Utc::now();
        if credential.is_expired_at(now) {
            return Err(DeployError::CredentialExpired {
                role_arn: credential.role_arn.clone(),
                expired_at: credential.expires_at,
            });
        }

        let view = self.platform.describe_service(environment, service_name).await?;
        if view.status == ServiceStatus::Steady
            && view.running_artifact.as_deref() == Some(artifact_ref.as_str())
        {
            let revision = view.running_revision.unwrap_or_default();
            info!(
                event = "deploy.noop",
                environment = %environment,
                service = %service_name,
                revision = %revision,
                "artifact already running steady",
            );
            return Ok(DeployOutcome::Healthy {
                revision,
                already_deployed: true,
            });
        }
        let prior_revision = view.running_revision.clone();

        let revision = self
            .platform
            .register_revision(
                environment,
                RevisionDefinition {
                    service_name: service_name.to_string(),
                    artifact_ref: artifact_ref.to_string(),
                },
            )
            .await?;

        if is_cancelled(&cancel) {
            return Err(DeployError::Cancelled {
                phase: "registering revision",
            });
        }

        self.platform
            .update_service(environment, service_name, &revision)
            .await?;
        info!(
            event = "deploy.rollout_started",
            environment = %environment,
            service = %service_name,
            revision = %revision,
        );

        let timeout = Duration::from_secs(policy.timeout_secs);
        let interval = Duration::from_secs(policy.poll_interval_secs);
        let started = tokio::time::Instant::now();

        loop {
            let view = self.platform.describe_service(environment, service_name).await?;
            if view.status == ServiceStatus::Steady
                && view.running_revision.as_ref() == Some(&revision)
            {
                return Ok(DeployOutcome::Healthy {
                    revision,
                    already_deployed: false,
                });
            }

            if started.elapsed() >= timeout {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancelled(&mut cancel) => {
                    return Err(DeployError::Cancelled {
                        phase: "polling service health",
                    });
                }
            }
        }

        warn!(
            event = "deploy.health_timeout",
            environment = %environment,
            service = %service_name,
            revision = %revision,
            timeout_secs = policy.timeout_secs,
            auto_rollback = policy.auto_rollback,
        );

        if policy.auto_rollback {
            if let Some(prior) = &prior_revision {
                self.platform
                    .update_service(environment, service_name, prior)
                    .await?;
            }
            Ok(DeployOutcome::RolledBack {
                attempted: revision,
                restored: prior_revision,
            })
        } else {
            Ok(DeployOutcome::FailedNeedsIntervention { revision })
        }
    }
}
