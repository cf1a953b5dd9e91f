//! Pipeline controller — sequences gate, resolver, broker, and
//! orchestrator across the ordered environment list.
//!
//! One run is strictly sequential across environments: production never
//! receives traffic from an un-promoted artifact concurrently with
//! staging validation. Many independent runs may execute concurrently;
//! runs targeting the same `(tenant, environment)` are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::broker::{BrokerError, CredentialBroker, IdentityAssertion, IdentityFederation};
use crate::cancel::cancelled;
use crate::config::ControlPlaneConfig;
use crate::domain::{
    ArtifactRef, DeploymentRequest, EnvStatus, EnvironmentState, FailureReason, PipelineResult,
    PipelineStatus, ShipgateError,
};
use crate::gate::{self, EnvironmentGate, GateError};
use crate::obs;
use crate::orchestrator::{ComputePlatform, DeployError, DeployOutcome, Deployer};
use crate::resolver;
use crate::store::{StateStore, TransitionEvent};

/// Mutual exclusion keyed by `(tenant, environment)`.
///
/// Two concurrent runs for the same tenant targeting the same environment
/// must never race on the same service; unrelated keys proceed freely.
#[derive(Clone, Default)]
pub struct DeployLocks {
    inner: Arc<Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for one `(tenant, environment)` pair, waiting for any
    /// holder to release it first.
    pub async fn acquire(
        &self,
        tenant: &str,
        environment: &str,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            // Guards and waiters each hold a clone of their slot, so a
            // count of one means the key is idle; sweeping those keeps the
            // map bounded by in-flight keys.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry((tenant.to_string(), environment.to_string()))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

/// External handle to one in-flight pipeline run.
///
/// Carries the cancellation switch and routes reviewer approvals to the
/// active environment gate. Cheap to clone; all clones address the same
/// run.
#[derive(Clone)]
pub struct PipelineHandle {
    request_id: Uuid,
    cancel_tx: Arc<watch::Sender<bool>>,
    gates: Arc<Mutex<HashMap<String, Arc<EnvironmentGate>>>>,
}

impl PipelineHandle {
    pub fn new(request: &DeploymentRequest) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            request_id: request.request_id,
            cancel_tx: Arc::new(cancel_tx),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Request cancellation. In-flight gate waits and health polls are
    /// interrupted; no rollback is performed on cancellation.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Record a reviewer approval for an environment of this run.
    ///
    /// Fails if the environment has no active gate (not yet reached, or
    /// already past approval) or if the approval references a different
    /// artifact than the live request.
    pub fn record_approval(
        &self,
        environment: &str,
        approver: &str,
        artifact_ref: &ArtifactRef,
        now: DateTime<Utc>,
    ) -> Result<u32, GateError> {
        let gate = {
            let gates = self.gates.lock().expect("gate map poisoned");
            gates.get(environment).cloned()
        };
        let Some(gate) = gate else {
            return Err(GateError::NotAwaitingApproval {
                environment: environment.to_string(),
                phase: "not_reached".to_string(),
            });
        };
        let count = gate.record_approval(approver, artifact_ref, now)?;
        obs::emit_approval_recorded(
            &self.request_id,
            environment,
            approver,
            count,
            gate.required_approvals(),
        );
        Ok(count)
    }

    fn register_gate(&self, gate: Arc<EnvironmentGate>) {
        self.gates
            .lock()
            .expect("gate map poisoned")
            .insert(gate.environment().to_string(), gate);
    }

    fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }
}

enum EnvRunError {
    Cancelled,
    Internal(ShipgateError),
}

/// Top-level coordinator for pipeline runs.
pub struct PipelineController {
    config: ControlPlaneConfig,
    broker: CredentialBroker,
    deployer: Deployer,
    store: Arc<dyn StateStore>,
    locks: DeployLocks,
}

impl PipelineController {
    pub fn new(
        config: ControlPlaneConfig,
        federation: Arc<dyn IdentityFederation>,
        platform: Arc<dyn ComputePlatform>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            broker: CredentialBroker::new(federation),
            deployer: Deployer::new(platform),
            store,
            locks: DeployLocks::new(),
        }
    }

    /// Execute a pipeline run to completion.
    ///
    /// Environments run strictly in request order; the first halting
    /// terminal state stops the run with all later environments left
    /// `Pending` (never attempted, never marked failed). Unexpected
    /// errors abort the run, preserving the partial environment history
    /// for diagnosis.
    pub async fn run(
        &self,
        request: &DeploymentRequest,
        assertion: &IdentityAssertion,
        handle: &PipelineHandle,
    ) -> PipelineResult {
        let span = tracing::info_span!("shipgate.pipeline", request_id = %request.request_id);
        async move {
            let started_at = Utc::now();
            let timer = std::time::Instant::now();
            obs::emit_pipeline_started(
                &request.request_id,
                request.tenant.id.as_str(),
                &request.environments,
            );

            let mut states: Vec<EnvironmentState> = request
                .environments
                .iter()
                .map(EnvironmentState::pending)
                .collect();

            let mut status = PipelineStatus::Success;
            if let Err(err) = self.store.create_run(request).await {
                warn!(event = "pipeline.store_error", request_id = %request.request_id, error = %err);
                status = PipelineStatus::Aborted;
            } else {
                for state in states.iter_mut() {
                    if handle.is_cancelled() {
                        status = PipelineStatus::Aborted;
                        break;
                    }
                    match self.run_environment(request, assertion, handle, state).await {
                        Ok(()) => {
                            if state.status.halts_pipeline() {
                                status = PipelineStatus::Failed;
                                break;
                            }
                        }
                        Err(EnvRunError::Cancelled) => {
                            status = PipelineStatus::Aborted;
                            break;
                        }
                        Err(EnvRunError::Internal(err)) => {
                            warn!(
                                event = "pipeline.aborted",
                                request_id = %request.request_id,
                                environment = %state.name,
                                error = %err,
                            );
                            status = PipelineStatus::Aborted;
                            break;
                        }
                    }
                }
            }

            obs::emit_pipeline_finished(
                &request.request_id,
                status,
                timer.elapsed().as_millis() as u64,
            );

            PipelineResult {
                request_id: request.request_id,
                status,
                environments: states,
                started_at,
                completed_at: Utc::now(),
            }
        }
        .instrument(span)
        .await
    }

    /// Full cycle for one environment: gate, resolve, issue, orchestrate.
    async fn run_environment(
        &self,
        request: &DeploymentRequest,
        assertion: &IdentityAssertion,
        handle: &PipelineHandle,
        state: &mut EnvironmentState,
    ) -> Result<(), EnvRunError> {
        let tenant_id = request.tenant.id.as_str();
        let environment = state.name.clone();

        // The holder may be in an unbounded approval wait, so the lock wait
        // itself must observe cancellation.
        let mut cancel_rx = handle.cancel_receiver();
        let _guard = tokio::select! {
            guard = self.locks.acquire(tenant_id, &environment) => guard,
            _ = cancelled(&mut cancel_rx) => return Err(EnvRunError::Cancelled),
        };
        if handle.is_cancelled() {
            return Err(EnvRunError::Cancelled);
        }

        let policy = self
            .config
            .policy(&environment)
            .cloned()
            .ok_or_else(|| {
                EnvRunError::Internal(ShipgateError::UnknownEnvironment {
                    name: environment.clone(),
                })
            })?;

        state.started_at = Some(Utc::now());

        // Ref restriction is enforced here, before any credential is
        // requested.
        if gate::check_source_ref(&environment, &policy.allowed_refs, &request.source_ref).is_err()
        {
            self.transition(
                request,
                state,
                EnvStatus::Failed {
                    reason: FailureReason::RefNotAllowed,
                },
                "gate",
            )
            .await?;
            return Ok(());
        }

        let env_gate = Arc::new(EnvironmentGate::new(
            environment.clone(),
            request.artifact_ref.clone(),
            policy.required_approvals,
        ));
        handle.register_gate(env_gate.clone());

        if policy.required_approvals > 0 {
            self.transition(request, state, EnvStatus::AwaitingApproval, "gate")
                .await?;
        }

        let deadline = policy.approval_deadline_secs.map(Duration::from_secs);
        match env_gate
            .wait_for_promotion(deadline, handle.cancel_receiver())
            .await
        {
            Ok(approvals) => {
                state.approvals = approvals.iter().map(|a| a.approver.clone()).collect();
            }
            Err(GateError::ApprovalTimeout { .. }) => {
                self.transition(
                    request,
                    state,
                    EnvStatus::Failed {
                        reason: FailureReason::ApprovalTimeout,
                    },
                    "gate",
                )
                .await?;
                return Ok(());
            }
            Err(GateError::Cancelled) => return Err(EnvRunError::Cancelled),
            Err(other) => return Err(EnvRunError::Internal(other.into())),
        }

        // Resolve fresh for this environment transition; never cached
        // across the pipeline.
        let scope = resolver::resolve(tenant_id, &self.config.cloud)
            .map_err(|e| EnvRunError::Internal(e.into()))?;

        self.transition(request, state, EnvStatus::Deploying, "controller")
            .await?;

        let session_label = format!("deploy-{tenant_id}-{environment}");
        let credential = match self
            .broker
            .issue(assertion, &scope.role_arn, &session_label)
            .await
        {
            Ok(credential) => {
                obs::emit_credential_issued(
                    &request.request_id,
                    &credential.role_arn,
                    &session_label,
                    credential.expires_at,
                );
                credential
            }
            Err(err) => {
                let reason = match &err {
                    BrokerError::AssumeRoleDenied { .. } => FailureReason::AuthorizationDenied,
                    BrokerError::AssertionExpired => FailureReason::AssertionExpired,
                    BrokerError::ProviderUnavailable { .. } => FailureReason::ProviderUnavailable,
                };
                warn!(
                    event = "broker.issue_failed",
                    request_id = %request.request_id,
                    environment = %environment,
                    error = %err,
                );
                self.transition(request, state, EnvStatus::Failed { reason }, "broker")
                    .await?;
                return Ok(());
            }
        };

        let deploy = self
            .deployer
            .deploy(
                &environment,
                &scope.service_resource_name,
                &request.artifact_ref,
                &credential,
                &policy.health,
                handle.cancel_receiver(),
            )
            .await;
        // `credential` drops at scope exit; the next environment mints its
        // own fresh credential.

        match deploy {
            Ok(DeployOutcome::Healthy { .. }) => {
                self.transition(request, state, EnvStatus::Healthy, "orchestrator")
                    .await?;
            }
            Ok(DeployOutcome::RolledBack { .. }) => {
                self.transition(request, state, EnvStatus::RolledBack, "orchestrator")
                    .await?;
            }
            Ok(DeployOutcome::FailedNeedsIntervention { .. }) => {
                self.transition(
                    request,
                    state,
                    EnvStatus::Failed {
                        reason: FailureReason::HealthCheckTimeout,
                    },
                    "orchestrator",
                )
                .await?;
            }
            Err(DeployError::Cancelled { .. }) => return Err(EnvRunError::Cancelled),
            Err(DeployError::CredentialExpired { .. }) => {
                self.transition(
                    request,
                    state,
                    EnvStatus::Failed {
                        reason: FailureReason::CredentialExpired,
                    },
                    "orchestrator",
                )
                .await?;
            }
            Err(DeployError::Platform(err)) => {
                warn!(
                    event = "deploy.platform_error",
                    request_id = %request.request_id,
                    environment = %environment,
                    error = %err,
                );
                self.transition(
                    request,
                    state,
                    EnvStatus::Failed {
                        reason: FailureReason::PlatformError,
                    },
                    "orchestrator",
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Apply one state transition: mutate the snapshot, persist it, and
    /// feed the observability sink.
    async fn transition(
        &self,
        request: &DeploymentRequest,
        state: &mut EnvironmentState,
        to: EnvStatus,
        actor: &str,
    ) -> Result<(), EnvRunError> {
        let from = state.status.clone();
        state.status = to.clone();
        if to.is_terminal() {
            state.completed_at = Some(Utc::now());
        }

        let event = TransitionEvent {
            request_id: request.request_id,
            environment: state.name.clone(),
            from,
            to,
            timestamp: Utc::now(),
            actor: actor.to_string(),
        };
        obs::emit_transition(&event);

        self.store
            .update_environment(&request.request_id, state.clone())
            .await
            .map_err(|e| EnvRunError::Internal(e.into()))?;
        self.store
            .append_transition(event)
            .await
            .map_err(|e| EnvRunError::Internal(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Tenant;

    fn request() -> DeploymentRequest {
        DeploymentRequest::new(
            Tenant::new("acme", "github.com/acme/shop", "Acme Shop").unwrap(),
            ArtifactRef::new("sha256:abc123").unwrap(),
            "main",
            vec!["staging".to_string()],
            "ci",
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_locks_serialize_same_key() {
        let locks = DeployLocks::new();
        let first = locks.acquire("acme", "staging").await;

        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _guard = locks2.acquire("acme", "staging").await;
        });
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_locks_prune_released_entries() {
        let locks = DeployLocks::new();
        drop(locks.acquire("acme", "staging").await);
        drop(locks.acquire("acme", "production").await);

        // Acquiring any key sweeps entries with no holder or waiter.
        let _other = locks.acquire("globex", "staging").await;
        let map = locks.inner.lock().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&("globex".to_string(), "staging".to_string())));
    }

    #[tokio::test]
    async fn test_deploy_locks_distinct_keys_do_not_block() {
        let locks = DeployLocks::new();
        let _staging = locks.acquire("acme", "staging").await;
        // Different environment and different tenant both proceed.
        let _production = locks.acquire("acme", "production").await;
        let _other = locks.acquire("globex", "staging").await;
    }

    #[test]
    fn test_handle_cancel_flag() {
        let handle = PipelineHandle::new(&request());
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        // Clones observe the same switch.
        assert!(handle.clone().is_cancelled());
    }

    #[test]
    fn test_record_approval_before_gate_exists() {
        let handle = PipelineHandle::new(&request());
        let err = handle
            .record_approval(
                "production",
                "alice",
                &ArtifactRef::new("sha256:abc123").unwrap(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, GateError::NotAwaitingApproval { .. }));
    }
}
