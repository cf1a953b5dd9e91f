//! In-memory fakes for the external collaborator traits (testing and
//! dry-runs only).
//!
//! Provides `MemoryStateStore`, `StaticFederation`, and `FakePlatform`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::broker::{
    FederationError, IdentityAssertion, IdentityFederation, ScopedCredential,
};
use crate::domain::{DeploymentRequest, EnvironmentState};
use crate::orchestrator::{
    ComputePlatform, PlatformError, RevisionDefinition, RevisionId, ServiceStatus, ServiceView,
};
use crate::store::{StateStore, StoreError, StoreResult, TransitionEvent};

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    request: DeploymentRequest,
    environments: Vec<EnvironmentState>,
    transitions: Vec<TransitionEvent>,
}

/// In-memory state store backed by a `HashMap<request_id, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    runs: Mutex<HashMap<Uuid, RunState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored request, for assertions.
    pub fn request(&self, request_id: &Uuid) -> Option<DeploymentRequest> {
        let runs = self.runs.lock().unwrap();
        runs.get(request_id).map(|r| r.request.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_run(&self, request: &DeploymentRequest) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&request.request_id) {
            return Err(StoreError::Backend(format!(
                "run already exists: {}",
                request.request_id
            )));
        }
        runs.insert(
            request.request_id,
            RunState {
                request: request.clone(),
                environments: request
                    .environments
                    .iter()
                    .map(EnvironmentState::pending)
                    .collect(),
                transitions: Vec::new(),
            },
        );
        Ok(())
    }

    async fn update_environment(
        &self,
        request_id: &Uuid,
        state: EnvironmentState,
    ) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(request_id).ok_or(StoreError::RunNotFound {
            request_id: *request_id,
        })?;
        let slot = run
            .environments
            .iter_mut()
            .find(|e| e.name == state.name)
            .ok_or_else(|| StoreError::EnvironmentNotFound {
                request_id: *request_id,
                environment: state.name.clone(),
            })?;
        *slot = state;
        Ok(())
    }

    async fn append_transition(&self, event: TransitionEvent) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&event.request_id)
            .ok_or(StoreError::RunNotFound {
                request_id: event.request_id,
            })?;
        run.transitions.push(event);
        Ok(())
    }

    async fn get_environments(&self, request_id: &Uuid) -> StoreResult<Vec<EnvironmentState>> {
        let runs = self.runs.lock().unwrap();
        runs.get(request_id)
            .map(|r| r.environments.clone())
            .ok_or(StoreError::RunNotFound {
                request_id: *request_id,
            })
    }

    async fn get_transitions(&self, request_id: &Uuid) -> StoreResult<Vec<TransitionEvent>> {
        let runs = self.runs.lock().unwrap();
        runs.get(request_id)
            .map(|r| r.transitions.clone())
            .ok_or(StoreError::RunNotFound {
                request_id: *request_id,
            })
    }
}

// ---------------------------------------------------------------------------
// StaticFederation
// ---------------------------------------------------------------------------

/// One scripted federation response.
#[derive(Debug, Clone)]
pub enum FederationScript {
    Issue { ttl_secs: i64 },
    Deny(String),
    ExpiredAssertion,
    Unavailable(String),
}

/// Scriptable federation endpoint fake.
///
/// Responses are consumed from the script in order; once exhausted (or
/// for [`StaticFederation::issuing`]) every call issues a credential with
/// the default TTL. Records every call for assertions.
pub struct StaticFederation {
    script: Mutex<VecDeque<FederationScript>>,
    calls: Mutex<Vec<(String, String)>>,
    default_ttl_secs: i64,
}

impl StaticFederation {
    /// Always issue credentials valid for `ttl_secs`.
    pub fn issuing(ttl_secs: i64) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            default_ttl_secs: ttl_secs,
        }
    }

    /// Play back the given responses, then fall back to issuing.
    pub fn scripted(script: Vec<FederationScript>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            default_ttl_secs: 3600,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Role ARNs requested, in call order.
    pub fn roles(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Session names requested, in call order.
    pub fn sessions(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl IdentityFederation for StaticFederation {
    async fn assume_role(
        &self,
        _assertion: &IdentityAssertion,
        role_arn: &str,
        session_name: &str,
    ) -> Result<ScopedCredential, FederationError> {
        self.calls
            .lock()
            .unwrap()
            .push((role_arn.to_string(), session_name.to_string()));

        let next = self.script.lock().unwrap().pop_front();
        let ttl_secs = match next {
            None => self.default_ttl_secs,
            Some(FederationScript::Issue { ttl_secs }) => ttl_secs,
            Some(FederationScript::Deny(reason)) => {
                return Err(FederationError::Denied { reason });
            }
            Some(FederationScript::ExpiredAssertion) => {
                return Err(FederationError::AssertionExpired);
            }
            Some(FederationScript::Unavailable(msg)) => {
                return Err(FederationError::Unavailable(msg));
            }
        };

        Ok(ScopedCredential {
            role_arn: role_arn.to_string(),
            access_key_id: format!("AKIAFAKE{}", self.call_count()),
            secret_access_key: Uuid::new_v4().to_string(),
            session_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// FakePlatform
// ---------------------------------------------------------------------------

/// How a fake service converges after a rollout starts.
#[derive(Debug, Clone, Copy)]
pub enum HealthBehavior {
    /// Reach steady state after this many `describe_service` polls.
    SteadyAfterPolls(u32),
    /// Stay in rollout forever (forces the health-check timeout path).
    NeverSteady,
}

#[derive(Debug)]
struct ServiceSim {
    behavior: HealthBehavior,
    status: ServiceStatus,
    running_revision: Option<RevisionId>,
    running_artifact: Option<String>,
    target_revision: Option<RevisionId>,
    target_artifact: Option<String>,
    polls_remaining: u32,
    rollouts: u32,
    describes: u32,
}

/// In-memory compute platform keyed by `(environment, service)`.
#[derive(Default)]
pub struct FakePlatform {
    services: Mutex<HashMap<(String, String), ServiceSim>>,
    revisions: Mutex<HashMap<(String, String), RevisionDefinition>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a steady service running `artifact`, converging per `behavior`
    /// on subsequent rollouts. Returns the seeded running revision id.
    pub fn seed_service(
        &self,
        environment: &str,
        service_name: &str,
        artifact: &str,
        behavior: HealthBehavior,
    ) -> RevisionId {
        let revision = RevisionId::new();
        self.revisions.lock().unwrap().insert(
            (environment.to_string(), revision.0.clone()),
            RevisionDefinition {
                service_name: service_name.to_string(),
                artifact_ref: artifact.to_string(),
            },
        );
        self.services.lock().unwrap().insert(
            (environment.to_string(), service_name.to_string()),
            ServiceSim {
                behavior,
                status: ServiceStatus::Steady,
                running_revision: Some(revision.clone()),
                running_artifact: Some(artifact.to_string()),
                target_revision: None,
                target_artifact: None,
                polls_remaining: 0,
                rollouts: 0,
                describes: 0,
            },
        );
        revision
    }

    /// Number of `update_service` calls for the given service.
    pub fn rollout_count(&self, environment: &str, service_name: &str) -> u32 {
        let services = self.services.lock().unwrap();
        services
            .get(&(environment.to_string(), service_name.to_string()))
            .map(|s| s.rollouts)
            .unwrap_or(0)
    }

    /// Number of `describe_service` calls for the given service.
    pub fn describe_count(&self, environment: &str, service_name: &str) -> u32 {
        let services = self.services.lock().unwrap();
        services
            .get(&(environment.to_string(), service_name.to_string()))
            .map(|s| s.describes)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ComputePlatform for FakePlatform {
    async fn register_revision(
        &self,
        environment: &str,
        def: RevisionDefinition,
    ) -> Result<RevisionId, PlatformError> {
        let revision = RevisionId::new();
        self.revisions
            .lock()
            .unwrap()
            .insert((environment.to_string(), revision.0.clone()), def);
        Ok(revision)
    }

    async fn update_service(
        &self,
        environment: &str,
        service_name: &str,
        revision: &RevisionId,
    ) -> Result<(), PlatformError> {
        let def = {
            let revisions = self.revisions.lock().unwrap();
            revisions
                .get(&(environment.to_string(), revision.0.clone()))
                .cloned()
                .ok_or_else(|| {
                    PlatformError::RequestFailed(format!("unknown revision: {revision}"))
                })?
        };

        let mut services = self.services.lock().unwrap();
        let sim = services
            .get_mut(&(environment.to_string(), service_name.to_string()))
            .ok_or_else(|| PlatformError::ServiceNotFound {
                environment: environment.to_string(),
                service: service_name.to_string(),
            })?;

        sim.rollouts += 1;
        sim.status = ServiceStatus::RollingOut;
        sim.target_revision = Some(revision.clone());
        sim.target_artifact = Some(def.artifact_ref);
        sim.polls_remaining = match sim.behavior {
            HealthBehavior::SteadyAfterPolls(n) => n,
            HealthBehavior::NeverSteady => 0,
        };
        Ok(())
    }

    async fn describe_service(
        &self,
        environment: &str,
        service_name: &str,
    ) -> Result<ServiceView, PlatformError> {
        let mut services = self.services.lock().unwrap();
        let sim = services
            .get_mut(&(environment.to_string(), service_name.to_string()))
            .ok_or_else(|| PlatformError::ServiceNotFound {
                environment: environment.to_string(),
                service: service_name.to_string(),
            })?;

        sim.describes += 1;

        if sim.target_revision.is_some() {
            match sim.behavior {
                HealthBehavior::SteadyAfterPolls(_) => {
                    if sim.polls_remaining <= 1 {
                        sim.running_revision = sim.target_revision.take();
                        sim.running_artifact = sim.target_artifact.take();
                        sim.status = ServiceStatus::Steady;
                        sim.polls_remaining = 0;
                    } else {
                        sim.polls_remaining -= 1;
                        sim.status = ServiceStatus::RollingOut;
                    }
                }
                HealthBehavior::NeverSteady => {
                    sim.status = ServiceStatus::RollingOut;
                }
            }
        }

        Ok(ServiceView {
            status: sim.status,
            running_revision: sim.running_revision.clone(),
            running_artifact: sim.running_artifact.clone(),
        })
    }
}
