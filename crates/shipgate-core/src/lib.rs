//! shipgate-core — promotion-gated multi-environment deployment control
//! plane with per-tenant dynamically-scoped cloud credentials.
//!
//! The crate is organised around one pipeline run:
//!
//! - [`domain`] — validated request/tenant types and the per-environment
//!   state machine
//! - [`resolver`] — deterministic tenant-id → cloud resource naming
//! - [`gate`] — artifact-bound approval gates between environments
//! - [`broker`] — scoped credential issuance with bounded retry
//! - [`orchestrator`] — single-environment deploy, health verify, rollback
//! - [`controller`] — sequences the above across the environment list
//! - [`store`] — pipeline state persistence and the transition log
//! - [`config`] — TOML control-plane configuration
//! - [`fakes`] — in-memory collaborators for tests and dry-runs
//!
//! External systems (identity federation, compute platform, state store)
//! sit behind traits so production adapters and test fakes are
//! interchangeable.

pub mod broker;
mod cancel;
pub mod config;
pub mod controller;
pub mod domain;
pub mod fakes;
pub mod gate;
pub mod obs;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod store;
pub mod telemetry;

pub use broker::{
    BrokerError, CredentialBroker, FederationError, IdentityAssertion, IdentityFederation,
    RetryPolicy, ScopedCredential,
};
pub use config::{CloudNaming, ConfigError, ControlPlaneConfig, PromotionPolicy};
pub use controller::{DeployLocks, PipelineController, PipelineHandle};
pub use domain::{
    ArtifactRef, DeploymentRequest, EnvOutcome, EnvStatus, EnvironmentState, FailureReason,
    PipelineResult, PipelineStatus, Result, ShipgateError, Tenant, TenantId, ValidationError,
};
pub use gate::{Approval, EnvironmentGate, GateError};
pub use orchestrator::{
    ComputePlatform, DeployError, DeployOutcome, Deployer, HealthPolicy, PlatformError,
    RevisionDefinition, RevisionId, ServiceStatus, ServiceView,
};
pub use resolver::{ResolvedScope, ROLE_NAME_PREFIX, SERVICE_NAME_SUFFIX};
pub use store::{StateStore, StoreError, StoreResult, TransitionEvent};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
