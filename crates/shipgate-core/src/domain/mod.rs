//! Core domain model: tenants, requests, per-environment state, errors.

pub mod environment;
pub mod error;
pub mod request;
pub mod tenant;

pub use environment::{
    EnvOutcome, EnvStatus, EnvironmentState, FailureReason, PipelineResult, PipelineStatus,
};
pub use error::{Result, ShipgateError, ValidationError};
pub use request::{ArtifactRef, DeploymentRequest};
pub use tenant::{Tenant, TenantId};
