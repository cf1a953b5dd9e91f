//! Domain-level error taxonomy for shipgate.

/// Errors produced by request and identifier validation.
///
/// Validation failures are rejected before any side effect: no credential
/// is requested and no state is stored for an invalid request.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid tenant id {id:?} (must match [a-z0-9-]+)")]
    InvalidTenantId { id: String },

    #[error("artifact reference must not be empty")]
    EmptyArtifactRef,

    #[error("source ref must not be empty")]
    EmptySourceRef,

    #[error("environment list must not be empty")]
    EmptyEnvironmentList,

    #[error("environment {name} appears more than once in the request")]
    DuplicateEnvironment { name: String },
}

/// Shipgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ShipgateError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("credential broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    #[error("gate error: {0}")]
    Gate(#[from] crate::gate::GateError),

    #[error("deploy error: {0}")]
    Deploy(#[from] crate::orchestrator::DeployError),

    #[error("state store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("no promotion policy configured for environment: {name}")]
    UnknownEnvironment { name: String },

    #[error("pipeline run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for shipgate domain operations.
pub type Result<T> = std::result::Result<T, ShipgateError>;
