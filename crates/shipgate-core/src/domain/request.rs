//! Deployment requests — one immutable record per pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValidationError;
use super::tenant::Tenant;

/// Immutable content identifier for a deployable artifact
/// (e.g. an image digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(r: impl Into<String>) -> Result<Self, ValidationError> {
        let r = r.into();
        if r.is_empty() {
            return Err(ValidationError::EmptyArtifactRef);
        }
        Ok(ArtifactRef(r))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ArtifactRef::new(s)
    }
}

impl From<ArtifactRef> for String {
    fn from(r: ArtifactRef) -> String {
        r.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to promote one artifact through an ordered environment list.
///
/// Created once per pipeline run and immutable thereafter; per-environment
/// progress lives in [`super::environment::EnvironmentState`], never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Unique id for this pipeline run.
    pub request_id: Uuid,

    /// The tenant whose service is being deployed.
    pub tenant: Tenant,

    /// Immutable artifact being promoted.
    pub artifact_ref: ArtifactRef,

    /// Source ref (branch) the artifact was built from; checked against
    /// each environment's allow-list before any credential is requested.
    pub source_ref: String,

    /// Ordered, duplicate-free environment sequence, e.g. staging then
    /// production.
    pub environments: Vec<String>,

    /// Identity that triggered the run.
    pub requested_by: String,

    pub created_at: DateTime<Utc>,
}

impl DeploymentRequest {
    /// Build a validated request. Rejects empty environment lists,
    /// duplicate environments, and empty source refs before any side
    /// effect can occur.
    pub fn new(
        tenant: Tenant,
        artifact_ref: ArtifactRef,
        source_ref: impl Into<String>,
        environments: Vec<String>,
        requested_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let source_ref = source_ref.into();
        if source_ref.is_empty() {
            return Err(ValidationError::EmptySourceRef);
        }
        if environments.is_empty() {
            return Err(ValidationError::EmptyEnvironmentList);
        }
        let mut seen = std::collections::HashSet::new();
        for env in &environments {
            if !seen.insert(env.as_str()) {
                return Err(ValidationError::DuplicateEnvironment { name: env.clone() });
            }
        }

        Ok(Self {
            request_id: Uuid::new_v4(),
            tenant,
            artifact_ref,
            source_ref,
            environments,
            requested_by: requested_by.into(),
            created_at: now,
        })
    }
}
