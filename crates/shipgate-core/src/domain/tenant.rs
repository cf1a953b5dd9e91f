//! Tenant identity and validated naming input.
//!
//! All cloud-side role and resource names are pure functions of the tenant
//! id (see [`crate::resolver`]); they are never stored alongside the tenant,
//! so the derived names cannot drift from the id.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Validated tenant identifier.
///
/// The inner field is private to guarantee the id always matches
/// `[a-z0-9-]+`. Anything else (uppercase, `/`, `*`, empty string) is
/// rejected at construction, which keeps injection out of the naming
/// templates the resolver expands the id into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("static pattern is valid"))
}

impl TenantId {
    /// Validate and wrap a tenant id.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if !tenant_id_pattern().is_match(&id) {
            return Err(ValidationError::InvalidTenantId { id });
        }
        Ok(TenantId(id))
    }

    /// Return the validated id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TenantId::new(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> String {
        id.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consumer service owning one deployment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Validated tenant identifier; all resource names derive from this.
    pub id: TenantId,

    /// Source repository the tenant's artifacts are built from.
    pub artifact_repository: String,

    /// Human-readable service name for display and logs.
    pub service_name: String,
}

impl Tenant {
    /// Create a tenant, validating the id.
    pub fn new(
        id: impl Into<String>,
        artifact_repository: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: TenantId::new(id)?,
            artifact_repository: artifact_repository.into(),
            service_name: service_name.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tenant_ids() {
        for id in ["acme", "acme-billing", "a1", "0", "team-42-api"] {
            assert!(TenantId::new(id).is_ok(), "expected {id:?} to be valid");
        }
    }

    #[test]
    fn test_invalid_tenant_ids() {
        for id in ["", "Acme", "acme/prod", "acme*", "acme_billing", "a b", "acme."] {
            let err = TenantId::new(id).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidTenantId { .. }),
                "expected {id:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_tenant_id_serde_rejects_invalid() {
        let ok: Result<TenantId, _> = serde_json::from_str("\"acme\"");
        assert!(ok.is_ok());

        let bad: Result<TenantId, _> = serde_json::from_str("\"Acme/Prod\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_tenant_new() {
        let tenant = Tenant::new("acme", "github.com/acme/shop", "Acme Shop").unwrap();
        assert_eq!(tenant.id.as_str(), "acme");
        assert_eq!(tenant.service_name, "Acme Shop");
    }
}
