//! Tenant-scoped role and resource name resolution.
//!
//! Every cloud-side name is a pure function of the validated tenant id:
//!
//! - role name: `deployment-role-{id}`
//! - service:   `{id}-service`
//! - registry:  `{account}.dkr.ecr.{region}.amazonaws.com/{id}`
//!
//! Callers resolve once per environment transition and never cache the
//! result across the pipeline, so a mid-pipeline tenant-config change
//! cannot retarget a later environment's credential at a stale resolution.

use serde::{Deserialize, Serialize};

use crate::config::CloudNaming;
use crate::domain::{TenantId, ValidationError};

/// Role-name prefix mandated by the trust-policy convention.
pub const ROLE_NAME_PREFIX: &str = "deployment-role-";

/// Suffix appended to the tenant id to form the service resource name.
pub const SERVICE_NAME_SUFFIX: &str = "-service";

/// The credential scope and resource names derived for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedScope {
    pub role_arn: String,
    pub service_resource_name: String,
    pub ecr_repository: String,
}

/// Derive the deployment scope for a tenant id.
///
/// Pure and deterministic; fails with `InvalidTenantId` before producing
/// any name if the id does not match the allowed pattern. Distinct valid
/// ids never collide: the id is the only variable segment in each
/// template and the allowed alphabet contains no template delimiters.
pub fn resolve(tenant_id: &str, naming: &CloudNaming) -> Result<ResolvedScope, ValidationError> {
    let id = TenantId::new(tenant_id)?;
    Ok(ResolvedScope {
        role_arn: format!(
            "arn:{}:iam::{}:role/{}{}",
            naming.partition, naming.account_id, ROLE_NAME_PREFIX, id
        ),
        service_resource_name: format!("{id}{SERVICE_NAME_SUFFIX}"),
        ecr_repository: format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}",
            naming.account_id, naming.region, id
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> CloudNaming {
        CloudNaming {
            partition: "aws".to_string(),
            account_id: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
        }
    }

    #[test]
    fn test_resolve_derives_all_names_from_id() {
        let scope = resolve("acme", &naming()).unwrap();
        assert_eq!(
            scope.role_arn,
            "arn:aws:iam::123456789012:role/deployment-role-acme"
        );
        assert_eq!(scope.service_resource_name, "acme-service");
        assert_eq!(
            scope.ecr_repository,
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com/acme"
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let a = resolve("acme-billing", &naming()).unwrap();
        let b = resolve("acme-billing", &naming()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_is_injective_over_sample() {
        let ids = ["acme", "acme-billing", "acmebilling", "a", "a-b", "ab"];
        let mut roles = std::collections::HashSet::new();
        let mut services = std::collections::HashSet::new();
        for id in ids {
            let scope = resolve(id, &naming()).unwrap();
            assert!(roles.insert(scope.role_arn), "role collision for {id}");
            assert!(
                services.insert(scope.service_resource_name),
                "service collision for {id}"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_injection_attempts() {
        for id in ["", "acme/escalate", "acme*", "../acme", "ACME", "acme:role"] {
            let err = resolve(id, &naming()).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidTenantId { .. }),
                "expected {id:?} to be rejected"
            );
        }
    }
}
