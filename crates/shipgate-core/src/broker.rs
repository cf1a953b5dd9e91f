//! Scoped credential issuance against the OIDC federation endpoint.
//!
//! The broker performs exactly one federation call per attempt. Denials
//! are policy decisions and are never retried; provider unavailability is
//! retried with bounded exponential backoff. Credentials carry an explicit
//! expiry and the broker never refreshes them — callers re-issue before
//! expiry, and expired credentials fail closed downstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Caller identity assertion (an OIDC token) presented for exchange.
#[derive(Clone)]
pub struct IdentityAssertion(String);

impl IdentityAssertion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token itself.
        f.debug_tuple("IdentityAssertion").field(&"<redacted>").finish()
    }
}

/// Short-lived, tenant-scoped cloud credential.
///
/// Owned by exactly one in-flight deploy and discarded at environment
/// boundary; each environment transition mints a fresh credential.
#[derive(Clone)]
pub struct ScopedCredential {
    pub role_arn: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl ScopedCredential {
    /// Whether the credential has expired at the given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("role_arn", &self.role_arn)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Errors surfaced by the federation endpoint itself.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("assume role denied: {reason}")]
    Denied { reason: String },

    #[error("identity assertion expired")]
    AssertionExpired,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Standard OIDC `AssumeRoleWithWebIdentity`-style exchange.
///
/// Implementations must make exactly one network call per invocation;
/// retry policy belongs to the [`CredentialBroker`], not the endpoint.
#[async_trait]
pub trait IdentityFederation: Send + Sync {
    async fn assume_role(
        &self,
        assertion: &IdentityAssertion,
        role_arn: &str,
        session_name: &str,
    ) -> Result<ScopedCredential, FederationError>;
}

/// Broker-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("assume role denied for {role_arn}: {reason}")]
    AssumeRoleDenied { role_arn: String, reason: String },

    #[error("identity assertion expired")]
    AssertionExpired,

    #[error("federation provider unavailable after {attempts} attempts: {last_error}")]
    ProviderUnavailable { attempts: u32, last_error: String },
}

/// Bounded exponential backoff for transient federation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_factor).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Exchanges a caller's identity assertion for a tenant-scoped credential.
pub struct CredentialBroker {
    federation: Arc<dyn IdentityFederation>,
    retry: RetryPolicy,
}

impl CredentialBroker {
    pub fn new(federation: Arc<dyn IdentityFederation>) -> Self {
        Self::with_retry(federation, RetryPolicy::default())
    }

    pub fn with_retry(federation: Arc<dyn IdentityFederation>, retry: RetryPolicy) -> Self {
        Self { federation, retry }
    }

    /// Issue a scoped credential for the given role.
    ///
    /// Denials and expired assertions surface immediately; provider
    /// unavailability is retried up to the policy's attempt bound with
    /// exponential backoff between attempts.
    pub async fn issue(
        &self,
        assertion: &IdentityAssertion,
        role_arn: &str,
        session_label: &str,
    ) -> Result<ScopedCredential, BrokerError> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            match self
                .federation
                .assume_role(assertion, role_arn, session_label)
                .await
            {
                Ok(credential) => return Ok(credential),
                Err(FederationError::Denied { reason }) => {
                    return Err(BrokerError::AssumeRoleDenied {
                        role_arn: role_arn.to_string(),
                        reason,
                    });
                }
                Err(FederationError::AssertionExpired) => {
                    return Err(BrokerError::AssertionExpired);
                }
                Err(FederationError::Unavailable(msg)) => {
                    warn!(
                        event = "broker.retry",
                        role_arn = %role_arn,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %msg,
                    );
                    last_error = msg;
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(BrokerError::ProviderUnavailable {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FederationScript, StaticFederation};

    fn assertion() -> IdentityAssertion {
        IdentityAssertion::new("header.payload.signature")
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = ScopedCredential {
            role_arn: "arn:aws:iam::1:role/deployment-role-acme".to_string(),
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "supersecret".to_string(),
            session_token: "tokentoken".to_string(),
            expires_at: Utc::now(),
        };
        let dump = format!("{cred:?}");
        assert!(!dump.contains("supersecret"));
        assert!(!dump.contains("tokentoken"));
        assert!(dump.contains("AKIA123"));

        let dump = format!("{:?}", assertion());
        assert!(!dump.contains("payload"));
    }

    #[tokio::test]
    async fn test_issue_success_single_call() {
        let federation = Arc::new(StaticFederation::issuing(3600));
        let broker = CredentialBroker::new(federation.clone());

        let cred = broker
            .issue(&assertion(), "arn:aws:iam::1:role/deployment-role-acme", "deploy-acme-staging")
            .await
            .unwrap();

        assert_eq!(cred.role_arn, "arn:aws:iam::1:role/deployment-role-acme");
        assert_eq!(federation.call_count(), 1);
        assert_eq!(
            federation.sessions(),
            vec!["deploy-acme-staging".to_string()]
        );
    }

    #[tokio::test]
    async fn test_issue_denied_is_not_retried() {
        let federation = Arc::new(StaticFederation::scripted(vec![FederationScript::Deny(
            "trust policy mismatch".to_string(),
        )]));
        let broker = CredentialBroker::new(federation.clone());

        let err = broker
            .issue(&assertion(), "arn:aws:iam::1:role/deployment-role-acme", "s")
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::AssumeRoleDenied { .. }));
        assert_eq!(federation.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_retries_unavailable_then_succeeds() {
        let federation = Arc::new(StaticFederation::scripted(vec![
            FederationScript::Unavailable("503".to_string()),
            FederationScript::Unavailable("503".to_string()),
            FederationScript::Issue { ttl_secs: 3600 },
        ]));
        let broker = CredentialBroker::new(federation.clone());

        let cred = broker
            .issue(&assertion(), "arn:aws:iam::1:role/deployment-role-acme", "s")
            .await
            .unwrap();

        assert!(!cred.is_expired_at(Utc::now()));
        assert_eq!(federation.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_gives_up_after_max_attempts() {
        let federation = Arc::new(StaticFederation::scripted(vec![
            FederationScript::Unavailable("timeout".to_string()),
            FederationScript::Unavailable("timeout".to_string()),
            FederationScript::Unavailable("timeout".to_string()),
            FederationScript::Issue { ttl_secs: 3600 },
        ]));
        let broker = CredentialBroker::new(federation.clone());

        let err = broker
            .issue(&assertion(), "arn:aws:iam::1:role/deployment-role-acme", "s")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BrokerError::ProviderUnavailable { attempts: 3, .. }
        ));
        assert_eq!(federation.call_count(), 3);
    }

    #[tokio::test]
    async fn test_expired_assertion_surfaces_immediately() {
        let federation = Arc::new(StaticFederation::scripted(vec![
            FederationScript::ExpiredAssertion,
        ]));
        let broker = CredentialBroker::new(federation.clone());

        let err = broker
            .issue(&assertion(), "arn:aws:iam::1:role/deployment-role-acme", "s")
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::AssertionExpired));
        assert_eq!(federation.call_count(), 1);
    }
}
