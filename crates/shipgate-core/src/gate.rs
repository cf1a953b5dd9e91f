//! Environment gate — the approval checkpoint between environments.
//!
//! A gate is created per (request, environment) when the pipeline reaches
//! that environment. Reviewers record approvals against a specific
//! artifact; approvals for any other artifact never count toward the
//! quorum. The promotion wait is a suspension on a watch channel, so
//! approvals arrive asynchronously and no lock is held while waiting.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cancel::cancelled;
use crate::domain::ArtifactRef;

/// One approval vote, bound to the artifact the reviewer saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub artifact_ref: ArtifactRef,
    pub approved_at: DateTime<Utc>,
}

/// Gate-level errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("source ref {source_ref:?} is not allowed for environment {environment}")]
    RefNotAllowed {
        environment: String,
        source_ref: String,
    },

    #[error("approval window for environment {environment} expired after {deadline_secs}s")]
    ApprovalTimeout {
        environment: String,
        deadline_secs: u64,
    },

    #[error(
        "approval by {approver} references artifact {approved} but the request carries {expected}"
    )]
    StaleApproval {
        approver: String,
        approved: String,
        expected: String,
    },

    #[error("{approver} has already approved environment {environment}")]
    DuplicateApproval {
        approver: String,
        environment: String,
    },

    #[error("environment {environment} is not awaiting approval (gate is {phase})")]
    NotAwaitingApproval { environment: String, phase: String },

    #[error("pipeline run was cancelled")]
    Cancelled,
}

/// Lifecycle of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatePhase {
    Waiting,
    Promoted,
    Expired,
    Cancelled,
}

impl GatePhase {
    fn label(self) -> &'static str {
        match self {
            GatePhase::Waiting => "waiting",
            GatePhase::Promoted => "promoted",
            GatePhase::Expired => "expired",
            GatePhase::Cancelled => "cancelled",
        }
    }
}

struct GateInner {
    phase: GatePhase,
    approvals: Vec<Approval>,
}

/// Approval gate for one (request, environment) pair.
pub struct EnvironmentGate {
    environment: String,
    artifact_ref: ArtifactRef,
    required_approvals: u32,
    inner: Mutex<GateInner>,
    count_tx: watch::Sender<u32>,
}

impl EnvironmentGate {
    pub fn new(
        environment: impl Into<String>,
        artifact_ref: ArtifactRef,
        required_approvals: u32,
    ) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            environment: environment.into(),
            artifact_ref,
            required_approvals,
            inner: Mutex::new(GateInner {
                phase: GatePhase::Waiting,
                approvals: Vec::new(),
            }),
            count_tx,
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn required_approvals(&self) -> u32 {
        self.required_approvals
    }

    /// Record an approval vote.
    ///
    /// Rejects votes whose artifact does not match the live request (stale
    /// approvals from a superseded artifact never count), duplicate voters,
    /// and votes arriving after the gate left its waiting phase. Returns
    /// the approval count on success.
    pub fn record_approval(
        &self,
        approver: impl Into<String>,
        artifact_ref: &ArtifactRef,
        now: DateTime<Utc>,
    ) -> Result<u32, GateError> {
        let approver = approver.into();
        let count = {
            let mut inner = self.inner.lock().expect("gate lock poisoned");

            if inner.phase != GatePhase::Waiting {
                return Err(GateError::NotAwaitingApproval {
                    environment: self.environment.clone(),
                    phase: inner.phase.label().to_string(),
                });
            }
            if *artifact_ref != self.artifact_ref {
                return Err(GateError::StaleApproval {
                    approver,
                    approved: artifact_ref.to_string(),
                    expected: self.artifact_ref.to_string(),
                });
            }
            if inner.approvals.iter().any(|a| a.approver == approver) {
                return Err(GateError::DuplicateApproval {
                    approver,
                    environment: self.environment.clone(),
                });
            }

            inner.approvals.push(Approval {
                approver,
                artifact_ref: artifact_ref.clone(),
                approved_at: now,
            });
            inner.approvals.len() as u32
        };

        self.count_tx.send_replace(count);
        Ok(count)
    }

    /// Approvals recorded so far.
    pub fn approvals(&self) -> Vec<Approval> {
        self.inner.lock().expect("gate lock poisoned").approvals.clone()
    }

    /// Suspend until the quorum is reached, the optional deadline passes,
    /// or the run is cancelled.
    ///
    /// A gate with zero required approvals promotes immediately. On
    /// success returns the approvals that formed the quorum.
    pub async fn wait_for_promotion(
        &self,
        deadline: Option<Duration>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Vec<Approval>, GateError> {
        if self.required_approvals == 0 {
            self.set_phase(GatePhase::Promoted);
            return Ok(Vec::new());
        }

        let mut count_rx = self.count_tx.subscribe();
        let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);

        loop {
            if *count_rx.borrow_and_update() >= self.required_approvals {
                self.set_phase(GatePhase::Promoted);
                return Ok(self.approvals());
            }

            match deadline_at {
                Some(at) => {
                    tokio::select! {
                        changed = count_rx.changed() => {
                            // The gate owns the sender, so this cannot fail
                            // while `self` is alive.
                            let _ = changed;
                        }
                        _ = tokio::time::sleep_until(at) => {
                            self.set_phase(GatePhase::Expired);
                            return Err(GateError::ApprovalTimeout {
                                environment: self.environment.clone(),
                                deadline_secs: deadline.map(|d| d.as_secs()).unwrap_or(0),
                            });
                        }
                        _ = cancelled(&mut cancel) => {
                            self.set_phase(GatePhase::Cancelled);
                            return Err(GateError::Cancelled);
                        }
                    }
                }
                None => {
                    tokio::select! {
                        changed = count_rx.changed() => {
                            let _ = changed;
                        }
                        _ = cancelled(&mut cancel) => {
                            self.set_phase(GatePhase::Cancelled);
                            return Err(GateError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    fn set_phase(&self, phase: GatePhase) {
        self.inner.lock().expect("gate lock poisoned").phase = phase;
    }
}

/// Check a request's source ref against an environment's allow-list.
///
/// An empty allow-list means no restriction. Enforced here, before any
/// credential is requested — defense in depth alongside the cloud-side
/// trust-policy ref condition, not a replacement for it.
pub fn check_source_ref(
    environment: &str,
    allowed_refs: &[String],
    source_ref: &str,
) -> Result<(), GateError> {
    if allowed_refs.is_empty() || allowed_refs.iter().any(|r| r == source_ref) {
        return Ok(());
    }
    Err(GateError::RefNotAllowed {
        environment: environment.to_string(),
        source_ref: source_ref.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> ArtifactRef {
        ArtifactRef::new("sha256:abc123").unwrap()
    }

    fn cancel_rx() -> watch::Receiver<bool> {
        // Dropping the sender means cancellation can never fire.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[test]
    fn test_record_approval_counts() {
        let gate = EnvironmentGate::new("production", artifact(), 2);
        assert_eq!(gate.record_approval("alice", &artifact(), Utc::now()).unwrap(), 1);
        assert_eq!(gate.record_approval("bob", &artifact(), Utc::now()).unwrap(), 2);
    }

    #[test]
    fn test_stale_artifact_approval_rejected() {
        let gate = EnvironmentGate::new("production", artifact(), 1);
        let old = ArtifactRef::new("sha256:superseded").unwrap();
        let err = gate.record_approval("alice", &old, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::StaleApproval { .. }));
        assert!(gate.approvals().is_empty());
    }

    #[test]
    fn test_duplicate_approver_rejected() {
        let gate = EnvironmentGate::new("production", artifact(), 2);
        gate.record_approval("alice", &artifact(), Utc::now()).unwrap();
        let err = gate
            .record_approval("alice", &artifact(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, GateError::DuplicateApproval { .. }));
    }

    #[tokio::test]
    async fn test_zero_approvals_promotes_immediately() {
        let gate = EnvironmentGate::new("staging", artifact(), 0);
        let approvals = gate.wait_for_promotion(None, cancel_rx()).await.unwrap();
        assert!(approvals.is_empty());
    }

    #[tokio::test]
    async fn test_promotion_after_quorum() {
        let gate = std::sync::Arc::new(EnvironmentGate::new("production", artifact(), 1));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_promotion(None, cancel_rx()).await })
        };
        // Let the waiter suspend before voting.
        tokio::task::yield_now().await;

        gate.record_approval("alice", &artifact(), Utc::now()).unwrap();
        let approvals = waiter.await.unwrap().unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approver, "alice");
    }

    #[tokio::test]
    async fn test_approval_before_wait_still_counts() {
        let gate = EnvironmentGate::new("production", artifact(), 1);
        gate.record_approval("alice", &artifact(), Utc::now()).unwrap();
        let approvals = gate.wait_for_promotion(None, cancel_rx()).await.unwrap();
        assert_eq!(approvals.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let gate = EnvironmentGate::new("production", artifact(), 1);
        let err = gate
            .wait_for_promotion(Some(Duration::from_secs(300)), cancel_rx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::ApprovalTimeout { deadline_secs: 300, .. }
        ));

        // Late votes bounce off the expired gate.
        let err = gate
            .record_approval("alice", &artifact(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, GateError::NotAwaitingApproval { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let gate = std::sync::Arc::new(EnvironmentGate::new("production", artifact(), 1));
        let (cancel_tx, cancel) = watch::channel(false);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_promotion(None, cancel).await })
        };
        tokio::task::yield_now().await;

        cancel_tx.send(true).unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, GateError::Cancelled));
    }

    #[test]
    fn test_check_source_ref() {
        assert!(check_source_ref("production", &[], "any-ref").is_ok());
        assert!(check_source_ref("production", &["main".to_string()], "main").is_ok());
        let err = check_source_ref("production", &["main".to_string()], "feature/x").unwrap_err();
        assert!(matches!(err, GateError::RefNotAllowed { .. }));
    }
}
