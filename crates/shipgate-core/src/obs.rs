//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `PipelineSpan` RAII guard
//! - Emission functions for the key lifecycle events: pipeline start and
//!   finish, state transitions, approvals, credential issuance
//!
//! Events are emitted at `info!` level; set `RUST_LOG` to filter.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::domain::PipelineStatus;
use crate::store::TransitionEvent;

/// RAII guard that enters a pipeline-scoped tracing span.
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    /// Create and enter a span tagged with the request id.
    pub fn enter(request_id: &Uuid) -> Self {
        let span = tracing::info_span!("shipgate.pipeline", request_id = %request_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: pipeline run started.
pub fn emit_pipeline_started(request_id: &Uuid, tenant: &str, environments: &[String]) {
    info!(
        event = "pipeline.started",
        request_id = %request_id,
        tenant = %tenant,
        environments = ?environments,
    );
}

/// Emit event: pipeline run finished with its overall verdict.
pub fn emit_pipeline_finished(request_id: &Uuid, status: PipelineStatus, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        request_id = %request_id,
        status = ?status,
        duration_ms = duration_ms,
    );
}

/// Emit event: one environment state transition (the observability sink).
pub fn emit_transition(event: &TransitionEvent) {
    info!(
        event = "pipeline.transition",
        request_id = %event.request_id,
        environment = %event.environment,
        from = event.from.label(),
        to = event.to.label(),
        actor = %event.actor,
    );
}

/// Emit event: an approval was recorded against a gate.
pub fn emit_approval_recorded(
    request_id: &Uuid,
    environment: &str,
    approver: &str,
    count: u32,
    required: u32,
) {
    info!(
        event = "gate.approval_recorded",
        request_id = %request_id,
        environment = %environment,
        approver = %approver,
        count = count,
        required = required,
    );
}

/// Emit event: a scoped credential was issued for one deploy.
///
/// Only the role, session label, and expiry are logged; key material
/// never reaches logs.
pub fn emit_credential_issued(
    request_id: &Uuid,
    role_arn: &str,
    session_label: &str,
    expires_at: DateTime<Utc>,
) {
    info!(
        event = "broker.credential_issued",
        request_id = %request_id,
        role_arn = %role_arn,
        session_label = %session_label,
        expires_at = %expires_at,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_span_create() {
        // Just ensure PipelineSpan::enter doesn't panic.
        let _span = PipelineSpan::enter(&Uuid::new_v4());
    }
}
