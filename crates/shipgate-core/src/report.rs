//! Operator-facing rendering of pipeline results.

use crate::domain::{EnvOutcome, PipelineResult};

/// Render the full result as pretty-printed JSON.
pub fn render_result_json(result: &PipelineResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

/// Render a per-environment outcome table as markdown.
pub fn render_outcomes_md(result: &PipelineResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Pipeline {} — {:?}\n\n",
        result.request_id, result.status
    ));
    out.push_str("| Environment | Outcome |\n|---|---|\n");
    for (name, outcome) in result.outcomes() {
        let cell = match outcome {
            EnvOutcome::NotAttempted => "not attempted".to_string(),
            EnvOutcome::Succeeded => "succeeded".to_string(),
            EnvOutcome::Failed { reason } => format!("failed: {reason}"),
            EnvOutcome::RolledBack => "rolled back".to_string(),
        };
        out.push_str(&format!("| {name} | {cell} |\n"));
    }
    out
}
