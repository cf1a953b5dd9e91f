//! shipgate — deployment pipeline control plane CLI.
//!
//! ## Commands
//!
//! - `resolve`: Show the cloud scope derived for a tenant id
//! - `validate`: Check a control-plane config file
//! - `simulate`: Dry-run a full pipeline against in-memory fakes

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{warn, Level};

use shipgate_core::controller::{PipelineController, PipelineHandle};
use shipgate_core::fakes::{FakePlatform, HealthBehavior, MemoryStateStore, StaticFederation};
use shipgate_core::{
    report, resolver, ArtifactRef, CloudNaming, ControlPlaneConfig, DeploymentRequest,
    IdentityAssertion, PipelineStatus, Tenant,
};

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Promotion-gated multi-environment deployment control plane", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the role ARN, service name, and registry derived for a tenant
    Resolve {
        /// Tenant identifier (must match [a-z0-9-]+)
        #[arg(short, long)]
        tenant: String,

        /// Control-plane config supplying the cloud naming context
        #[arg(short, long, env = "SHIPGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Cloud account id (when no config file is given)
        #[arg(long, default_value = "000000000000")]
        account_id: String,

        /// Cloud region (when no config file is given)
        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Cloud partition (when no config file is given)
        #[arg(long, default_value = "aws")]
        partition: String,
    },

    /// Validate a control-plane config file
    Validate {
        /// Path to the TOML config
        #[arg(short, long, env = "SHIPGATE_CONFIG")]
        config: PathBuf,
    },

    /// Dry-run a pipeline against in-memory fakes
    Simulate {
        /// Path to the TOML config
        #[arg(short, long, env = "SHIPGATE_CONFIG")]
        config: PathBuf,

        /// Tenant identifier
        #[arg(short, long)]
        tenant: String,

        /// Artifact to promote (e.g. an image digest)
        #[arg(short, long)]
        artifact: String,

        /// Source ref the artifact was built from
        #[arg(short, long, default_value = "main")]
        source_ref: String,

        /// Environments to target, in order (default: all configured)
        #[arg(short, long)]
        environment: Vec<String>,

        /// Automatically satisfy approval quorums during the run
        #[arg(long)]
        auto_approve: bool,

        /// Result rendering
        #[arg(long, value_enum, default_value_t = ReportFormat::Md)]
        report: ReportFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// Markdown outcome table
    Md,
    /// Full result as pretty-printed JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipgate_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Resolve {
            tenant,
            config,
            account_id,
            region,
            partition,
        } => {
            let naming = match config {
                Some(path) => load_config(&path)?.cloud,
                None => CloudNaming {
                    partition,
                    account_id,
                    region,
                },
            };
            cmd_resolve(&tenant, &naming)
        }
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Simulate {
            config,
            tenant,
            artifact,
            source_ref,
            environment,
            auto_approve,
            report,
        } => {
            cmd_simulate(
                &config,
                &tenant,
                &artifact,
                &source_ref,
                environment,
                auto_approve,
                report,
            )
            .await
        }
    }
}

fn load_config(path: &PathBuf) -> Result<ControlPlaneConfig> {
    ControlPlaneConfig::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn cmd_resolve(tenant: &str, naming: &CloudNaming) -> Result<()> {
    let scope = resolver::resolve(tenant, naming)?;
    println!("{}", serde_json::to_string_pretty(&scope)?);
    Ok(())
}

fn cmd_validate(path: &PathBuf) -> Result<()> {
    let config = load_config(path)?;
    println!("config ok: {} environment(s)", config.environments.len());
    for policy in &config.environments {
        let refs = if policy.allowed_refs.is_empty() {
            "any ref".to_string()
        } else {
            policy.allowed_refs.join(", ")
        };
        let deadline = policy
            .approval_deadline_secs
            .map(|s| format!("{s}s deadline"))
            .unwrap_or_else(|| "no deadline".to_string());
        println!(
            "  {}: {} approval(s), {refs}, {deadline}, health {}s/{}s rollback={}",
            policy.name,
            policy.required_approvals,
            policy.health.poll_interval_secs,
            policy.health.timeout_secs,
            policy.health.auto_rollback,
        );
    }
    Ok(())
}

async fn cmd_simulate(
    config_path: &PathBuf,
    tenant_id: &str,
    artifact: &str,
    source_ref: &str,
    environments: Vec<String>,
    auto_approve: bool,
    format: ReportFormat,
) -> Result<()> {
    let config = load_config(config_path)?;

    let environments = if environments.is_empty() {
        config.environments.iter().map(|p| p.name.clone()).collect()
    } else {
        environments
    };

    let tenant = Tenant::new(tenant_id, format!("local/{tenant_id}"), tenant_id)?;
    let request = DeploymentRequest::new(
        tenant,
        ArtifactRef::new(artifact)?,
        source_ref,
        environments,
        "shipgate-cli",
        Utc::now(),
    )?;

    // Quorums that need votes during the run.
    let gated: Vec<(String, u32)> = request
        .environments
        .iter()
        .filter_map(|env| {
            config
                .policy(env)
                .filter(|p| p.required_approvals > 0)
                .map(|p| (env.clone(), p.required_approvals))
        })
        .collect();
    if !auto_approve {
        for (env, required) in &gated {
            warn!(
                environment = %env,
                required = required,
                "environment requires approvals; without --auto-approve the \
                 simulation waits for the approval deadline",
            );
        }
    }

    // Seed a steady service per environment running a prior artifact, so
    // the dry run exercises the real rollout path.
    let scope = resolver::resolve(tenant_id, &config.cloud)?;
    let platform = Arc::new(FakePlatform::new());
    for env in &request.environments {
        platform.seed_service(
            env,
            &scope.service_resource_name,
            "sha256:previous",
            HealthBehavior::SteadyAfterPolls(2),
        );
    }

    let controller = Arc::new(PipelineController::new(
        config,
        Arc::new(StaticFederation::issuing(3600)),
        platform,
        Arc::new(MemoryStateStore::new()),
    ));

    let handle = PipelineHandle::new(&request);
    let approver = auto_approve.then(|| {
        let handle = handle.clone();
        let artifact = request.artifact_ref.clone();
        tokio::spawn(async move {
            for (env, required) in gated {
                let mut granted = 0u32;
                let mut voter = 1u32;
                while granted < required {
                    let name = format!("auto-approver-{voter}");
                    match handle.record_approval(&env, &name, &artifact, Utc::now()) {
                        Ok(count) => {
                            granted = count;
                            voter += 1;
                        }
                        Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
                    }
                }
            }
        })
    });

    let assertion = IdentityAssertion::new("simulated-oidc-token");
    let result = controller.run(&request, &assertion, &handle).await;
    if let Some(approver) = approver {
        approver.abort();
    }

    match format {
        ReportFormat::Md => print!("{}", report::render_outcomes_md(&result)),
        ReportFormat::Json => println!("{}", report::render_result_json(&result)?),
    }

    if result.status != PipelineStatus::Success {
        bail!("pipeline finished with status {:?}", result.status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [cloud]
        account_id = "123456789012"
        region = "eu-west-1"

        [[environment]]
        name = "staging"

        [environment.health]
        poll_interval_secs = 1
        timeout_secs = 30

        [[environment]]
        name = "production"
        required_approvals = 1
        allowed_refs = ["main"]
        approval_deadline_secs = 60

        [environment.health]
        poll_interval_secs = 1
        timeout_secs = 30
    "#;

    fn write_config() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipgate.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn test_validate_sample_config() {
        let (_dir, path) = write_config();
        cmd_validate(&path).unwrap();
    }

    #[test]
    fn test_resolve_prints_scope() {
        let naming = CloudNaming {
            partition: "aws".to_string(),
            account_id: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
        };
        cmd_resolve("acme", &naming).unwrap();
        assert!(cmd_resolve("Not/Valid", &naming).is_err());
    }

    #[tokio::test]
    async fn test_simulate_with_auto_approve_succeeds() {
        let (_dir, path) = write_config();
        cmd_simulate(
            &path,
            "acme",
            "sha256:abc123",
            "main",
            vec![],
            true,
            ReportFormat::Md,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_simulate_rejects_disallowed_ref() {
        let (_dir, path) = write_config();
        let err = cmd_simulate(
            &path,
            "acme",
            "sha256:abc123",
            "feature/x",
            vec!["production".to_string()],
            true,
            ReportFormat::Json,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed"));
    }
}
