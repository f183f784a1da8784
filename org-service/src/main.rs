use std::sync::Arc;

use org_service::{
    config::OrgServiceConfig,
    db,
    services::{CasbinPolicyEngine, ClosureReport, OrgCore, PgOrgStore},
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use uuid::Uuid;

enum Command {
    Migrate,
    VerifyClosure(Uuid),
    RebuildClosure(Uuid),
}

fn parse_command(args: &[String]) -> Result<Command, AppError> {
    let tenant = |arg: Option<&String>| -> Result<Uuid, AppError> {
        let raw = arg.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("tenant id required")))?;
        Uuid::parse_str(raw)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("invalid tenant id '{}': {}", raw, e)))
    };

    match args.first().map(String::as_str) {
        None | Some("migrate") => Ok(Command::Migrate),
        Some("verify-closure") => Ok(Command::VerifyClosure(tenant(args.get(1))?)),
        Some("rebuild-closure") => Ok(Command::RebuildClosure(tenant(args.get(1))?)),
        Some(other) => Err(AppError::BadRequest(anyhow::anyhow!(
            "unknown command '{}'; expected migrate, verify-closure <tenant> or rebuild-closure <tenant>",
            other
        ))),
    }
}

fn print_report(report: &ClosureReport) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    // Load configuration - fail fast if invalid
    let config = OrgServiceConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting org service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let engine = CasbinPolicyEngine::in_memory(config.policy.model_path.as_deref()).await?;
    let core = OrgCore::new(Arc::new(PgOrgStore::new(pool)), Arc::new(engine));
    core.health_check().await?;

    match command {
        Command::Migrate => {
            tracing::info!("Database is up to date");
        }
        Command::VerifyClosure(tenant_id) => {
            let report = core.closure.verify(tenant_id).await?;
            print_report(&report)?;
            if !report.is_consistent() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "closure index for tenant {} has {} missing and {} extra rows",
                    tenant_id,
                    report.missing.len(),
                    report.extra.len()
                )));
            }
        }
        Command::RebuildClosure(tenant_id) => {
            let report = core.closure.rebuild(tenant_id).await?;
            print_report(&report)?;
        }
    }

    Ok(())
}
