//! Database maintenance CLI (spec.md §6): `rollback`, `seed-policies`,
//! `seed-presets`, `verify`, `verify-compliance` against the audit
//! schema. Mirrors `crates/deploy/src/commands/database.rs`'s
//! confirm-before-destructive-operation pattern and
//! `crates/deploy/src/commands/health.rs`'s colored/table-or-json
//! result rendering.

use audit_core::config::Config;
use audit_core::error::ErrorCode;
use audit_core::integrity::IntegrityVerifier;
use audit_core::logging;
use audit_core::model::{DataClassification, RetentionPolicy};
use audit_core::repository::AuditRepository;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "audit-db")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Audit schema and retention-policy maintenance")]
#[command(long_about = "
Operator tool for the audit schema's maintenance surface: seeding
retention policies, verifying stored data, and rolling back the schema.

Examples:
  audit-db seed-presets
  audit-db verify
  audit-db verify-compliance
  audit-db rollback --force
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (table, json)
    #[arg(short, long, global = true, default_value = "table")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop the audit schema's tables (DANGEROUS)
    Rollback {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Load retention policies from a JSON file
    SeedPolicies {
        /// Path to a JSON array of retention policy objects
        #[arg(long)]
        file: String,
    },

    /// Seed the built-in retention policy presets, one per data classification
    SeedPresets,

    /// Recompute and compare hashes over the entire event store
    Verify {
        /// Rows fetched per verification batch
        #[arg(long, default_value_t = 500)]
        batch_size: i64,
    },

    /// Check every active retention policy against its day-ordering invariant
    VerifyCompliance,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} failed to load configuration: {e}", "error:".red().bold());
            process::exit(2);
        }
    };

    if let Err(e) = config.validate(&config.environment) {
        eprintln!("{} configuration invalid: {e}", "error:".red().bold());
        process::exit(2);
    }

    logging::init(&config.logging, None);

    let result = tokio::runtime::Runtime::new()
        .expect("failed to start tokio runtime")
        .block_on(execute(cli, config));

    match result {
        Ok(()) => println!("{}", "done".green().bold()),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(e: &audit_core::error::Error) -> i32 {
    match e.code {
        ErrorCode::ConfigValidation | ErrorCode::ConfigEncryption => 2,
        _ => 1,
    }
}

fn preset_policies() -> Vec<RetentionPolicy> {
    let now = Utc::now();
    let preset = |name: &str, classification: DataClassification, retention, archive, delete| RetentionPolicy {
        policy_name: name.to_string(),
        data_classification: classification,
        retention_days: retention,
        archive_after_days: archive,
        delete_after_days: delete,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    vec![
        preset("public-default", DataClassification::Public, 365, Some(90), Some(365)),
        preset("internal-default", DataClassification::Internal, 730, Some(180), Some(730)),
        preset("confidential-default", DataClassification::Confidential, 1825, Some(365), Some(1825)),
        preset("phi-default", DataClassification::Phi, 2555, Some(30), Some(90)),
    ]
}

async fn connect(config: &audit_core::config::Config) -> audit_core::error::Result<Arc<AuditRepository>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await?;
    Ok(Arc::new(AuditRepository::new(pool)))
}

async fn execute(cli: Cli, config: audit_core::config::Config) -> audit_core::error::Result<()> {
    match cli.command {
        Commands::Rollback { force } => {
            if !force
                && !Confirm::new()
                    .with_prompt("This drops audit_log, audit_integrity_log, and audit_retention_policy. Continue?")
                    .interact()
                    .map_err(|e| audit_core::error::Error::internal(format!("prompt failed: {e}")))?
            {
                println!("{}", "rollback cancelled".yellow());
                return Ok(());
            }

            let repository = connect(&config).await?;
            rollback_schema(&repository).await?;
            println!("{}", "audit schema dropped".yellow().bold());
            Ok(())
        }

        Commands::SeedPolicies { file } => {
            let repository = connect(&config).await?;
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| audit_core::error::Error::validation(format!("cannot read {file}: {e}")))?;
            let policies: Vec<RetentionPolicy> = serde_json::from_str(&raw)?;
            seed(&repository, policies, &cli.format).await
        }

        Commands::SeedPresets => {
            let repository = connect(&config).await?;
            seed(&repository, preset_policies(), &cli.format).await
        }

        Commands::Verify { batch_size } => {
            let repository = connect(&config).await?;
            let verifier = IntegrityVerifier::new(repository);
            let summary = verifier
                .sweep(&audit_core::repository::EventFilter::default(), "audit-db", batch_size)
                .await?;
            print_sweep(&summary, &cli.format)?;
            if summary.mismatched > 0 {
                process::exit(1);
            }
            Ok(())
        }

        Commands::VerifyCompliance => {
            let repository = connect(&config).await?;
            let policies = repository.active_retention_policies().await?;
            let violations: Vec<&RetentionPolicy> = policies.iter().filter(|p| !p.invariant_holds()).collect();
            print_compliance(&policies, &violations, &cli.format)?;
            if !violations.is_empty() {
                return Err(audit_core::error::Error::config_validation(format!(
                    "{} retention polic{} violate archiveAfterDays <= deleteAfterDays <= retentionDays",
                    violations.len(),
                    if violations.len() == 1 { "y" } else { "ies" }
                )));
            }
            Ok(())
        }
    }
}

async fn rollback_schema(repository: &AuditRepository) -> audit_core::error::Result<()> {
    for table in ["audit_integrity_log", "audit_retention_policy", "audit_log"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(repository.pool())
            .await?;
    }
    Ok(())
}

async fn seed(repository: &AuditRepository, policies: Vec<RetentionPolicy>, format: &str) -> audit_core::error::Result<()> {
    let mut seeded = Vec::with_capacity(policies.len());
    for policy in policies {
        if !policy.invariant_holds() {
            return Err(audit_core::error::Error::config_validation(format!(
                "policy {} violates archiveAfterDays <= deleteAfterDays <= retentionDays",
                policy.policy_name
            )));
        }
        repository.upsert_retention_policy(&policy).await?;
        seeded.push(policy.policy_name);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&seeded)?),
        _ => {
            println!("{} {} polic{} seeded", "✔".green(), seeded.len(), if seeded.len() == 1 { "y" } else { "ies" });
            for name in &seeded {
                println!("  {name}");
            }
        }
    }
    Ok(())
}

fn print_sweep(summary: &audit_core::integrity::SweepSummary, format: &str) -> audit_core::error::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(summary)?),
        _ => {
            println!("{}", "integrity sweep results".blue().bold());
            println!("checked:      {}", summary.checked);
            println!("ok:           {}", summary.ok.to_string().green());
            println!("mismatched:   {}", summary.mismatched.to_string().red());
            println!("missing hash: {}", summary.missing_hash.to_string().yellow());
        }
    }
    Ok(())
}

fn print_compliance(policies: &[RetentionPolicy], violations: &[&RetentionPolicy], format: &str) -> audit_core::error::Result<()> {
    match format {
        "json" => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "policiesChecked": policies.len(),
                    "violations": violations.iter().map(|p| &p.policy_name).collect::<Vec<_>>(),
                }))?
            );
        }
        _ => {
            println!("{} {} active polic{} checked", "i".blue(), policies.len(), if policies.len() == 1 { "y" } else { "ies" });
            if violations.is_empty() {
                println!("{}", "all retention policies satisfy their day-ordering invariant".green());
            } else {
                println!("{}", "policies violating the invariant:".red().bold());
                for policy in violations {
                    println!("  {}", policy.policy_name.red());
                }
            }
        }
    }
    Ok(())
}
