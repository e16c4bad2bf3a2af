//! Operator CLI for day-to-day archival maintenance (spec.md §6):
//! `archive`, `cleanup`, `delete`, `retrieve`, `stats`, `validate` over
//! the audit event store. Built the way `crates/deploy/src/main.rs`
//! builds its `Cli`/`Commands` derive tree, dispatching to one async
//! function per subcommand and mapping errors to process exit codes.

use audit_core::config::Config;
use audit_core::error::ErrorCode;
use audit_core::gdpr::GdprEngine;
use audit_core::integrity::IntegrityVerifier;
use audit_core::logging;
use audit_core::model::DataClassification;
use audit_core::pseudonym::PseudonymRegistry;
use audit_core::repository::{AuditRepository, EventFilter};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "archival-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Archive, retrieve, and validate audit events")]
#[command(long_about = "
Operator tool for the audit event store's archival lifecycle.

Examples:
  archival-cli archive --classification phi --older-than-days 30
  archival-cli retrieve --principal u-42 --format json
  archival-cli stats
  archival-cli validate --principal u-42
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory (overrides AUDIT_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, global = true, default_value = "table")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark matching events as archived
    Archive {
        /// Data classification to scope the sweep to
        #[arg(long)]
        classification: Option<String>,

        /// Only archive events older than this many days
        #[arg(long)]
        older_than_days: Option<i64>,
    },

    /// Permanently delete already-archived events past a cutoff
    Cleanup {
        /// Data classification to scope the sweep to
        #[arg(long)]
        classification: Option<String>,

        /// Delete events archived and older than this many days
        #[arg(long)]
        older_than_days: i64,

        /// Show what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete events for a specific principal
    Delete {
        /// Principal whose events should be removed
        #[arg(long)]
        principal: String,

        /// Operator requesting the deletion, recorded on the audit trail
        #[arg(long)]
        requested_by: String,

        /// Preserve compliance-critical events (pseudonymized) instead of deleting them
        #[arg(long, default_value_t = true)]
        preserve_compliance_audits: bool,
    },

    /// Retrieve events matching a filter
    Retrieve {
        /// Principal to filter by
        #[arg(long)]
        principal: Option<String>,

        /// Organization to filter by
        #[arg(long)]
        organization: Option<String>,

        /// Data classification to filter by
        #[arg(long)]
        classification: Option<String>,

        /// Maximum rows to return
        #[arg(long, default_value_t = 100)]
        limit: i64,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Show aggregate counts over the event store
    Stats {
        /// Data classification to scope the count to
        #[arg(long)]
        classification: Option<String>,
    },

    /// Recompute and compare hashes over matching events
    Validate {
        /// Principal to scope the verification to
        #[arg(long)]
        principal: Option<String>,

        /// Operator performing the verification, recorded on each result
        #[arg(long, default_value = "archival-cli")]
        verified_by: String,

        /// Rows fetched per verification batch
        #[arg(long, default_value_t = 500)]
        batch_size: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Some(dir) = &cli.config_dir {
        std::env::set_var("AUDIT_CONFIG_DIR", dir);
    }

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
        Ok(()) => {
            println!("{}", "done".green().bold());
        }
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

fn parse_classification(raw: &str) -> audit_core::error::Result<DataClassification> {
    match raw.to_lowercase().as_str() {
        "public" => Ok(DataClassification::Public),
        "internal" => Ok(DataClassification::Internal),
        "confidential" => Ok(DataClassification::Confidential),
        "phi" => Ok(DataClassification::Phi),
        other => Err(audit_core::error::Error::validation(format!(
            "unknown data classification: {other}"
        ))),
    }
}

async fn connect(config: &audit_core::config::Config) -> audit_core::error::Result<Arc<AuditRepository>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await?;
    Ok(Arc::new(AuditRepository::new(pool)))
}

async fn execute(cli: Cli, config: audit_core::config::Config) -> audit_core::error::Result<()> {
    let repository = connect(&config).await?;

    match cli.command {
        Commands::Archive { classification, older_than_days } => {
            let filter = EventFilter {
                data_classification: classification.as_deref().map(parse_classification).transpose()?,
                until: older_than_days.map(|d| Utc::now() - chrono::Duration::days(d)),
                archived_only: Some(false),
                ..Default::default()
            };
            let archived = repository.archive_events(&filter).await?;
            println!("{} events archived: {archived}", "✔".green());
            Ok(())
        }

        Commands::Cleanup { classification, older_than_days, dry_run } => {
            let filter = EventFilter {
                data_classification: classification.as_deref().map(parse_classification).transpose()?,
                until: Some(Utc::now() - chrono::Duration::days(older_than_days)),
                archived_only: Some(true),
                ..Default::default()
            };

            if dry_run {
                let matching = repository.find_events(&filter, i64::MAX, 0).await?;
                println!("{} would delete {} events (dry run)", "i".blue(), matching.len());
                return Ok(());
            }

            let deleted = repository.delete_events(&filter).await?;
            println!("{} events deleted: {deleted}", "✔".green());
            Ok(())
        }

        Commands::Delete { principal, requested_by, preserve_compliance_audits } => {
            let pseudonyms = Arc::new(PseudonymRegistry::new(
                repository.pool().clone(),
                audit_core::pseudonym::load_salt_from_env()?,
                None,
            ));
            let engine = GdprEngine::new(repository.clone(), pseudonyms);
            let result = engine.erase(&principal, &requested_by, preserve_compliance_audits).await?;
            println!(
                "{} records deleted: {}, compliance records preserved: {}",
                "✔".green(),
                result.records_deleted,
                result.compliance_records_preserved
            );
            Ok(())
        }

        Commands::Retrieve { principal, organization, classification, limit, offset } => {
            let filter = EventFilter {
                principal_id: principal,
                organization_id: organization,
                data_classification: classification.as_deref().map(parse_classification).transpose()?,
                ..Default::default()
            };
            let events = repository.find_events(&filter, limit, offset).await?;
            print_events(&events, &cli.format)?;
            Ok(())
        }

        Commands::Stats { classification } => {
            let filter = EventFilter {
                data_classification: classification.as_deref().map(parse_classification).transpose()?,
                ..Default::default()
            };
            let events = repository.find_events(&filter, i64::MAX, 0).await?;
            print_stats(&events, &cli.format)?;
            Ok(())
        }

        Commands::Validate { principal, verified_by, batch_size } => {
            let verifier = IntegrityVerifier::new(repository.clone());
            let filter = EventFilter { principal_id: principal, ..Default::default() };
            let summary = verifier.sweep(&filter, &verified_by, batch_size).await?;
            print_sweep_summary(&summary, &cli.format)?;
            if summary.mismatched > 0 {
                process::exit(1);
            }
            Ok(())
        }
    }
}

fn print_events(events: &[audit_core::model::AuditEvent], format: &str) -> audit_core::error::Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(events)?);
        }
        _ => {
            println!("{:<36} {:<24} {:<10} {:<30}", "id".bold(), "timestamp", "status", "action");
            println!("{}", "-".repeat(100));
            for event in events {
                println!(
                    "{:<36} {:<24} {:<10} {:<30}",
                    event.id,
                    event.timestamp.to_rfc3339(),
                    format!("{:?}", event.status),
                    event.action,
                );
            }
        }
    }
    Ok(())
}

fn print_stats(events: &[audit_core::model::AuditEvent], format: &str) -> audit_core::error::Result<()> {
    let total = events.len();
    let archived = events.iter().filter(|e| e.archived_at.is_some()).count();
    let by_classification = classification_counts(events);

    match format {
        "json" => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "total": total,
                    "archived": archived,
                    "byClassification": by_classification,
                }))?
            );
        }
        _ => {
            println!("{} {total}", "total events:".bold());
            println!("{} {archived}", "archived:".bold());
            for (classification, count) in &by_classification {
                println!("  {classification}: {count}");
            }
        }
    }
    Ok(())
}

fn classification_counts(events: &[audit_core::model::AuditEvent]) -> Vec<(String, usize)> {
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for event in events {
        *counts.entry(format!("{:?}", event.data_classification)).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

fn print_sweep_summary(summary: &audit_core::integrity::SweepSummary, format: &str) -> audit_core::error::Result<()> {
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
