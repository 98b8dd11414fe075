use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use triage_agents::config::{check_endpoint, TriageConfig};
use triage_agents::diagnoser::{Diagnoser, HeuristicDiagnoser, HttpDiagnoser};
use triage_agents::explain::render_explanation;
use triage_agents::knowledge::{collections, InMemoryKnowledgeStore};
use triage_agents::service::TriageService;
use triage_core::session::Session;
use triage_core::{MigrationStage, Priority, Report};

/// Support-ticket triage assistant for the commerce platform migration.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (defaults come from TRIAGE_* env vars)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for session and knowledge persistence (overrides TRIAGE_STATE_DIR)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed sample knowledge and run three demonstration batches
    Demo,
    /// Submit a JSON file of reports and run the pipeline to its resting state
    Submit {
        /// Path to a JSON array of reports
        #[arg(long)]
        file: PathBuf,
    },
    /// Print one session: status, stage trail, and explanation
    Show { session_id: String },
    /// List sessions parked in the approval queue
    Pending,
    /// Approve or reject a parked session
    Resolve {
        session_id: String,
        /// Approve the proposed action
        #[arg(long, conflicts_with = "reject")]
        approve: bool,
        /// Reject the proposed action
        #[arg(long)]
        reject: bool,
        /// Reviewer notes recorded on the session
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print aggregate triage metrics
    Metrics,
    /// List recently touched sessions, newest first
    Recent {
        /// Maximum number of sessions to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TriageConfig::from_toml_file(path)?,
        None => TriageConfig::default(),
    };
    if let Some(dir) = args.state_dir {
        config.state_dir = Some(dir);
    }

    let knowledge_path = config.state_dir.as_ref().map(|dir| dir.join("knowledge.json"));
    let knowledge = Arc::new(match &knowledge_path {
        Some(path) if path.exists() => InMemoryKnowledgeStore::load_from_file(path)?,
        _ => InMemoryKnowledgeStore::new(),
    });

    let diagnoser = pick_diagnoser(&config).await?;
    let service = TriageService::new(config, knowledge.clone(), diagnoser)?;

    match args.command {
        Command::Demo => run_demo(&service, &knowledge).await?,
        Command::Submit { file } => {
            let content = std::fs::read_to_string(&file)
                .context(format!("Failed to read {}", file.display()))?;
            let reports: Vec<Report> =
                serde_json::from_str(&content).context("Failed to parse report JSON")?;
            let session = service.submit_and_wait(reports).await?;
            print_outcome(&session);
            println!("run `triage-agents show {}` for the full explanation", session.id);
        }
        Command::Show { session_id } => show_session(&service, &session_id)?,
        Command::Pending => {
            let pending = service.pending()?;
            if pending.is_empty() {
                println!("approval queue is empty");
            }
            for entry in pending {
                println!(
                    "{}  [{}] {}  {} report(s)  since {}  {}",
                    entry.session_id,
                    entry.tier,
                    entry.action_kind,
                    entry.report_count,
                    entry.enqueued_at.format("%Y-%m-%d %H:%M UTC"),
                    entry.subject,
                );
            }
        }
        Command::Resolve {
            session_id,
            approve,
            reject,
            notes,
        } => {
            if approve == reject {
                bail!("pass exactly one of --approve or --reject");
            }
            let session = service.resolve_approval(&session_id, approve, notes).await?;
            print_outcome(&session);
        }
        Command::Metrics => {
            let m = service.metrics()?;
            println!("Sessions total:     {}", m.sessions_total);
            println!("  dispatched:       {}", m.dispatched);
            println!("  awaiting review:  {}", m.awaiting_approval);
            println!("  failed:           {}", m.failed);
            println!("  rejected:         {}", m.rejected);
            println!("Auto-fixed:         {}", m.auto_fixed);
            println!("Escalated:          {}", m.escalated);
            println!("Auto-fix rate:      {:.0}%", m.auto_fix_rate * 100.0);
            println!("Success rate:       {:.0}%", m.success_rate * 100.0);
        }
        Command::Recent { limit } => {
            for summary in service.recent(limit)? {
                println!(
                    "{}  {:<18} {:>3} report(s)  {}",
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.status.to_string(),
                    summary.report_count,
                    summary.label.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    if let Some(path) = &knowledge_path {
        knowledge.save_to_file(path)?;
    }
    Ok(())
}

/// Use the configured model endpoint when it answers, the offline
/// heuristic otherwise.
async fn pick_diagnoser(config: &TriageConfig) -> Result<Arc<dyn Diagnoser>> {
    if check_endpoint(&config.model_url).await {
        info!(url = %config.model_url, model = %config.model_name, "Model endpoint reachable");
        Ok(Arc::new(HttpDiagnoser::new(config)?))
    } else {
        info!(url = %config.model_url, "Model endpoint unreachable — using the offline heuristic diagnoser");
        Ok(Arc::new(HeuristicDiagnoser))
    }
}

fn print_outcome(session: &Session) {
    let decision = session
        .decision
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let tier = session
        .risk
        .map(|r| r.tier.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "session {} → {} (decision {decision}, risk {tier})",
        session.id, session.status
    );
}

fn show_session(service: &TriageService, session_id: &str) -> Result<()> {
    let session = service.get_session(session_id)?;

    println!("Session:  {}", session.id);
    println!("Status:   {}", session.status);
    println!("Reports:  {}", session.reports.len());
    if let Some(error) = &session.error {
        println!("Error:    {}", error.message);
    }
    for warning in &session.warnings {
        println!("Warning:  {warning}");
    }

    println!("\nStage trail:");
    for t in &session.transitions {
        let reason = t
            .reason
            .as_deref()
            .map(|r| format!("  ({r})"))
            .unwrap_or_default();
        println!("  {} → {}  {}ms{}", t.from, t.to, t.elapsed_ms, reason);
    }

    println!();
    match &session.explanation {
        Some(text) => println!("{text}"),
        // Sessions that never reached the explaining stage render live.
        None => println!("{}", render_explanation(&session)),
    }
    Ok(())
}

/// Three canned batches covering the auto-fix, approval, and escalation
/// paths, against a seeded knowledge store.
async fn run_demo(service: &TriageService, knowledge: &InMemoryKnowledgeStore) -> Result<()> {
    seed_knowledge(knowledge).await?;

    println!("== Batch 1: webhook misconfiguration (auto-fix expected) ==");
    let session = service
        .submit_and_wait(vec![
            Report::new(
                "demo-1a",
                "merchant-12",
                "Webhook callback settings rejected",
                "The webhook callback settings show an expired credential and the endpoint is not configured",
                MigrationStage::MidMigration,
                Priority::Medium,
            ),
            Report::new(
                "demo-1b",
                "merchant-12",
                "Webhook callback settings errors",
                "Expired credential in the callback settings, endpoint not configured after the update",
                MigrationStage::MidMigration,
                Priority::Medium,
            ),
        ])
        .await?;
    print_outcome(&session);

    println!("\n== Batch 2: how-to question (approval expected) ==");
    let session = service
        .submit_and_wait(vec![Report::new(
            "demo-2a",
            "merchant-3",
            "Theme builder question",
            "How do I enable custom fonts? The guide is unclear on this point",
            MigrationStage::PreMigration,
            Priority::Low,
        )])
        .await?;
    print_outcome(&session);

    println!("\n== Batch 3: post-migration gateway failures (escalation expected) ==");
    let reports: Vec<Report> = (0..51)
        .map(|i| {
            Report::new(
                format!("demo-3-{i}"),
                format!("merchant-{i}"),
                "Webhook deliveries failing",
                "Every delivery attempt returns a gateway error",
                MigrationStage::PostMigration,
                Priority::High,
            )
            .with_error_code("GW-502")
        })
        .collect();
    let session = service.submit_and_wait(reports).await?;
    print_outcome(&session);

    let pending = service.pending()?;
    if !pending.is_empty() {
        println!("\n{} session(s) awaiting review:", pending.len());
        for entry in &pending {
            println!(
                "  triage-agents resolve {} --approve   # [{}] {}",
                entry.session_id, entry.tier, entry.subject
            );
        }
    }
    Ok(())
}

async fn seed_knowledge(knowledge: &InMemoryKnowledgeStore) -> Result<()> {
    use triage_agents::knowledge::KnowledgeStore;

    if knowledge.document_count(collections::MIGRATION_DOCS) > 0 {
        return Ok(());
    }
    let seed = |source: &str| {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), source.to_string());
        metadata
    };

    knowledge
        .add(
            collections::MIGRATION_DOCS,
            "Webhook migration guide: callback settings must be re-entered after the cutover; \
             expired credentials are the most common cause of rejected deliveries",
            seed("migration-guide"),
        )
        .await?;
    knowledge
        .add(
            collections::MIGRATION_DOCS,
            "Theme builder guide: custom fonts are enabled per theme under appearance settings",
            seed("theme-docs"),
        )
        .await?;
    knowledge
        .add(
            collections::ERROR_PATTERNS,
            "GW-502 gateway errors across many merchants usually indicate a platform-side \
             regression in the delivery tier, not a merchant configuration problem",
            seed("error-catalog"),
        )
        .await?;
    info!("Seeded demo knowledge collections");
    Ok(())
}
