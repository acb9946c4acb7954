use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use rfp_intake::config::{AppConfig, ImapConfig, llm_config_from_env};
use rfp_intake::llm::{LlmProvider, create_provider};
use rfp_intake::mail::{ImapMailbox, MailSource};
use rfp_intake::model::{Proposal, ProposalStatus, Rfp, RfpStatus, Vendor};
use rfp_intake::pipeline::{IntakeProcessor, Listener, spawn_listener};
use rfp_intake::store::{Database, LibSqlBackend};
use rfp_intake::{procurement, seed};

#[derive(Parser, Debug)]
#[command(name = "rfp-intake", version, about = "AI-assisted RFPs with email proposal intake")]
struct Cli {
    /// Database path
    #[arg(long, env = "RFP_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the mailbox for vendor replies until interrupted
    Listen,
    /// Run a single mailbox poll and print the counts
    Check,
    /// Manage RFPs
    #[command(subcommand)]
    Rfp(RfpCommand),
    /// Manage vendors
    #[command(subcommand)]
    Vendor(VendorCommand),
    /// Inspect and review proposals
    #[command(subcommand)]
    Proposal(ProposalCommand),
    /// Score every proposal for an RFP with the model
    Compare { rfp_id: Uuid },
}

#[derive(Subcommand, Debug)]
enum RfpCommand {
    /// Structure a free-text request into a draft RFP
    Create {
        /// Request text; read from stdin when omitted
        text: Option<String>,
    },
    List {
        /// Only RFPs whose title contains this
        #[arg(long)]
        title: Option<String>,
    },
    Show { id: Uuid },
    /// Record that the RFP was sent to the given vendors
    Dispatch {
        id: Uuid,
        #[arg(long = "vendor", required = true)]
        vendors: Vec<Uuid>,
    },
    /// Set the lifecycle state (draft, sent, in-review, completed, cancelled)
    Status { id: Uuid, status: RfpStatus },
    Delete { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum VendorCommand {
    Add(VendorArgs),
    List,
    /// Insert the sample vendor directory
    Seed,
}

#[derive(Args, Debug)]
struct VendorArgs {
    name: String,
    email: String,
    /// Defaults to the name
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    specialization: Option<String>,
    #[arg(long)]
    address: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProposalCommand {
    List { rfp_id: Uuid },
    Show { id: Uuid },
    /// Set the review state (received, under-review, accepted, rejected)
    Status { id: Uuid, status: ProposalStatus },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let _log_guard = init_tracing(&config);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    match cli.command {
        Command::Listen => listen(config, db).await,
        Command::Check => check(config, db).await,
        Command::Rfp(cmd) => rfp_command(cmd, db.as_ref()).await,
        Command::Vendor(cmd) => vendor_command(cmd, db.as_ref()).await,
        Command::Proposal(cmd) => proposal_command(cmd, db.as_ref()).await,
        Command::Compare { rfp_id } => compare(rfp_id, db.as_ref()).await,
    }
}

/// Stderr logging, plus a daily rolling file when `RFP_LOG_DIR` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rfp-intake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn llm() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let llm_config = llm_config_from_env()?;
    Ok(create_provider(&llm_config)?)
}

fn build_listener(config: &AppConfig, db: Arc<dyn Database>) -> anyhow::Result<(Listener, ImapConfig)> {
    let Some(imap) = config.imap.clone() else {
        bail!("IMAP_HOST is not set; the proposal listener needs a mailbox");
    };
    let processor = Arc::new(IntakeProcessor::new(db, llm()?, config.intake.clone()));
    let source: Arc<dyn MailSource> = Arc::new(ImapMailbox::new(imap.clone()));
    Ok((Listener::new(source, processor), imap))
}

async fn listen(config: AppConfig, db: Arc<dyn Database>) -> anyhow::Result<()> {
    let (listener, imap) = build_listener(&config, db)?;

    eprintln!("📨 RFP Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   IMAP: {}@{}:{}/{}", imap.username, imap.host, imap.port, imap.mailbox);
    eprintln!("   Poll interval: {}s", imap.poll_interval.as_secs());
    eprintln!("   Ctrl-C to stop.\n");

    let (handle, shutdown) = spawn_listener(Arc::new(listener), imap.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    shutdown.store(true, Ordering::Relaxed);
    handle.abort();
    let _ = handle.await;
    eprintln!("Stopped.");
    Ok(())
}

async fn check(config: AppConfig, db: Arc<dyn Database>) -> anyhow::Result<()> {
    let (listener, _) = build_listener(&config, db)?;
    let summary = listener.check_once().await?;
    println!(
        "fetched {}  created {}  updated {}  skipped {}  failed {}",
        summary.fetched, summary.created, summary.updated, summary.skipped, summary.failed
    );
    Ok(())
}

async fn rfp_command(cmd: RfpCommand, db: &dyn Database) -> anyhow::Result<()> {
    match cmd {
        RfpCommand::Create { text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read request from stdin")?;
                    buf
                }
            };
            if text.trim().is_empty() {
                bail!("the request text is empty");
            }
            let rfp = procurement::create_rfp(db, llm()?.as_ref(), text.trim()).await?;
            print_rfp(&rfp);
        }
        RfpCommand::List { title } => {
            let rfps = match title {
                Some(fragment) => db.find_rfps_by_title(&fragment).await?,
                None => db.list_rfps().await?,
            };
            if rfps.is_empty() {
                println!("No RFPs.");
            }
            for rfp in rfps {
                println!(
                    "{}  {:<10}  {} {}  {}",
                    rfp.id, rfp.status, rfp.budget.amount, rfp.budget.currency, rfp.title
                );
            }
        }
        RfpCommand::Show { id } => {
            let rfp = procurement::require_rfp(db, id).await?;
            print_rfp(&rfp);
        }
        RfpCommand::Dispatch { id, vendors } => {
            let rfp = procurement::dispatch_rfp(db, id, &vendors).await?;
            println!("{} is {} ({} vendors)", rfp.title, rfp.status, rfp.sent_to_vendors.len());
        }
        RfpCommand::Status { id, status } => {
            let rfp = procurement::set_rfp_status(db, id, status).await?;
            println!("{} is {}", rfp.title, rfp.status);
        }
        RfpCommand::Delete { id } => {
            if db.delete_rfp(id).await? {
                println!("Deleted {id}");
            } else {
                bail!("RFP not found: {id}");
            }
        }
    }
    Ok(())
}

async fn vendor_command(cmd: VendorCommand, db: &dyn Database) -> anyhow::Result<()> {
    match cmd {
        VendorCommand::Add(args) => {
            let company = args.company.unwrap_or_else(|| args.name.clone());
            let mut vendor = Vendor::new(args.name, args.email, company);
            vendor.phone = args.phone;
            vendor.specialization = args.specialization;
            vendor.address = args.address;
            db.insert_vendor(&vendor).await?;
            println!("{}  {}", vendor.id, vendor.email);
        }
        VendorCommand::List => {
            for vendor in db.list_vendors().await? {
                println!(
                    "{}  {:<8}  {:<32}  {}",
                    vendor.id, vendor.status, vendor.email, vendor.name
                );
            }
        }
        VendorCommand::Seed => {
            let added = seed::seed_vendors(db).await?;
            println!("Added {added} sample vendors");
        }
    }
    Ok(())
}

async fn proposal_command(cmd: ProposalCommand, db: &dyn Database) -> anyhow::Result<()> {
    match cmd {
        ProposalCommand::List { rfp_id } => {
            procurement::require_rfp(db, rfp_id).await?;
            let pairs = procurement::proposals_with_vendors(db, rfp_id).await?;
            if pairs.is_empty() {
                println!("No proposals yet.");
            }
            for (proposal, vendor) in pairs {
                let score = proposal
                    .ai_score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}  {:<12}  {:>12} {}  score {:>3}  {}",
                    proposal.id,
                    proposal.status,
                    proposal.pricing.total_amount,
                    proposal.pricing.currency,
                    score,
                    vendor.name
                );
            }
        }
        ProposalCommand::Show { id } => {
            let proposal = procurement::require_proposal(db, id).await?;
            print_proposal(&proposal);
        }
        ProposalCommand::Status { id, status } => {
            let proposal = procurement::set_proposal_status(db, id, status).await?;
            println!("{} is {}", proposal.id, proposal.status);
        }
    }
    Ok(())
}

async fn compare(rfp_id: Uuid, db: &dyn Database) -> anyhow::Result<()> {
    let (comparison, updates) = procurement::compare_rfp(db, llm()?.as_ref(), rfp_id).await?;

    println!("{}\n", comparison.overall_recommendation);
    for score in &comparison.vendor_scores {
        let overall = score
            .overall_score
            .map(|s| format!("{s:.0}"))
            .unwrap_or_else(|| "-".into());
        println!("{overall:>4}  {}", score.vendor_name);
        for pro in &score.pros {
            println!("      + {pro}");
        }
        for con in &score.cons {
            println!("      - {con}");
        }
    }
    if !comparison.key_findings.is_empty() {
        println!("\nKey findings:");
        for finding in &comparison.key_findings {
            println!("  • {finding}");
        }
    }
    if !comparison.risk_factors.is_empty() {
        println!("\nRisks:");
        for risk in &comparison.risk_factors {
            println!("  • {risk}");
        }
    }
    println!("\nScored {} proposals", updates.len());
    Ok(())
}

fn print_rfp(rfp: &Rfp) {
    println!("{}  [{}]", rfp.title, rfp.status);
    println!("   id: {}", rfp.id);
    println!("   budget: {} {}", rfp.budget.amount, rfp.budget.currency);
    if let Some(timeline) = &rfp.delivery_timeline {
        println!("   delivery: {timeline}");
    }
    println!("   payment: {}", rfp.payment_terms);
    if let Some(warranty) = &rfp.warranty {
        println!("   warranty: {warranty}");
    }
    for req in &rfp.requirements {
        let qty = req.quantity.map(|q| format!("{q} × ")).unwrap_or_default();
        match &req.specifications {
            Some(spec) => println!("   - {qty}{} ({spec})", req.item),
            None => println!("   - {qty}{}", req.item),
        }
    }
    if !rfp.sent_to_vendors.is_empty() {
        println!("   sent to {} vendors", rfp.sent_to_vendors.len());
    }
    println!("\n{}", rfp.description);
}

fn print_proposal(proposal: &Proposal) {
    println!("{}  [{}]", proposal.id, proposal.status);
    println!("   rfp: {}", proposal.rfp_id);
    println!("   vendor: {}", proposal.vendor_id);
    println!(
        "   total: {} {}",
        proposal.pricing.total_amount, proposal.pricing.currency
    );
    for line in &proposal.pricing.breakdown {
        let price = line
            .total_price
            .or(line.unit_price)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        println!("   - {}  {price}", line.item);
    }
    if let Some(timeline) = &proposal.delivery_timeline {
        if let Some(description) = &timeline.description {
            println!("   delivery: {description}");
        } else if let (Some(value), Some(unit)) = (timeline.value, &timeline.unit) {
            println!("   delivery: {value} {unit}");
        }
    }
    if let Some(terms) = &proposal.payment_terms {
        println!("   payment: {terms}");
    }
    if let Some(warranty) = &proposal.warranty {
        println!("   warranty: {warranty}");
    }
    if let Some(score) = proposal.compliance_score {
        println!("   compliance: {score}");
    }
    if let Some(score) = proposal.ai_score {
        println!("   ai score: {score}");
    }
    if let Some(summary) = &proposal.ai_summary {
        println!("\n{summary}");
    }
    if !proposal.attachments.is_empty() {
        println!("\nAttachments:");
        for a in &proposal.attachments {
            println!("   {} ({}, {} bytes)", a.filename, a.mimetype, a.size);
        }
    }
}
