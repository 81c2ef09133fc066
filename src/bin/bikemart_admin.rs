use anyhow::{Context, Result, anyhow};
use bikemart::consistency::{
    AuditReport, AuditScope, BikeSale, InvestmentAction, InvestmentChange, RepairReport,
    RepairRequest,
};
use bikemart::model::{Bike, Partner, ProfitDistribution, Review};
use bikemart::{Actor, AdminService, EngineConfig, InMemoryDocumentStore, StoreSnapshot};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bikemart-admin")]
#[command(about = "Audit and repair cross-collection consistency of a bikemart snapshot")]
struct Cli {
    /// JSON engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity recorded on repair writes
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report every inconsistency without writing
    Audit {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long, default_value = "all")]
        scope: AuditScope,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Repair inconsistencies and write the snapshot back
    Repair {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long, default_value = "all")]
        scope: AuditScope,
        #[arg(long)]
        dry_run: bool,
        /// Write the repaired snapshot here instead of over the input
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a small sample snapshot that carries a few inconsistencies
    Demo {
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(actor) = cli.actor {
        config.default_actor = actor;
    }

    match cli.command {
        Command::Audit {
            snapshot,
            scope,
            json,
        } => {
            let path = snapshot_path(snapshot, &config)?;
            let service = open_service(&path, &config)?;
            let report = service
                .validate_data_consistency(scope)
                .await
                .map_err(|err| anyhow!("audit failed: {err}"))?;
            print_audit(&report, json)
        }
        Command::Repair {
            snapshot,
            scope,
            dry_run,
            out,
        } => {
            let path = snapshot_path(snapshot, &config)?;
            let service = open_service(&path, &config)?;
            let mut request = RepairRequest::auto(scope);
            request.dry_run = dry_run;
            let report = service
                .fix_data_inconsistencies(&request)
                .await
                .map_err(|err| anyhow!("repair failed: {err}"))?;
            print_repair(&report)?;

            if !dry_run {
                let target = out.unwrap_or(path);
                service
                    .store()
                    .export_snapshot()
                    .await
                    .save(&target)
                    .with_context(|| format!("Failed to write snapshot '{}'", target.display()))?;
                info!(path = %target.display(), "snapshot written");
            }
            Ok(())
        }
        Command::Demo { out } => write_demo(&out, &config).await,
    }
}

fn snapshot_path(explicit: Option<PathBuf>, config: &EngineConfig) -> Result<PathBuf> {
    explicit
        .or_else(|| config.snapshot_path.clone())
        .ok_or_else(|| anyhow!("no snapshot given, pass --snapshot or set snapshotPath"))
}

fn open_service(path: &Path, config: &EngineConfig) -> Result<AdminService<InMemoryDocumentStore>> {
    let snapshot = StoreSnapshot::load(path)
        .with_context(|| format!("Failed to load snapshot '{}'", path.display()))?;
    info!(
        path = %path.display(),
        documents = snapshot.documents.len(),
        "snapshot loaded"
    );
    Ok(AdminService::new(
        InMemoryDocumentStore::from_snapshot(snapshot),
        config,
    ))
}

fn print_audit(report: &AuditReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "Scanned {} bikes, {} partners, {} sell records, {} reviews",
        report.scanned.bikes,
        report.scanned.partners,
        report.scanned.sell_records,
        report.scanned.reviews
    );
    if report.is_consistent() {
        println!("No inconsistencies found ({})", report.scope);
        return Ok(());
    }
    println!("{} inconsistencies:", report.count);
    for item in &report.inconsistencies {
        let record = item.record();
        let expected = record.expected.map(|value| value.to_string()).unwrap_or_default();
        let actual = record.actual.map(|value| value.to_string()).unwrap_or_default();
        println!(
            "  {:<34} {:<34} {} (expected {} actual {})",
            record.kind.as_str(),
            record.subject_id,
            record.issue,
            expected,
            actual
        );
    }
    Ok(())
}

fn print_repair(report: &RepairReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    println!(
        "fixed={} failed={} skipped={}",
        report.fixed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    Ok(())
}

async fn write_demo(out: &Path, config: &EngineConfig) -> Result<()> {
    let store = InMemoryDocumentStore::new();
    store.seed(&Bike::new("bike-a", "Gravel 54").with_purchase_price(2000.0)).await?;
    store.seed(&Bike::new("bike-b", "City Step-Through")).await?;
    store.seed(&Partner::new("partner-p", "Pat Investor")).await?;

    let service = AdminService::new(store, config).acting_as(Actor::new("demo"));
    service
        .update_partner_investment(&InvestmentChange {
            partner_id: "partner-p".into(),
            bike_id: "bike-a".into(),
            amount: 500.0,
            profit_share: 25.0,
            action: InvestmentAction::Add,
        })
        .await
        .map_err(|err| anyhow!("{err}"))?;
    service
        .sell_bike(&BikeSale {
            bike_id: "bike-a".into(),
            customer_id: "customer-1".into(),
            selling_price: 2500.0,
            profit: None,
            profit_distribution: vec![ProfitDistribution::new("partner-p", 125.0)],
        })
        .await
        .map_err(|err| anyhow!("{err}"))?;
    for (id, rating) in [("review-1", 4.0), ("review-2", 5.0)] {
        service
            .record_review(&Review::new(id, "bike-b", rating))
            .await
            .map_err(|err| anyhow!("{err}"))?;
    }

    // Drift a few aggregates behind the engine's back.
    let store = service.store();
    if let Some(mut bike) = store.fetch::<Bike>("bike-b").await? {
        bike.total_reviews = 7;
        store.seed(&bike).await?;
    }
    if let Some(mut partner) = store.fetch::<Partner>("partner-p").await? {
        partner.total_investment = 450.0;
        store.seed(&partner).await?;
    }
    store.seed(&Review::new("review-3", "bike-b", 3.0)).await?;

    store
        .export_snapshot()
        .await
        .save(out)
        .with_context(|| format!("Failed to write snapshot '{}'", out.display()))?;
    println!("Demo snapshot written to {}", out.display());
    Ok(())
}
