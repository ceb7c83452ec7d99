use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde::Serialize;
use stockledger::{
    common::ledger_now,
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{warehouse, TransactionType},
    events::RefreshScope,
    services::{
        adjustment_writer::{ResetItem, ResetOutcome},
        ledger::NewTransaction,
        InventoryEngine,
    },
    spawn_event_processor,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize(cli.database_url.clone()).await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Warehouse(command) => handle_warehouse_command(&context, command, cli.json).await?,
        Commands::Stock(args) => handle_stock(&context, args, cli.json).await?,
        Commands::WarehouseStock(args) => handle_warehouse_stock(&context, args, cli.json).await?,
        Commands::OrgStock(args) => handle_org_stock(&context, args, cli.json).await?,
        Commands::Negative(args) => handle_negative(&context, args, cli.json).await?,
        Commands::Record(args) => handle_record(&context, args, cli.json).await?,
        Commands::Reset(args) => handle_reset(&context, args, cli.json).await?,
        Commands::Refresh(args) => handle_refresh(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "stockledger",
    about = "Inspect and correct ledger-derived stock levels",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        help = "Override the configured database URL"
    )]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Warehouse(WarehouseCommands),
    /// Stock of one part in one warehouse
    Stock(PairArgs),
    /// Every part with history in a warehouse
    WarehouseStock(WarehouseArgs),
    /// Stock across all warehouses of an organization
    OrgStock(OrganizationArgs),
    /// Negative balances in an organization
    Negative(OrganizationArgs),
    /// Append an ordinary ledger transaction
    Record(RecordArgs),
    /// Set a part to an absolute quantity
    Reset(ResetArgs),
    /// Rebuild the derived stock cache
    Refresh(RefreshArgs),
}

#[derive(Subcommand)]
enum WarehouseCommands {
    /// Register a warehouse under an organization
    Add(WarehouseAddArgs),
}

#[derive(Args)]
struct WarehouseAddArgs {
    #[arg(long)]
    organization: Uuid,
    #[arg(long)]
    name: String,
    #[arg(long, help = "Use a fixed id instead of a random one")]
    id: Option<Uuid>,
}

#[derive(Args)]
struct PairArgs {
    #[arg(long)]
    warehouse: Uuid,
    #[arg(long)]
    part: Uuid,
    #[arg(long, help = "RFC 3339 instant; defaults to now")]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct WarehouseArgs {
    #[arg(long)]
    warehouse: Uuid,
    #[arg(long, help = "RFC 3339 instant; defaults to now")]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct OrganizationArgs {
    #[arg(long)]
    organization: Uuid,
    #[arg(long, help = "RFC 3339 instant; defaults to now")]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long = "type", help = "transfer, consumption, receipt, adjustment, return or stocktake")]
    transaction_type: TransactionType,
    #[arg(long)]
    part: Uuid,
    #[arg(long)]
    from: Option<Uuid>,
    #[arg(long)]
    to: Option<Uuid>,
    #[arg(long)]
    quantity: Decimal,
    #[arg(long)]
    occurred_at: Option<DateTime<Utc>>,
    #[arg(long)]
    reference: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    performed_by: Option<String>,
}

#[derive(Args)]
struct ResetArgs {
    #[arg(long)]
    warehouse: Uuid,
    #[arg(long)]
    part: Uuid,
    #[arg(long)]
    quantity: Decimal,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    performed_by: Option<String>,
}

#[derive(Args)]
struct RefreshArgs {
    #[arg(long, conflicts_with = "organization")]
    warehouse: Option<Uuid>,
    #[arg(long)]
    organization: Option<Uuid>,
}

struct CliContext {
    db: Arc<DbPool>,
    engine: InventoryEngine,
}

impl CliContext {
    async fn initialize(database_url: Option<String>) -> Result<Self> {
        let mut config: AppConfig =
            config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);
        if let Some(url) = database_url {
            config.database_url = url;
        }

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_sender, _events) = spawn_event_processor(config.event_channel_capacity);
        let engine = InventoryEngine::from_config(db.clone(), event_sender, &config);

        Ok(Self { db, engine })
    }
}

async fn handle_warehouse_command(
    context: &CliContext,
    command: WarehouseCommands,
    json: bool,
) -> Result<()> {
    match command {
        WarehouseCommands::Add(args) => {
            let saved = warehouse::ActiveModel {
                id: Set(args.id.unwrap_or_else(Uuid::new_v4)),
                organization_id: Set(args.organization),
                name: Set(args.name),
                created_at: Set(ledger_now()),
            }
            .insert(context.db.as_ref())
            .await
            .context("failed to create warehouse")?;

            if json {
                print_json(&saved)?;
            } else {
                println!(
                    "Warehouse {} ({}) added to organization {}",
                    saved.name, saved.id, saved.organization_id
                );
            }
        }
    }
    Ok(())
}

async fn handle_stock(context: &CliContext, args: PairArgs, json: bool) -> Result<()> {
    let level = context
        .engine
        .calculator
        .compute_stock(args.warehouse, args.part, args.as_of)
        .await
        .context("failed to compute stock")?;

    if json {
        print_json(&level)?;
    } else {
        println!(
            "{} @ {}: {} (as of {})",
            level.part_id, level.warehouse_id, level.quantity, level.as_of
        );
    }
    Ok(())
}

async fn handle_warehouse_stock(context: &CliContext, args: WarehouseArgs, json: bool) -> Result<()> {
    let stock = context
        .engine
        .aggregator
        .compute_warehouse_stock(args.warehouse, args.as_of)
        .await
        .context("failed to compute warehouse stock")?;

    if json {
        print_json(&stock)?;
    } else if stock.is_empty() {
        println!("No stock history for warehouse {}", args.warehouse);
    } else {
        for (part_id, quantity) in &stock {
            println!("- {} • {}", part_id, quantity);
        }
    }
    Ok(())
}

async fn handle_org_stock(context: &CliContext, args: OrganizationArgs, json: bool) -> Result<()> {
    let stock = context
        .engine
        .aggregator
        .compute_organization_stock(args.organization, args.as_of)
        .await
        .context("failed to compute organization stock")?;

    if json {
        print_json(&stock)?;
    } else {
        for (warehouse_id, parts) in &stock {
            println!("Warehouse {} ({} parts)", warehouse_id, parts.len());
            for (part_id, quantity) in parts {
                println!("  - {} • {}", part_id, quantity);
            }
        }
    }
    Ok(())
}

async fn handle_negative(context: &CliContext, args: OrganizationArgs, json: bool) -> Result<()> {
    let levels = context
        .engine
        .aggregator
        .negative_stock(args.organization, args.as_of)
        .await
        .context("failed to scan for negative stock")?;

    if json {
        print_json(&levels)?;
    } else if levels.is_empty() {
        println!("No negative stock in organization {}", args.organization);
    } else {
        for level in &levels {
            println!(
                "- {} @ {}: {}",
                level.part_id, level.warehouse_id, level.quantity
            );
        }
    }
    Ok(())
}

async fn handle_record(context: &CliContext, args: RecordArgs, json: bool) -> Result<()> {
    let new = NewTransaction {
        part_id: args.part,
        from_warehouse_id: args.from,
        to_warehouse_id: args.to,
        quantity: args.quantity,
        transaction_type: args.transaction_type,
        occurred_at: args.occurred_at,
        performed_by: args.performed_by,
        reference: args.reference,
        notes: args.notes,
    };

    let saved = context
        .engine
        .ledger
        .record_transaction(new)
        .await
        .context("failed to record transaction")?;

    if json {
        print_json(&saved)?;
    } else {
        println!(
            "Recorded {} {} of {} (id {})",
            saved.transaction_type, saved.quantity, saved.part_id, saved.id
        );
    }
    Ok(())
}

async fn handle_reset(context: &CliContext, args: ResetArgs, json: bool) -> Result<()> {
    let item = ResetItem {
        part_id: args.part,
        new_quantity: args.quantity,
        reason: args.reason,
        notes: args.notes,
    };

    let outcomes = context
        .engine
        .adjustments
        .apply_reset(args.warehouse, vec![item], args.performed_by)
        .await
        .context("failed to apply reset")?;

    if json {
        print_json(&outcomes)?;
    } else {
        outcomes.iter().for_each(render_outcome);
    }
    Ok(())
}

async fn handle_refresh(context: &CliContext, args: RefreshArgs, json: bool) -> Result<()> {
    let scope = match (args.warehouse, args.organization) {
        (Some(warehouse_id), None) => RefreshScope::Warehouse(warehouse_id),
        (None, Some(organization_id)) => RefreshScope::Organization(organization_id),
        _ => return Err(anyhow!("pass exactly one of --warehouse or --organization")),
    };

    let report = context
        .engine
        .cache
        .refresh(scope)
        .await
        .context("failed to refresh derived stock")?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Refreshed {}: {} rows at {}",
            report.scope, report.pairs_written, report.computed_at
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_outcome(outcome: &ResetOutcome) {
    match outcome.adjustment_id {
        Some(id) => println!(
            "- {} • {} -> {} (delta {}) • adjustment {}",
            outcome.part_id, outcome.previous, outcome.new, outcome.delta, id
        ),
        None => println!(
            "- {} • already at {}, nothing written",
            outcome.part_id, outcome.new
        ),
    }
}
