use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tradelink::connector::SyncRegistry;
use tradelink::domain::{SyncOptions, SyncResult};
use tradelink::suppliers::ALL_SUPPLIERS;
use tradelink::util::db::Db;
use tradelink::util::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sync", version, about = "Supplier sync admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run a sync for one supplier, or all of them
    Run {
        /// Supplier id (see `sync suppliers`)
        #[arg(long, conflicts_with = "all")]
        supplier: Option<String>,
        /// Sync every registered supplier sequentially
        #[arg(long, default_value_t = false)]
        all: bool,
        /// Cap the number of records fetched
        #[arg(long)]
        limit: Option<usize>,
        /// Classify and report without persisting anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Override the generated session name
        #[arg(long)]
        session_name: Option<String>,
    },
    /// List suppliers with their current status
    Suppliers,
    /// Show recent sync sessions
    Sessions {
        /// Restrict to one supplier
        #[arg(long)]
        supplier: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print row counts for the sync tables
    DbCounts,
    /// Apply pending SQL migrations
    Migrate,
}

const MAX_ERRORS_SHOWN: usize = 5;

fn print_result(r: &SyncResult) {
    let tag = if r.success { "ok" } else { "FAILED" };
    println!(
        "{:<12} {}  added={} updated={} unchanged={} errors={} warnings={}{}{}",
        r.supplier_id,
        tag,
        r.added,
        r.updated,
        r.unchanged,
        r.errors.len(),
        r.warnings.len(),
        if r.dry_run { "  [dry-run]" } else { "" },
        r.session_id
            .map(|id| format!("  session={id}"))
            .unwrap_or_default(),
    );
    if let Some(msg) = &r.message {
        println!("  note: {msg}");
    }
    for e in r.errors.iter().take(MAX_ERRORS_SHOWN) {
        println!("  error: {e}");
    }
    if r.errors.len() > MAX_ERRORS_SHOWN {
        println!("  ... and {} more errors", r.errors.len() - MAX_ERRORS_SHOWN);
    }
}

async fn connect() -> Result<Db> {
    let database_url = env::db_url()?;
    let max_connections = env::env_parse("DB_MAX_CONNECTIONS", 5u32);
    Db::connect(&database_url, max_connections).await
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            supplier,
            all,
            limit,
            dry_run,
            session_name,
        } => {
            let targets: Vec<String> = if all {
                ALL_SUPPLIERS.iter().map(|s| s.to_string()).collect()
            } else {
                match supplier {
                    Some(s) => vec![s],
                    None => bail!("pass --supplier <id> or --all"),
                }
            };

            let db = connect().await?;
            let registry = SyncRegistry::from_db(db)?;
            let options = SyncOptions {
                limit,
                dry_run,
                session_name,
            };

            let mut failed = false;
            for id in &targets {
                let Some(connector) = registry.get(id) else {
                    bail!("unknown supplier '{id}'; known: {}", ALL_SUPPLIERS.join(", "));
                };
                info!(supplier = %id, dry_run, "starting sync");
                let result = connector.sync_products(options.clone()).await?;
                print_result(&result);
                failed |= !result.success;
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Suppliers => {
            let db = connect().await?;
            let registry = SyncRegistry::from_db(db)?;
            let known = registry.suppliers().list().await?;
            for connector in registry.all() {
                let info = connector.supplier_info();
                match known.iter().find(|s| s.id == info.id) {
                    Some(s) => println!(
                        "{:<12} {:<24} status={:<8} last_sync={}",
                        s.id,
                        s.name,
                        s.status.as_str(),
                        s.last_sync
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string()),
                    ),
                    None => println!("{:<12} {:<24} status=idle     last_sync=never", info.id, info.name),
                }
            }
        }
        Commands::Sessions { supplier, limit } => {
            let db = connect().await?;
            let registry = SyncRegistry::from_db(db)?;
            let sessions = registry
                .sessions()
                .recent(supplier.as_deref(), limit)
                .await?;
            for s in sessions {
                println!(
                    "#{:<6} {:<12} {:<10} started={} added={} updated={} unchanged={} errors={}{}",
                    s.id,
                    s.supplier_id,
                    s.outcome.as_str(),
                    s.started_at.to_rfc3339(),
                    s.added,
                    s.updated,
                    s.unchanged,
                    s.errors.len(),
                    if s.dry_run { "  [dry-run]" } else { "" },
                );
            }
        }
        Commands::DbCounts => {
            let db = connect().await?;
            for table in ["suppliers", "sync_sessions", "products"] {
                let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .persistent(false)
                    .fetch_one(&db.pool)
                    .await?;
                println!("{table:<16} {count}");
            }
        }
        Commands::Migrate => {
            let db = connect().await?;
            Db::run_migrations(&db.pool).await?;
            println!("migrations applied");
        }
    }
    Ok(())
}
