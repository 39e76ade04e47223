use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crm_reconcile::audit::{self, RemoteSnapshot};
use crm_reconcile::export::{write_csv, StructurePlan};
use crm_reconcile::sync::{self as remote_sync, RemoteStore, SqliteRemoteStore};
use crm_reconcile::{
    extract_audit_rows, read_grid, resolve_grid, run_import, AliasTable, AuditStatus, CancelToken,
    EngineConfig, FieldName, ImportOptions, ImportSource, RunReport, SqliteStore,
};

#[derive(Parser)]
#[command(name = "crm-reconcile")]
#[command(version, about = "Spreadsheet reconciliation for clients, BANs and subscriber lines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
struct GlobalOpts {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CRM database (overrides config)
    #[arg(long, global = true, env = "CRM_DB")]
    db: Option<PathBuf>,

    /// Remote system-of-record database (overrides config)
    #[arg(long = "remote-db", global = true, env = "CRM_REMOTE_DB")]
    remote_db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create both databases and their schema
    Init,

    /// Import clients / BANs / subscribers (dry run unless --commit)
    Import {
        file: PathBuf,

        /// Write to the database
        #[arg(long)]
        commit: bool,

        /// Also write omitted rows to this CSV
        #[arg(long)]
        omitted_csv: Option<PathBuf>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the spreadsheet and export the structure as CSV (no database)
    Plan {
        file: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },

    /// Compare line-level export against the remote system
    Audit {
        file: PathBuf,

        /// Push corrections for mismatched and missing lines
        #[arg(long)]
        sync: bool,

        /// Print the audit as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli.global)?;

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Import {
            file,
            commit,
            omitted_csv,
            json,
        } => run_import_command(&config, file, commit, omitted_csv, json),
        Commands::Plan { file, out } => run_plan(&config, file, out),
        Commands::Audit { file, sync, json } => run_audit(&config, file, sync, json),
    }
}

fn load_config(global: &GlobalOpts) -> Result<EngineConfig> {
    let mut config = match &global.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(db) = &global.db {
        config.database_path = db.clone();
    }
    if let Some(remote) = &global.remote_db {
        config.remote_database_path = remote.clone();
    }

    Ok(config)
}

fn import_options(config: &EngineConfig, dry_run: bool) -> Result<ImportOptions> {
    Ok(ImportOptions {
        aliases: config.import_aliases()?,
        dry_run,
        reference_date: config.reference_date()?,
        ..Default::default()
    })
}

fn run_init(config: &EngineConfig) -> Result<()> {
    println!("🔧 Setting up databases...");

    let store = SqliteStore::open(&config.database_path)?;
    let counts = store.counts()?;
    println!(
        "✓ CRM database ready: {} ({} clients, {} BANs, {} subscribers)",
        config.database_path.display(),
        counts.clients,
        counts.bans,
        counts.subscribers
    );

    let remote = SqliteRemoteStore::open(&config.remote_database_path)?;
    println!(
        "✓ Remote database ready: {} ({} lines)",
        config.remote_database_path.display(),
        remote.fetch_snapshot()?.len()
    );

    Ok(())
}

fn run_import_command(
    config: &EngineConfig,
    file: PathBuf,
    commit: bool,
    omitted_csv: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let dry_run = config.dry_run && !commit;
    let grid = read_grid(&file, config.sheet.as_deref())?;

    let options = ImportOptions {
        source: Some(ImportSource::from_file(&file)?),
        ..import_options(config, dry_run)?
    };

    let mut store = SqliteStore::open(&config.database_path)?;
    let report = run_import(&grid, &mut store, &options)?;

    if let Some(path) = omitted_csv {
        write_csv(&path, &report.omitted_rows)?;
        println!("✓ Omitted rows written to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report, config.max_reported_errors);
    }

    Ok(())
}

fn print_run_report(report: &RunReport, max_errors: usize) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.dry_run {
        println!("🧪 Dry run (nothing written, use --commit to save)");
    } else {
        println!("💾 Import committed");
    }
    println!("  Rows processed:       {}", report.processed);
    println!("  Omitted:              {}", report.omitted);
    println!("  New BAN rows:         {}", report.created);
    println!("  Existing BAN rows:    {}", report.updated);
    println!("  Clients created:      {}", report.clients_created);
    println!("  BANs created:         {}", report.bans_created);
    println!("  Subscribers created:  {}", report.subscribers_created);

    if report.has_errors() {
        println!("\n⚠️  {} rows failed:", report.errors.len());
        for error in report.errors.iter().take(max_errors) {
            println!("  Fila {}: {}", error.row, error.message);
        }
        if report.errors.len() > max_errors {
            println!("  ... and {} more", report.errors.len() - max_errors);
        }
    }
}

fn run_plan(config: &EngineConfig, file: PathBuf, out: PathBuf) -> Result<()> {
    let grid = read_grid(&file, config.sheet.as_deref())?;
    let rows = resolve_grid(&grid, &import_options(config, true)?)?;
    let plan = StructurePlan::from_resolved(&rows);

    for path in plan.write_csv_dir(&out)? {
        println!("✓ {}", path.display());
    }
    println!(
        "📊 {} clients, {} BANs, {} subscribers, {} omitted",
        plan.clients.len(),
        plan.bans.len(),
        plan.subscribers.len(),
        plan.omitted.len()
    );

    Ok(())
}

fn run_audit(config: &EngineConfig, file: PathBuf, sync: bool, json: bool) -> Result<()> {
    let grid = read_grid(&file, config.sheet.as_deref())?;
    let rows = extract_audit_rows(&grid, &AliasTable::audit_defaults());

    let mut remote = SqliteRemoteStore::open(&config.remote_database_path)?;
    let snapshot = RemoteSnapshot::new(remote.fetch_snapshot()?);
    let report = audit::diff(rows, &snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let s = &report.summary;
        println!("🔎 Audit: {} lines vs {} remote records", s.total, snapshot.len());
        println!("  ✅ Match:             {}", s.matching);
        println!("  ⚠️  Mismatch:          {}", s.mismatch);
        println!("  ❌ Missing in remote: {}", s.missing);

        for row in report.needs_sync() {
            match row.status {
                AuditStatus::MissingInRemote => {
                    println!("  Fila {} {}: missing in remote", row.row.row, row.row.phone)
                }
                _ => {
                    let fields: Vec<String> = row
                        .diffs
                        .iter()
                        .map(|d| format!("{} '{}' → '{}'", d.field.name(), d.remote, d.local))
                        .collect();
                    println!("  Fila {} {}: {}", row.row.row, row.row.phone, fields.join(", "));
                }
            }
        }
    }

    if sync {
        let result = remote_sync::apply(&report, &mut remote, &CancelToken::new());
        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("\n🔁 Sync: {} of {} updated, {} failed", result.updated, result.total, result.failed);
            for failure in result.errors.iter().take(config.max_reported_errors) {
                println!("  {}: {}", failure.phone, failure.message);
            }
        }
    }

    Ok(())
}
