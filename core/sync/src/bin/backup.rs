/// Backup Binary - Exports, verifies and imports Memory Ledger backups
///
/// Usage:
///   cargo run --bin backup -- [--db-path <path>] export <file>
///   cargo run --bin backup -- verify <file>
///   cargo run --bin backup -- [--db-path <path>] import <file> [--strategy merge] [--resolution old] [--dry-run]
///
/// Options:
///   --db-path: Path to SQLite store (defaults to $MEMORY_LEDGER_DB, then memory-ledger.db)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use memory_ledger_sync::{
    export_backup, import_backup, load_dataset, save_dataset, validate_backup,
    ConflictResolution, ImportOptions, ImportStrategy, SqliteStore,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(about = "Export, verify and import Memory Ledger backups")]
struct Args {
    /// Path to the SQLite store
    #[arg(long, short, env = "MEMORY_LEDGER_DB", default_value = "memory-ledger.db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the whole store to a backup file
    Export {
        output: PathBuf,
    },
    /// Check a backup file without touching the store
    Verify {
        input: PathBuf,
    },
    /// Reconcile a backup file into the store
    Import {
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = StrategyArg::Merge)]
        strategy: StrategyArg,

        /// Which side wins when IDs collide under the merge strategy
        #[arg(long, value_enum, default_value_t = ResolutionArg::Old)]
        resolution: ResolutionArg,

        /// Report what would change without saving
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Replace,
    Merge,
    Append,
}

impl From<StrategyArg> for ImportStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Replace => ImportStrategy::Replace,
            StrategyArg::Merge => ImportStrategy::Merge,
            StrategyArg::Append => ImportStrategy::Append,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResolutionArg {
    Old,
    New,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Old => ConflictResolution::Old,
            ResolutionArg::New => ConflictResolution::New,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Memory Ledger - Backup Tool v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    match args.command {
        Command::Export { output } => {
            let store = open_store(&args.db_path)?;
            let dataset = load_dataset(&store).context("Failed to load dataset")?;
            let package = export_backup(&dataset, env!("CARGO_PKG_VERSION"))?;

            let text = serde_json::to_string_pretty(&package)?;
            std::fs::write(&output, text)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            info!("Wrote {} records to {}", package.metadata.item_counts.total(), output.display());
            info!("  Checksum: {}", package.metadata.checksum);
        }
        Command::Verify { input } => {
            let text = read_backup(&input)?;
            let validation = validate_backup(&text);
            report_validation(&validation.errors, &validation.warnings);

            let Some(package) = validation.package else {
                bail!("{} is not a valid backup", input.display());
            };
            info!(
                "✓ Valid backup: {} records exported {} by v{}",
                package.metadata.item_counts.total(),
                package.metadata.export_date,
                package.metadata.app_version
            );
        }
        Command::Import {
            input,
            strategy,
            resolution,
            dry_run,
        } => {
            let text = read_backup(&input)?;
            let mut store = open_store(&args.db_path)?;
            let current = load_dataset(&store).context("Failed to load dataset")?;

            let options = ImportOptions {
                strategy: strategy.into(),
                conflict_resolution: resolution.into(),
            };
            let report = import_backup(&current, &text, options);
            report_validation(&report.validation.errors, &report.validation.warnings);

            let Some(dataset) = report.dataset else {
                bail!("{} is not a valid backup", input.display());
            };

            info!("─────────────────────────────────────────────────");
            info!("Import ({} strategy):", options.strategy);
            info!("  Conflicts:     {}", report.conflicts.len());
            info!("  Added:         {}", report.stats.added);
            info!("  Overwritten:   {}", report.stats.overwritten);
            info!("  Skipped:       {}", report.stats.skipped);
            info!("  Re-identified: {}", report.stats.reassigned);
            info!("─────────────────────────────────────────────────");

            if dry_run {
                info!("Dry run, store left unchanged");
                return Ok(());
            }

            save_dataset(&mut store, &dataset).context("Failed to save dataset")?;
            info!("✓ Store now holds {} records", dataset.item_counts().total());
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    info!("Store: {}", path.display());
    SqliteStore::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

fn read_backup(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn report_validation(errors: &[String], warnings: &[String]) {
    for error in errors {
        warn!("✗ {}", error);
    }
    for warning in warnings {
        warn!("⚠ {}", warning);
    }
}
