use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};

use faena_lib::config::Config;
use faena_lib::db::{self, catalog::SchemaCatalog};
use faena_lib::export::{BackupRequest, ExportFile, ExportFormat, ExportRequest};
use faena_lib::import::{ImportMode, ImportRequest};
use faena_lib::report::MutationReport;
use faena_lib::wipe::{WipeOutcome, WipeProjectRequest, WipeRequest};
use faena_lib::{http, logging, AppError, AppResult, AppState, ErrorClass};

const EXIT_FAILURE: i32 = 1;
const EXIT_VALIDATION: i32 = 2;
const EXIT_NOT_FOUND: i32 = 3;
const EXIT_CONFLICT: i32 = 4;

#[derive(Debug, Parser)]
#[command(
    name = "faena",
    about = "Export, import, backup and wipe for the construction management database",
    version
)]
struct Cli {
    /// SQLite database file. Overrides FAENA_DATABASE_PATH.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the admin HTTP API until interrupted.
    Serve,
    /// List every table with its row count.
    Tables {
        /// Emit JSON instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Print tables, views, triggers and routines as JSON.
    Schema,
    /// Export tables, or the whole database with --full-backup.
    Export {
        #[arg(long)]
        format: ExportFormat,
        #[arg(long = "table")]
        tables: Vec<String>,
        #[arg(long)]
        full_backup: bool,
        /// Include CREATE TABLE statements (sql only).
        #[arg(long)]
        structure: bool,
        /// Include views, triggers and routines (sql only).
        #[arg(long)]
        views: bool,
        /// Add human-readable label columns next to foreign keys.
        #[arg(long)]
        labels: bool,
        /// Output file. Defaults to the generated name in the current directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export every row belonging to one project.
    BackupProject {
        id: i64,
        #[arg(long)]
        format: ExportFormat,
        #[arg(long)]
        labels: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load a JSON payload (`{data: {...}}` or a JSON export).
    Import {
        file: PathBuf,
        /// Delete each table's existing rows before inserting.
        #[arg(long)]
        overwrite: bool,
        /// Roll everything back when any table fails.
        #[arg(long)]
        all_or_nothing: bool,
    },
    /// Delete every row of the given tables.
    Wipe {
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Delete every row belonging to one project.
    WipeProject {
        id: i64,
        #[arg(long)]
        confirm: Option<String>,
    },
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(EXIT_FAILURE);
        }
    };
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let log_guard = match logging::init(&config.log) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };
    config.report_warnings();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start async runtime: {err}");
            process::exit(EXIT_FAILURE);
        }
    };

    let code = match runtime.block_on(run(cli.command, &config)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            exit_code(err.class())
        }
    };
    drop(runtime);
    drop(log_guard);
    process::exit(code);
}

fn exit_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Validation => EXIT_VALIDATION,
        ErrorClass::NotFound => EXIT_NOT_FOUND,
        ErrorClass::Conflict => EXIT_CONFLICT,
        ErrorClass::Unavailable | ErrorClass::Internal => EXIT_FAILURE,
    }
}

async fn run(command: Command, config: &Config) -> AppResult<()> {
    let pool = db::open_pool(&config.database_path, config.max_connections).await?;
    let state = AppState::new(pool, config.import_mode).await?;
    let result = execute(command, &state, config).await;
    state.close().await;
    result
}

async fn execute(command: Command, state: &AppState, config: &Config) -> AppResult<()> {
    match command {
        Command::Serve => http::serve(state.clone(), config).await?,
        Command::Tables { json } => {
            let tables = state.tables().await?;
            if json {
                print_json(&tables)?;
            } else {
                println!("{:<32} {:>10}", "Table", "Rows");
                for table in &tables {
                    let count = match (table.count, &table.error) {
                        (Some(count), _) => count.to_string(),
                        (None, Some(error)) => format!("error: {error}"),
                        (None, None) => "-".to_string(),
                    };
                    println!("{:<32} {:>10}", table.name, count);
                }
            }
        }
        Command::Schema => {
            let catalog: SchemaCatalog = state.schema().await?;
            print_json(&catalog)?;
        }
        Command::Export {
            format,
            tables,
            full_backup,
            structure,
            views,
            labels,
            out,
        } => {
            let request = ExportRequest {
                format,
                tables,
                full_backup,
                include_structure: structure,
                include_views: views,
                with_labels: labels,
            };
            let file = state.export(&request).await?;
            write_file(&file, out.as_deref())?;
        }
        Command::BackupProject {
            id,
            format,
            labels,
            out,
        } => {
            let request = BackupRequest {
                format,
                with_labels: labels,
            };
            let file = state.backup_project(id, &request).await?;
            write_file(&file, out.as_deref())?;
        }
        Command::Import {
            file,
            overwrite,
            all_or_nothing,
        } => {
            let raw = std::fs::read(&file)
                .with_context(|| format!("read import payload {}", file.display()))?;
            let mut request: ImportRequest = serde_json::from_slice(&raw)?;
            request.overwrite |= overwrite;
            if all_or_nothing {
                request.mode = Some(ImportMode::AllOrNothing);
            }
            let report = state.import(&request).await?;
            print_json(&report)?;
            report_failures(&report)?;
        }
        Command::Wipe { tables, confirm } => {
            let outcome = state.wipe(&WipeRequest { tables, confirm }).await?;
            print_json(&outcome)?;
            report_failures(&outcome.report)?;
        }
        Command::WipeProject { id, confirm } => {
            let outcome: WipeOutcome = state
                .wipe_project(id, &WipeProjectRequest { confirm })
                .await?;
            print_json(&outcome)?;
            report_failures(&outcome.report)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Partial success still prints the full report; the exit code reflects the
/// first failed table.
fn report_failures(report: &MutationReport) -> AppResult<()> {
    match report.first_failure() {
        Some(failure) => Err(AppError::new(failure.code.clone(), failure.error.clone())
            .with_context("table", failure.table.clone())),
        None => Ok(()),
    }
}

fn write_file(file: &ExportFile, out: Option<&Path>) -> AppResult<()> {
    let target = match out {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(&file.file_name),
    };
    db::write_atomic(&target, &file.body)
        .with_context(|| format!("write export to {}", target.display()))?;
    println!("{}  {}", file.sha256, target.display());
    Ok(())
}
