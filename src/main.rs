use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use enrollment_linkage::logging::{init_logging, LogConfig, LogFormat};
use enrollment_linkage::output::{matched_output_path, write_matched_rows};
use enrollment_linkage::{
    import_registry_csv, load_enrollees, load_registry, setup_database, EnrollmentWriter,
    IntakeLoop, MatchResolver, ProcessedFileLedger, Settings, SqliteEnrollmentStore,
};

#[derive(Parser)]
#[command(name = "enrollment-linkage", version, about = "Match enrollment CSVs to student registry records")]
struct Cli {
    /// -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// SQLite database (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the student registry from a CSV export (ID,FN,LN,BD,GR,NM)
    ImportRegistry { csv: PathBuf },

    /// Process the input folder: match, export, write back, then optionally watch
    Run {
        /// Process existing files and exit without watching
        #[arg(long)]
        once: bool,

        /// Skip interactive prompts (scheduled tasks)
        #[arg(short = 'A', long)]
        automation: bool,

        /// Match and export only; record no program enrollments
        #[arg(long)]
        no_write_back: bool,

        #[arg(long)]
        input_dir: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        program_code: Option<i64>,

        /// Seconds between folder polls in watch mode
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,

        /// Seconds to wait for a new file to finish writing
        #[arg(long, default_value_t = 2)]
        settle_secs: u64,
    },

    /// Match a single enrollment file and write the matched CSV (no write-back)
    Match {
        file: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(db) = &cli.database {
        settings.database_path = db.clone();
    }

    let log_config = LogConfig::from_verbosity(cli.verbose)
        .with_format(if cli.json_logs { LogFormat::Json } else { LogFormat::Compact })
        .with_log_file(cli.log_file.clone().or_else(|| settings.log_file.clone()));
    init_logging(&log_config).context("Failed to initialise logging")?;

    match cli.command {
        Command::ImportRegistry { csv } => run_import(&settings, &csv),
        Command::Run {
            once,
            automation,
            no_write_back,
            input_dir,
            output_dir,
            program_code,
            poll_secs,
            settle_secs,
        } => {
            if let Some(dir) = input_dir {
                settings.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            if let Some(code) = program_code {
                settings.program_code = code;
            }
            settings.write_back = !no_write_back;

            if !settings.test_run && !automation {
                confirm_production()?;
            }

            run_intake(
                &settings,
                once,
                Duration::from_secs(poll_secs),
                Duration::from_secs(settle_secs),
            )
        }
        Command::Match { file, output_dir } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            run_match(&settings, &file)
        }
    }
}

fn open_database(settings: &Settings) -> Result<Connection> {
    let conn = Connection::open(&settings.database_path).with_context(|| {
        format!("Failed to open database: {}", settings.database_path.display())
    })?;
    setup_database(&conn)?;
    Ok(conn)
}

fn confirm_production() -> Result<()> {
    eprintln!("Running in production mode. Press Enter to continue...");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

fn run_import(settings: &Settings, csv: &Path) -> Result<()> {
    let conn = open_database(settings)?;
    let count = import_registry_csv(&conn, csv)?;
    info!(count, database = %settings.database_path.display(), "registry import complete");
    Ok(())
}

fn run_intake(settings: &Settings, once: bool, poll: Duration, settle: Duration) -> Result<()> {
    info!(input = %settings.input_dir.display(), output = %settings.output_dir.display(), "starting intake");
    std::fs::create_dir_all(&settings.output_dir)?;

    let conn = open_database(settings)?;
    let registry = load_registry(&conn)?;
    let ledger = ProcessedFileLedger::load(&settings.ledger_path())?;

    let writer = settings.write_back.then(|| {
        EnrollmentWriter::new(SqliteEnrollmentStore::new(&conn))
            .with_rejected_path(settings.rejected_path())
    });

    let mut intake = IntakeLoop::new(
        settings.input_dir.clone(),
        settings.output_dir.clone(),
        settings.program_code,
        &registry,
        MatchResolver::with_threshold(settings.fuzz_threshold),
        writer,
        ledger,
    );

    let summary = if once {
        intake.process_folder()?
    } else {
        intake.watch(poll, settle, None)
    };

    info!(
        processed = summary.processed.len(),
        skipped = summary.already_processed,
        failed = summary.failed.len(),
        matched = summary.rows_matched,
        rows = summary.rows_total,
        inserted = summary.inserted,
        rejected = summary.rejected,
        "run complete"
    );
    Ok(())
}

fn run_match(settings: &Settings, file: &Path) -> Result<()> {
    let conn = open_database(settings)?;
    let registry = load_registry(&conn)?;
    let enrollees = load_enrollees(file)?;

    let rows = MatchResolver::with_threshold(settings.fuzz_threshold).match_all(&enrollees, &registry);
    let out_path = matched_output_path(&settings.output_dir, file);
    write_matched_rows(&out_path, &rows)?;

    println!("{}", out_path.display());
    Ok(())
}
