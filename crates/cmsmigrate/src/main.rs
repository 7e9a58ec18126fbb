use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use cmsmigrate_core::EntityType;
use cmsmigrate_core::config::load_config;
use cmsmigrate_core::job::{ThreadSleeper, run_job};
use cmsmigrate_core::ledger::{self, ItemStatus, MigrationRun};
use cmsmigrate_core::manager::{DryRunReport, RunOptions, preview, run_migration};
use cmsmigrate_core::report::{Finding, generate_report};
use cmsmigrate_core::rollback::{RollbackScope, rollback};
use cmsmigrate_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use cmsmigrate_core::source::read_export;
use cmsmigrate_core::schema::{open_database, pending_schema_count, run_schema_migrations};
use cmsmigrate_core::target;
use dialoguer::Confirm;
use rusqlite::Connection;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "cmsmigrate",
    version,
    about = "Migrate a legacy Joomla export into the court CMS"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase log verbosity (-v info, -vv debug)")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the .cmsmigrate/ layout and default config")]
    Init(InitArgs),
    #[command(about = "Migrate a legacy export (file path or inline JSON)")]
    Run(RunArgs),
    #[command(about = "Undo migrated records for one entity type, all types, or one run")]
    Rollback(RollbackArgs),
    #[command(about = "Integrity report for a migration run")]
    Validate(ValidateArgs),
    Db(DbArgs),
    Runs(RunsArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(value_name = "PATH|JSON")]
    source: String,
    #[arg(long, help = "Run name (defaults to config migration.default_name)")]
    name: Option<String>,
    #[arg(long, help = "Re-process migrated records and update them in place")]
    force: bool,
    #[arg(long, help = "Report what would happen without writing anything")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RollbackArgs {
    #[arg(value_name = "TYPE|all")]
    target: String,
    #[arg(long, help = "Remove ledger entries only; keep the migrated rows")]
    keep_records: bool,
    #[arg(long, value_name = "ID", help = "Roll back everything one run migrated")]
    run: Option<i64>,
    #[arg(long, help = "Skip the confirmation prompt")]
    yes: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[arg(long, value_name = "ID", help = "Run to validate (default: latest completed)")]
    id: Option<i64>,
    #[arg(long, help = "List every finding")]
    detailed: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct RunsArgs {
    #[command(subcommand)]
    command: RunsSubcommand,
}

#[derive(Debug, Subcommand)]
enum RunsSubcommand {
    List,
    Show {
        id: i64,
    },
    #[command(name = "fail-stale", about = "Mark a run left `running` by a dead process as failed")]
    FailStale {
        id: i64,
    },
    #[command(about = "Delete a failed or rolled-back run and its remaining ledger rows")]
    Purge {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Run(args)) => run_run(&runtime, args),
        Some(Commands::Rollback(args)) => run_rollback(&runtime, args),
        Some(Commands::Validate(args)) => run_validate(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Runs(RunsArgs { command })) => match command {
            RunsSubcommand::List => run_runs_list(&runtime),
            RunsSubcommand::Show { id } => run_runs_show(&runtime, id),
            RunsSubcommand::FailStale { id } => run_runs_fail_stale(&runtime, id),
            RunsSubcommand::Purge { id, yes } => run_runs_purge(&runtime, id, yes),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;
    let schema = run_schema_migrations(&paths)?;

    println!("Initialized cmsmigrate runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("schema_version: {}", schema.current_version);
    print_diagnostics(runtime, &paths);
    Ok(ExitCode::SUCCESS)
}

fn run_run(runtime: &RuntimeOptions, args: RunArgs) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let (source_json, source_label) = read_export(&args.source)
        .with_context(|| format!("failed to read export {}", args.source))?;
    let mut connection = open_database(&paths)?;

    if args.dry_run {
        let report = preview(&connection, &source_json, args.force)
            .context("dry run failed")?;
        print_dry_run(&report, &source_label, config.error_preview_limit());
        print_diagnostics(runtime, &paths);
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = RunOptions::new(args.name.unwrap_or_else(|| config.default_run_name()))
        .force(args.force);
    options.source_label = Some(source_label);
    let policy = config.job_policy();
    let outcome = run_job(&policy, &mut ThreadSleeper, |deadline| {
        options.deadline = Some(deadline);
        run_migration(&mut connection, &source_json, &options)
    })
    .context("migration run failed")?;

    print_run(&outcome.value, config.error_preview_limit());
    println!("attempts: {}", outcome.attempts);
    print_diagnostics(runtime, &paths);
    Ok(ExitCode::SUCCESS)
}

fn run_rollback(runtime: &RuntimeOptions, args: RollbackArgs) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let scope = match (args.run, args.target.trim()) {
        (Some(id), "all") => RollbackScope::Run(id),
        (Some(_), other) => {
            bail!("--run rolls back a whole run; pass `all` instead of `{other}`")
        }
        (None, "all") => RollbackScope::All,
        (None, other) => RollbackScope::Entity(other.parse::<EntityType>()?),
    };
    let mode = if args.keep_records { "keep" } else { "delete" };
    let description = match scope {
        RollbackScope::Entity(entity_type) => format!("entity type `{entity_type}`"),
        RollbackScope::All => "all entity types".to_string(),
        RollbackScope::Run(id) => format!("migration run {id}"),
    };

    if !confirmed(args.yes, &format!("Roll back {description} ({mode} mode)?"))? {
        println!("rollback cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    let mut connection = open_database(&paths)?;
    let outcome = rollback(&mut connection, scope, args.keep_records)?;

    println!("rollback");
    println!("scope: {description}");
    println!("mode: {mode}");
    println!("deleted: {}", outcome.deleted);
    println!("kept: {}", outcome.kept);
    if outcome.kept > 0 && !args.keep_records {
        println!("note: kept items are still referenced; their ledger entries remain for a retry");
    }
    print_diagnostics(runtime, &paths);
    Ok(ExitCode::SUCCESS)
}

fn run_validate(runtime: &RuntimeOptions, args: ValidateArgs) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let thresholds = config.thresholds();
    let connection = open_database(&paths)?;

    let run_id = match args.id {
        Some(id) => id,
        None => match ledger::latest_completed_run(&connection)? {
            Some(run) => run.id,
            None => bail!("no completed migration run to validate"),
        },
    };
    let report = generate_report(&connection, run_id)?;
    let verdict = report.verdict(thresholds);
    let passes = report.passes(thresholds);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("validation report");
        println!("run: {} ({})", report.migration.id, report.migration.name);
        println!("run.status: {}", report.migration.status);
        for (entity_type, count) in &report.record_counts {
            println!(
                "records.{entity_type}: expected={} actual={}",
                count.expected, count.actual
            );
        }
        println!("records.total: expected={} actual={}", report.total_expected(), report.total_actual());
        println!("issues: {}", report.errors.len());
        println!("warnings: {}", report.warnings.len());
        println!("integrity_score: {:.2}", report.integrity_score);
        println!("verdict: {}", verdict.as_str());
        if args.detailed {
            print_findings("issue", &report.errors);
            print_findings("warning", &report.warnings);
        }
        print_diagnostics(runtime, &paths);
    }

    Ok(if passes {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_schema_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.v{:03}: {}", migration.version, migration.name);
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(ExitCode::SUCCESS)
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("pending_schema_migrations: {}", pending_schema_count(&paths)?);
    if status.db_exists {
        let connection = open_database(&paths)?;
        print_ledger_stats(&connection)?;
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(ExitCode::SUCCESS)
}

fn run_runs_list(runtime: &RuntimeOptions) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_database(&paths)?;
    let runs = ledger::list_runs(&connection)?;

    println!("runs.count: {}", runs.len());
    for run in &runs {
        println!(
            "run.{}: status={} processed={} failed={} total={} name={}",
            run.id, run.status, run.processed_records, run.failed_records, run.total_records, run.name
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_runs_show(runtime: &RuntimeOptions, id: i64) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_database(&paths)?;
    let run = ledger::require_run(&connection, id)?;
    print_run(&run, usize::MAX);
    Ok(ExitCode::SUCCESS)
}

fn run_runs_fail_stale(runtime: &RuntimeOptions, id: i64) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_database(&paths)?;
    let run = ledger::fail_stale_run(&connection, id)?;
    println!("run.{}: status={}", run.id, run.status);
    Ok(ExitCode::SUCCESS)
}

fn run_runs_purge(runtime: &RuntimeOptions, id: i64, yes: bool) -> Result<ExitCode> {
    let paths = resolve_runtime_paths(runtime)?;
    if !confirmed(yes, &format!("Purge migration run {id} and its ledger rows?"))? {
        println!("purge cancelled");
        return Ok(ExitCode::SUCCESS);
    }
    let connection = open_database(&paths)?;
    let removed = ledger::purge_run(&connection, id)?;
    println!("purged_run: {id}");
    println!("purged_items: {removed}");
    Ok(ExitCode::SUCCESS)
}

fn print_run(run: &MigrationRun, error_limit: usize) {
    println!("migration run");
    println!("id: {}", run.id);
    println!("name: {}", run.name);
    println!("status: {}", run.status);
    println!("total_records: {}", run.total_records);
    println!("processed_records: {}", run.processed_records);
    println!("failed_records: {}", run.failed_records);
    if let Some(skipped) = run.metadata.get("skipped_records") {
        println!("skipped_records: {skipped}");
    }
    if let Some(serde_json::Value::Object(steps)) = run.metadata.get("steps") {
        for (entity, stats) in steps {
            println!(
                "step.{entity}: success={} failed={} skipped={}",
                stats.get("success").unwrap_or(&serde_json::Value::Null),
                stats.get("failed").unwrap_or(&serde_json::Value::Null),
                stats.get("skipped").unwrap_or(&serde_json::Value::Null),
            );
        }
    }
    println!("errors: {}", run.errors.len());
    for error in run.errors.iter().take(error_limit) {
        match (&error.entity_type, error.source_id, &error.location) {
            (Some(entity_type), Some(source_id), _) => {
                println!("  - {entity_type} #{source_id}: {}", error.message)
            }
            (Some(entity_type), None, _) => println!("  - {entity_type}: {}", error.message),
            (None, _, Some(location)) => println!("  - [{location}] {}", error.message),
            (None, _, None) => println!("  - {}", error.message),
        }
    }
    if run.errors.len() > error_limit {
        println!("  ... {} more", run.errors.len() - error_limit);
    }
}

fn print_dry_run(report: &DryRunReport, source_label: &str, error_limit: usize) {
    println!("dry run (nothing written)");
    println!("source: {source_label}");
    println!("force: {}", report.force);
    println!("total_records: {}", report.total_records);
    for (entity_type, counts) in &report.entities {
        println!(
            "{entity_type}: create={} update={} skip={} fail={} changed={}",
            counts.would_create,
            counts.would_update,
            counts.would_skip,
            counts.would_fail,
            counts.changed_since_migration
        );
    }
    let totals = report.totals();
    println!(
        "total: create={} update={} skip={} fail={}",
        totals.would_create, totals.would_update, totals.would_skip, totals.would_fail
    );
    for failure in report.failures.iter().take(error_limit) {
        match failure.source_id {
            Some(source_id) => println!("  - {} #{source_id}: {}", failure.entity_type, failure.message),
            None => println!("  - {}: {}", failure.entity_type, failure.message),
        }
    }
    if report.failures.len() > error_limit {
        println!("  ... {} more", report.failures.len() - error_limit);
    }
}

fn print_findings(label: &str, findings: &[Finding]) {
    for finding in findings {
        println!(
            "{label}: {} #{} -> {}: {}",
            finding.entity_type,
            finding.source_id,
            finding.target_id,
            finding.message
        );
    }
}

fn print_ledger_stats(connection: &Connection) -> Result<()> {
    for entity_type in EntityType::FORWARD_ORDER {
        println!(
            "target.{entity_type}: {}",
            target::count(connection, entity_type)?
        );
    }
    for status in [ItemStatus::Completed, ItemStatus::Failed, ItemStatus::Skipped] {
        let counts = ledger::count_by_type(connection, status, None)?;
        let total: usize = counts.values().sum();
        println!("ledger.{}: {total}", status.as_str());
    }
    println!("runs: {}", ledger::list_runs(connection)?.len());
    if let Some(active) = ledger::running_run_id(connection)? {
        println!("active_run: {active}");
    }
    Ok(())
}

fn confirmed(assume_yes: bool, prompt: &str) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("confirmation prompt needs a terminal; pass --yes to skip it")
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    tracing::debug!(
        project_root = %normalize_for_display(&paths.project_root),
        db_path = %normalize_for_display(&paths.db_path),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn yes_flag_skips_the_prompt() {
        let cli = Cli::try_parse_from(["cmsmigrate", "rollback", "news", "--keep-records", "--yes"])
            .expect("parse rollback");
        let Some(Commands::Rollback(args)) = cli.command else {
            panic!("expected rollback command");
        };
        assert!(args.yes && args.keep_records);
        assert!(confirmed(args.yes, "Roll back?").expect("no prompt when --yes is given"));

        let cli = Cli::try_parse_from(["cmsmigrate", "runs", "purge", "4", "--yes"])
            .expect("parse purge");
        let Some(Commands::Runs(RunsArgs {
            command: RunsSubcommand::Purge { id, yes },
        })) = cli.command
        else {
            panic!("expected runs purge");
        };
        assert_eq!(id, 4);
        assert!(yes);
    }
}
