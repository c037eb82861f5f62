//! scaffold-migrate command-line tool.
//!
//! Migrates a project's generated scaffold to a newer toolkit revision:
//! `start` stages a merged copy, `status` and `resolve-conflicts` work on
//! the staged copy, and `apply` or `abandon` ends the migration.

mod chooser;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use scaffold_migrate_core::config::{MigrateConfig, DEFAULT_CONFIG_FILE};
use scaffold_migrate_core::merge::{FixedChooser, RegionChoice};
use scaffold_migrate_core::session::StatusReport;
use scaffold_migrate_core::{
    AbandonCommand, ApplyCommand, CommandOutcome, ConfiguredGenerator, GitVcs, MigrationCommand,
    MigrationContext, ResolveConflictsCommand, StartCommand, StartOptions, StatusCommand,
};

use chooser::InteractiveChooser;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Migrate a generated project scaffold between toolkit revisions.
#[derive(Parser, Debug)]
#[command(
    name = "scaffold-migrate",
    version,
    about = "Migrate a project's generated scaffold to a newer toolkit revision"
)]
struct Cli {
    /// Project root (must be a git repository).
    #[arg(short, long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Configuration file. Defaults to `migrate.toml` in the project root.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Staging directory, absolute or relative to the project root.
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file.
    Validate,

    /// Generate, merge, and stage a migration.
    Start(StartArgs),

    /// Show the staged migration.
    Status,

    /// Resolve conflicts in staged files.
    ResolveConflicts {
        /// Resolve every conflict with this side instead of prompting.
        #[arg(long, value_enum)]
        accept: Option<Accept>,
    },

    /// Copy staged files into the project and finish the migration.
    Apply {
        /// Apply even if the project has uncommitted changes.
        #[arg(long)]
        force: bool,
    },

    /// Discard the staged migration.
    Abandon {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    /// Platforms to migrate, comma separated (default: all).
    #[arg(long, value_delimiter = ',')]
    platforms: Option<Vec<String>>,

    /// Keep the generated base and target trees after staging.
    #[arg(long)]
    keep_temp_directories: bool,

    /// Revision the project was generated from (default: project metadata).
    #[arg(long)]
    base_revision: Option<String>,

    /// Revision to migrate to.
    #[arg(long)]
    target_revision: Option<String>,

    /// Merge each file two-way against the target only.
    #[arg(long)]
    prefer_two_way_merge: bool,

    /// Use the configured fallback base revision when none is recorded.
    #[arg(long)]
    allow_fallback_base_revision: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Accept {
    Ours,
    Theirs,
    Both,
}

impl From<Accept> for RegionChoice {
    fn from(accept: Accept) -> Self {
        match accept {
            Accept::Ours => RegionChoice::Ours,
            Accept::Theirs => RegionChoice::Theirs,
            Accept::Both => RegionChoice::Both,
        }
    }
}

impl From<StartArgs> for StartOptions {
    fn from(args: StartArgs) -> Self {
        StartOptions {
            platforms: args.platforms,
            delete_temp_directories: args.keep_temp_directories.then_some(false),
            base_revision: args.base_revision,
            target_revision: args.target_revision,
            prefer_two_way_merge: args.prefer_two_way_merge.then_some(true),
            allow_fallback_base_revision: args.allow_fallback_base_revision.then_some(true),
        }
    }
}

type CliContext = MigrationContext<GitVcs, ConfiguredGenerator<GitVcs>>;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &MigrateConfig, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.migrate.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        let output = output
            .clone()
            .unwrap_or_else(|| cli.project_dir.join(DEFAULT_CONFIG_FILE));
        return cmd_init(&output);
    }

    let project_dir = std::fs::canonicalize(&cli.project_dir)
        .with_context(|| format!("project directory '{}' not found", cli.project_dir.display()))?;
    let mut config = load_config(&project_dir, cli.config.as_deref())?;
    if let Some(dir) = &cli.staging_dir {
        config.migrate.staging_dir = dir.clone();
    }
    init_logging(&config, cli.verbose);
    debug!(project = %project_dir.display(), "resolved project directory");

    if let Commands::Validate = cli.command {
        return cmd_validate(&config);
    }
    config.validate().context("invalid configuration")?;

    let generator = ConfiguredGenerator::from_config(&config, GitVcs::new())
        .context("invalid scaffold configuration")?;
    let ctx = MigrationContext::new(GitVcs::new(), generator, config, project_dir);

    match cli.command {
        Commands::Start(args) => {
            let outcome = StartCommand::new(args.into()).run(&ctx).await?;
            print_outcome(&outcome);
        }
        Commands::Status => {
            if let CommandOutcome::Status(report) = StatusCommand.run(&ctx).await? {
                print_status(&report);
            }
        }
        Commands::ResolveConflicts { accept } => cmd_resolve(&ctx, accept).await?,
        Commands::Apply { force } => {
            let outcome = ApplyCommand::new(force).run(&ctx).await?;
            print_outcome(&outcome);
        }
        Commands::Abandon { yes } => cmd_abandon(&ctx, yes).await?,
        Commands::Init { .. } | Commands::Validate => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(project_dir: &Path, path: Option<&Path>) -> Result<MigrateConfig> {
    match path {
        Some(path) => MigrateConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration '{}'", path.display())),
        None => MigrateConfig::load_or_default(project_dir).context("failed to load configuration"),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, MigrateConfig::default_template())
        .context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set [scaffold] to the generator command or template repository");
    println!("  2. Record the project's current revision in .migrate_metadata (revision: <id>)");
    println!("  3. Validate with: scaffold-migrate validate");
    println!("  4. Start a migration: scaffold-migrate start --target-revision <id>");
    Ok(())
}

fn cmd_validate(config: &MigrateConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let platforms = if config.migrate.platforms.is_empty() {
        "all".to_string()
    } else {
        config.migrate.platforms.join(", ")
    };
    println!();
    println!("Configuration summary:");
    println!("  Staging dir    : {}", config.migrate.staging_dir.display());
    println!("  Platforms      : {}", platforms);
    println!("  Metadata file  : {}", config.migrate.metadata_file.display());
    println!("  Generator kind : {:?}", config.scaffold.kind);
    println!("  Generator cmd  : {}", config.scaffold.command);
    println!("  Timeout        : {}s", config.scaffold.timeout_secs);
    println!();
    println!("{}", style::success("Configuration is valid."));
    Ok(())
}

async fn cmd_resolve(ctx: &CliContext, accept: Option<Accept>) -> Result<()> {
    let outcome = match accept {
        Some(side) => {
            ResolveConflictsCommand::new(FixedChooser(side.into()))
                .run(ctx)
                .await?
        }
        None => {
            let mut command = ResolveConflictsCommand::new(InteractiveChooser::default());
            let outcome = command.run(ctx).await?;
            if let Some(e) = command.into_chooser().failure {
                return Err(anyhow::Error::new(e).context("conflict prompt failed"));
            }
            outcome
        }
    };
    print_outcome(&outcome);
    Ok(())
}

async fn cmd_abandon(ctx: &CliContext, yes: bool) -> Result<()> {
    if !yes && ctx.has_session() {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Discard the staged migration in {}?",
                ctx.staging_root().display()
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Abandon cancelled. Nothing was removed."));
            return Ok(());
        }
    }
    let outcome = AbandonCommand.run(ctx).await?;
    print_outcome(&outcome);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &CommandOutcome) {
    let text = outcome.to_string();
    let clean = match outcome {
        CommandOutcome::Started(s) => s.conflicting.is_empty(),
        CommandOutcome::Resolved(s) => s.remaining.is_empty(),
        CommandOutcome::Abandoned(s) => s.failed.is_empty(),
        CommandOutcome::Status(s) => s.is_ready(),
        CommandOutcome::Applied(_) => true,
    };
    let mut lines = text.lines();
    if let Some(first) = lines.next() {
        if clean {
            println!("{}", style::success(first));
        } else {
            println!("{}", style::warn(first));
        }
    }
    for line in lines {
        println!("{}", line);
    }
}

fn print_status(report: &StatusReport) {
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Migration {} -> {}",
            report.base_revision.as_deref().unwrap_or("unknown"),
            report.target_revision.as_deref().unwrap_or("unknown")
        ))
    );
    println!("{}", style::dim(&report.staging_root.display().to_string()));
    println!();

    let rows: Vec<(&str, &String)> = report
        .conflicting
        .iter()
        .map(|p| ("conflict", p))
        .chain(report.clean.iter().map(|p| ("merged", p)))
        .chain(report.added.iter().map(|p| ("added", p)))
        .chain(report.removed.iter().map(|p| ("removed", p)))
        .chain(report.retained_removals.iter().map(|p| ("retained", p)))
        .chain(report.dropped.iter().map(|p| ("dropped", p)))
        .collect();

    if rows.is_empty() {
        println!("{}", style::success("Nothing staged; the project is already up to date."));
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["State", "File"]);
        for (state, path) in rows {
            table.add_row(vec![Cell::new(style::state_label(state)), Cell::new(path)]);
        }
        println!("{}", table);
    }
    println!();

    if report.is_ready() {
        println!("{}", style::success("Ready to apply. Run `scaffold-migrate apply`."));
    } else {
        println!(
            "{}",
            style::warn(&format!(
                "{} file(s) conflict. Run `scaffold-migrate resolve-conflicts` or edit them in {}.",
                report.conflicting.len(),
                report.staging_root.display()
            ))
        );
    }
}
