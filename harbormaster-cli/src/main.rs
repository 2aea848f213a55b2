//! Harbormaster Migration CLI Tool
//!
//! Command-line interface for versioned SQL migrations. Exit codes: `0`
//! success, `2` operational failure, `3` usage error, `101` panic.

mod logging;
mod prompt;
mod templates;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use harbormaster::backend::BackendRegistry;
use harbormaster::config::{AppConfig, DEFAULT_CONFIG_PATH};
use harbormaster::migration::Manager;
use harbormaster::notifier::notifier_from_config;
use harbormaster::validate::ValidateOptions;
use std::backtrace::Backtrace;
use std::panic;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const EXIT_FAILURE: i32 = 2;
const EXIT_USAGE: i32 = 3;
const EXIT_PANIC: i32 = 101;

#[derive(Parser)]
#[command(name = "harbormaster")]
#[command(about = "Database migration manager")]
#[command(version)]
struct Cli {
    /// Name recorded as the executor of this command
    #[arg(long, global = true)]
    user: Option<String>,

    /// Automatic yes to prompts
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Migrations directory (overrides migrations_dir from config)
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate new migration files
    Create {
        /// Migration name (e.g., "create_users_table")
        name: String,
    },

    /// Apply all pending migrations
    Up,

    /// Rollback all migrations (danger: prod)
    Down,

    /// Rollback migration steps
    Rollback {
        /// Number of migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },

    /// Show migration status
    Status,

    /// Print current migration version
    Version,

    /// Force to previous version only if dirty
    SafeForce {
        /// Target version (must be the dirty version minus one)
        version: i64,
    },

    /// Mark all applied migrations as committed
    Commit,

    /// Show the migration audit history
    History,

    /// Generate config file and migrations directory
    Init,
}

fn main() {
    dotenv::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!(component = "panic", stack = %backtrace, "panic: {}", info);
        eprintln!("panic: {}\n{}", info, backtrace);
    }));

    let code = match panic::catch_unwind(move || run(cli)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            eprintln!("{} {:#}", "[FATAL]".red().bold(), e);
            EXIT_FAILURE
        }
        Err(_) => EXIT_PANIC,
    };
    process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init = cli.command {
        return handle_init(&cli);
    }

    let mut cfg = AppConfig::load(cli.config.as_deref()).context("load configuration")?;
    if let Some(dir) = &cli.migrations {
        cfg.migrations_dir = dir.clone();
    }
    logging::init(&cfg.logging);

    let actor = cli.user.clone().filter(|u| !u.is_empty()).unwrap_or_else(|| cfg.user.clone());

    let registry = BackendRegistry::with_builtin();
    let validate = ValidateOptions::with_confirm(prompt::confirm_fn(cli.yes));
    let mut manager = Manager::new(&registry, cfg.manager_config(&actor, validate))?
        .with_notifier(Arc::from(notifier_from_config(&cfg.notifier)));

    let result = dispatch(&cli.command, &mut manager, &actor);

    write_metrics(&cfg, &manager);
    if let Err(e) = manager.close() {
        tracing::warn!(error = %e, "failed to close database connection");
    }
    result
}

fn dispatch(command: &Commands, manager: &mut Manager, actor: &str) -> anyhow::Result<()> {
    match command {
        Commands::Create { name } => {
            if actor.is_empty() {
                return Err(anyhow!("--user or config.user is required"));
            }
            let base = manager.create(name, actor)?;
            println!("{}", base);
        }
        Commands::Up => {
            manager.up()?;
            println!("{}", "✅ Migrations applied successfully.".green());
        }
        Commands::Down => {
            manager.down()?;
            println!("{}", "✅ Migrations rolled back.".green());
        }
        Commands::Rollback { steps } => {
            manager.steps(-i64::from(*steps))?;
            println!("{}", format!("✅ Rolled back {} step(s).", steps).green());
        }
        Commands::Status => {
            let status = manager.status()?;
            println!(
                "Current version: {}\nPending migrations: {}",
                status.version.unwrap_or(0),
                status.pending_count()
            );
        }
        Commands::Version => {
            let version = manager.version()?;
            if version.dirty {
                println!("Current version: {} {}", version.number(), "(DIRTY)".red());
            } else {
                println!("Current version: {}", version.number());
            }
        }
        Commands::SafeForce { version } => {
            manager.safe_force(*version)?;
            println!(
                "{}",
                format!("✅ Safe-forced database version to {} (dirty cleared)", version).green()
            );
        }
        Commands::Commit => {
            manager.commit_all()?;
            println!(
                "{}",
                "✅ All applied migrations have been committed; strict hash checking is now enforced.".green()
            );
        }
        Commands::History => {
            for entry in manager.history()? {
                let committed = if entry.committed { "committed".green() } else { "pending".yellow() };
                println!(
                    "{:>5}  {}  {:<10} {:>6}  {:<16} {}  {}",
                    entry.id,
                    entry.executed_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action,
                    entry.version,
                    entry.executed_by,
                    committed,
                    entry.sha256
                );
            }
        }
        // Handled in `run` before any manager exists
        Commands::Init => {}
    }
    Ok(())
}

fn handle_init(cli: &Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let migrations = cli.migrations.clone().unwrap_or_else(|| PathBuf::from("migrations"));

    for written in templates::init_project(&config_path, &migrations)
        .with_context(|| format!("initialize {}", migrations.display()))?
    {
        match written {
            templates::Written::Created(path) => println!("created {}", path.display()),
            templates::Written::Existing(path) => println!("{} already exists", path.display()),
        }
    }
    println!("initialized migrations at {}", migrations.display());
    Ok(())
}

fn write_metrics(cfg: &AppConfig, manager: &Manager) {
    let (Some(path), Some(metrics)) = (&cfg.metrics.textfile, manager.metrics()) else {
        return;
    };
    let written = metrics
        .render()
        .map_err(|e| e.to_string())
        .and_then(|text| std::fs::write(path, text).map_err(|e| e.to_string()));
    if let Err(e) = written {
        tracing::warn!(file = %path.display(), error = %e, "failed to write metrics textfile");
    }
}
