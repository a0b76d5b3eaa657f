//! SchemaGuard CLI
//!
//! `hook` reads an editor hook event from stdin, `check` analyses one model
//! file directly, `deps` prints the cross-module dependency report and
//! `parse` dumps the models found in a file. Logs go to stderr; stdout
//! carries reports.

use anyhow::Context;
use clap::{Parser, Subcommand};
use schemaguard::config::{GuardianConfig, DEFAULT_CONFIG_PATH};
use schemaguard::pipeline::{Guardian, HookEvent, RunOutcome};
use schemaguard::snapshot::ModelParser;
use schemaguard::GuardianError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for a cyclic module dependency graph
const EXIT_CYCLE: u8 = 2;

#[derive(Parser)]
#[command(name = "schemaguard")]
#[command(about = "Migration safety guardian for declarative ORM models", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file, relative to the project root
    #[arg(long, global = true, env = "SCHEMAGUARD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one hook event read from stdin
    Hook,

    /// Analyse a model file directly
    Check {
        file: PathBuf,

        /// Module name (derived from the path when omitted)
        #[arg(long)]
        module: Option<String>,
    },

    /// Print the cross-module dependency report and migration order
    Deps,

    /// Print the models parsed from a file as JSON
    Parse { file: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ Migration Guardian Error: {:#}", e);
            eprintln!("❌ Migration Guardian encountered an error: {:#}", e);
            match e.downcast_ref::<GuardianError>() {
                Some(GuardianError::CyclicDependency { .. }) => ExitCode::from(EXIT_CYCLE),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        root.join(&cli.config)
    };
    let config = GuardianConfig::load(&config_path).rooted(&root);

    match cli.command {
        Commands::Hook => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read hook event from stdin")?;
            let event = HookEvent::from_json(&input)?;

            let mut guardian = Guardian::from_config(&config, &root);
            let outcome = guardian.run(&event).await?;
            log_outcome(&outcome);
        }
        Commands::Check { file, module } => {
            let path = absolute(&root, &file);
            let mut guardian = Guardian::from_config(&config, &root);
            let outcome = guardian.check(&path, module.as_deref()).await?;
            log_outcome(&outcome);
        }
        Commands::Deps => {
            let guardian = Guardian::from_config(&config, &root);
            let report = guardian.module_report();
            let order = report.graph().migration_order()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("\nMigration order: {}", order.join(" → "));
        }
        Commands::Parse { file } => {
            let path = absolute(&root, &file);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let parser = ModelParser::new(config.model_base_classes.iter().cloned());
            let models = parser
                .parse(&source)
                .with_context(|| format!("cannot parse {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
    }

    Ok(())
}

fn absolute(root: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    }
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped(reason) => info!("Nothing to do: {}", reason),
        RunOutcome::NoChanges { module } => info!("No schema changes in module '{}'", module),
        RunOutcome::Blocked(_) => info!("🚨 Migration generation blocked"),
        RunOutcome::Declined(_) => info!("Migration generation declined"),
        RunOutcome::Generated { report, saved_to } => {
            info!(
                "✅ {} migration(s) generated for '{}'",
                report.migrations.len(),
                report.module
            );
            if let Some(path) = saved_to {
                println!("\n📄 Detailed report saved to: {}", path.display());
            }
        }
    }
}

/// Initialize tracing with structured logging on stderr
fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaguard=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}
