//! Crucible CLI
//!
//! Command line front-end for the round engine: run a project to
//! completion, preview the collaboration plan, validate a directory, and
//! inspect or clean up persisted projects.

mod generator;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crucible_core::skills::Generator;
use crucible_core::state::{read_tree, ProjectStore, Specification};
use crucible_core::swarm::{
    planning, CollaborationStrategy, Coordinator, EngineEvent, GenerationStrategy, Orchestrator,
    SingleGenerator,
};
use crucible_core::tools::StaticValidator;
use crucible_core::{CancellationToken, EngineConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use generator::{CommandGenerator, HttpGenerator};

const STOP_FILE: &str = "STOP_REQUESTED";
const VENDOR_DIRS: &[&str] = &[".git", "node_modules", ".venv", "venv", "target", "__pycache__", "dist"];

#[derive(Parser)]
#[command(author, version, about = "Crucible - iterative generate, verify and repair engine")]
struct Args {
    /// Debug-level logs for crucible
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Engine configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate, verify and repair a project until it passes
    Run {
        /// Specification file (JSON or YAML)
        #[arg(short, long)]
        spec: PathBuf,
        /// Directory holding projects
        #[arg(long, default_value = "projects")]
        workspace: PathBuf,
        /// Project name (defaults to the specification name)
        #[arg(short, long)]
        name: Option<String>,
        /// Generator command line; reads a request on stdin, answers on stdout
        #[arg(long, conflicts_with = "generator_url")]
        generator_cmd: Option<String>,
        /// Generator HTTP endpoint
        #[arg(long)]
        generator_url: Option<String>,
        /// Plan specialized generators instead of a single one
        #[arg(long)]
        coordinate: bool,
        /// Force a collaboration strategy (implies --coordinate)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Override the round budget
        #[arg(long)]
        max_rounds: Option<u32>,
    },
    /// Show the collaboration plan for a specification
    Plan {
        #[arg(short, long)]
        spec: PathBuf,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the static validator over a directory
    Validate {
        dir: PathBuf,
    },
    /// Show a persisted round report
    Report {
        /// Project root
        project: PathBuf,
        /// Round to show (defaults to the last one)
        #[arg(short, long)]
        round: Option<u32>,
    },
    /// Per-round statistics of a project
    History {
        project: PathBuf,
    },
    /// Remove a project's working directories
    Clean {
        project: PathBuf,
        /// Keep the reports directory
        #[arg(long)]
        keep_reports: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Sequential,
    Hybrid,
    Parallel,
    Collaborative,
}

impl From<StrategyArg> for CollaborationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => CollaborationStrategy::Sequential,
            StrategyArg::Hybrid => CollaborationStrategy::Hybrid,
            StrategyArg::Parallel => CollaborationStrategy::Parallel,
            StrategyArg::Collaborative => CollaborationStrategy::Collaborative,
        }
    }
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("crucible_core=debug,crucible=debug,info")
            } else {
                EnvFilter::try_new("crucible_core=info,crucible=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()?;
    } else {
        registry
            .with(fmt::layer().compact().with_target(verbose))
            .try_init()?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn build_generator(cmd: Option<String>, url: Option<String>) -> Result<Arc<dyn Generator>> {
    let cmd = cmd.or_else(|| std::env::var("CRUCIBLE_GENERATOR_CMD").ok());
    let url = url.or_else(|| std::env::var("CRUCIBLE_GENERATOR_URL").ok());
    match (cmd, url) {
        (Some(cmd), _) => {
            let generator = CommandGenerator::parse(&cmd).context("empty generator command")?;
            Ok(Arc::new(generator))
        }
        (None, Some(url)) => {
            let mut generator = HttpGenerator::new(url);
            if let Ok(token) = std::env::var("CRUCIBLE_GENERATOR_TOKEN") {
                generator = generator.with_token(token);
            }
            Ok(Arc::new(generator))
        }
        (None, None) => bail!(
            "no generator configured; pass --generator-cmd or --generator-url \
             (or set CRUCIBLE_GENERATOR_CMD / CRUCIBLE_GENERATOR_URL)"
        ),
    }
}

/// Ctrl-C and the stop file both trip the token
fn watch_for_stop(project_root: PathBuf, cancel: CancellationToken) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current step");
            on_signal.cancel();
        }
    });

    tokio::spawn(async move {
        let sentinel = project_root.join(STOP_FILE);
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if sentinel.exists() {
                        tracing::warn!(path = %sentinel.display(), "Stop file found; stopping after the current step");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    });
}

fn drain_events(mut rx: mpsc::Receiver<EngineEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(
                kind = ?event.kind,
                actor = %event.actor,
                round = ?event.round,
                data = ?event.data,
                "Engine event"
            );
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &mut EngineConfig,
    spec_path: &Path,
    workspace: &Path,
    name: Option<String>,
    generator_cmd: Option<String>,
    generator_url: Option<String>,
    coordinate: bool,
    strategy: Option<StrategyArg>,
    max_rounds: Option<u32>,
) -> Result<bool> {
    let spec = Specification::load(spec_path)
        .with_context(|| format!("Failed to load specification {}", spec_path.display()))?;
    if let Some(max_rounds) = max_rounds {
        config.max_rounds = max_rounds;
        config.validate()?;
    }
    if let Some(strategy) = strategy {
        config.coordinator.strategy = Some(strategy.into());
    }

    let generator = build_generator(generator_cmd, generator_url)?;
    let store = ProjectStore::create(workspace, name.as_deref().unwrap_or(&spec.name))
        .context("Failed to prepare project directory")?;
    let root = store.layout().root.clone();

    let strategy: Box<dyn GenerationStrategy> = if coordinate || strategy.is_some() {
        Box::new(Coordinator::uniform(config.coordinator.clone(), generator))
    } else {
        Box::new(SingleGenerator::new(generator))
    };

    println!("🔥 Crucible: {} → {}", spec.name, root.display());
    println!("   Strategy: {}  Rounds: {}", strategy.name(), config.max_rounds);

    let cancel = CancellationToken::new();
    watch_for_stop(root.clone(), cancel.clone());
    let (event_tx, event_rx) = mpsc::channel(256);
    drain_events(event_rx);

    let outcome = Orchestrator::new(config.clone(), store, strategy)
        .with_event_channel(event_tx)
        .with_round_observer(|report| {
            let overall = report
                .scores
                .as_ref()
                .map(|s| format!("{:.2}", s.overall))
                .unwrap_or_else(|| "-".into());
            println!(
                "   Round {:>2}: {}  score {}  findings {}",
                report.round,
                if report.success { "pass" } else { "fail" },
                overall,
                report.findings.len()
            );
        })
        .run(Arc::new(spec), cancel)
        .await;

    println!();
    println!("   Terminal: {}", outcome.terminal);
    println!("   Rounds this run: {}", outcome.rounds_completed);
    println!("   Files: {}", outcome.artifacts.len());
    if let Some(report) = &outcome.last_report {
        for line in report.recommendations.iter().take(5) {
            println!("   • {}", line);
        }
    }
    if let Some(error) = &outcome.error {
        eprintln!("   Error: {}", error);
    }
    if let Some(path) = &outcome.summary_path {
        println!("   Summary: {}", path.display());
    }
    Ok(outcome.is_success())
}

fn show_plan(config: &EngineConfig, spec_path: &Path, json: bool) -> Result<()> {
    let spec = Specification::load(spec_path)
        .with_context(|| format!("Failed to load specification {}", spec_path.display()))?;
    let plan = planning::plan(
        &spec,
        config.coordinator.strategy,
        config.coordinator.roles.as_deref(),
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("📋 {}", spec.name);
    println!("   Tier: {}", plan.tier.as_str());
    println!("   Strategy: {}", plan.strategy.as_str());
    println!("   Features: {}", plan.features.join(", "));
    println!(
        "   Recommended rounds: {} single / {} coordinated (configured: {})",
        plan.single_rounds, plan.multi_rounds, config.max_rounds
    );
    for (idx, wave) in planning::phase_waves(&plan.phases).iter().enumerate() {
        let roles: Vec<&str> = wave.iter().map(|r| r.as_str()).collect();
        println!("   Phase {}: {}", idx + 1, roles.join(" + "));
    }
    for line in &plan.reasoning {
        println!("   • {}", line);
    }
    Ok(())
}

fn validate_dir(config: &EngineConfig, dir: &Path) -> Result<bool> {
    let artifacts = read_tree(dir, VENDOR_DIRS)
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    let report = StaticValidator::new(config.validator.clone()).validate(&artifacts);
    for issue in &report.issues {
        let location = match (&issue.file, issue.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            _ => "<project>".to_string(),
        };
        println!(
            "{:?} [{}] {}: {}",
            issue.severity,
            issue.category.as_str(),
            location,
            issue.message
        );
    }
    println!(
        "{} file(s), {} error(s), {} warning(s)",
        report.files_checked,
        report.error_count(),
        report.warning_count()
    );
    Ok(!report.has_errors())
}

fn show_report(project: &Path, round: Option<u32>) -> Result<()> {
    let store = ProjectStore::open(project)?;
    let round = match round {
        Some(round) => round,
        None => store.last_round()?.context("project has no round reports yet")?,
    };
    let report = store.load_round_report(round)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_history(project: &Path) -> Result<()> {
    let store = ProjectStore::open(project)?;
    let history = store.round_history()?;
    if history.is_empty() {
        println!("No rounds recorded");
        return Ok(());
    }
    println!("{:>5}  {:>7}  {:>7}  {:>8}  {:>6}", "round", "success", "overall", "findings", "errors");
    for row in history {
        println!(
            "{:>5}  {:>7}  {:>7}  {:>8}  {:>6}",
            row.round,
            if row.success { "yes" } else { "no" },
            row.overall_score
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "-".into()),
            row.findings,
            row.errors
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json).context("Failed to initialize logging")?;
    let mut config = load_config(args.config.as_deref())?;

    let ok = match args.command {
        CliCommand::Run {
            spec,
            workspace,
            name,
            generator_cmd,
            generator_url,
            coordinate,
            strategy,
            max_rounds,
        } => {
            run(
                &mut config,
                &spec,
                &workspace,
                name,
                generator_cmd,
                generator_url,
                coordinate,
                strategy,
                max_rounds,
            )
            .await?
        }
        CliCommand::Plan { spec, json } => {
            show_plan(&config, &spec, json)?;
            true
        }
        CliCommand::Validate { dir } => validate_dir(&config, &dir)?,
        CliCommand::Report { project, round } => {
            show_report(&project, round)?;
            true
        }
        CliCommand::History { project } => {
            show_history(&project)?;
            true
        }
        CliCommand::Clean {
            project,
            keep_reports,
        } => {
            ProjectStore::open(&project)?.cleanup(keep_reports)?;
            println!("🧹 Cleaned {}", project.display());
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
