//! stackgate - gated delivery CLI
//!
//! ## Commands
//!
//! - `validate`: run the configured validators against a local template
//! - `run`: ask the stackgated daemon to run the full pipeline for a commit
//! - `executions list` / `executions show`: inspect recorded executions
//! - `check-config`: load and validate `stackgate.toml`

mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stackgate_ci::config::{self, PipelineConfig};
use stackgate_ci::GateAggregator;
use stackgate_core::reporting::{render_execution_md, summarize_verdict};
use stackgate_core::{
    capture_head_sha, is_git_repo, resolve_commit, Artifact, GateVerdict, Outcome,
    PipelineExecution, SourceRef,
};
use stackgate_state::{ExecutionId, ExecutionQuery, ExecutionStore, SurrealExecutionStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use crate::client::DaemonClient;

#[derive(Parser)]
#[command(name = "stackgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gated continuous delivery for infrastructure templates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "STACKGATE_CONFIG",
        default_value = config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured validators against a template file
    Validate {
        /// Template to validate (default: the configured template path)
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Only run these validators (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,
    },

    /// Ask the daemon to run the full pipeline (validate and deploy) for a commit
    ///
    /// Runs go through stackgated so that its environment locks cover every
    /// deployment. The request is signed with STACKGATE_WEBHOOK_SECRET.
    Run {
        /// Commit or revision to run (resolved in the configured clone)
        #[arg(default_value = "HEAD")]
        commit: String,

        /// Branch recorded on the execution
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Daemon base URL (default: http://<[server] bind>)
        #[arg(long, env = "STACKGATE_SERVER")]
        server: Option<String>,
    },

    /// Inspect recorded executions
    Executions {
        #[command(subcommand)]
        action: ExecutionsAction,
    },

    /// Load and validate the configuration, then print the resolved gate
    CheckConfig,
}

#[derive(Subcommand)]
enum ExecutionsAction {
    /// List executions, newest first
    List {
        /// Filter by commit SHA
        #[arg(long)]
        commit: Option<String>,

        /// Filter by branch
        #[arg(long)]
        branch: Option<String>,

        /// Filter by outcome (succeeded, failed, cancelled)
        #[arg(long)]
        outcome: Option<String>,

        /// Maximum number of executions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one execution
    Show {
        /// Execution id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stackgate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { template, only } => {
            let config = load_config(&cli.config)?;
            cmd_validate(&config, template.as_deref(), &only, cli.json).await
        }
        Commands::Run {
            commit,
            branch,
            server,
        } => {
            let config = load_config(&cli.config)?;
            let sha = resolve_commit(&config.repo_dir, &commit)
                .with_context(|| format!("cannot resolve {commit}"))?;
            let secret = config::webhook_secret().context("run requests must be signed")?;
            let server = server.unwrap_or_else(|| format!("http://{}", config.server.bind));
            cmd_run(&DaemonClient::new(server, secret), &sha, &branch, cli.json).await
        }
        Commands::Executions { action } => {
            let store = open_store().await?;
            match action {
                ExecutionsAction::List {
                    commit,
                    branch,
                    outcome,
                    limit,
                } => {
                    let mut query = ExecutionQuery::all().with_limit(limit);
                    if let Some(commit) = commit {
                        query = query.with_commit(commit);
                    }
                    if let Some(branch) = branch {
                        query = query.with_branch(branch);
                    }
                    if let Some(outcome) = outcome {
                        query = query.with_outcome(outcome);
                    }
                    cmd_executions_list(store.as_ref(), &query, cli.json).await
                }
                ExecutionsAction::Show { id } => {
                    cmd_executions_show(store.as_ref(), &id, cli.json).await
                }
            }
        }
        Commands::CheckConfig => cmd_check_config(&cli.config, cli.json),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn open_store() -> Result<Arc<dyn ExecutionStore>> {
    let store = SurrealExecutionStore::from_env()
        .await
        .context("Failed to connect to stackgate database")?;
    Ok(Arc::new(store))
}

/// Run the gate locally; nothing is recorded or deployed.
async fn cmd_validate(
    config: &PipelineConfig,
    template: Option<&Path>,
    only: &[String],
    json: bool,
) -> Result<()> {
    let path = template
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.repo_dir.join(&config.template_path));
    let body = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;

    let commit = if is_git_repo(&config.repo_dir) {
        capture_head_sha(&config.repo_dir).unwrap_or_else(|_| "working-tree".to_string())
    } else {
        "working-tree".to_string()
    };
    let source = SourceRef::new(config.repository.clone(), "local", commit);
    let artifact = Artifact::from_template(source, path.display().to_string(), body)
        .context("template is not a deployable template")?;

    let mut validators = config.resolved_validators();
    if !only.is_empty() {
        for name in only {
            anyhow::ensure!(
                validators.iter().any(|v| &v.name == name),
                "Unknown validator: {}",
                name
            );
        }
        validators.retain(|v| only.contains(&v.name));
    }

    info!(
        template = %path.display(),
        validators = validators.len(),
        digest = %artifact.digest().short(),
        "validating template"
    );
    let verdict = GateAggregator::evaluate(&artifact, &validators).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }

    if verdict.passed() {
        Ok(())
    } else {
        anyhow::bail!("validation failed: {}", summarize_verdict(&verdict))
    }
}

fn print_verdict(verdict: &GateVerdict) {
    for result in &verdict.results {
        let mark = if result.status.is_pass() { "✓" } else { "✗" };
        println!(
            "  {} {} [{:?}] {} ({}ms, {} attempt(s))",
            mark,
            result.validator,
            result.policy,
            result.status.as_str(),
            result.duration_ms,
            result.attempts
        );
        for diagnostic in &result.diagnostics {
            println!("      {}", diagnostic.summary_line());
        }
    }
    println!();
    println!("Gate: {}", summarize_verdict(verdict));
}

/// Manual re-trigger through the daemon; waits for the outcome.
async fn cmd_run(client: &DaemonClient, sha: &str, branch: &str, json: bool) -> Result<()> {
    let id = client.trigger(sha, branch).await?;
    println!(
        "Execution {} accepted by {} for {}@{}",
        id,
        client.base(),
        branch,
        &sha[..sha.len().min(8)]
    );

    let execution = client.wait(&id).await?;
    print_execution(&execution, json)?;
    match execution.outcome() {
        Some(Outcome::Succeeded) => Ok(()),
        other => anyhow::bail!(
            "execution {} ended {}",
            execution.id(),
            other.map(|o| o.as_str()).unwrap_or("without an outcome")
        ),
    }
}

fn print_execution(execution: &PipelineExecution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
    } else {
        print!("{}", render_execution_md(execution));
    }
    Ok(())
}

async fn cmd_executions_list(
    store: &dyn ExecutionStore,
    query: &ExecutionQuery,
    json: bool,
) -> Result<()> {
    let records = store.list(query).await?;
    let executions = records
        .iter()
        .map(PipelineExecution::from_record)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }
    if executions.is_empty() {
        println!("No executions found.");
        return Ok(());
    }
    for execution in &executions {
        println!("{}", list_line(execution));
    }
    Ok(())
}

fn list_line(execution: &PipelineExecution) -> String {
    let source = &execution.trigger().source;
    format!(
        "{}  {:<12} {:<10} {}@{}  {}",
        execution.id(),
        execution.trigger().kind.as_str(),
        execution.state().as_str(),
        source.branch,
        source.short_sha(),
        execution.created_at().format("%Y-%m-%d %H:%M:%S")
    )
}

async fn cmd_executions_show(store: &dyn ExecutionStore, id: &str, json: bool) -> Result<()> {
    let record = store
        .get(&ExecutionId(id.to_string()))
        .await
        .with_context(|| format!("no execution {id}"))?;
    let execution = PipelineExecution::from_record(&record)?;
    print_execution(&execution, json)
}

fn cmd_check_config(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    let validators = config.resolved_validators();

    if json {
        println!("{}", serde_json::to_string_pretty(&validators)?);
        return Ok(());
    }
    println!("Configuration OK: {}", path.display());
    println!("Repository:  {}", config.repository);
    println!("Template:    {}", config.template_path);
    println!(
        "Environment: {} (conflict: {:?})",
        config.environment.name, config.environment.conflict
    );
    println!("Credential:  {}", config.credential.name);
    println!("Validators:");
    for v in &validators {
        println!(
            "  - {} [{}] {:?}{}",
            v.name,
            v.kind.name(),
            v.policy,
            if v.enabled { "" } else { " (disabled)" }
        );
    }
    if config::webhook_secret().is_err() {
        println!("Warning: {} is not set", config::WEBHOOK_SECRET_ENV);
    }
    Ok(())
}
