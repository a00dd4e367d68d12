use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use investigative_analysis::{
    analysis::{AnalysisConfig, AnalysisController, AnalysisSession, Article, SessionStatus},
    config::{Config, LogFormat},
    langbase::{LangbaseClient, LangbasePipe},
    prompts::ANALYST_PERSONA_PROMPT,
    storage::{SqliteStorage, Storage},
};

/// Multi-stage investigative analysis of news articles.
#[derive(Debug, Parser)]
#[command(name = "investigative-analysis", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one or more articles given as JSON files.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// Article JSON files (title and content are required).
    #[arg(required = true)]
    articles: Vec<PathBuf>,

    /// Number of stages to run, capped by --max-stages.
    #[arg(long)]
    depth: Option<usize>,

    /// Upper bound on stages run.
    #[arg(long)]
    max_stages: Option<usize>,

    /// Stages below this confidence get a low-confidence insight.
    #[arg(long)]
    threshold: Option<f64>,

    /// Per-stage time limit in milliseconds.
    #[arg(long)]
    stage_timeout_ms: Option<u64>,

    /// Skip the cross-reference validation stage.
    #[arg(long)]
    no_cross_reference: bool,

    /// Skip hypothesis generation.
    #[arg(long)]
    no_hypotheses: bool,

    /// Do not write finished sessions to the database.
    #[arg(long)]
    no_persist: bool,
}

impl AnalyzeArgs {
    fn session_config(&self, defaults: &AnalysisConfig) -> AnalysisConfig {
        let mut config = defaults.clone();
        if let Some(depth) = self.depth {
            config = config.with_depth(depth);
        }
        if let Some(max) = self.max_stages {
            config = config.with_max_stages(max);
        }
        if let Some(threshold) = self.threshold {
            config = config.with_confidence_threshold(threshold);
        }
        if let Some(ms) = self.stage_timeout_ms {
            config = config.with_timeout_per_stage(Duration::from_millis(ms));
        }
        if self.no_cross_reference {
            config = config.with_cross_reference(false);
        }
        if self.no_hypotheses {
            config = config.with_hypotheses(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Investigative analysis starting..."
    );

    match cli.command {
        Command::Analyze(args) => analyze(config, args).await,
    }
}

async fn analyze(config: Config, args: AnalyzeArgs) -> anyhow::Result<()> {
    let articles = args
        .articles
        .iter()
        .map(|path| load_article(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let session_config = args.session_config(&config.analysis.session);

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if let Err(e) = langbase
        .ensure_analysis_pipe(&config.pipes.analysis, ANALYST_PERSONA_PROMPT)
        .await
    {
        error!(error = %e, pipe = %config.pipes.analysis, "Failed to ensure analysis pipe exists");
        return Err(e.into());
    }

    let storage = if args.no_persist {
        None
    } else {
        let storage = SqliteStorage::new(&config.database).await?;
        info!(path = %config.database.path.display(), "Database initialized");
        Some(storage)
    };

    // A stage timeout drops the in-flight call, so retries stop short of it.
    let langbase = langbase.with_call_budget(session_config.timeout_per_stage);
    let model = Arc::new(LangbasePipe::new(langbase, config.pipes.analysis.clone()));
    let controller = AnalysisController::new(model);

    let mut session_ids = Vec::with_capacity(articles.len());
    for article in articles {
        let session = controller
            .start_analysis(article, session_config.clone())
            .await?;
        session_ids.push(session.id.clone());
    }

    // Enough for every stage to hit its own limit, plus one stage of slack.
    let stages = session_config.effective_stage_count(controller.registered_stages()) as u32;
    let wait = session_config
        .timeout_per_stage
        .saturating_mul(stages.saturating_add(1));

    let mut finished: Vec<Arc<AnalysisSession>> = Vec::with_capacity(session_ids.len());
    for id in &session_ids {
        match controller.wait_for_completion(id, wait).await {
            Ok(session) => finished.push(session),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session did not finish, terminating");
                controller.terminate_session(id).await?;
                finished.push(controller.get_session(id).await?);
            }
        }
    }

    if let Some(storage) = &storage {
        for session in &finished {
            if session.status == SessionStatus::Completed {
                storage.save_session(session).await?;
            }
        }
    }

    let output: Vec<&AnalysisSession> = finished.iter().map(|s| s.as_ref()).collect();
    println!("{}", serde_json::to_string_pretty(&output)?);

    let failed = finished
        .iter()
        .filter(|s| s.status != SessionStatus::Completed)
        .count();
    info!(sessions = finished.len(), failed, "Analysis run complete");
    Ok(())
}

fn load_article(path: &Path) -> anyhow::Result<Article> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read article {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid article JSON in {}", path.display()))
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
