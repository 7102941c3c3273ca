//! # Coursewright CLI (`cw`)
//!
//! ## Usage
//!
//! ```bash
//! cw --config ./config/cw.toml <command>
//! ```
//!
//! The document index lives in memory, so every command that reads it
//! first ingests `[ingest] root` (or the `--materials` directory).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cw ingest [dir]` | Ingest a directory and report what was indexed |
//! | `cw search "<query>"` | Search the ingested materials |
//! | `cw generate --params <file> [--format csv]` | Generate a course |
//! | `cw strategy --params <file>` | Synthesize a strategy proposal |
//! | `cw stats` | Index and provider summary |
//! | `cw serve` | Start the HTTP server |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use coursewright::app::App;
use coursewright::config::{self, Config};
use coursewright::export::{render_course, ExportFormat};
use coursewright::ingest::IngestReport;
use coursewright::strategy::StrategyParameters;
use coursewright_core::models::{Course, GenerationParameters};

/// Coursewright: retrieval-augmented course and strategy synthesis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cw.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "cw", version, about = "Retrieval-augmented course and strategy synthesis")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cw.toml")]
    config: PathBuf,

    /// Materials directory to ingest before running; overrides `[ingest] root`.
    #[arg(long, global = true)]
    materials: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a directory of teaching materials.
    ///
    /// Files matching `[ingest] include_globs` are split into word windows
    /// and indexed. Prints per-run counts.
    Ingest {
        /// Directory to ingest. Defaults to `--materials` or `[ingest] root`.
        dir: Option<PathBuf>,
    },

    /// Search the ingested materials.
    Search {
        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Minimum cosine similarity (similarity mode only).
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Generate a course from a JSON parameters file.
    Generate {
        /// JSON file with `title`, `target_audience`, `teaching_style`,
        /// `learning_objective`, and optional `compulsory_areas`.
        #[arg(long)]
        params: PathBuf,

        /// Print a progress line per stage.
        #[arg(long)]
        stream: bool,

        /// Explicit workflow thread id.
        #[arg(long)]
        thread_id: Option<String>,

        /// Output format for the finished course.
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },

    /// Synthesize a strategy proposal from a JSON parameters file.
    Strategy {
        #[arg(long)]
        params: PathBuf,
    },

    /// Show index and provider statistics.
    Stats,

    /// Start the HTTP server.
    Serve,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "coursewright=info,coursewright_core=info",
        1 => "coursewright=debug,coursewright_core=debug",
        _ => "coursewright=trace,coursewright_core=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut cfg: Config = config::load_config(&cli.config)?;
    if let Some(dir) = &cli.materials {
        cfg.ingest.root = Some(dir.clone());
    }

    match cli.command {
        Commands::Ingest { dir } => {
            let root = dir
                .or_else(|| cfg.ingest.root.clone())
                .context("no directory given and [ingest] root is not set")?;
            let app = App::from_config(cfg)?;
            let report = app.ingest(&root).await?;
            print_ingest(&root, &report);
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let app = load_app(cfg).await?;
            coursewright::search::run_search(&app, &query, limit, threshold).await?;
        }
        Commands::Generate {
            params,
            stream,
            thread_id,
            format,
        } => {
            let params: GenerationParameters = read_json(&params)?;
            let app = Arc::new(load_app(cfg).await?);
            let course = if stream {
                run_generate_stream(&app, params, thread_id).await?
            } else {
                app.engine.run(params, thread_id).await?
            };
            print!("{}", render_course(&course, format)?);
            if format == ExportFormat::Json {
                println!();
            }
        }
        Commands::Strategy { params } => {
            let params: StrategyParameters = read_json(&params)?;
            let app = load_app(cfg).await?;
            let outcome = app.strategy.synthesize(&params).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Stats => {
            let app = load_app(cfg).await?;
            coursewright::stats::run_stats(&app).await?;
        }
        Commands::Serve => {
            let app = Arc::new(load_app(cfg).await?);
            coursewright::server::run_server(app).await?;
        }
    }

    Ok(())
}

/// Build the app and load the configured materials directory.
async fn load_app(cfg: Config) -> Result<App> {
    let app = App::from_config(cfg)?;
    if let Some(report) = app.ingest_configured_root().await? {
        tracing::info!(
            files = report.files,
            chunks = report.chunks,
            "materials loaded"
        );
    }
    Ok(app)
}

async fn run_generate_stream(
    app: &Arc<App>,
    params: GenerationParameters,
    thread_id: Option<String>,
) -> Result<Course> {
    let mut events = Box::pin(app.engine.stream(params, thread_id));
    while let Some(event) = events.next().await {
        if let Some(err) = &event.error {
            bail!("generation failed at {}: {}", event.step, err);
        }
        println!("[{:>3}%] {}: {}", event.progress, event.step, event.message);
        if event.is_terminal() {
            let course = event
                .payload
                .and_then(|mut p| p.get_mut("course").map(serde_json::Value::take))
                .context("completed event carried no course")?;
            return Ok(serde_json::from_value(course)?);
        }
    }
    bail!("generation stream ended without a completed event")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameters file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid parameters file: {}", path.display()))
}

fn print_ingest(root: &Path, report: &IngestReport) {
    println!("ingest {}", root.display());
    println!("  files: {}", report.files);
    println!("  chunks: {}", report.chunks);
    println!("  indexed: {}", report.indexed.succeeded);
    if report.pruned > 0 {
        println!("  pruned: {}", report.pruned);
    }
    if report.indexed.failed > 0 {
        println!("  failed: {}", report.indexed.failed);
        for f in &report.indexed.errors {
            println!("    {}: {}", f.id, f.error);
        }
    }
    if !report.skipped.is_empty() {
        println!("  skipped: {}", report.skipped.join(", "));
    }
    println!("ok");
}
