//! Semantic book discovery over a fixed library catalogue.
//!
//! `onceupon build` ingests the catalogue, encodes every book and writes a
//! matched index/catalogue pair. `onceupon search` and `onceupon serve` load
//! that pair once and answer free-text queries by exact nearest-neighbour
//! search. `serve` also keeps a per-connection carousel of featured books.

pub mod carousel;
pub mod catalogue;
pub mod config;
pub mod indexer;
pub mod model;
pub mod search;
pub mod server;
pub mod session;
pub mod storage;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::catalogue::CatalogueStore;
use crate::catalogue::ingest::{IngestError, read_catalogue};
use crate::config::{AppConfig, ConfigError};
use crate::indexer::semantic::{BookIndexer, BuildError};
use crate::model::types::BookView;
use crate::search::embedder::{Embedder, EmbedderError, EmbedderKind, load_embedder};
use crate::search::query::{QueryEngine, QueryError};
use crate::server::{QueryServer, ServeError, ServerState};
use crate::storage::artifacts::{
    ArtifactError, LoadedArtifacts, Manifest, REBUILD_HINT, load_pair,
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "onceupon",
    version,
    about = "Describe the book you want; get the closest titles from the library catalogue"
)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/onceupon/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the index, catalogue snapshot and covers
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Text encoder; defaults to the one recorded in the index when reading it
    #[arg(long, global = true, value_enum)]
    pub embedder: Option<EmbedderKind>,

    /// Machine-readable JSON output (errors included)
    #[arg(long, global = true, alias = "robot")]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Ingest the catalogue and build the vector index
    Build {
        /// Catalogue CSV (default: catalogue.input from config)
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Texts encoded per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Run one query against the built index
    Search {
        /// What kind of book are you looking for?
        text: String,

        /// Number of results
        #[arg(short = 'k', long = "limit")]
        k: Option<usize>,
    },
    /// Serve queries and carousel sessions over TCP
    Serve {
        /// Address to listen on (default: server.listen from config)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Verify the artifacts and print their manifest
    Inspect,
}

/// Structured failure surfaced at the binary boundary.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

pub type CliResult<T = ()> = Result<T, CliError>;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_VALIDATION: i32 = 2;
pub const EXIT_ARTIFACT_LOAD: i32 = 3;
pub const EXIT_MODEL_UNAVAILABLE: i32 = 4;
pub const EXIT_CONSISTENCY_FAULT: i32 = 5;

impl CliError {
    fn new(code: i32, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            hint: None,
            retryable: false,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn other(err: impl std::fmt::Display) -> Self {
        Self::new(EXIT_FAILURE, "internal", err.to_string())
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n{hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::new(EXIT_VALIDATION, "config", err.to_string())
            .with_hint("Check the config file or pass --config with a valid path.")
    }
}

impl From<IngestError> for CliError {
    fn from(err: IngestError) -> Self {
        CliError::new(EXIT_VALIDATION, "catalogue_input", err.to_string())
            .with_hint("Pass --input with the enriched catalogue CSV (needs a 'title' column).")
    }
}

impl From<EmbedderError> for CliError {
    fn from(err: EmbedderError) -> Self {
        match err {
            EmbedderError::EmbedderUnavailable { .. } => {
                CliError::new(EXIT_MODEL_UNAVAILABLE, "model_unavailable", err.to_string())
                    .with_hint(
                        "Place all-MiniLM-L6-v2 under <data_dir>/models (or set embedder.model_dir), \
                         or use --embedder hash.",
                    )
            }
            EmbedderError::InvalidInput { .. } => {
                CliError::new(EXIT_VALIDATION, "invalid_query", err.to_string()).with_hint(
                    "Describe the book in words, e.g. \"a cozy mystery in a small town\".",
                )
            }
            EmbedderError::InvalidConfig { .. } => {
                CliError::new(EXIT_VALIDATION, "embedder_config", err.to_string())
            }
            _ => CliError::new(EXIT_FAILURE, "embedding_failed", err.to_string()),
        }
    }
}

impl From<ArtifactError> for CliError {
    fn from(err: ArtifactError) -> Self {
        CliError::new(EXIT_ARTIFACT_LOAD, "artifact_load_failure", err.to_string())
            .with_hint(REBUILD_HINT)
    }
}

impl From<BuildError> for CliError {
    fn from(err: BuildError) -> Self {
        let message = err.to_string();
        match err {
            BuildError::EmptyCatalogue => {
                CliError::new(EXIT_VALIDATION, "empty_catalogue", message)
                    .with_hint("The catalogue input has no usable rows; nothing was written.")
            }
            BuildError::InvalidBatchSize => CliError::new(EXIT_VALIDATION, "config", message),
            BuildError::Embedding(inner) => inner.into(),
            BuildError::Artifact(_) => {
                CliError::new(EXIT_FAILURE, "artifact_write_failure", message)
            }
            _ => CliError::new(EXIT_FAILURE, "build_failed", message),
        }
    }
}

impl From<QueryError> for CliError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::EmptyQuery => CliError::new(EXIT_VALIDATION, "empty_query", message)
                .with_hint("Describe the kind of book you want, e.g. \"a cozy mystery in a small town\"."),
            QueryError::Embedding(inner) => inner.into(),
            QueryError::Index(_) | QueryError::IndexConsistencyFault { .. } => CliError::new(
                EXIT_CONSISTENCY_FAULT,
                "index_consistency_fault",
                message,
            )
            .with_hint(REBUILD_HINT),
        }
    }
}

impl From<ServeError> for CliError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::Halted { .. } => CliError::new(
                EXIT_CONSISTENCY_FAULT,
                "index_consistency_fault",
                err.to_string(),
            )
            .with_hint(REBUILD_HINT),
            _ => CliError::new(EXIT_FAILURE, "serve_failed", err.to_string()),
        }
    }
}

/// Parsed command line plus whether errors should be printed as JSON.
#[derive(Debug, Clone)]
pub struct ParsedCli {
    pub cli: Cli,
    pub robot: bool,
}

pub fn parse_cli(raw_args: Vec<String>) -> CliResult<ParsedCli> {
    match Cli::try_parse_from(raw_args) {
        Ok(cli) => {
            let robot = cli.json;
            Ok(ParsedCli { cli, robot })
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                err.exit()
            }
            _ => Err(CliError::new(EXIT_VALIDATION, "usage", err.to_string())),
        },
    }
}

/// Install the tracing subscriber. With `log_dir`, a daily-rolling file is
/// written alongside stderr; keep the guard alive until exit.
pub fn init_logging(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_directive = match verbose {
        0 => "onceupon=info",
        1 => "onceupon=debug",
        _ => "onceupon=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "onceupon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    // A subscriber may already be set (tests); that is fine.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

pub fn run_with_parsed(parsed: ParsedCli) -> CliResult {
    let cli = parsed.cli;
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    let log_dir = matches!(cli.command, Commands::Serve { .. }).then(|| config.data_dir().join("logs"));
    let _guard = init_logging(cli.verbose, log_dir.as_deref());

    match &cli.command {
        Commands::Build { input, batch_size } => {
            run_build(&config, &cli, input.as_deref(), *batch_size)
        }
        Commands::Search { text, k } => run_search(&config, &cli, text, *k),
        Commands::Serve { listen } => run_serve(&config, &cli, listen.as_deref()),
        Commands::Inspect => run_inspect(&config, &cli),
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    let out = serde_json::to_string_pretty(value).map_err(CliError::other)?;
    println!("{out}");
    Ok(())
}

fn run_build(
    config: &AppConfig,
    cli: &Cli,
    input: Option<&Path>,
    batch_size: Option<usize>,
) -> CliResult {
    let input = input.map_or_else(|| config.catalogue.input.clone(), Path::to_path_buf);
    let data_dir = config.data_dir();

    let report = read_catalogue(&input)?;
    if report.skipped > 0 {
        warn!(skipped = report.skipped, "rows without a title were skipped");
    }
    let catalogue = CatalogueStore::from_records(report.records);
    info!(books = catalogue.len(), input = %input.display(), "catalogue loaded");

    let kind = cli.embedder.unwrap_or(config.embedder.kind);
    let embedder = load_embedder(kind, &config.model_dir(), config.embedder.hash_dimension)?;
    let indexer = BookIndexer::new(embedder)
        .with_batch_size(batch_size.unwrap_or(config.embedder.batch_size))?;
    let summary = indexer.build(&catalogue, &data_dir)?;

    if cli.json {
        return print_json(&summary);
    }
    println!(
        "{} {} books indexed with {} ({} dims)",
        "Built".green().bold(),
        summary.manifest.record_count,
        summary.manifest.embedder_id,
        summary.manifest.dimension
    );
    println!("  index:     {}", summary.index_path);
    println!("  catalogue: {}", summary.catalogue_path);
    if report.skipped > 0 {
        println!("  skipped:   {} rows without a title", report.skipped);
    }
    Ok(())
}

/// Load the artifact pair and the encoder that can query it.
fn load_engine(config: &AppConfig, cli: &Cli) -> CliResult<QueryEngine> {
    let artifacts = load_pair(&config.data_dir())?;
    let embedder = embedder_for(config, cli.embedder, &artifacts.manifest)?;
    Ok(QueryEngine::from_artifacts(embedder, artifacts)?)
}

/// An explicit `--embedder` wins; otherwise follow the manifest, then config.
fn embedder_for(
    config: &AppConfig,
    requested: Option<EmbedderKind>,
    manifest: &Manifest,
) -> CliResult<Arc<dyn Embedder>> {
    let (kind, dimension) = match requested {
        Some(kind) => (kind, config.embedder.hash_dimension),
        None => EmbedderKind::from_embedder_id(&manifest.embedder_id)
            .unwrap_or((config.embedder.kind, config.embedder.hash_dimension)),
    };
    Ok(load_embedder(kind, &config.model_dir(), dimension)?)
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    count: usize,
    results: Vec<SearchOutputItem>,
}

#[derive(Serialize)]
struct SearchOutputItem {
    rank: usize,
    distance: f32,
    score: f32,
    match_label: String,
    book: BookView,
}

fn run_search(config: &AppConfig, cli: &Cli, text: &str, k: Option<usize>) -> CliResult {
    let k = k.unwrap_or(config.search.top_k);
    if k == 0 {
        return Err(CliError::new(EXIT_VALIDATION, "usage", "-k must be > 0"));
    }
    let engine = load_engine(config, cli)?;
    let results = engine.query(text, k)?;
    let covers_dir = config.covers_dir();

    let items: Vec<SearchOutputItem> = results
        .hits()
        .iter()
        .enumerate()
        .map(|(i, hit)| SearchOutputItem {
            rank: i + 1,
            distance: hit.distance,
            score: hit.score,
            match_label: hit.match_label(),
            book: BookView::from_record(&hit.book, &covers_dir),
        })
        .collect();

    if cli.json {
        return print_json(&SearchOutput {
            query: &results.query,
            count: items.len(),
            results: items,
        });
    }

    if items.is_empty() {
        println!("{}", "No matching books found.".yellow());
        return Ok(());
    }
    for item in &items {
        println!(
            "{:>2}. {} by {}  {}",
            item.rank,
            item.book.title.bold(),
            item.book.author,
            item.match_label.cyan()
        );
        println!("    Call number: {}", item.book.call_number);
        println!("    Cover: {}", item.book.cover.dimmed());
        println!("    {}", item.book.blurb);
        println!();
    }
    Ok(())
}

fn run_serve(config: &AppConfig, cli: &Cli, listen: Option<&str>) -> CliResult {
    let engine = load_engine(config, cli)?;
    let listen = listen.unwrap_or(&config.server.listen);
    let state = ServerState::new(
        engine,
        config.covers_dir(),
        config.carousel_config(),
        config.search.top_k,
    );
    let server = QueryServer::bind(listen, state)?;
    let addr = server.local_addr().map_err(CliError::other)?;
    if cli.json {
        print_json(&serde_json::json!({ "listening": addr.to_string() }))?;
    } else {
        println!("{} on {}", "Serving".green().bold(), addr);
    }
    server.run()?;
    Ok(())
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    data_dir: String,
    manifest: &'a Manifest,
    catalogue_size: usize,
    index_len: usize,
    dimension: usize,
}

fn run_inspect(config: &AppConfig, cli: &Cli) -> CliResult {
    let data_dir = config.data_dir();
    let LoadedArtifacts {
        index,
        catalogue,
        manifest,
    } = load_pair(&data_dir)?;

    let output = InspectOutput {
        data_dir: data_dir.display().to_string(),
        manifest: &manifest,
        catalogue_size: catalogue.len(),
        index_len: index.len(),
        dimension: index.dimension(),
    };
    if cli.json {
        return print_json(&output);
    }
    println!("{}", "Artifacts OK".green().bold());
    println!("  data dir:   {}", output.data_dir);
    println!("  books:      {}", output.catalogue_size);
    println!("  embedder:   {}", manifest.embedder_id);
    println!("  dimension:  {}", output.dimension);
    println!("  built at:   {}", manifest.built_at.to_rfc3339());
    Ok(())
}
