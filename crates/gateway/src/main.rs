use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dg_bus::build_event_bus;
use dg_domain::config::{Config, ConfigSeverity};
use dg_gateway::api;
use dg_gateway::pipeline::Downstreams;
use dg_gateway::state::{DialogueState, GraphState, ParserState, SuggestionState};
use dg_gateway::worker::IngestWorker;
use dg_graph::GraphStore;
use dg_parser::build_parser_backend;
use dg_stores::{build_job_store, build_session_store, ContentCipher};

#[derive(Parser)]
#[command(name = "dialograph", version, about = "Dialograph knowledge-graph dialogue services")]
struct Cli {
    /// Path to the TOML config file (default: ./dialograph.toml or
    /// $DIALOGRAPH_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dialogue orchestrator (the default).
    Dialogue,
    /// Run the parser service.
    Parser,
    /// Run the graph service.
    Graph,
    /// Run the suggestion service.
    Suggestion,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Dialogue) {
        Command::Dialogue => {
            init_tracing();
            run_dialogue(load_config(cli.config.as_deref())?).await
        }
        Command::Parser => {
            init_tracing();
            run_parser(load_config(cli.config.as_deref())?).await
        }
        Command::Graph => {
            init_tracing();
            run_graph(load_config(cli.config.as_deref())?).await
        }
        Command::Suggestion => {
            init_tracing();
            run_suggestion(load_config(cli.config.as_deref())?).await
        }
        Command::Config { command } => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            match command {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        println!("{issue}");
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                        std::process::exit(1);
                    }
                    println!("config OK");
                }
                ConfigCommand::Show => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("serializing config")?
                    );
                }
            }
            Ok(())
        }
        Command::Version => {
            println!("dialograph {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing for the serve commands.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dg_gateway=debug")),
        )
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Arc<Config>> {
    let config = Config::load(path).context("loading config")?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    Ok(Arc::new(config))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_dialogue(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("dialogue service starting");

    // ── Content cipher ───────────────────────────────────────────────
    let cipher = Arc::new(ContentCipher::from_config(&config.encryption));
    if cipher.enabled() {
        tracing::info!("content encryption enabled");
    } else {
        tracing::warn!("content encryption DISABLED — set encryption.content_key_hex to enable");
    }

    // ── Stores ───────────────────────────────────────────────────────
    let sessions = build_session_store(&config.stores).context("initializing session store")?;
    let jobs = build_job_store(&config.stores).context("initializing job store")?;
    tracing::info!(
        session_backend = ?config.stores.session_backend,
        job_backend = ?config.stores.job_backend,
        "stores ready"
    );

    // ── Event bus ────────────────────────────────────────────────────
    let bus = build_event_bus(&config.event_bus).context("initializing event bus")?;
    tracing::info!(backend = ?config.event_bus.backend, "event bus ready");

    // ── Downstream pipeline client ───────────────────────────────────
    let downstreams =
        Arc::new(Downstreams::new(&config.downstream).context("initializing pipeline client")?);
    tracing::info!(
        parser = %config.downstream.parser_url,
        graph = %config.downstream.graph_url,
        suggestion = %config.downstream.suggestion_url,
        timeout_ms = config.downstream.timeout_ms,
        "pipeline client ready"
    );

    let state = DialogueState {
        config: config.clone(),
        bus: bus.clone(),
        cipher,
        sessions: sessions.clone(),
        jobs: jobs.clone(),
        pipeline: downstreams.clone(),
        downstreams,
    };

    // ── Async ingest worker (exactly one per process) ────────────────
    let stop = CancellationToken::new();
    let worker_handle = if config.pipeline.async_enabled {
        let worker = Arc::new(IngestWorker::from_config(
            bus,
            jobs,
            state.pipeline.clone(),
            &config.event_bus,
            &config.pipeline,
        ));
        Some(worker.spawn(stop.clone()))
    } else {
        tracing::info!("async pipeline disabled — no ingest worker");
        None
    };

    let result = serve(
        api::dialogue_router(state),
        &config,
        config.server.dialogue_port,
        "dialogue",
    )
    .await;

    // ── Cooperative worker shutdown, join bounded at 2s ──────────────
    if let Some(handle) = worker_handle {
        stop.cancel();
        if tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .is_err()
        {
            tracing::warn!("ingest worker did not stop within the join timeout");
        }
    }

    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser / Graph / Suggestion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_parser(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("parser service starting");
    let parser = build_parser_backend(&config.parser).context("initializing parser backend")?;
    tracing::info!(backend = parser.name(), "parser backend ready");

    let state = ParserState {
        config: config.clone(),
        parser,
    };
    serve(
        api::parser_router(state),
        &config,
        config.server.parser_port,
        "parser",
    )
    .await
}

async fn run_graph(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("graph service starting");
    let state = GraphState {
        config: config.clone(),
        graph: Arc::new(GraphStore::new()),
    };
    serve(
        api::graph_router(state),
        &config,
        config.server.graph_port,
        "graph",
    )
    .await
}

async fn run_suggestion(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("suggestion service starting");
    let state = SuggestionState {
        config: config.clone(),
    };
    serve(
        api::suggestion_router(state),
        &config,
        config.server.suggestion_port,
        "suggestion",
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serving
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn serve(router: Router, config: &Config, port: u16, service: &str) -> anyhow::Result<()> {
    let app = router
        .layer(build_cors_layer(&config.server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, service, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
    }
    tracing::info!("shutdown signal received");
}

/// Build a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` allows all origins (the dev default).
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-tenant-id"),
            header::HeaderName::from_static("x-api-key"),
        ]);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
