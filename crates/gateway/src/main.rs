mod action_handler;
mod api;
mod cancel;
mod orchestrator;
mod pruner;
mod session_manager;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use opentelemetry::trace::TracerProvider as _;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use cce_domain::config::{Config, ConfigSeverity, LogFormat};
use cce_memory::{EpisodicStore, UserFactStore};
use cce_promptbuilder::{PromptBuilder, TierGenerator};
use cce_sessions::{SessionLockMap, SessionRegistry, TierStore};

use crate::action_handler::ActionHandler;
use crate::cancel::CancelMap;
use crate::orchestrator::Orchestrator;
use crate::pruner::Pruner;
use crate::session_manager::SessionManager;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "cce-gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a TOML config file. Falls back to built-in defaults if absent.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Validate the config file and exit.
    ConfigValidate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config.as_deref())?);

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing(&config);
            run_server(config).await
        }
        Some(Command::ConfigValidate) => {
            let issues = config.validate();
            for issue in &issues {
                println!("[{:?}] {}: {}", issue.severity, issue.field, issue.message);
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("config OK");
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("reading config file {}", p.display()))?;
            Ok(Config::load_from_str(&raw)?)
        }
        None => Ok(Config::default()),
    }
}

/// Structured logging with an optional OTLP trace export layer, matching
/// `config.observability`. Falls back to a plain registry if the OTLP
/// pipeline fails to build.
fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.observability.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
    };

    let registry = Registry::default().with(env_filter).with(fmt_layer);

    match &config.observability.otlp_endpoint {
        Some(endpoint) => match build_otlp_layer(endpoint) {
            Ok(otlp_layer) => registry.with(otlp_layer).init(),
            Err(e) => {
                registry.init();
                tracing::warn!(error = %e, "failed to initialize OTLP exporter, continuing without it");
            }
        },
        None => registry.init(),
    }
}

fn build_otlp_layer(
    endpoint: &str,
) -> anyhow::Result<tracing_opentelemetry::OpenTelemetryLayer<Registry, opentelemetry_sdk::trace::Tracer>>
{
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer("cce-gateway");
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("context engine starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => {
                tracing::warn!(field = %issue.field, message = %issue.message, "config warning")
            }
            ConfigSeverity::Error => {
                tracing::error!(field = %issue.field, message = %issue.message, "config error")
            }
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let state_dir = std::path::PathBuf::from(&config.storage.state_dir);
    std::fs::create_dir_all(&state_dir).context("creating state directory")?;

    let tier_store = Arc::new(TierStore::open(&state_dir.join("tiers")).context("opening tier store")?);
    let episodic_store =
        Arc::new(EpisodicStore::open(&state_dir.join("episodes")).context("opening episodic store")?);
    let user_fact_store =
        Arc::new(UserFactStore::open(&state_dir.join("facts")).context("opening user fact store")?);
    let session_registry =
        Arc::new(SessionRegistry::open(&state_dir.join("sessions")).context("opening session registry")?);
    let session_locks = Arc::new(SessionLockMap::new());
    tracing::info!("stores ready");

    let llm = cce_providers::build_llm_provider(&config.llm).context("building LLM provider")?;
    let search = cce_providers::build_search_provider(&config.search).context("building search provider")?;
    tracing::info!(provider = llm.provider_id(), search_enabled = search.is_some(), "providers ready");

    let tier_generator = Arc::new(TierGenerator::new(Some(llm.clone())));
    let prompt_builder = Arc::new(PromptBuilder::new(config.orchestrator.prompt_token_budget));
    let action_handler = Arc::new(ActionHandler::new(
        search.clone(),
        tier_store.clone(),
        user_fact_store.clone(),
        episodic_store.clone(),
    ));
    let pruner = Arc::new(Pruner::new(
        tier_store.clone(),
        episodic_store.clone(),
        config.orchestrator.turn_keep_floor,
        config.orchestrator.safety_margin_tokens,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        tier_store.clone(),
        user_fact_store.clone(),
        session_registry.clone(),
        tier_generator,
        prompt_builder,
        action_handler,
        pruner,
        llm,
        Duration::from_secs(config.orchestrator.llm_call_timeout_secs),
        config.orchestrator.prompt_token_budget,
        config.orchestrator.max_loop,
    ));
    let session_manager = Arc::new(SessionManager::new(
        session_registry,
        session_locks,
        tier_store.clone(),
        episodic_store.clone(),
    ));
    let cancel_map = Arc::new(CancelMap::new());

    let state = AppState {
        config: config.clone(),
        search,
        tier_store,
        episodic_store,
        user_fact_store,
        session_manager: session_manager.clone(),
        orchestrator,
        cancel_map,
    };

    let sweep_interval = Duration::from_secs(config.sessions.eviction_sweep_interval_secs);
    let idle_ttl_secs = config.sessions.idle_ttl_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            session_manager.sweep_idle(idle_ttl_secs);
        }
    });

    let cors = build_cors_layer(&config.server.cors_allowed_origins);
    let app = api::router().layer(cors).with_state(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {}", config.server.bind_addr))?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Supports exact origins and `"<scheme>://<host>:*"` wildcard-port entries.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
