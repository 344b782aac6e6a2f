use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use aris_domain::config::{Config, ConfigSeverity};
use aris_gateway::api;
use aris_gateway::runtime::ingest::DisabledIngestor;
use aris_gateway::state::AppState;
use aris_mcp_client::McpDispatcher;
use aris_providers::{BedrockProvider, LlmClient};
use aris_store::{Database, MemoryStore, PlanStore, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CLI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Parser)]
#[command(name = "aris", about = "ARIS agent orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the environment-derived configuration.
    Validate,
    /// Print the effective configuration as JSON.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::from_env().context("loading configuration from environment")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = Config::from_env().context("loading configuration from environment")?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count();
            if errors > 0 {
                std::process::exit(1);
            }
            println!("configuration OK ({} warning(s))", issues.len());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::from_env().context("loading configuration from environment")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("aris {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aris_gateway=debug")),
        )
        .json()
        .init();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("ARIS starting");

    // ── Config validation ────────────────────────────────────────────
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
    if config.server.tls_cert_path.is_some() {
        tracing::info!(
            "TLS certificate paths configured — expecting the fronting ingress to terminate TLS"
        );
    }

    // ── Persistence ──────────────────────────────────────────────────
    let db = Database::open(&config.store.db_path).context("opening database")?;
    let sessions = SessionStore::new(db.clone());
    let plans = PlanStore::new(db.clone());
    let memory = MemoryStore::new(db);
    tracing::info!(path = %config.store.db_path, "stores ready");

    // ── LLM provider ─────────────────────────────────────────────────
    let llm: Arc<dyn LlmClient> =
        Arc::new(BedrockProvider::from_config(&config.llm).context("initializing LLM provider")?);
    tracing::info!(region = %config.llm.region, model = %config.llm.default_model_id, "LLM provider ready");

    // ── MCP dispatcher ───────────────────────────────────────────────
    let mcp = Arc::new(McpDispatcher::from_config(&config.mcp));
    if mcp.is_empty() {
        tracing::info!("no MCP servers configured");
    } else {
        let results = mcp.start_all().await;
        let connected = results.values().filter(|r| r.is_ok()).count();
        tracing::info!(
            configured = results.len(),
            connected,
            "MCP dispatcher warm-up complete"
        );
        for (server, result) in &results {
            if let Err(e) = result {
                tracing::warn!(server = %server, error = %e, "MCP server unavailable at startup");
            }
        }
        let tools = mcp.list_tools().await;
        tracing::info!(tools = tools.len(), "MCP tools discovered");
    }

    // ── API token (read once, hashed for constant-time comparison) ──
    let api_token_hash = api::auth::token_hash_from_env(&config.server.api_token_env);

    let state = AppState {
        config: config.clone(),
        sessions,
        plans,
        memory: memory.clone(),
        mcp,
        llm,
        ingestor: Arc::new(DisabledIngestor),
        api_token_hash,
    };

    // ── Expired-memory sweeper ───────────────────────────────────────
    {
        let memory = memory.clone();
        let interval_secs = config.sessions.memory_sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = memory.sweep_expired().await {
                    tracing::warn!(error = %e, "memory sweep failed");
                }
            }
        });
        tracing::info!(interval_secs, "memory sweeper started");
    }

    // ── Router ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router().layer(cors_layer).with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "ARIS listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` allows all origins (dev only).
fn build_cors_layer(cors: &aris_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
