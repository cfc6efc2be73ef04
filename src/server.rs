/// Server setup and initialization
///
/// Wires together storage, the LLM backend, the agent registry, the execution
/// engine, and the HTTP routes.

use crate::{
    agents::{register_builtin_agents, AgentRegistry, HttpLlmBackend, LlmBackend},
    api::{create_execution_routes, create_generate_routes, create_health_routes, create_project_routes, AppState},
    config::Config,
    runtime::ExecutionEngine,
    workflow::{SqliteWorkflowStore, WorkflowStore},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Router over an already-built application state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_project_routes())
        .merge(create_execution_routes())
        .merge(create_health_routes())
        .merge(create_generate_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
///
/// Opens (or creates) `{data_dir}/flynt.db`, registers the built-in agents
/// against the configured LLM backend and starts an engine with the configured
/// tunables.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let db_path = Path::new(&config.database.data_dir).join("flynt.db");
    tracing::info!("🗄️ Opening workflow database: {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    let sqlite_store = SqliteWorkflowStore::new(pool);
    sqlite_store
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize workflow schema: {}", e))?;
    let store: Arc<dyn WorkflowStore> = Arc::new(sqlite_store);

    tracing::info!("🤖 Connecting LLM backend: {} ({})", config.llm.base_url, config.llm.model);
    let backend: Arc<dyn LlmBackend> = Arc::new(HttpLlmBackend::from_config(&config.llm)?);

    let registry = Arc::new(AgentRegistry::new());
    register_builtin_agents(&registry, backend.clone());
    tracing::info!("📊 Registered {} agents", registry.len());

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(store.clone(), registry, config.engine.clone()));

    let app = build_router(AppState { engine, store, backend });
    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Flynt orchestrator...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Liveness probe
async fn health_check() -> &'static str {
    "ok"
}
