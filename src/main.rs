/// Flynt orchestrator server
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server:
/// - Project and workflow seeding at /api/projects/*
/// - Execution start, status and cancel at /api/projects/{id}/execute(ions)
/// - Live execution events at /api/ws/executions/{execution_id}
/// - Agent health at /api/health/*
/// - Liveness at /healthz

use flynt_orchestrator::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:8000 and data/flynt.db; FLYNT_* variables override
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
