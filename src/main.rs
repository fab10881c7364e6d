/// Mechaflow: workflow orchestration core
///
/// Main entry point for the Mechaflow server. Loads configuration from the
/// environment and starts the HTTP server and scheduler daemon.

use mechaflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management and execution at /api/workflows/*
/// - Debug session control at /api/debug/sessions/*
/// - Schedules at /api/schedules/* and daemon status at /api/scheduler/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
