/// Server setup and initialization
///
/// Wires together all components: stores, state manager, execution engine,
/// debugger, scheduler daemon and HTTP routes.

use crate::{
    api::{create_debug_routes, create_schedule_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        Broadcaster, EventBus, LoggingBroadcaster, SchedulerDaemon, WorkflowDebugger,
        WorkflowExecutionEngine, WorkflowStateManager,
    },
    schedule::{ExecutionHistory, ScheduledWorkflow},
    workflow::{JsonFileStore, WorkflowDefinition},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Fully wired application: router plus the daemon it shares state with
pub struct App {
    pub router: Router,
    pub state: AppState,
}

/// Create the main Axum application with all routes
///
/// Initializes storage directories, the engine with its debugger and the
/// scheduler daemon. The daemon is not started here.
pub async fn create_app(config: &Config) -> Result<App> {
    tracing::info!("📁 Using data directory: {}", config.storage.data_dir);
    let workflows = Arc::new(
        JsonFileStore::<WorkflowDefinition>::open(config.storage.workflows_dir())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open workflow storage: {}", e))?,
    );
    let schedules = Arc::new(
        JsonFileStore::<ScheduledWorkflow>::open(config.storage.schedules_dir())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open schedule storage: {}", e))?,
    );
    let history = Arc::new(ExecutionHistory::open(config.storage.history_dir()).await?);

    tracing::info!("🚀 Initializing execution engine");
    let event_bus = Arc::new(EventBus::new());
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(LoggingBroadcaster);
    let debugger = Arc::new(WorkflowDebugger::new(
        Arc::clone(&event_bus),
        config.storage.debug_dir(),
    ));
    let engine = Arc::new(
        WorkflowExecutionEngine::new(Arc::clone(&event_bus), Arc::new(WorkflowStateManager::new()))
            .with_debugger(Arc::clone(&debugger))
            .with_broadcaster(Arc::clone(&broadcaster)),
    );

    tracing::info!("⏰ Initializing scheduler daemon");
    let daemon = Arc::new(
        SchedulerDaemon::new(
            Arc::clone(&engine),
            workflows.clone(),
            schedules.clone(),
            history,
            config.scheduler.clone(),
        )
        .with_broadcaster(broadcaster),
    );

    let state = AppState {
        workflows,
        schedules,
        engine,
        debugger,
        daemon,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_debug_routes())
        .merge(create_schedule_routes())
        .with_state(state.clone());

    tracing::info!("✅ Application initialized successfully");
    Ok(App { router, state })
}

/// Start the HTTP server with the given configuration
///
/// Installs the tracing subscriber, starts the scheduler daemon when enabled
/// and serves until ctrl-c, then drains the daemon.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Mechaflow server...");
    let app = create_app(&config).await?;
    let daemon = Arc::clone(&app.state.daemon);

    if config.scheduler.enabled {
        daemon.start().await?;
    } else {
        tracing::info!("⏸️ Scheduler daemon disabled by configuration");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    daemon.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, ServerConfig, StorageConfig};

    #[tokio::test]
    async fn create_app_lays_out_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            storage: StorageConfig {
                data_dir: dir.path().to_string_lossy().into_owned(),
            },
            scheduler: SchedulerConfig {
                enabled: false,
                check_interval_secs: 60,
                monitor_poll_secs: 10,
                execution_timeout_secs: 3600,
                shutdown_grace_secs: 300,
            },
        };

        let app = create_app(&config).await.unwrap();
        assert!(dir.path().join("workflows").is_dir());
        assert!(dir.path().join("schedules").is_dir());
        assert!(dir.path().join("schedule_executions").is_dir());
        assert!(!app.state.daemon.is_running());
        assert!(app.state.engine.debugger().is_some());
    }
}
