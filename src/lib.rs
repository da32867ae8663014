pub mod agents;
pub mod config;
pub mod store;
pub mod task;
pub mod watcher;

pub use agents::orchestrator::Orchestrator;
pub use agents::Agent;
pub use config::OrchestratorConfig;
pub use store::{FsTaskStore, MemoryTaskStore, TaskStore};
pub use task::{Task, TaskError, TaskStatus};
pub use watcher::TaskScanner;

use agents::diagnostic_agent::DiagnosticAgent;
use agents::file_agent::FileAgent;
use agents::web_agent::WebAgent;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Wire the default agent set into an orchestrator.
pub fn register_default_agents(orchestrator: &mut Orchestrator) {
    orchestrator.register_agent_class(
        "file",
        Box::new(|name, workspace| Box::new(FileAgent::new(name, workspace))),
    );
    orchestrator.register_agent_class(
        "web",
        Box::new(|name, workspace| Box::new(WebAgent::new(name, workspace))),
    );
    orchestrator.register_agent_class(
        "diagnostic",
        Box::new(|name, _workspace| Box::new(DiagnosticAgent::new(name))),
    );
}

/// Run the orchestrator with the default agents and the comment scanner
/// until ctrl-c.
///
/// `TASKHIVE_WORKSPACE` selects the workspace directory (default
/// `./workspace`); `TASKHIVE_SCAN_DIR` selects the tree scanned for
/// `#AI_TASK` comments (default the current directory).
pub async fn run() -> Result<()> {
    let workspace =
        PathBuf::from(std::env::var("TASKHIVE_WORKSPACE").unwrap_or_else(|_| "workspace".into()));
    let scan_dir =
        PathBuf::from(std::env::var("TASKHIVE_SCAN_DIR").unwrap_or_else(|_| ".".into()));

    let config = OrchestratorConfig::load(workspace.join("orchestrator").join("config.json")).await?;
    let store: Arc<dyn TaskStore> = Arc::new(FsTaskStore::new(&workspace));
    let mut orchestrator = Orchestrator::with_store(&workspace, store, config.clone());
    orchestrator.load_state().await?;

    register_default_agents(&mut orchestrator);
    for (agent_type, agent_name) in [("file", "files-1"), ("web", "web-1"), ("diagnostic", "diag-1")]
    {
        orchestrator.spawn_agent(agent_type, agent_name)?;
        orchestrator.start_agent(agent_name);
    }

    // Baseline environment probe before any scanned work arrives.
    orchestrator.execute_task("system_check", "Startup environment check", None);

    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let stop = Arc::new(AtomicBool::new(false));
    let scanner = TaskScanner::new();
    let watcher = tokio::spawn(scanner.watch(
        scan_dir,
        Arc::clone(&orchestrator),
        Duration::from_millis(config.scan_interval_ms),
        Arc::clone(&stop),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    stop.store(true, Ordering::SeqCst);
    let _ = watcher.await;

    let mut orchestrator = orchestrator.lock().await;
    let status = orchestrator.get_system_status();
    tracing::info!("final status: {}", serde_json::to_string(&status)?);
    let health = orchestrator.health_check();
    tracing::info!("final health: {}", serde_json::to_string(&health)?);
    orchestrator.save_state().await?;
    orchestrator.shutdown().await;
    Ok(())
}
