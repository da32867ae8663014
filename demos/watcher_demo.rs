use std::time::Duration;
use taskhive::{register_default_agents, Orchestrator, TaskScanner, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("TaskHive Watcher Demo");
    println!("=====================\n");

    let workspace = tempfile::tempdir()?;
    let source_dir = workspace.path().join("project");
    tokio::fs::create_dir_all(&source_dir).await?;
    tokio::fs::write(
        source_dir.join("main.rs"),
        "// #AI_TASK: Create a portfolio website [priority:high]\n\
         // #AI_TASK: Check the build environment [type:dependency_check]\n\
         fn main() {}\n",
    )
    .await?;

    let mut orchestrator = Orchestrator::new(workspace.path())?;
    register_default_agents(&mut orchestrator);
    for (agent_type, agent_name) in [("web", "web-1"), ("diagnostic", "diag-1")] {
        orchestrator.spawn_agent(agent_type, agent_name)?;
        orchestrator.start_agent(agent_name);
    }

    let mut scanner = TaskScanner::new();
    let submitted = scanner.scan_and_submit(&source_dir, &mut orchestrator).await?;
    println!("📡 Scanner submitted {} task(s)\n", submitted);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let store = orchestrator.store();
    for agent_name in ["web-1", "diag-1"] {
        for task in store.list(agent_name).await? {
            println!("✅ [{}] {} -> {}", agent_name, task.description, task.status.as_str());
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
