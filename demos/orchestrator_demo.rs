use serde_json::{json, Map};
use std::time::Duration;
use taskhive::{register_default_agents, Orchestrator, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("TaskHive Orchestrator Demo");
    println!("==========================\n");

    let workspace = tempfile::tempdir()?;
    let mut orchestrator = Orchestrator::new(workspace.path())?;
    register_default_agents(&mut orchestrator);

    for (agent_type, agent_name) in [("file", "files-1"), ("web", "web-1"), ("diagnostic", "diag-1")]
    {
        orchestrator.spawn_agent(agent_type, agent_name)?;
        orchestrator.start_agent(agent_name);
    }

    // Representative tasks, including one nothing can handle.
    let mut file_metadata = Map::new();
    file_metadata.insert(
        "path".to_string(),
        json!(workspace.path().join("hello.txt").to_str().unwrap()),
    );
    file_metadata.insert("content".to_string(), json!("hello from taskhive"));

    let submissions = vec![
        ("file_create", "Write a greeting file", Some(file_metadata)),
        ("web_development", "Build a portfolio website", None),
        ("dependency_check", "Check developer tooling", None),
        ("quantum_compile", "Nothing can handle this", None),
    ];

    for (task_type, description, metadata) in submissions {
        println!("📝 Submitting: {} ({})", description, task_type);
        match orchestrator.execute_task(task_type, description, metadata) {
            Some(agent) => println!("   ➜ routed to {}\n", agent),
            None => println!("   ❌ no capable agent\n"),
        }
    }

    // Wait for the queues to drain.
    for _ in 0..100 {
        let status = orchestrator.get_system_status();
        let busy = status
            .agents
            .values()
            .any(|a| a.queue_size > 0 || a.active_tasks > 0);
        if !busy {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("{}", "=".repeat(60));
    let store = orchestrator.store();
    for agent_name in ["files-1", "web-1", "diag-1"] {
        for task in store.list(agent_name).await? {
            println!(
                "✅ [{}] {} -> {}",
                agent_name,
                task.description,
                task.status.as_str()
            );
        }
    }

    let health = orchestrator.health_check();
    println!("\nHealth: {}", serde_json::to_string_pretty(&health)?);

    orchestrator.save_state().await?;
    orchestrator.shutdown().await;
    Ok(())
}
