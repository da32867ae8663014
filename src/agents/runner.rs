use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::config::OrchestratorConfig;
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

use super::{Agent, AgentHandle, AgentStats};

/// Wire up a spawned agent: returns the orchestrator-side handle and the
/// runner that owns the queue receiver and the agent itself.
pub(crate) fn wire_agent(
    agent: Box<dyn Agent>,
    store: Arc<dyn TaskStore>,
    config: &OrchestratorConfig,
) -> (AgentHandle, AgentRunner) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(AgentStats::default());
    let handle = AgentHandle::new(
        agent.name().to_string(),
        agent.capabilities(),
        tx,
        Arc::clone(&stats),
    );
    let runner = AgentRunner {
        name: agent.name().to_string(),
        agent,
        rx,
        store,
        stats,
        active_tasks: HashMap::new(),
        poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        idle_delay: Duration::from_millis(config.idle_delay_ms),
    };
    (handle, runner)
}

/// Per-agent processing loop.
///
/// Dequeues strictly FIFO, persists every status transition before the task
/// leaves the active map, and isolates each task's failure from the rest of
/// the queue. Stop is cooperative: the flag is checked between tasks, never
/// mid-execute.
pub struct AgentRunner {
    name: String,
    agent: Box<dyn Agent>,
    rx: mpsc::UnboundedReceiver<Task>,
    store: Arc<dyn TaskStore>,
    stats: Arc<AgentStats>,
    active_tasks: HashMap<String, Task>,
    poll_timeout: Duration,
    idle_delay: Duration,
}

impl AgentRunner {
    pub async fn run(mut self) {
        self.stats.set_running(true);
        tracing::info!("agent {} started", self.name);

        loop {
            if !self.stats.is_running() {
                break;
            }
            match timeout(self.poll_timeout, self.rx.recv()).await {
                Ok(Some(task)) => self.process_task(task).await,
                // Every sender dropped; nothing can arrive anymore.
                Ok(None) => break,
                Err(_) => sleep(self.idle_delay).await,
            }
        }

        self.stats.set_running(false);
        tracing::info!("agent {} stopped", self.name);
    }

    async fn process_task(&mut self, task: Task) {
        self.stats.task_dequeued();
        let task_id = task.id.clone();
        tracing::info!("agent {} picked up task {}: {}", self.name, task_id, task.description);

        self.active_tasks.insert(task_id.clone(), task);
        self.stats.set_active(self.active_tasks.len());

        self.update_status(&task_id, TaskStatus::InProgress, None).await;

        // The agent sees the task as persisted: in_progress, fresh timestamp.
        let snapshot = match self.active_tasks.get(&task_id) {
            Some(task) => task.clone(),
            None => return,
        };

        match self.agent.execute(&snapshot).await {
            Ok(Some(result)) => {
                self.record_output_path(&task_id, &result);
                self.update_status(&task_id, TaskStatus::Completed, Some(("result", result)))
                    .await;
            }
            Ok(None) => {
                self.update_status(&task_id, TaskStatus::Failed, None).await;
            }
            Err(e) => {
                tracing::error!("task {} failed: {:#}", task_id, e);
                self.update_status(
                    &task_id,
                    TaskStatus::Failed,
                    Some(("error", Value::String(format!("{:#}", e)))),
                )
                .await;
            }
        }

        self.active_tasks.remove(&task_id);
        self.stats.set_active(self.active_tasks.len());
    }

    /// Agents report produced artifacts through an `output_path` result key;
    /// lift it into the task's own field.
    fn record_output_path(&mut self, task_id: &str, result: &Value) {
        if let Some(path) = result.get("output_path").and_then(|v| v.as_str()) {
            if let Some(task) = self.active_tasks.get_mut(task_id) {
                task.output_path = Some(path.to_string());
            }
        }
    }

    async fn update_status(&mut self, task_id: &str, status: TaskStatus, extra: Option<(&str, Value)>) {
        let Some(task) = self.active_tasks.get_mut(task_id) else {
            return;
        };
        task.touch(status);
        if let Some((key, value)) = extra {
            task.metadata.insert(key.to_string(), value);
        }

        // Persistence is best-effort; a write failure never takes the loop down.
        if let Err(e) = self.store.save(&self.name, task).await {
            tracing::warn!("failed to persist task {}: {:#}", task_id, e);
        } else {
            tracing::info!("task {} status updated to {}", task_id, status.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use tokio::sync::Mutex;

    /// Test agent scripted through task descriptions:
    /// "ok" succeeds, "fail-none" returns no result, "fail-err" errors.
    struct ScriptedAgent {
        executed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["scripted_work".to_string()]
        }

        async fn execute(&mut self, task: &Task) -> Result<Option<Value>> {
            self.executed.lock().await.push(task.description.clone());
            match task.description.as_str() {
                "fail-err" => Err(anyhow::anyhow!("scripted explosion")),
                "fail-none" => Ok(None),
                _ => Ok(Some(json!({"ok": true}))),
            }
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_timeout_ms: 20,
            idle_delay_ms: 5,
            ..OrchestratorConfig::default()
        }
    }

    fn scripted(
        store: Arc<MemoryTaskStore>,
    ) -> (AgentHandle, AgentRunner, Arc<Mutex<Vec<String>>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let agent = Box::new(ScriptedAgent {
            executed: Arc::clone(&executed),
        });
        let (handle, runner) = wire_agent(agent, store, &fast_config());
        (handle, runner, executed)
    }

    fn task(description: &str) -> Task {
        Task::new("scripted_work", description, Map::new(), 1)
    }

    async fn wait_terminal(store: &MemoryTaskStore, agent: &str, task_id: &str) -> Task {
        for _ in 0..200 {
            if let Some(task) = store.load(agent, task_id).await.unwrap() {
                if task.status.is_terminal() {
                    return task;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never reached a terminal status", task_id);
    }

    #[tokio::test]
    async fn test_tasks_execute_in_fifo_order() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, executed) = scripted(Arc::clone(&store));

        let descriptions: Vec<String> = (0..5).map(|i| format!("ok-{}", i)).collect();
        let mut last_id = String::new();
        for d in &descriptions {
            let t = task(d);
            last_id = t.id.clone();
            handle.enqueue(t).unwrap();
        }

        let join = tokio::spawn(runner.run());
        wait_terminal(&store, "scripted", &last_id).await;
        handle.stop();
        join.await.unwrap();

        assert_eq!(*executed.lock().await, descriptions);
    }

    #[tokio::test]
    async fn test_success_persists_completed_with_result() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, _) = scripted(Arc::clone(&store));

        let t = task("ok");
        let id = t.id.clone();
        handle.enqueue(t).unwrap();

        let join = tokio::spawn(runner.run());
        let done = wait_terminal(&store, "scripted", &id).await;
        handle.stop();
        join.await.unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.metadata["result"]["ok"], json!(true));
        assert!(done.updated_at >= done.created_at);
    }

    #[tokio::test]
    async fn test_error_persists_failed_with_message_and_queue_continues() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, executed) = scripted(Arc::clone(&store));

        let bad = task("fail-err");
        let bad_id = bad.id.clone();
        let good = task("ok");
        let good_id = good.id.clone();
        handle.enqueue(bad).unwrap();
        handle.enqueue(good).unwrap();

        let join = tokio::spawn(runner.run());
        let failed = wait_terminal(&store, "scripted", &bad_id).await;
        let completed = wait_terminal(&store, "scripted", &good_id).await;
        handle.stop();
        join.await.unwrap();

        assert_eq!(failed.status, TaskStatus::Failed);
        let message = failed.metadata["error"].as_str().unwrap();
        assert!(message.contains("scripted explosion"));

        assert_eq!(completed.status, TaskStatus::Completed);
        assert_eq!(executed.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_failure() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, _) = scripted(Arc::clone(&store));

        let t = task("fail-none");
        let id = t.id.clone();
        handle.enqueue(t).unwrap();

        let join = tokio::spawn(runner.run());
        let done = wait_terminal(&store, "scripted", &id).await;
        handle.stop();
        join.await.unwrap();

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(!done.metadata.contains_key("result"));
    }

    #[tokio::test]
    async fn test_no_task_left_in_progress_after_processing() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, _) = scripted(Arc::clone(&store));

        let mut ids = Vec::new();
        for d in ["ok", "fail-err", "fail-none"] {
            let t = task(d);
            ids.push(t.id.clone());
            handle.enqueue(t).unwrap();
        }

        let join = tokio::spawn(runner.run());
        for id in &ids {
            wait_terminal(&store, "scripted", id).await;
        }
        handle.stop();
        join.await.unwrap();

        assert_eq!(handle.active_tasks(), 0);
        assert_eq!(handle.queue_size(), 0);
        for listed in store.list("scripted").await.unwrap() {
            assert!(listed.status.is_terminal());
        }
    }

    #[tokio::test]
    async fn test_stop_terminates_idle_loop() {
        let store = Arc::new(MemoryTaskStore::new());
        let (handle, runner, _) = scripted(store);

        let join = tokio::spawn(runner.run());
        sleep(Duration::from_millis(30)).await;
        assert!(handle.is_running());

        handle.stop();
        timeout(Duration::from_secs(1), join)
            .await
            .expect("runner did not stop")
            .unwrap();
        assert!(!handle.is_running());
    }
}
