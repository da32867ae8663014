use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::store::{FsTaskStore, TaskStore};
use crate::task::Task;

use super::runner::{wire_agent, AgentRunner};
use super::{Agent, AgentHandle, AgentStatus};

/// Builds a concrete agent from an instance name and the workspace root.
pub type AgentFactory = Box<dyn Fn(&str, &Path) -> Box<dyn Agent> + Send + Sync>;

/// One capability advertised by one agent, as seen by the router.
///
/// `load_factor` is an advisory hint refreshed only when this record wins a
/// routing decision; other records go stale until their next win.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCapability {
    pub agent_name: String,
    pub capability: String,
    pub priority: i64,
    pub load_factor: f64,
    #[serde(skip)]
    seq: u64,
}

/// Aggregate counters persisted in the orchestrator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCounters {
    pub started_at: DateTime<Utc>,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

/// Read-only aggregate view over the orchestrator and its live agents.
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub system_state: SystemCounters,
    pub agents: HashMap<String, AgentStatus>,
    pub capabilities: HashMap<String, Vec<String>>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct AgentHealth {
    pub running: bool,
    pub queue_size: usize,
    pub active_tasks: usize,
}

/// Threshold-based health verdict; no trend analysis.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall: Health,
    pub agents: HashMap<String, AgentHealth>,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CapabilitySnapshot {
    agent: String,
    priority: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateSnapshot {
    system_state: SystemCounters,
    agents: Vec<String>,
    capabilities: HashMap<String, Vec<CapabilitySnapshot>>,
}

struct AgentEntry {
    handle: AgentHandle,
    // Taken by start_agent when the loop is spawned.
    runner: Option<AgentRunner>,
    join: Option<JoinHandle<()>>,
}

/// Central coordinator: owns the live agents, the capability registry, and
/// the task history; routes tasks to the best capability match by
/// (priority, load) and exposes aggregate status and health views.
pub struct Orchestrator {
    workspace: PathBuf,
    store: Arc<dyn TaskStore>,
    config: OrchestratorConfig,
    factories: HashMap<String, AgentFactory>,
    agents: HashMap<String, AgentEntry>,
    capabilities: HashMap<String, Vec<AgentCapability>>,
    task_history: Vec<Task>,
    counters: SystemCounters,
    next_seq: u64,
}

impl Orchestrator {
    /// Create an orchestrator persisting to `<workspace>/tasks/` and
    /// `<workspace>/orchestrator/`.
    pub fn new(workspace: impl Into<PathBuf>) -> Result<Self> {
        let workspace = workspace.into();
        std::fs::create_dir_all(workspace.join("orchestrator"))?;
        let store: Arc<dyn TaskStore> = Arc::new(FsTaskStore::new(&workspace));
        Ok(Self::with_store(
            workspace,
            store,
            OrchestratorConfig::default(),
        ))
    }

    /// Create an orchestrator with an injected store and config.
    pub fn with_store(
        workspace: impl Into<PathBuf>,
        store: Arc<dyn TaskStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            store,
            config,
            factories: HashMap::new(),
            agents: HashMap::new(),
            capabilities: HashMap::new(),
            task_history: Vec::new(),
            counters: SystemCounters {
                started_at: Utc::now(),
                total_tasks: 0,
                completed_tasks: 0,
                failed_tasks: 0,
            },
            next_seq: 0,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn task_history(&self) -> &[Task] {
        &self.task_history
    }

    pub fn agent(&self, name: &str) -> Option<&AgentHandle> {
        self.agents.get(name).map(|entry| &entry.handle)
    }

    /// Register an agent class for dynamic instantiation.
    pub fn register_agent_class(&mut self, agent_type: impl Into<String>, factory: AgentFactory) {
        self.factories.insert(agent_type.into(), factory);
    }

    /// Instantiate a registered agent class and register its capabilities.
    ///
    /// Spawning a second agent under the same instance name silently replaces
    /// the live entry; its capability records are appended, not deduplicated.
    pub fn spawn_agent(&mut self, agent_type: &str, agent_name: &str) -> Result<&AgentHandle> {
        let factory = self
            .factories
            .get(agent_type)
            .ok_or_else(|| anyhow::anyhow!("unknown agent type: {}", agent_type))?;

        let agent = factory(agent_name, &self.workspace);
        let (handle, runner) = wire_agent(agent, Arc::clone(&self.store), &self.config);

        for capability in handle.capabilities().to_vec() {
            let record = AgentCapability {
                agent_name: agent_name.to_string(),
                capability: capability.clone(),
                priority: 1,
                load_factor: 0.0,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            self.capabilities.entry(capability).or_default().push(record);
        }

        self.agents.insert(
            agent_name.to_string(),
            AgentEntry {
                handle,
                runner: Some(runner),
                join: None,
            },
        );
        tracing::info!("spawned agent {} ({})", agent_name, agent_type);
        Ok(&self.agents[agent_name].handle)
    }

    /// Start an agent's processing loop in the background.
    pub fn start_agent(&mut self, agent_name: &str) {
        let Some(entry) = self.agents.get_mut(agent_name) else {
            tracing::warn!("cannot start unknown agent {}", agent_name);
            return;
        };
        match entry.runner.take() {
            Some(runner) => {
                entry.join = Some(tokio::spawn(runner.run()));
            }
            None => tracing::warn!("agent {} already started", agent_name),
        }
    }

    /// Request cooperative termination of one agent's loop.
    pub fn stop_agent(&self, agent_name: &str) {
        if let Some(entry) = self.agents.get(agent_name) {
            entry.handle.stop();
        }
    }

    pub fn stop_all_agents(&self) {
        for entry in self.agents.values() {
            entry.handle.stop();
        }
    }

    /// Stop every agent and wait for their loops to wind down.
    /// In-flight tasks finish first; queued-but-unprocessed tasks are lost.
    pub async fn shutdown(&mut self) {
        self.stop_all_agents();
        for entry in self.agents.values_mut() {
            if let Some(join) = entry.join.take() {
                if let Err(e) = join.await {
                    tracing::warn!("agent loop ended abnormally: {}", e);
                }
            }
        }
    }

    /// Create a new pending task and record it in the history.
    pub fn create_task(
        &mut self,
        task_type: impl Into<String>,
        description: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Task {
        let task = Task::new(task_type, description, metadata.unwrap_or_default(), 1);
        self.task_history.push(task.clone());
        self.counters.total_tasks += 1;
        task
    }

    /// Route a task to the most appropriate agent.
    ///
    /// Candidates are capability records whose capability equals the task
    /// type or is a prefix of it; the winner has the smallest
    /// (priority, load_factor) with ties broken by registration order.
    /// Returns the agent name, or `None` when no capable agent exists; in
    /// that case the task is neither queued nor persisted.
    pub fn route_task(&mut self, task: &Task) -> Option<String> {
        let mut candidates: Vec<(String, usize)> = Vec::new();
        for (capability, records) in &self.capabilities {
            if capability == &task.task_type || task.task_type.starts_with(capability.as_str()) {
                for idx in 0..records.len() {
                    candidates.push((capability.clone(), idx));
                }
            }
        }

        if candidates.is_empty() {
            tracing::warn!("no capable agent for task type: {}", task.task_type);
            return None;
        }

        candidates.sort_by(|a, b| {
            let ra = &self.capabilities[&a.0][a.1];
            let rb = &self.capabilities[&b.0][b.1];
            ra.priority
                .cmp(&rb.priority)
                .then(ra.load_factor.total_cmp(&rb.load_factor))
                .then(ra.seq.cmp(&rb.seq))
        });

        let (capability, idx) = candidates.remove(0);
        let agent_name = self.capabilities[&capability][idx].agent_name.clone();

        let Some(entry) = self.agents.get(&agent_name) else {
            tracing::error!("capability record points at missing agent {}", agent_name);
            return None;
        };
        if let Err(e) = entry.handle.enqueue(task.clone()) {
            tracing::error!("failed to enqueue task {}: {:#}", task.id, e);
            return None;
        }

        // Refresh the winner's advisory load; other records stay stale.
        let depth = entry.handle.queue_size();
        if let Some(record) = self
            .capabilities
            .get_mut(&capability)
            .and_then(|records| records.get_mut(idx))
        {
            record.load_factor = depth as f64 / self.config.load_scale;
        }

        tracing::info!("task {} routed to agent {}", task.id, agent_name);
        Some(agent_name)
    }

    /// Create and route a task in one step.
    pub fn execute_task(
        &mut self,
        task_type: impl Into<String>,
        description: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Option<String> {
        let task = self.create_task(task_type, description, metadata);
        self.route_task(&task)
    }

    pub fn get_system_status(&self) -> SystemStatus {
        let agents = self
            .agents
            .iter()
            .map(|(name, entry)| (name.clone(), entry.handle.status()))
            .collect();

        let capabilities = self
            .capabilities
            .iter()
            .map(|(capability, records)| {
                (
                    capability.clone(),
                    records.iter().map(|r| r.agent_name.clone()).collect(),
                )
            })
            .collect();

        let uptime = Utc::now() - self.counters.started_at;
        SystemStatus {
            system_state: self.counters.clone(),
            agents,
            capabilities,
            uptime_seconds: uptime.num_milliseconds() as f64 / 1000.0,
        }
    }

    /// Threshold check over every live agent's queue depth and active count.
    pub fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            overall: Health::Healthy,
            agents: HashMap::new(),
            issues: Vec::new(),
        };

        for (name, entry) in &self.agents {
            let queue_size = entry.handle.queue_size();
            let active_tasks = entry.handle.active_tasks();

            if queue_size > self.config.queue_warn_threshold {
                report.issues.push(format!("agent {} has high queue size", name));
            }
            if active_tasks > self.config.active_warn_threshold {
                report.issues.push(format!("agent {} has many active tasks", name));
            }

            report.agents.insert(
                name.clone(),
                AgentHealth {
                    running: entry.handle.is_running(),
                    queue_size,
                    active_tasks,
                },
            );
        }

        if !report.issues.is_empty() {
            report.overall = Health::Degraded;
        }
        report
    }

    fn state_file(&self) -> PathBuf {
        self.workspace.join("orchestrator").join("system_state.json")
    }

    /// Persist counters and the capability-to-agent mapping.
    /// Task payloads and queue contents are not part of the snapshot.
    pub async fn save_state(&self) -> Result<()> {
        let mut agents: Vec<String> = self.agents.keys().cloned().collect();
        agents.sort();

        let snapshot = StateSnapshot {
            system_state: self.counters.clone(),
            agents,
            capabilities: self
                .capabilities
                .iter()
                .map(|(capability, records)| {
                    (
                        capability.clone(),
                        records
                            .iter()
                            .map(|r| CapabilitySnapshot {
                                agent: r.agent_name.clone(),
                                priority: r.priority,
                            })
                            .collect(),
                    )
                })
                .collect(),
        };

        let path = self.state_file();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string_pretty(&snapshot)?).await?;
        Ok(())
    }

    /// Restore counters from a previous snapshot, if one is readable.
    /// A malformed snapshot is reported and skipped, never fatal.
    pub async fn load_state(&mut self) -> Result<()> {
        let path = self.state_file();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<StateSnapshot>(&data) {
            Ok(snapshot) => {
                self.counters = snapshot.system_state;
            }
            Err(e) => {
                tracing::warn!("skipping malformed state snapshot {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::file_agent::FileAgent;
    use crate::store::MemoryTaskStore;
    use crate::task::TaskStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    struct NullAgent {
        name: String,
        capabilities: Vec<String>,
    }

    #[async_trait]
    impl Agent for NullAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> Vec<String> {
            self.capabilities.clone()
        }

        async fn execute(&mut self, _task: &Task) -> Result<Option<Value>> {
            Ok(Some(json!({"done": true})))
        }
    }

    fn null_factory(capabilities: &[&str]) -> AgentFactory {
        let capabilities: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();
        Box::new(move |name, _workspace| {
            Box::new(NullAgent {
                name: name.to_string(),
                capabilities: capabilities.clone(),
            })
        })
    }

    fn test_orchestrator(workspace: &Path) -> Orchestrator {
        let config = OrchestratorConfig {
            poll_timeout_ms: 20,
            idle_delay_ms: 5,
            ..OrchestratorConfig::default()
        };
        Orchestrator::with_store(workspace, Arc::new(MemoryTaskStore::new()), config)
    }

    #[tokio::test]
    async fn test_spawn_unknown_type_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        assert!(orch.spawn_agent("ghost", "g-1").is_err());
    }

    #[tokio::test]
    async fn test_route_without_capable_agent_returns_none_and_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class("null", null_factory(&["file_create"]));
        orch.spawn_agent("null", "files-1").unwrap();

        let routed = orch.execute_task("nonexistent_capability", "nothing fits", None);
        assert!(routed.is_none());
        assert!(orch.store().list("files-1").await.unwrap().is_empty());
        assert_eq!(orch.agent("files-1").unwrap().queue_size(), 0);
        // The task itself was still created and counted.
        assert_eq!(orch.get_system_status().system_state.total_tasks, 1);
    }

    #[tokio::test]
    async fn test_route_matches_capability_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class("null", null_factory(&["git"]));
        orch.spawn_agent("null", "git-1").unwrap();

        let routed = orch.execute_task("git_commit", "commit the work", None);
        assert_eq!(routed.as_deref(), Some("git-1"));
    }

    #[tokio::test]
    async fn test_routing_prefers_less_loaded_agent() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class("null", null_factory(&["web_development"]));
        // Agents are never started, so queues only grow.
        orch.spawn_agent("null", "web-a").unwrap();

        for _ in 0..3 {
            let routed = orch.execute_task("web_development", "site", None);
            assert_eq!(routed.as_deref(), Some("web-a"));
        }
        assert_eq!(orch.agent("web-a").unwrap().queue_size(), 3);

        // A fresh agent with an empty queue must win the next route.
        orch.spawn_agent("null", "web-b").unwrap();
        let routed = orch.execute_task("web_development", "site", None);
        assert_eq!(routed.as_deref(), Some("web-b"));
    }

    #[tokio::test]
    async fn test_routing_tie_breaks_by_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class("null", null_factory(&["web_development"]));
        orch.spawn_agent("null", "web-a").unwrap();
        orch.spawn_agent("null", "web-b").unwrap();

        // Equal priority and load: first registration wins, then loads
        // alternate as each win bumps the winner's advisory load.
        let first = orch.execute_task("web_development", "site", None);
        let second = orch.execute_task("web_development", "site", None);
        assert_eq!(first.as_deref(), Some("web-a"));
        assert_eq!(second.as_deref(), Some("web-b"));
    }

    #[tokio::test]
    async fn test_health_check_is_idempotent_and_flags_deep_queues() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            queue_warn_threshold: 2,
            poll_timeout_ms: 20,
            idle_delay_ms: 5,
            ..OrchestratorConfig::default()
        };
        let mut orch =
            Orchestrator::with_store(dir.path(), Arc::new(MemoryTaskStore::new()), config);
        orch.register_agent_class("null", null_factory(&["web_development"]));
        orch.spawn_agent("null", "web-a").unwrap();

        let healthy = orch.health_check();
        assert_eq!(healthy.overall, Health::Healthy);
        assert!(healthy.issues.is_empty());

        for _ in 0..3 {
            orch.execute_task("web_development", "site", None);
        }

        let degraded = orch.health_check();
        let again = orch.health_check();
        assert_eq!(degraded.overall, Health::Degraded);
        assert_eq!(again.overall, Health::Degraded);
        assert!(degraded.issues[0].contains("web-a"));
    }

    #[tokio::test]
    async fn test_save_and_load_state_round_trips_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class("null", null_factory(&["web_development"]));
        orch.spawn_agent("null", "web-a").unwrap();
        orch.create_task("web_development", "one", None);
        orch.create_task("web_development", "two", None);
        orch.save_state().await.unwrap();

        let mut restored = test_orchestrator(dir.path());
        restored.load_state().await.unwrap();
        assert_eq!(restored.get_system_status().system_state.total_tasks, 2);
    }

    #[tokio::test]
    async fn test_load_state_skips_malformed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("orchestrator");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("system_state.json"), "{ nope").unwrap();

        let mut orch = test_orchestrator(dir.path());
        orch.load_state().await.unwrap();
        assert_eq!(orch.get_system_status().system_state.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_file_agent_happy_path_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = test_orchestrator(dir.path());
        orch.register_agent_class(
            "file",
            Box::new(|name, workspace| Box::new(FileAgent::new(name, workspace))),
        );
        orch.spawn_agent("file", "files-1").unwrap();
        orch.start_agent("files-1");

        let target = dir.path().join("x.txt");
        let mut metadata = Map::new();
        metadata.insert("path".to_string(), json!(target.to_str().unwrap()));
        metadata.insert("content".to_string(), json!("hi"));

        let routed = orch.execute_task("file_create", "demo", Some(metadata));
        assert_eq!(routed.as_deref(), Some("files-1"));

        let task_id = orch.task_history().last().unwrap().id.clone();
        let store = orch.store();
        let mut persisted = None;
        for _ in 0..200 {
            if let Some(task) = store.load("files-1", &task_id).await.unwrap() {
                if task.status.is_terminal() {
                    persisted = Some(task);
                    break;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
        orch.shutdown().await;

        let persisted = persisted.expect("task never finished");
        assert_eq!(persisted.status, TaskStatus::Completed);
        assert_eq!(persisted.metadata["result"]["created"], json!(true));
        assert_eq!(
            tokio::fs::read_to_string(&target).await.unwrap(),
            "hi".to_string()
        );
    }
}
