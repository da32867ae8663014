use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::task::Task;

pub mod diagnostic_agent;
pub mod file_agent;
pub mod orchestrator;
pub mod runner;
pub mod web_agent;

/// Capability-specific worker logic, implemented by each concrete agent.
///
/// The processing loop treats `Ok(Some(result))` as success (the result
/// document is merged into the task's metadata), `Ok(None)` as failure, and
/// any error is caught at the processing boundary and never aborts the loop.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Capability strings this agent advertises for routing.
    /// Queried once when the agent is spawned; never re-read afterwards.
    fn capabilities(&self) -> Vec<String>;

    async fn execute(&mut self, task: &Task) -> Result<Option<Value>>;
}

/// Shared counters exposing one agent's live state to the orchestrator.
/// The runner is the only writer; everything else reads snapshots.
#[derive(Debug, Default)]
pub struct AgentStats {
    queue_size: AtomicUsize,
    active_tasks: AtomicUsize,
    running: AtomicBool,
}

impl AgentStats {
    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn task_enqueued(&self) {
        self.queue_size.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn task_dequeued(&self) {
        // Saturating: a racing reader may briefly see 0 while a task starts.
        let _ = self
            .queue_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub(crate) fn set_active(&self, count: usize) {
        self.active_tasks.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

/// Read-only status snapshot of one agent, as reported by `get_system_status`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub is_running: bool,
    pub queue_size: usize,
    pub active_tasks: usize,
    pub capabilities: Vec<String>,
}

/// Orchestrator-side handle to a spawned agent: the queue sender plus the
/// shared stats. The queue is unbounded: enqueue never blocks or rejects.
pub struct AgentHandle {
    name: String,
    capabilities: Vec<String>,
    tx: mpsc::UnboundedSender<Task>,
    stats: Arc<AgentStats>,
}

impl AgentHandle {
    pub(crate) fn new(
        name: String,
        capabilities: Vec<String>,
        tx: mpsc::UnboundedSender<Task>,
        stats: Arc<AgentStats>,
    ) -> Self {
        Self {
            name,
            capabilities,
            tx,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn queue_size(&self) -> usize {
        self.stats.queue_size()
    }

    pub fn active_tasks(&self) -> usize {
        self.stats.active_tasks()
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }

    /// Append a task to the agent's queue.
    ///
    /// Fails only if the agent's runner has been dropped entirely; a stopped
    /// but still-live runner keeps accepting (and never draining) tasks.
    pub fn enqueue(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|e| anyhow::anyhow!("agent {} queue closed: task {}", self.name, e.0.id))?;
        self.stats.task_enqueued();
        Ok(())
    }

    /// Request cooperative loop termination; in-flight work is not cancelled.
    pub fn stop(&self) {
        self.stats.set_running(false);
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            name: self.name.clone(),
            is_running: self.is_running(),
            queue_size: self.queue_size(),
            active_tasks: self.active_tasks(),
            capabilities: self.capabilities.clone(),
        }
    }
}
