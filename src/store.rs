use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::task::Task;

/// Persistence seam for task documents.
///
/// One document per task id, scoped under the owning agent's name and
/// overwritten in place on every status change. Injected so tests can swap
/// the filesystem for an in-memory store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist the current state of a task (whole-document overwrite).
    async fn save(&self, agent: &str, task: &Task) -> Result<()>;

    /// Load one task document, if present.
    async fn load(&self, agent: &str, task_id: &str) -> Result<Option<Task>>;

    /// List every readable task document for an agent.
    ///
    /// Documents that fail to parse are skipped with a warning rather than
    /// failing the whole listing; monitoring readers must tolerate partially
    /// written files.
    async fn list(&self, agent: &str) -> Result<Vec<Task>>;
}

/// Filesystem-backed store: `<root>/tasks/<agent>/<task-id>.json`.
pub struct FsTaskStore {
    tasks_dir: PathBuf,
}

impl FsTaskStore {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            tasks_dir: workspace.as_ref().join("tasks"),
        }
    }

    fn agent_dir(&self, agent: &str) -> PathBuf {
        self.tasks_dir.join(agent)
    }

    fn task_file(&self, agent: &str, task_id: &str) -> PathBuf {
        self.agent_dir(agent).join(format!("{}.json", task_id))
    }
}

#[async_trait]
impl TaskStore for FsTaskStore {
    async fn save(&self, agent: &str, task: &Task) -> Result<()> {
        let dir = self.agent_dir(agent);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating task directory {}", dir.display()))?;

        let path = self.task_file(agent, &task.id);
        let document = task.to_json()?;
        tokio::fs::write(&path, document)
            .await
            .with_context(|| format!("writing task document {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, agent: &str, task_id: &str) -> Result<Option<Task>> {
        let path = self.task_file(agent, task_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(Task::from_json(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading task document {}", path.display())),
        }
    }

    async fn list(&self, agent: &str) -> Result<Vec<Task>> {
        let dir = self.agent_dir(agent);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("listing task directory {}", dir.display()))
            }
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match tokio::fs::read_to_string(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("skipping unreadable task file {}: {}", path.display(), e);
                    continue;
                }
            };
            match Task::from_json(&data) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!("skipping malformed task file {}: {}", path.display(), e);
                }
            }
        }

        // Directory order is arbitrary; sort for stable listings.
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, HashMap<String, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, agent: &str, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks
            .entry(agent.to_string())
            .or_default()
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, agent: &str, task_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(agent).and_then(|m| m.get(task_id)).cloned())
    }

    async fn list(&self, agent: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut listed: Vec<Task> = tasks
            .get(agent)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(listed)
    }
}
