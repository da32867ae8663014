use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::task::Task;

use super::Agent;

/// Filesystem worker.
///
/// Metadata keys read per capability: `path` (all operations), `content`
/// (file_create, file_write), `dest` (file_copy, file_move). Every path must
/// fall inside one of the agent's safe zones.
pub struct FileAgent {
    name: String,
    safe_zones: Vec<PathBuf>,
}

impl FileAgent {
    pub fn new(name: impl Into<String>, workspace: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            safe_zones: vec![workspace.as_ref().to_path_buf(), PathBuf::from("/tmp")],
        }
    }

    fn is_safe(&self, path: &Path) -> bool {
        // Normalize without requiring the file to exist yet.
        let checked = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        };
        self.safe_zones.iter().any(|zone| {
            let zone = zone.canonicalize().unwrap_or_else(|_| zone.clone());
            checked.starts_with(&zone)
        })
    }

    fn checked_path(&self, task: &Task, key: &str) -> Result<PathBuf> {
        let raw = task
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .with_context(|| format!("task {} missing metadata key '{}'", task.id, key))?;
        let path = PathBuf::from(raw);
        if !self.is_safe(&path) {
            bail!("path {} is outside the safe zones", path.display());
        }
        Ok(path)
    }

    fn content<'a>(&self, task: &'a Task) -> &'a str {
        task.metadata
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    async fn create_file(&self, task: &Task) -> Result<Value> {
        let path = self.checked_path(task, "path")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, self.content(task)).await?;
        Ok(json!({"created": true, "path": path.display().to_string()}))
    }

    async fn read_file(&self, task: &Task) -> Result<Value> {
        let path = self.checked_path(task, "path")?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(json!({"path": path.display().to_string(), "content": content}))
    }

    async fn write_file(&self, task: &Task) -> Result<Value> {
        let path = self.checked_path(task, "path")?;
        let content = self.content(task);
        tokio::fs::write(&path, content).await?;
        Ok(json!({"written": true, "bytes": content.len()}))
    }

    async fn delete_file(&self, task: &Task) -> Result<Value> {
        let path = self.checked_path(task, "path")?;
        tokio::fs::remove_file(&path).await?;
        Ok(json!({"deleted": true, "path": path.display().to_string()}))
    }

    async fn create_dir(&self, task: &Task) -> Result<Value> {
        let path = self.checked_path(task, "path")?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(json!({"created": true, "path": path.display().to_string()}))
    }

    async fn copy_file(&self, task: &Task) -> Result<Value> {
        let from = self.checked_path(task, "path")?;
        let to = self.checked_path(task, "dest")?;
        tokio::fs::copy(&from, &to).await?;
        Ok(json!({
            "copied": true,
            "from": from.display().to_string(),
            "to": to.display().to_string()
        }))
    }

    async fn move_file(&self, task: &Task) -> Result<Value> {
        let from = self.checked_path(task, "path")?;
        let to = self.checked_path(task, "dest")?;
        tokio::fs::rename(&from, &to).await?;
        Ok(json!({
            "moved": true,
            "from": from.display().to_string(),
            "to": to.display().to_string()
        }))
    }
}

#[async_trait]
impl Agent for FileAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        [
            "file_create",
            "file_read",
            "file_write",
            "file_delete",
            "dir_create",
            "file_copy",
            "file_move",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }

    async fn execute(&mut self, task: &Task) -> Result<Option<Value>> {
        let result = match task.task_type.as_str() {
            "file_create" => self.create_file(task).await?,
            "file_read" => self.read_file(task).await?,
            "file_write" => self.write_file(task).await?,
            "file_delete" => self.delete_file(task).await?,
            "dir_create" => self.create_dir(task).await?,
            "file_copy" => self.copy_file(task).await?,
            "file_move" => self.move_file(task).await?,
            other => bail!("unsupported task type: {}", other),
        };
        Ok(Some(result))
    }
}
