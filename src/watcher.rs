use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::agents::orchestrator::Orchestrator;

/// File extensions scanned for task comments.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "go", "java", "c", "cpp", "h", "html", "css", "md", "txt",
];

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__"];

/// A task parsed from a specially formatted source comment:
///
/// ```text
/// // #AI_TASK: Create a simple website
/// // #AI_TASK: Build a landing page [priority:high] [type:web_development]
/// ```
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// Stable id derived from (file, line, raw text); survives rescans.
    pub task_id: String,
    pub description: String,
    pub task_type: String,
    pub priority: String,
    pub source_file: PathBuf,
    pub source_line: usize,
    pub raw_comment: String,
    pub params: HashMap<String, String>,
}

impl TaskDefinition {
    /// Metadata document attached to the submitted task.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert(
            "source_file".to_string(),
            json!(self.source_file.display().to_string()),
        );
        metadata.insert("source_line".to_string(), json!(self.source_line));
        metadata.insert("raw_comment".to_string(), json!(self.raw_comment));
        for (key, value) in &self.params {
            metadata.insert(key.clone(), json!(value));
        }
        metadata
    }

    fn infer_type(description: &str) -> &'static str {
        let lower = description.to_lowercase();
        let matches = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if matches(&["website", "webpage", "landing", "portfolio", "html", "css"]) {
            "web_development"
        } else if matches(&["calculator", "gui", "desktop", "window"]) {
            "desktop_app"
        } else if matches(&["diagnostic", "health", "dependency", "environment"]) {
            "system_check"
        } else if matches(&["file", "folder", "directory"]) {
            "file_create"
        } else {
            "general"
        }
    }
}

/// Scans source trees for `#AI_TASK:` comments and turns new ones into
/// orchestrator tasks. Producer only: it never touches agent internals.
pub struct TaskScanner {
    task_re: Regex,
    param_re: Regex,
    seen: HashSet<String>,
}

impl Default for TaskScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScanner {
    pub fn new() -> Self {
        Self {
            task_re: Regex::new(r"#AI_TASK:\s*([^\[\n]+)").expect("task pattern is valid"),
            param_re: Regex::new(r"\[(\w+):([^\]]+)\]").expect("param pattern is valid"),
            seen: HashSet::new(),
        }
    }

    /// Parse a single line; `None` when it carries no task comment.
    pub fn parse_line(&self, line: &str, file: &Path, line_number: usize) -> Option<TaskDefinition> {
        let captures = self.task_re.captures(line)?;
        let description = captures.get(1)?.as_str().trim().to_string();
        if description.is_empty() {
            return None;
        }

        let mut params = HashMap::new();
        for capture in self.param_re.captures_iter(line) {
            params.insert(capture[1].to_string(), capture[2].trim().to_string());
        }

        let task_type = params
            .get("type")
            .cloned()
            .unwrap_or_else(|| TaskDefinition::infer_type(&description).to_string());
        let priority = params
            .get("priority")
            .cloned()
            .unwrap_or_else(|| "medium".to_string());

        Some(TaskDefinition {
            task_id: derive_task_id(file, line_number, line),
            description,
            task_type,
            priority,
            source_file: file.to_path_buf(),
            source_line: line_number,
            raw_comment: line.trim().to_string(),
            params,
        })
    }

    /// Extract task definitions not seen in a previous scan.
    pub fn scan_content(&mut self, content: &str, file: &Path) -> Vec<TaskDefinition> {
        let mut found = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if let Some(definition) = self.parse_line(line, file, index + 1) {
                if self.seen.insert(definition.task_id.clone()) {
                    found.push(definition);
                }
            }
        }
        found
    }

    pub async fn scan_file(&mut self, path: &Path) -> Result<Vec<TaskDefinition>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(self.scan_content(&content, path))
    }

    /// Walk a directory tree, scanning every source file.
    pub async fn scan_dir(&mut self, root: &Path) -> Result<Vec<TaskDefinition>> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if path.is_dir() {
                    if !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_str()) {
                        pending.push(path);
                    }
                    continue;
                }
                let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !SOURCE_EXTENSIONS.contains(&extension) {
                    continue;
                }
                match self.scan_file(&path).await {
                    Ok(mut definitions) => found.append(&mut definitions),
                    Err(e) => tracing::warn!("{:#}", e),
                }
            }
        }
        Ok(found)
    }

    /// Scan once and submit every new definition to the orchestrator.
    /// Returns how many tasks were submitted.
    pub async fn scan_and_submit(
        &mut self,
        root: &Path,
        orchestrator: &mut Orchestrator,
    ) -> Result<usize> {
        let definitions = self.scan_dir(root).await?;
        let mut submitted = 0;
        for definition in definitions {
            tracing::info!(
                "detected task in {}:{}: {}",
                definition.source_file.display(),
                definition.source_line,
                definition.description
            );
            let routed = orchestrator.execute_task(
                definition.task_type.clone(),
                definition.description.clone(),
                Some(definition.metadata()),
            );
            if routed.is_some() {
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    /// Poll loop: rescan the tree on an interval until the stop flag is set.
    pub async fn watch(
        mut self,
        root: PathBuf,
        orchestrator: Arc<Mutex<Orchestrator>>,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) {
        tracing::info!("watching {} for task comments", root.display());
        while !stop.load(Ordering::SeqCst) {
            {
                let mut orchestrator = orchestrator.lock().await;
                if let Err(e) = self.scan_and_submit(&root, &mut orchestrator).await {
                    tracing::warn!("scan failed: {:#}", e);
                }
            }
            tokio::time::sleep(interval).await;
        }
        tracing::info!("watcher stopped");
    }
}

fn derive_task_id(file: &Path, line_number: usize, raw: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    file.hash(&mut hasher);
    line_number.hash(&mut hasher);
    raw.hash(&mut hasher);
    format!("{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}
