use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for the orchestrator, agent loops, and the comment scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Queue depth above which health_check reports the agent as an issue.
    pub queue_warn_threshold: usize,
    /// Active-task count above which health_check reports the agent as an issue.
    pub active_warn_threshold: usize,
    /// Divisor turning queue depth into the advisory load factor.
    pub load_scale: f64,
    /// How long an idle agent loop waits on its queue before re-checking the stop flag.
    pub poll_timeout_ms: u64,
    /// Delay after an empty poll before the next wait.
    pub idle_delay_ms: u64,
    /// Rescan interval for the comment scanner's watch loop.
    pub scan_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_warn_threshold: 50,
            active_warn_threshold: 10,
            load_scale: 10.0,
            poll_timeout_ms: 1000,
            idle_delay_ms: 100,
            scan_interval_ms: 2000,
        }
    }
}

impl OrchestratorConfig {
    /// Load config from a JSON file, writing defaults on first run.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("parsing config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path).await?;
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
        }
    }

    /// Write config as pretty-printed JSON, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator").join("config.json");

        let config = OrchestratorConfig::load(&path).await.unwrap();
        assert_eq!(config.queue_warn_threshold, 50);
        assert!(path.exists());

        // Second load reads the file it just wrote.
        let again = OrchestratorConfig::load(&path).await.unwrap();
        assert_eq!(again.active_warn_threshold, config.active_warn_threshold);
    }

    #[tokio::test]
    async fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"queue_warn_threshold": 5}"#)
            .await
            .unwrap();

        let config = OrchestratorConfig::load(&path).await.unwrap();
        assert_eq!(config.queue_warn_threshold, 5);
        assert_eq!(config.active_warn_threshold, 10);
        assert_eq!(config.load_scale, 10.0);
    }
}
