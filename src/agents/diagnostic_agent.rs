use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::task::Task;

use super::Agent;

/// Binaries probed by default, with an install hint reported when missing.
const DEFAULT_REQUIREMENTS: &[(&str, &str)] = &[
    ("git", "apt install git"),
    ("python3", "apt install python3"),
    ("node", "apt install nodejs"),
    ("docker", "apt install docker.io"),
];

/// Environment diagnostics: dependency probing and platform/disk checks.
///
/// Metadata keys read: `binaries` (optional array overriding the default
/// probe list). Reports findings only; install hints are never executed.
pub struct DiagnosticAgent {
    name: String,
}

impl DiagnosticAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    async fn dependency_check(&self, task: &Task) -> Result<Value> {
        let overrides: Option<Vec<String>> = task.metadata.get("binaries").and_then(|v| {
            v.as_array().map(|list| {
                list.iter()
                    .filter_map(|b| b.as_str().map(|s| s.to_string()))
                    .collect()
            })
        });

        let requirements: Vec<(String, Option<&str>)> = match &overrides {
            Some(binaries) => binaries.iter().map(|b| (b.clone(), None)).collect(),
            None => DEFAULT_REQUIREMENTS
                .iter()
                .map(|(binary, hint)| (binary.to_string(), Some(*hint)))
                .collect(),
        };

        let mut checks = Vec::new();
        let mut missing = 0;
        for (binary, hint) in requirements {
            match which::which(&binary) {
                Ok(path) => checks.push(json!({
                    "name": binary,
                    "found": true,
                    "path": path.display().to_string(),
                })),
                Err(_) => {
                    missing += 1;
                    let mut check = json!({"name": binary, "found": false});
                    if let Some(hint) = hint {
                        check["install_hint"] = json!(hint);
                    }
                    checks.push(check);
                }
            }
        }

        Ok(json!({
            "checks": checks,
            "missing": missing,
            "passed": missing == 0,
        }))
    }

    async fn system_check(&self) -> Result<Value> {
        let output = Command::new("uname")
            .arg("-a")
            .output()
            .await
            .context("running uname")?;
        let kernel = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "kernel": kernel,
        }))
    }

    async fn disk_check(&self) -> Result<Value> {
        let output = Command::new("df")
            .args(["-h", "/"])
            .output()
            .await
            .context("running df")?;
        if !output.status.success() {
            bail!("df exited with {}", output.status);
        }

        Ok(json!({
            "mount": "/",
            "report": String::from_utf8_lossy(&output.stdout).trim().to_string(),
        }))
    }
}

#[async_trait]
impl Agent for DiagnosticAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        ["system_check", "dependency_check", "disk_check"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    async fn execute(&mut self, task: &Task) -> Result<Option<Value>> {
        let result = match task.task_type.as_str() {
            "system_check" => self.system_check().await?,
            "dependency_check" => self.dependency_check(task).await?,
            "disk_check" => self.disk_check().await?,
            other => bail!("unsupported task type: {}", other),
        };
        Ok(Some(result))
    }
}
