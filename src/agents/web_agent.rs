use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::task::Task;

use super::Agent;

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="style.css">
</head>
<body>
    <header>
        <h1>{title}</h1>
        <p>{description}</p>
    </header>
    <main id="content">
        <section class="card">
            <h2>Welcome</h2>
            <p>This page was generated automatically.</p>
            <button id="action">Get started</button>
        </section>
    </main>
    <script src="script.js"></script>
</body>
</html>
"#;

const STYLE_TEMPLATE: &str = r#"* {
    margin: 0;
    padding: 0;
    box-sizing: border-box;
}

body {
    font-family: 'Segoe UI', system-ui, sans-serif;
    background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
    color: #fff;
    min-height: 100vh;
}

header {
    text-align: center;
    padding: 4rem 1rem 2rem;
}

.card {
    background: rgba(255, 255, 255, 0.1);
    border-radius: 12px;
    max-width: 480px;
    margin: 2rem auto;
    padding: 2rem;
    text-align: center;
}

button {
    margin-top: 1rem;
    padding: 0.6rem 1.4rem;
    border: none;
    border-radius: 6px;
    cursor: pointer;
}
"#;

const SCRIPT_TEMPLATE: &str = r#"document.addEventListener('DOMContentLoaded', () => {
    const button = document.getElementById('action');
    button.addEventListener('click', () => {
        button.textContent = 'Ready!';
    });
});
"#;

/// Generates a templated static site (HTML/CSS/JS file set).
///
/// Metadata keys read: `project` (output directory name, defaults to a slug
/// of the description), `title` (page title, defaults to the project name).
/// Result keys written: `generated`, `project_dir`, `output_path`.
pub struct WebAgent {
    name: String,
    output_dir: PathBuf,
}

impl WebAgent {
    pub fn new(name: impl Into<String>, workspace: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            output_dir: workspace.as_ref().join("output"),
        }
    }

    fn slugify(text: &str) -> String {
        let slug: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let trimmed = slug.trim_matches('-');
        if trimmed.is_empty() {
            "site".to_string()
        } else {
            trimmed.chars().take(40).collect()
        }
    }
}

#[async_trait]
impl Agent for WebAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["web_development".to_string()]
    }

    async fn execute(&mut self, task: &Task) -> Result<Option<Value>> {
        let project = task
            .metadata
            .get("project")
            .and_then(|v| v.as_str())
            .map(Self::slugify)
            .unwrap_or_else(|| Self::slugify(&task.description));
        let title = task
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(&project)
            .to_string();

        let project_dir = self.output_dir.join(&project);
        tokio::fs::create_dir_all(&project_dir).await?;

        let index = INDEX_TEMPLATE
            .replace("{title}", &title)
            .replace("{description}", &task.description);

        let files = [
            ("index.html", index.as_str()),
            ("style.css", STYLE_TEMPLATE),
            ("script.js", SCRIPT_TEMPLATE),
        ];
        let mut generated = Vec::new();
        for (file_name, content) in files {
            tokio::fs::write(project_dir.join(file_name), content).await?;
            generated.push(file_name);
        }

        Ok(Some(json!({
            "generated": generated,
            "project_dir": project_dir.display().to_string(),
            "output_path": project_dir.display().to_string(),
        })))
    }
}
