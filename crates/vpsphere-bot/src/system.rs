//! Folder listing and server status for the inline buttons.

use std::path::Path;
use tokio::process::Command;
use vpsphere_core::escape::{code_block, inline_code};
use vpsphere_core::VpsResult;

/// Names of the entries in `dir`, sorted.
pub async fn list_directory(dir: &Path) -> VpsResult<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// MarkdownV2 reply for the `ls` button.
pub fn render_listing(names: &[String]) -> String {
    let body = if names.is_empty() {
        "📂 No files.".to_string()
    } else {
        names.join("\n")
    };
    format!("📂 *Folder contents:*\n{}", code_block(&body))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub uptime: String,
    pub disk: String,
    pub memory: String,
}

impl ServerStatus {
    pub async fn collect() -> VpsResult<Self> {
        Ok(Self {
            uptime: capture("uptime", &["-p"]).await?,
            disk: capture("df", &["-h", "/"]).await?,
            memory: capture("free", &["-h"]).await?,
        })
    }

    /// MarkdownV2 reply for the `status` button.
    pub fn render(&self) -> String {
        format!(
            "*Server status:*\n\n🟢 *Uptime:* {}\n\n💾 *Disk:*\n{}\n\n🧠 *Memory:*\n{}",
            inline_code(&self.uptime),
            code_block(&self.disk),
            code_block(&self.memory),
        )
    }
}

/// Run `program` and return its trimmed stdout. Stderr is appended when the
/// command fails so the operator sees why.
async fn capture(program: &str, args: &[&str]) -> VpsResult<String> {
    let output = Command::new(program).args(args).output().await?;
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    Ok(text)
}
