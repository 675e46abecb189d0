//! File-based memory store — the default backend.
//!
//! Layout under the workspace root:
//! - `memory/MEMORY.md` — long-term memory, replaced wholesale on write.
//! - `memory/YYYY-MM-DD.md` — one file per calendar day, in local time.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tracing::debug;

use super::backend::MemoryBackend;

/// File-based memory store for the agent.
pub struct FileMemoryStore {
    /// The `memory/` directory inside the workspace.
    memory_dir: PathBuf,
    /// Path to the long-term memory file.
    memory_file: PathBuf,
}

impl FileMemoryStore {
    /// Create a store rooted at `workspace`. Does not touch the filesystem —
    /// the directory is created lazily by `initialize`/the first write.
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    /// Path to today's daily notes file (local calendar date).
    pub fn today_file(&self) -> PathBuf {
        let today = Local::now().format("%Y-%m-%d").to_string();
        self.memory_dir.join(format!("{today}.md"))
    }

    /// Path to the memory directory.
    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Path to the long-term memory file.
    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.memory_dir).await
    }

    /// Daily note files present in `memory_dir`, matching `YYYY-MM-DD.md`
    /// exactly, newest first.
    async fn list_memory_files(&self) -> Vec<PathBuf> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.memory_dir).await else {
            return Vec::new();
        };

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if is_daily_filename(name) {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        files
    }
}

fn is_daily_filename(name: &str) -> bool {
    name.len() == 13
        && name.ends_with(".md")
        && name.as_bytes()[4] == b'-'
        && name.as_bytes()[7] == b'-'
        && name[..4].chars().all(|c| c.is_ascii_digit())
        && name[5..7].chars().all(|c| c.is_ascii_digit())
        && name[8..10].chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl MemoryBackend for FileMemoryStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        debug!(dir = %self.memory_dir.display(), "file memory store ready");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read_today(&self) -> anyhow::Result<String> {
        Ok(tokio::fs::read_to_string(self.today_file())
            .await
            .unwrap_or_default())
    }

    async fn append_today(&self, content: &str) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let path = self.today_file();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let mut existing = tokio::fs::read_to_string(&path).await?;
            existing.push('\n');
            existing.push_str(content);
            tokio::fs::write(&path, existing).await?;
        } else {
            let today = Local::now().format("%Y-%m-%d").to_string();
            let initial = format!("# {today}\n\n{content}");
            tokio::fs::write(&path, initial).await?;
        }
        Ok(())
    }

    async fn read_long_term(&self) -> anyhow::Result<String> {
        Ok(tokio::fs::read_to_string(&self.memory_file)
            .await
            .unwrap_or_default())
    }

    async fn write_long_term(&self, content: &str) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let tmp_path = self.memory_file.with_extension(format!("md.tmp.{}", std::process::id()));
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.memory_file).await?;
        Ok(())
    }

    async fn get_recent_memories(&self, days: u32) -> anyhow::Result<String> {
        let files = self.list_memory_files().await;
        let mut parts = Vec::new();
        for f in files.into_iter().take(days as usize) {
            if let Ok(content) = tokio::fs::read_to_string(&f).await {
                if !content.trim().is_empty() {
                    parts.push(content);
                }
            }
        }
        Ok(parts.join("\n\n---\n\n"))
    }

    async fn get_memory_context(&self) -> anyhow::Result<String> {
        let mut sections = Vec::new();

        let long_term = self.read_long_term().await?;
        if !long_term.trim().is_empty() {
            sections.push(format!("## Long-term Memory\n{long_term}"));
        }

        let today = self.read_today().await?;
        if !today.trim().is_empty() {
            sections.push(format!("## Today's Notes\n{today}"));
        }

        Ok(sections.join("\n\n"))
    }
}
