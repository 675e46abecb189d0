//! Memory tools — the `Tool` surface agents use to read and write memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::base::{optional_i64, require_string, Tool};

use super::backend::MemoryBackend;

/// Appends free-form notes to today's memory file.
pub struct SaveMemoryTool {
    memory: Arc<dyn MemoryBackend>,
}

impl SaveMemoryTool {
    pub fn new(memory: Arc<dyn MemoryBackend>) -> Self {
        SaveMemoryTool { memory }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Save important information to today's memory notes. Use this to remember facts, \
         preferences, decisions, or anything worth recalling in future conversations. Each \
         call appends to today's notes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The information to remember (markdown formatted)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        match self.memory.append_today(&content).await {
            Ok(()) => Ok("Memory saved successfully.".to_string()),
            Err(e) => Ok(format!("Error saving memory: {e}")),
        }
    }
}

/// Replaces the entire long-term memory document.
pub struct UpdateLongTermMemoryTool {
    memory: Arc<dyn MemoryBackend>,
}

impl UpdateLongTermMemoryTool {
    pub fn new(memory: Arc<dyn MemoryBackend>) -> Self {
        UpdateLongTermMemoryTool { memory }
    }
}

#[async_trait]
impl Tool for UpdateLongTermMemoryTool {
    fn name(&self) -> &str {
        "update_long_term_memory"
    }

    fn description(&self) -> &str {
        "Update the long-term memory with consolidated information. This REPLACES the entire \
         long-term memory content. Use this to store persistent facts like user preferences, \
         important context, or summaries. Read current long-term memory first before updating \
         to avoid losing existing information."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The complete long-term memory content (markdown formatted)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        match self.memory.write_long_term(&content).await {
            Ok(()) => Ok("Long-term memory updated successfully.".to_string()),
            Err(e) => Ok(format!("Error updating long-term memory: {e}")),
        }
    }
}

/// Reads today's notes, long-term memory, or the last N days of daily notes.
pub struct ReadMemoryTool {
    memory: Arc<dyn MemoryBackend>,
}

impl ReadMemoryTool {
    pub fn new(memory: Arc<dyn MemoryBackend>) -> Self {
        ReadMemoryTool { memory }
    }
}

#[async_trait]
impl Tool for ReadMemoryTool {
    fn name(&self) -> &str {
        "read_memory"
    }

    fn description(&self) -> &str {
        "Read memory contents. Can read today's notes, long-term memory, or recent memories \
         from the past N days."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "scope": {
                    "type": "string",
                    "enum": ["today", "long_term", "recent"],
                    "description": "What to read: 'today' for today's notes, 'long_term' for persistent memory, 'recent' for last N days"
                },
                "days": {
                    "type": "integer",
                    "description": "Number of days to look back (only used when scope='recent', default 7)"
                }
            },
            "required": ["scope"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let scope = require_string(&params, "scope")?;
        let days = optional_i64(&params, "days").unwrap_or(7).max(0) as u32;

        match scope.as_str() {
            "today" => match self.memory.read_today().await {
                Ok(content) if !content.is_empty() => Ok(content),
                Ok(_) => Ok("(No notes for today)".to_string()),
                Err(e) => Ok(format!("Error reading memory: {e}")),
            },
            "long_term" => match self.memory.read_long_term().await {
                Ok(content) if !content.is_empty() => Ok(content),
                Ok(_) => Ok("(No long-term memory)".to_string()),
                Err(e) => Ok(format!("Error reading memory: {e}")),
            },
            "recent" => match self.memory.get_recent_memories(days).await {
                Ok(content) if !content.is_empty() => Ok(content),
                Ok(_) => Ok(format!("(No memories in the last {days} days)")),
                Err(e) => Ok(format!("Error reading memory: {e}")),
            },
            other => Ok(format!("Error: unknown scope '{other}', use 'today', 'long_term', or 'recent'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::file_store::FileMemoryStore;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_save_memory_appends() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = SaveMemoryTool::new(memory.clone());

        let result = tool.execute(params(&[("content", json!("remember this"))])).await.unwrap();
        assert_eq!(result, "Memory saved successfully.");
        assert!(memory.read_today().await.unwrap().contains("remember this"));
    }

    #[tokio::test]
    async fn test_save_memory_missing_content() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = SaveMemoryTool::new(memory);
        assert!(tool.execute(HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_long_term_memory_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = UpdateLongTermMemoryTool::new(memory.clone());

        tool.execute(params(&[("content", json!("v1"))])).await.unwrap();
        tool.execute(params(&[("content", json!("v2"))])).await.unwrap();
        assert_eq!(memory.read_long_term().await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_read_memory_today_empty() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = ReadMemoryTool::new(memory);

        let result = tool.execute(params(&[("scope", json!("today"))])).await.unwrap();
        assert_eq!(result, "(No notes for today)");
    }

    #[tokio::test]
    async fn test_read_memory_unknown_scope() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = ReadMemoryTool::new(memory);

        let result = tool.execute(params(&[("scope", json!("bogus"))])).await.unwrap();
        assert!(result.contains("unknown scope"));
    }

    #[tokio::test]
    async fn test_read_memory_recent_default_days() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = ReadMemoryTool::new(memory);

        let result = tool.execute(params(&[("scope", json!("recent"))])).await.unwrap();
        assert_eq!(result, "(No memories in the last 7 days)");
    }
}
