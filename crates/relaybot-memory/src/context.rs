//! Context builder — constructs the system prompt and conversation messages.
//!
//! Builds the system prompt from identity plus the memory subsystem's
//! context (preferring semantic retrieval when the attached store supports
//! it), then assembles the full message list for an LLM call.

use std::path::PathBuf;

use chrono::Utc;
use relaybot_core::types::{ContentPart, ImageUrl, Message};
use tracing::warn;

use crate::memory::backend::MemoryBackend;

/// Builds system prompts and conversation message lists for the agent subscriber.
pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        ContextBuilder {
            workspace: workspace.into(),
            agent_name: agent_name.into(),
        }
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt: identity plus the memory subsystem's
    /// context, preferring semantic retrieval keyed on `query` when the
    /// attached store supports it.
    pub async fn build_system_prompt(&self, memory: &dyn MemoryBackend, query: &str) -> String {
        let mut parts: Vec<String> = vec![self.build_identity()];

        let memory_context = match memory.as_semantic() {
            Some(semantic) => semantic.get_memory_context_semantic(query).await,
            None => memory.get_memory_context().await,
        };

        match memory_context {
            Ok(context) if !context.is_empty() => parts.push(context),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to build memory context, continuing without it"),
        }

        parts.join("\n\n---\n\n")
    }

    /// Core identity block.
    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             You have access to memory tools. Use `save_memory` to remember things worth \
             recalling later, `update_long_term_memory` to consolidate persistent facts, and \
             `read_memory` to check what you already know before asking the user again.",
            name = self.agent_name,
        )
    }

    // ────────────── Message building ──────────────

    /// Build the full message list for an LLM call: system prompt, session
    /// history, then the current user message.
    pub async fn build_messages(
        &self,
        memory: &dyn MemoryBackend,
        history: &[Message],
        user_text: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::new();

        let mut system = self.build_system_prompt(memory, user_text).await;
        system.push_str(&format!("\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"));
        messages.push(Message::system(system));

        messages.extend_from_slice(history);

        if media.is_empty() {
            messages.push(Message::user(user_text));
        } else {
            messages.push(build_multimodal_user_message(user_text, media));
        }

        messages
    }

    /// Add a tool result to the message list (convenience wrapper).
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, result: &str) {
        messages.push(Message::tool_result(tool_call_id, result));
    }

    /// Add an assistant message (with optional tool calls) to the message list.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<relaybot_core::types::ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(tool_calls));
        }
    }
}

// ─────────────────────────────────────────────
// Multimodal helpers
// ─────────────────────────────────────────────

/// Build a user message with base64-encoded images.
///
/// Audio files are skipped — their transcription is expected to already be
/// folded into the text content by the originating channel.
fn build_multimodal_user_message(text: &str, media_paths: &[String]) -> Message {
    let mut parts = Vec::new();

    for path in media_paths {
        if is_audio_extension(path) {
            continue;
        }
        if let Ok(data) = std::fs::read(path) {
            let mime = guess_mime(path);
            let b64 = base64_encode(&data);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{b64}"),
                    detail: None,
                },
            });
        }
    }

    parts.push(ContentPart::Text { text: text.to_string() });

    Message::user_parts(parts)
}

fn is_audio_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".ogg")
        || lower.ends_with(".oga")
        || lower.ends_with(".opus")
        || lower.ends_with(".mp3")
        || lower.ends_with(".m4a")
        || lower.ends_with(".wav")
        || lower.ends_with(".flac")
        || lower.ends_with(".aac")
        || lower.ends_with(".wma")
        || lower.ends_with(".webm")
}

fn guess_mime(path: &str) -> &str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}

/// Base64-encode bytes (standard alphabet, no external dependency).
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = if chunk.len() > 1 { chunk[1] as u32 } else { 0 };
        let b2 = if chunk.len() > 2 { chunk[2] as u32 } else { 0 };
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((triple >> 18) & 0x3F) as usize]);
        out.push(ALPHABET[((triple >> 12) & 0x3F) as usize]);
        out.push(if chunk.len() > 1 { ALPHABET[((triple >> 6) & 0x3F) as usize] } else { b'=' });
        out.push(if chunk.len() > 2 { ALPHABET[(triple & 0x3F) as usize] } else { b'=' });
    }
    String::from_utf8(out).unwrap_or_default()
}
