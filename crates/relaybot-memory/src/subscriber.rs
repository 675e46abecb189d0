//! Agent subscriber — the single inbound handler wired onto the message bus.
//!
//! Receives an `InboundMessage`, builds context from session history plus
//! the memory subsystem, runs a bounded LLM ↔ memory-tool loop, publishes
//! the reply (buffered or streamed), and hands the completed turn to the
//! conversation ingestor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};

use relaybot_core::bus::queue::MessageBus;
use relaybot_core::bus::types::{InboundMessage, OutboundMessage, StreamChunk};
use relaybot_core::session::manager::SessionManager;
use relaybot_core::types::{Message, ToolCall};
use relaybot_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::memory::backend::MemoryBackend;
use crate::memory::ingestor::ConversationIngestor;
use crate::memory::tools::{ReadMemoryTool, SaveMemoryTool, UpdateLongTermMemoryTool};
use crate::tools::registry::ToolRegistry;

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 6;

/// The agent subscriber: the bus's sole inbound handler.
pub struct AgentSubscriber {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,
    memory: Arc<dyn MemoryBackend>,
    ingestor: Arc<dyn ConversationIngestor>,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: SessionManager,
}

impl AgentSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        agent_name: impl Into<String>,
        model: Option<String>,
        max_iterations: Option<usize>,
        request_config: Option<LlmRequestConfig>,
        memory: Arc<dyn MemoryBackend>,
        ingestor: Arc<dyn ConversationIngestor>,
        sessions: SessionManager,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let request_config = request_config.unwrap_or_default();

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SaveMemoryTool::new(memory.clone())));
        tools.register(Arc::new(UpdateLongTermMemoryTool::new(memory.clone())));
        tools.register(Arc::new(ReadMemoryTool::new(memory.clone())));

        let context = ContextBuilder::new(workspace, agent_name);

        info!(model = %model, tools = tools.len(), max_iterations, "agent subscriber initialized");

        AgentSubscriber {
            bus,
            provider,
            model,
            max_iterations,
            request_config,
            memory,
            ingestor,
            tools,
            context,
            sessions,
        }
    }

    /// Register this subscriber as the bus's inbound handler.
    pub async fn attach(self: Arc<Self>) {
        let this = self.clone();
        self.bus
            .subscribe_inbound(Arc::new(move |msg: InboundMessage| {
                let this = this.clone();
                Box::pin(async move { this.handle(msg).await })
            }))
            .await;
    }

    /// Handle one inbound message end to end: build context, run the LLM ↔
    /// tool loop, emit the reply (buffered or streamed), then ingest.
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()> {
        let session_key = msg.session_key();
        debug!(session_key = %session_key, "agent subscriber received message");

        let history = self.sessions.get_history(&session_key, 50);
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();

        let mut messages = self
            .context
            .build_messages(self.memory.as_ref(), &history, &msg.content, &media_paths, &msg.channel, &msg.chat_id)
            .await;

        let tool_defs = self.tools.get_definitions();
        let mut final_content: Option<String> = None;

        for iteration in 0..self.max_iterations {
            debug!(iteration, "LLM call");

            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if response.has_tool_calls() {
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(&mut messages, response.content.clone(), tool_calls.clone());

                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    let result = self.tools.execute(&tc.function.name, params).await;
                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let content = final_content.unwrap_or_else(|| "I've completed processing but have no response to give.".into());

        if let Some(sink) = &msg.stream_callback {
            emit_stream(sink, &content).await;
        }

        self.sessions.add_message(&session_key, Message::user(&msg.content));
        self.sessions.add_message(&session_key, Message::assistant(&content));

        self.ingestor.ingest(&session_key, &msg.content, &content).await;

        let reply = OutboundMessage::new(&msg.channel, &msg.chat_id, &content);
        if let Err(e) = self.bus.publish_outbound(reply).await {
            error!(error = %e, session_key = %session_key, "failed to publish outbound message");
        }

        Ok(())
    }
}

/// Split `content` into a handful of chunks and push them through `sink`,
/// finishing with a final chunk carrying `finish_reason="stop"`. The
/// `LlmProvider` surface in this system returns complete responses rather
/// than a token stream, so streaming is synthesized at the word boundary.
async fn emit_stream(sink: &relaybot_core::bus::types::StreamSink, content: &str) {
    for word in content.split_inclusive(' ') {
        if sink.send(StreamChunk::delta(word)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(StreamChunk::done("stop")).await;
}
