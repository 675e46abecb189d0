//! Bus event types — messages flowing between channels and the agent.
//!
//! Ported from the donor's `bus/types.rs`, extended with `StreamChunk` and
//! the `stream_callback` side-channel described by the original Python
//! `bus/events.py` (`InboundMessage.stream_callback`, `wants_stream`).

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// One incremental piece of a streamed agent reply.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamChunk {
    /// Partial text for this chunk. May be empty (e.g. the final chunk).
    pub content: String,
    /// True for the last chunk of a request; no chunk follows it.
    pub is_final: bool,
    /// Set on the final chunk: `"stop"`, `"tool_calls"`, `"length"`, or `"error"`.
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// A non-final chunk carrying partial text.
    pub fn delta(content: impl Into<String>) -> Self {
        StreamChunk {
            content: content.into(),
            is_final: false,
            finish_reason: None,
        }
    }

    /// The final chunk of a stream.
    pub fn done(finish_reason: impl Into<String>) -> Self {
        StreamChunk {
            content: String::new(),
            is_final: true,
            finish_reason: Some(finish_reason.into()),
        }
    }
}

/// Error returned when writing to a [`StreamSink`] whose receiver has gone away
/// (the HTTP request that owned it was cancelled or already completed).
#[derive(Debug, thiserror::Error)]
#[error("stream sink closed")]
pub struct StreamClosed;

/// A handle the agent uses to emit [`StreamChunk`]s for one request.
///
/// Owned by the requesting HTTP channel; the bus never inspects its contents
/// and drops its own clone after delivery. Closing the receiving end (request
/// cancellation) surfaces as [`StreamClosed`] on the next `send`.
#[derive(Clone, Debug)]
pub struct StreamSink(mpsc::Sender<StreamChunk>);

impl StreamSink {
    /// Wrap a channel sender as a stream sink.
    pub fn new(tx: mpsc::Sender<StreamChunk>) -> Self {
        StreamSink(tx)
    }

    /// Push a chunk. Returns `Err` if the receiver has been dropped.
    pub async fn send(&self, chunk: StreamChunk) -> Result<(), StreamClosed> {
        self.0.send(chunk).await.map_err(|_| StreamClosed)
    }
}

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "http", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Attached media (photos, voice, documents).
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (e.g. message_id, username).
    pub metadata: HashMap<String, String>,
    /// Present iff the requester wants a streamed reply.
    pub stream_callback: Option<StreamSink>,
}

impl InboundMessage {
    /// Create a new non-streaming inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            stream_callback: None,
        }
    }

    /// Attach a stream sink, turning this into a streaming request.
    pub fn with_stream_callback(mut self, sink: StreamSink) -> Self {
        self.stream_callback = Some(sink);
        self
    }

    /// Session key combining channel and chat_id (e.g. "http:u1:a1b2c3d4").
    ///
    /// Used as the bus's per-session ordering granularity and for session
    /// persistence / history lookup.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// True iff the caller attached a stream sink.
    pub fn wants_stream(&self) -> bool {
        self.stream_callback.is_some()
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
    /// Attached media to send.
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("http", "user_42", "chat_99", "Hello!");

        assert_eq!(msg.channel, "http");
        assert_eq!(msg.sender_id, "user_42");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "Hello!");
        assert!(msg.media.is_empty());
        assert!(msg.metadata.is_empty());
        assert!(!msg.wants_stream());
    }

    #[test]
    fn test_session_key() {
        let msg = InboundMessage::new("http", "user_1", "channel_abc", "test");
        assert_eq!(msg.session_key(), "http:channel_abc");
    }

    #[test]
    fn test_session_key_format_cli() {
        let msg = InboundMessage::new("cli", "local", "default", "hello");
        assert_eq!(msg.session_key(), "cli:default");
    }

    #[test]
    fn test_outbound_message_creation() {
        let msg = OutboundMessage::new("http", "chat_99", "Here's your answer!");

        assert_eq!(msg.channel, "http");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "Here's your answer!");
        assert!(msg.reply_to.is_none());
        assert!(msg.media.is_empty());
    }

    #[test]
    fn test_inbound_with_metadata() {
        let mut msg = InboundMessage::new("http", "user_1", "chat_1", "hi");
        msg.metadata
            .insert("message_id".to_string(), "12345".to_string());
        msg.metadata
            .insert("username".to_string(), "u1".to_string());

        assert_eq!(msg.metadata.get("username").unwrap(), "u1");
        assert_eq!(msg.metadata.get("message_id").unwrap(), "12345");
    }

    #[test]
    fn test_inbound_with_media() {
        let mut msg = InboundMessage::new("http", "user_1", "chat_1", "check this");
        msg.media.push(MediaAttachment {
            mime_type: "image/jpeg".to_string(),
            path: "/tmp/photo.jpg".to_string(),
            filename: Some("photo.jpg".to_string()),
            size: Some(102400),
        });

        assert_eq!(msg.media.len(), 1);
        assert_eq!(msg.media[0].mime_type, "image/jpeg");
        assert_eq!(msg.media[0].size, Some(102400));
    }

    #[tokio::test]
    async fn test_wants_stream_and_sink_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let msg = InboundMessage::new("http", "u1", "c1", "hi")
            .with_stream_callback(StreamSink::new(tx));
        assert!(msg.wants_stream());

        let sink = msg.stream_callback.clone().unwrap();
        sink.send(StreamChunk::delta("hel")).await.unwrap();
        sink.send(StreamChunk::done("stop")).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "hel");
        assert!(!first.is_final);

        let second = rx.recv().await.unwrap();
        assert!(second.is_final);
        assert_eq!(second.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_stream_sink_closed_on_drop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = StreamSink::new(tx);
        let err = sink.send(StreamChunk::delta("x")).await;
        assert!(err.is_err());
    }
}
