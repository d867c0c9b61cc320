//! Inbound transport abstraction
//!
//! The supervisor and the handlers only see this shape; [`crate::bot::telegram`]
//! provides the Telegram implementation.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Opaque identifier of a chat/thread
pub type ConversationId = i64;

/// Errors reported by the inbound transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Another consumer is receiving updates for the same bot identity
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Any other network, timeout or API failure
    #[error("Transport error: {0}")]
    Fault(String),
}

impl TransportError {
    /// `true` for the 409-class fault
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Kind of an inbound attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Compressed photo
    Photo,
    /// Audio file
    Audio,
    /// Voice note
    Voice,
    /// Generic document
    Document,
}

impl AttachmentKind {
    /// Human-readable name
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Document => "document",
        }
    }
}

/// Descriptor of an inbound attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment kind
    pub kind: AttachmentKind,
    /// Transport-specific reference used to download the content
    pub file_ref: String,
    /// Original file name, when the transport provides one
    pub file_name: Option<String>,
    /// Declared MIME type, when the transport provides one
    pub mime_type: Option<String>,
    /// Size in bytes, when known before download
    pub file_size: Option<u32>,
}

/// Content of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Text message (commands included)
    Text(String),
    /// Media message
    Attachment(Attachment),
}

/// One inbound event, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Conversation the event belongs to
    pub conversation: ConversationId,
    /// Event content
    pub payload: EventPayload,
}

/// Result of one long-poll call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundBatch {
    /// Offset acknowledging everything received, including unsupported updates
    pub next_offset: Option<i64>,
    /// Supported events in arrival order
    pub events: Vec<InboundEvent>,
}

/// Receive/reply interface of the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InboundTransport: Send + Sync {
    /// Removes any passive (webhook) delivery so long polling is the only receiver
    async fn clear_registration(&self, drop_pending: bool) -> Result<(), TransportError>;
    /// Waits up to `timeout` for the next batch of events after `offset`
    async fn receive(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<InboundBatch, TransportError>;
    /// Downloads an attachment by its transport reference
    async fn download(&self, file_ref: &str) -> Result<Vec<u8>, TransportError>;
    /// Sends a plain text reply
    async fn send_text(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<(), TransportError>;
    /// Sends a PNG image with a caption
    async fn send_photo(
        &self,
        conversation: ConversationId,
        png: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError>;
}
