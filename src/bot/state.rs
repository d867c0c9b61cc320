//! Per-conversation upload expectations
//!
//! A conversation can have at most one armed expectation. Arming overwrites,
//! consuming removes atomically, so two attachments racing for the same
//! conversation can never both match it.

use crate::bot::transport::{AttachmentKind, ConversationId};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Kind of attachment a conversation is waiting for
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadKind {
    /// A photo
    Image,
    /// An audio file or a voice note
    Audio,
    /// Any document
    Document,
}

impl UploadKind {
    /// Whether an inbound attachment satisfies this expectation
    #[must_use]
    pub const fn accepts(self, kind: AttachmentKind) -> bool {
        matches!(
            (self, kind),
            (Self::Image, AttachmentKind::Photo)
                | (Self::Audio, AttachmentKind::Audio | AttachmentKind::Voice)
                | (Self::Document, AttachmentKind::Document)
        )
    }

    /// Human-readable name
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// In-memory store of armed expectations keyed by conversation
#[derive(Clone)]
pub struct SessionStore {
    pending: Cache<ConversationId, UploadKind>,
}

impl SessionStore {
    /// Creates a store whose expectations are forgotten after `idle_ttl`
    /// without being consumed.
    #[must_use]
    pub fn new(idle_ttl: Duration, max_conversations: u64) -> Self {
        let pending = Cache::builder()
            .max_capacity(max_conversations)
            .time_to_idle(idle_ttl)
            .build();
        Self { pending }
    }

    /// Arms (or re-arms) the expectation for a conversation.
    pub async fn set_expectation(&self, conversation: ConversationId, kind: UploadKind) {
        debug!(conversation, kind = kind.label(), "Armed upload expectation");
        self.pending.insert(conversation, kind).await;
    }

    /// Reads and clears the expectation in one step.
    pub async fn consume_expectation(&self, conversation: ConversationId) -> Option<UploadKind> {
        let kind = self.pending.remove(&conversation).await;
        if let Some(kind) = kind {
            debug!(conversation, kind = kind.label(), "Consumed upload expectation");
        }
        kind
    }

    /// Current expectation without consuming it
    pub async fn pending(&self, conversation: ConversationId) -> Option<UploadKind> {
        self.pending.get(&conversation).await
    }
}
