//! Telegram implementation of [`InboundTransport`] on top of teloxide.

use crate::bot::transport::{
    Attachment, AttachmentKind, ConversationId, EventPayload, InboundBatch, InboundEvent,
    InboundTransport, TransportError,
};
use crate::config::POLL_HTTP_HEADROOM_SECS;
use async_trait::async_trait;
use lazy_regex::lazy_regex;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, UpdateKind};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

/// Long-polling Telegram transport
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Builds a bot whose HTTP client outlives a long-poll wait of `poll_timeout`.
    #[must_use]
    pub fn new(token: impl Into<String>, poll_timeout: Duration) -> Self {
        let headroom = Duration::from_secs(POLL_HTTP_HEADROOM_SECS);
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + headroom)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            bot: Bot::with_client(token, client),
        }
    }

    /// Username of the bot, used to accept `/command@username` forms.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if `getMe` fails.
    pub async fn bot_username(&self) -> Result<String, TransportError> {
        let me = self.bot.get_me().await.map_err(classify_request_error)?;
        Ok(me.username().to_string())
    }
}

/// Maps teloxide errors onto the transport taxonomy.
fn classify_request_error(err: RequestError) -> TransportError {
    let text = err.to_string();
    if matches!(err, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
        || is_conflict_message(&text)
    {
        TransportError::Conflict(text)
    } else {
        TransportError::Fault(text)
    }
}

/// Conflicts teloxide does not map to a typed variant still carry `Conflict:`
static RE_CONFLICT: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\bConflict\b");

fn is_conflict_message(text: &str) -> bool {
    RE_CONFLICT.is_match(text)
}

/// Bot API offsets are 32-bit; a wider one cannot be acknowledged.
fn request_offset(offset: Option<i64>) -> Option<i32> {
    let offset = offset?;
    match i32::try_from(offset) {
        Ok(offset) => Some(offset),
        Err(_) => {
            warn!(
                offset,
                "Update offset out of range, received updates will not be acknowledged"
            );
            None
        }
    }
}

fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let payload = if let Some(photos) = msg.photo() {
        // Sizes are ordered smallest first
        let largest = photos.last()?;
        EventPayload::Attachment(Attachment {
            kind: AttachmentKind::Photo,
            file_ref: largest.file.id.0.clone(),
            file_name: None,
            mime_type: None,
            file_size: Some(largest.file.size),
        })
    } else if let Some(audio) = msg.audio() {
        EventPayload::Attachment(Attachment {
            kind: AttachmentKind::Audio,
            file_ref: audio.file.id.0.clone(),
            file_name: audio.file_name.clone(),
            mime_type: audio.mime_type.as_ref().map(ToString::to_string),
            file_size: Some(audio.file.size),
        })
    } else if let Some(voice) = msg.voice() {
        EventPayload::Attachment(Attachment {
            kind: AttachmentKind::Voice,
            file_ref: voice.file.id.0.clone(),
            file_name: None,
            mime_type: None,
            file_size: Some(voice.file.size),
        })
    } else if let Some(doc) = msg.document() {
        EventPayload::Attachment(Attachment {
            kind: AttachmentKind::Document,
            file_ref: doc.file.id.0.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(ToString::to_string),
            file_size: Some(doc.file.size),
        })
    } else {
        EventPayload::Text(msg.text()?.to_string())
    };

    Some(InboundEvent {
        conversation: msg.chat.id.0,
        payload,
    })
}

#[async_trait]
impl InboundTransport for TelegramTransport {
    async fn clear_registration(&self, drop_pending: bool) -> Result<(), TransportError> {
        self.bot
            .delete_webhook()
            .drop_pending_updates(drop_pending)
            .await
            .map_err(classify_request_error)?;
        Ok(())
    }

    async fn receive(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<InboundBatch, TransportError> {
        let timeout_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        let mut request = self.bot.get_updates().timeout(timeout_secs);
        if let Some(offset) = request_offset(offset) {
            request = request.offset(offset);
        }
        let updates = request.await.map_err(classify_request_error)?;

        let mut batch = InboundBatch::default();
        for update in updates {
            let update_id = i64::from(update.id.0);
            let next = update_id + 1;
            batch.next_offset = Some(batch.next_offset.map_or(next, |o| o.max(next)));

            match update.kind {
                UpdateKind::Message(ref msg) => match event_from_message(msg) {
                    Some(event) => batch.events.push(event),
                    None => debug!(update_id, "Skipping message without supported content"),
                },
                _ => debug!(update_id, "Skipping unsupported update kind"),
            }
        }
        Ok(batch)
    }

    async fn download(&self, file_ref: &str) -> Result<Vec<u8>, TransportError> {
        let file = self
            .bot
            .get_file(FileId(file_ref.to_string()))
            .await
            .map_err(classify_request_error)?;
        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| TransportError::Fault(e.to_string()))?;
        Ok(buf)
    }

    async fn send_text(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(conversation), text.to_string())
            .await
            .map_err(classify_request_error)?;
        Ok(())
    }

    async fn send_photo(
        &self,
        conversation: ConversationId,
        png: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        let photo = InputFile::memory(png).file_name("qrcode.png");
        self.bot
            .send_photo(ChatId(conversation), photo)
            .caption(caption.to_string())
            .await
            .map_err(classify_request_error)?;
        Ok(())
    }
}
