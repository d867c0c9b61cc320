//! Relays an inbound attachment to the gateway's `sendMedia` endpoint.

use crate::bot::state::{SessionStore, UploadKind};
use crate::bot::transport::{
    Attachment, AttachmentKind, ConversationId, InboundTransport, TransportError,
};
use crate::config::TELEGRAM_MAX_DOWNLOAD_BYTES;
use crate::gateway::{GatewayClient, GatewayResponse, MediaFile};
use crate::utils::retry_telegram_operation;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Fallback MIME type for documents without a declared type
const DEFAULT_DOCUMENT_MIME: &str = "application/octet-stream";

/// Errors that stop an attachment before it reaches the gateway
#[derive(Error, Debug)]
pub enum RelayError {
    /// The attachment could not be fetched from the transport
    #[error("download failed: {0}")]
    Download(#[from] TransportError),
    /// No destination address is configured
    #[error("no destination configured (TEST_PHONE_NUMBER)")]
    MissingDestination,
    /// The attachment exceeds what the transport lets bots download
    #[error("file too large: {size} bytes (max {limit})")]
    TooLarge {
        /// Declared size
        size: u32,
        /// Download limit
        limit: u32,
    },
}

/// Terminal result of one inbound attachment
#[derive(Debug)]
pub enum RelayOutcome {
    /// Nothing was armed, the attachment is unsolicited
    Ignored,
    /// The attachment does not match the armed expectation
    Mismatch {
        /// What the conversation was waiting for
        expected: UploadKind,
        /// What arrived
        received: AttachmentKind,
    },
    /// The gateway was called; its response is to be relayed
    Delivered(GatewayResponse),
    /// Download or preparation failed
    Failed(RelayError),
}

/// Bridges inbound attachments to gateway media messages
#[derive(Clone)]
pub struct MediaRelay {
    transport: Arc<dyn InboundTransport>,
    gateway: Arc<GatewayClient>,
    sessions: SessionStore,
    instance: String,
    destination: Option<String>,
}

impl MediaRelay {
    /// Creates a relay sending through `instance` to `destination`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn InboundTransport>,
        gateway: Arc<GatewayClient>,
        sessions: SessionStore,
        instance: String,
        destination: Option<String>,
    ) -> Self {
        Self {
            transport,
            gateway,
            sessions,
            instance,
            destination,
        }
    }

    /// Handles one inbound attachment.
    ///
    /// The conversation's expectation is consumed before anything else, so it
    /// is cleared exactly once whatever the outcome.
    pub async fn relay(&self, conversation: ConversationId, attachment: &Attachment) -> RelayOutcome {
        let Some(expected) = self.sessions.consume_expectation(conversation).await else {
            return RelayOutcome::Ignored;
        };

        if !expected.accepts(attachment.kind) {
            info!(
                conversation,
                expected = expected.label(),
                received = attachment.kind.label(),
                "Attachment does not match armed expectation"
            );
            return RelayOutcome::Mismatch {
                expected,
                received: attachment.kind,
            };
        }

        match self.forward(attachment).await {
            Ok(response) => RelayOutcome::Delivered(response),
            Err(e) => {
                warn!(conversation, "Media relay failed: {e}");
                RelayOutcome::Failed(e)
            }
        }
    }

    async fn forward(&self, attachment: &Attachment) -> Result<GatewayResponse, RelayError> {
        let destination = self
            .destination
            .as_deref()
            .ok_or(RelayError::MissingDestination)?;

        if let Some(size) = attachment.file_size {
            if size > TELEGRAM_MAX_DOWNLOAD_BYTES {
                return Err(RelayError::TooLarge {
                    size,
                    limit: TELEGRAM_MAX_DOWNLOAD_BYTES,
                });
            }
        }

        let bytes =
            retry_telegram_operation(|| self.transport.download(&attachment.file_ref)).await?;
        let file = media_file(attachment, bytes);
        info!(
            file_name = %file.file_name,
            mime_type = %file.mime_type,
            size = file.bytes.len(),
            "Relaying attachment to gateway"
        );

        let caption = format!("Sent via bot ({})", file.file_name);
        Ok(self
            .gateway
            .send_media(&self.instance, destination, &caption, file)
            .await)
    }
}

/// Applies per-kind file name and MIME defaults.
fn media_file(attachment: &Attachment, bytes: Vec<u8>) -> MediaFile {
    let (file_name, mime_type) = match attachment.kind {
        AttachmentKind::Photo => ("image.jpg".to_string(), "image/jpeg".to_string()),
        AttachmentKind::Voice => ("voice.ogg".to_string(), "audio/ogg".to_string()),
        AttachmentKind::Audio => (
            attachment
                .file_name
                .clone()
                .unwrap_or_else(|| "audio.ogg".to_string()),
            attachment
                .mime_type
                .clone()
                .unwrap_or_else(|| "audio/ogg".to_string()),
        ),
        AttachmentKind::Document => (
            attachment
                .file_name
                .clone()
                .unwrap_or_else(|| "file".to_string()),
            attachment
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_DOCUMENT_MIME.to_string()),
        ),
    };
    MediaFile {
        file_name,
        mime_type,
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::transport::MockInboundTransport;
    use std::time::Duration;

    fn attachment(kind: AttachmentKind) -> Attachment {
        Attachment {
            kind,
            file_ref: "file-1".to_string(),
            file_name: None,
            mime_type: None,
            file_size: Some(3),
        }
    }

    fn relay_with(transport: MockInboundTransport, destination: Option<&str>) -> MediaRelay {
        // Port 9 (discard) on localhost is never a gateway
        let gateway = Arc::new(GatewayClient::new("http://127.0.0.1:9", None));
        MediaRelay::new(
            Arc::new(transport),
            gateway,
            SessionStore::new(Duration::from_secs(60), 100),
            "defaultbot".to_string(),
            destination.map(ToString::to_string),
        )
    }

    #[tokio::test]
    async fn test_unsolicited_attachment_is_ignored() {
        let mut transport = MockInboundTransport::new();
        transport.expect_download().never();
        let relay = relay_with(transport, Some("5511"));

        let outcome = relay.relay(1, &attachment(AttachmentKind::Photo)).await;
        assert!(matches!(outcome, RelayOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_mismatch_consumes_expectation() {
        let mut transport = MockInboundTransport::new();
        transport.expect_download().never();
        let relay = relay_with(transport, Some("5511"));
        relay.sessions.set_expectation(1, UploadKind::Document).await;

        let outcome = relay.relay(1, &attachment(AttachmentKind::Photo)).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Mismatch {
                expected: UploadKind::Document,
                received: AttachmentKind::Photo
            }
        ));
        assert_eq!(relay.sessions.pending(1).await, None);
    }

    #[tokio::test]
    async fn test_oversized_attachment_fails_without_download() {
        let mut transport = MockInboundTransport::new();
        transport.expect_download().never();
        let relay = relay_with(transport, Some("5511"));
        relay.sessions.set_expectation(1, UploadKind::Document).await;

        let mut big = attachment(AttachmentKind::Document);
        big.file_size = Some(TELEGRAM_MAX_DOWNLOAD_BYTES + 1);

        let outcome = relay.relay(1, &big).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::TooLarge { .. })
        ));
        assert_eq!(relay.sessions.pending(1).await, None);
    }

    #[tokio::test]
    async fn test_missing_destination_fails() {
        let mut transport = MockInboundTransport::new();
        transport.expect_download().never();
        let relay = relay_with(transport, None);
        relay.sessions.set_expectation(1, UploadKind::Image).await;

        let outcome = relay.relay(1, &attachment(AttachmentKind::Photo)).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::MissingDestination)
        ));
    }

    #[test]
    fn test_media_defaults() {
        let voice = media_file(&attachment(AttachmentKind::Voice), vec![1]);
        assert_eq!(voice.file_name, "voice.ogg");
        assert_eq!(voice.mime_type, "audio/ogg");

        let photo = media_file(&attachment(AttachmentKind::Photo), vec![1]);
        assert_eq!(photo.file_name, "image.jpg");
        assert_eq!(photo.mime_type, "image/jpeg");

        let doc = media_file(&attachment(AttachmentKind::Document), vec![1]);
        assert_eq!(doc.file_name, "file");
        assert_eq!(doc.mime_type, DEFAULT_DOCUMENT_MIME);

        let mut named = attachment(AttachmentKind::Document);
        named.file_name = Some("report.pdf".to_string());
        named.mime_type = Some("application/pdf".to_string());
        let doc = media_file(&named, vec![1]);
        assert_eq!(doc.file_name, "report.pdf");
        assert_eq!(doc.mime_type, "application/pdf");
    }
}
