//! Reply helpers for the inbound transport.
//!
//! Gateway bodies can be arbitrarily long, so replies are split to fit
//! Telegram's limit and every part is sent with retries.

use crate::bot::transport::{ConversationId, InboundTransport, TransportError};
use crate::config::TELEGRAM_MESSAGE_LIMIT;
use crate::utils::{retry_telegram_operation, split_long_message};

/// Sends `text` as one or more messages, retrying transient failures.
///
/// # Errors
///
/// Returns the first part that could not be delivered after retries.
pub async fn send_reply(
    transport: &dyn InboundTransport,
    conversation: ConversationId,
    text: &str,
) -> Result<(), TransportError> {
    for part in split_long_message(text, TELEGRAM_MESSAGE_LIMIT) {
        retry_telegram_operation(|| transport.send_text(conversation, &part)).await?;
    }
    Ok(())
}
