//! Small helpers shared by the bot: retries, truncation and reply splitting.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use std::fmt::Display;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Retry a Telegram API operation with exponential backoff.
///
/// Used for replies and file downloads, which may fail on transient network
/// errors. Delays start at 500ms, are capped at 4s, with jitter, and at most
/// three retries are made.
///
/// # Examples
///
/// ```no_run
/// use evo_relay::utils::retry_telegram_operation;
///
/// # async fn example() -> Result<(), String> {
/// let bytes: Vec<u8> = retry_telegram_operation(|| async { Ok::<_, String>(vec![1, 2, 3]) }).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted.
pub async fn retry_telegram_operation<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use evo_relay::utils::truncate_str;
/// let s = "Olá, mundo!";
/// assert_eq!(truncate_str(s, 3), "Olá");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Splits a reply into parts no longer than `max_length` bytes.
///
/// Lines are kept whole when they fit; longer lines are cut on grapheme
/// boundaries.
///
/// # Examples
///
/// ```
/// use evo_relay::utils::split_long_message;
/// let long_msg = "A line of gateway output\n".repeat(300);
/// let parts = split_long_message(&long_msg, 4000);
/// assert!(parts.len() > 1);
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.len() <= max_length {
        return if message.is_empty() {
            Vec::new()
        } else {
            vec![message.to_string()]
        };
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    for line in message.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > max_length {
            parts.push(current.trim_end().to_string());
            current.clear();
        }

        if line.len() > max_length {
            for grapheme in line.graphemes(true) {
                if current.len() + grapheme.len() > max_length {
                    parts.push(std::mem::take(&mut current));
                }
                current.push_str(grapheme);
            }
        } else {
            current.push_str(line);
        }
        current.push('\n');
    }

    if !current.trim_end().is_empty() {
        parts.push(current.trim_end().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_long_message("hello", 10), vec!["hello".to_string()]);
        assert!(split_long_message("", 10).is_empty());
    }

    #[test]
    fn test_split_respects_limit() {
        let message = "line of text\n".repeat(50);
        let parts = split_long_message(&message, 40);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.len() <= 40));
        assert_eq!(parts.concat().matches("line of text").count(), 50);
    }

    #[test]
    fn test_split_cuts_single_long_line() {
        let message = "é".repeat(30);
        let parts = split_long_message(&message, 10);
        assert!(parts.iter().all(|p| p.len() <= 10));
        assert_eq!(parts.concat(), message);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let mut attempts = 0;
        let result: Result<(), String> = retry_telegram_operation(|| {
            attempts += 1;
            let attempt = attempts;
            async move { Err(format!("attempt {attempt}")) }
        })
        .await;

        assert_eq!(result, Err(format!("attempt {}", TELEGRAM_API_MAX_RETRIES + 1)));
    }
}
