//! Messaging gateway access
//!
//! Every outbound call goes through [`GatewayClient`], which folds transport
//! faults and unparsable bodies into a [`GatewayResponse`] instead of an error.

/// HTTP client for the gateway
pub mod client;

pub use client::GatewayClient;

use serde_json::{json, Value};
use std::fmt::Display;

/// Normalized result of one gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// HTTP status, `None` when the gateway could not be reached
    pub status: Option<u16>,
    /// Parsed JSON body or a synthetic `{status: false, ...}` object
    pub body: Value,
}

/// How a caller should read a [`GatewayResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome<'a> {
    /// 2xx status
    Success,
    /// Gateway answered with a non-2xx status
    Rejected(u16),
    /// Network-level fault, carrying its description
    Unreachable(&'a str),
}

impl GatewayResponse {
    /// Synthetic response for a network-level fault.
    #[must_use]
    pub fn transport_failure(cause: impl Display) -> Self {
        Self {
            status: None,
            body: json!({ "status": false, "error": cause.to_string() }),
        }
    }

    /// Wraps a body that is not JSON.
    #[must_use]
    pub fn raw_text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: json!({ "status": false, "text": text.into() }),
        }
    }

    /// Classifies the response for presentation.
    #[must_use]
    pub fn outcome(&self) -> GatewayOutcome<'_> {
        match self.status {
            None => GatewayOutcome::Unreachable(
                self.body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown transport error"),
            ),
            Some(code) if (200..300).contains(&code) => GatewayOutcome::Success,
            Some(code) => GatewayOutcome::Rejected(code),
        }
    }

    /// `true` for a 2xx status
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome() == GatewayOutcome::Success
    }

    /// Body rendered as compact JSON in the gateway's key order.
    #[must_use]
    pub fn body_text(&self) -> String {
        self.body.to_string()
    }
}

/// File part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// File name announced to the gateway
    pub file_name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Raw content
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_shape() {
        let response = GatewayResponse::transport_failure("connection refused");
        assert_eq!(response.status, None);
        assert_eq!(
            response.body,
            json!({ "status": false, "error": "connection refused" })
        );
        assert_eq!(
            response.outcome(),
            GatewayOutcome::Unreachable("connection refused")
        );
    }

    #[test]
    fn test_outcome_classification() {
        let ok = GatewayResponse {
            status: Some(201),
            body: json!({ "status": true }),
        };
        assert!(ok.is_success());

        let rejected = GatewayResponse::raw_text(401, "Unauthorized");
        assert_eq!(rejected.outcome(), GatewayOutcome::Rejected(401));
        assert_eq!(
            rejected.body_text(),
            r#"{"status":false,"text":"Unauthorized"}"#
        );
    }

    #[test]
    fn test_body_text_keeps_key_order() {
        let response = GatewayResponse {
            status: Some(200),
            body: json!({ "zeta": 1, "alpha": 2 }),
        };
        assert_eq!(response.body_text(), r#"{"zeta":1,"alpha":2}"#);
    }
}
