use super::{GatewayResponse, MediaFile};
use crate::config::{
    GATEWAY_JSON_TIMEOUT_SECS, GATEWAY_METADATA_TIMEOUT_SECS, GATEWAY_UPLOAD_TIMEOUT_SECS,
};
use crate::utils::truncate_str;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client as HttpClient, Method, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the gateway credential
const API_KEY_HEADER: &str = "apikey";
/// Characters of a non-JSON body shown in debug logs
const BODY_PREVIEW_CHARS: usize = 200;
/// MIME type used when the declared one is unusable
const FALLBACK_MIME: &str = "application/octet-stream";

/// Single choke point for calls to the messaging gateway.
///
/// No method returns an error: network faults become a response with
/// `status = None` and non-JSON bodies are wrapped as `{status: false, text}`.
#[derive(Clone)]
pub struct GatewayClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl GatewayClient {
    /// Creates a client for `base_url`; a trailing slash is ignored.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = HttpClient::builder()
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, timeout_secs: u64) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .http
            .request(method, url)
            .timeout(Duration::from_secs(timeout_secs));
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        request
    }

    /// `GET {path}` with the metadata timeout.
    pub async fn get(&self, path: &str) -> GatewayResponse {
        debug!(path, "Gateway GET");
        let request = self.request(Method::GET, path, GATEWAY_METADATA_TIMEOUT_SECS);
        execute(path, request).await
    }

    /// `POST {path}` with an optional JSON body.
    pub async fn post(&self, path: &str, body: Option<&Value>) -> GatewayResponse {
        debug!(path, has_body = body.is_some(), "Gateway POST");
        let mut request = self.request(Method::POST, path, GATEWAY_JSON_TIMEOUT_SECS);
        if let Some(body) = body {
            request = request.json(body);
        }
        execute(path, request).await
    }

    /// Multipart `POST {path}` with text fields and one `file` part.
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        file: MediaFile,
    ) -> GatewayResponse {
        debug!(
            path,
            file_name = %file.file_name,
            size = file.bytes.len(),
            "Gateway multipart POST"
        );
        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text((*name).to_string(), (*value).to_string());
        }
        form = form.part("file", file_part(file));

        let request = self
            .request(Method::POST, path, GATEWAY_UPLOAD_TIMEOUT_SECS)
            .multipart(form);
        execute(path, request).await
    }

    /// `GET /health`
    pub async fn health(&self) -> GatewayResponse {
        self.get("/health").await
    }

    /// `GET /instance/fetchInstances`
    pub async fn fetch_instances(&self) -> GatewayResponse {
        self.get("/instance/fetchInstances").await
    }

    /// `POST /instance/create` with `{instanceName}`
    pub async fn create_instance(&self, instance: &str) -> GatewayResponse {
        let body = json!({ "instanceName": instance });
        self.post("/instance/create", Some(&body)).await
    }

    /// `POST /instance/connect/{instance}`
    pub async fn connect(&self, instance: &str) -> GatewayResponse {
        self.post(&format!("/instance/connect/{instance}"), None).await
    }

    /// `POST /instance/restart/{instance}`
    pub async fn restart(&self, instance: &str) -> GatewayResponse {
        self.post(&format!("/instance/restart/{instance}"), None).await
    }

    /// `GET /instance/qr/{instance}`
    pub async fn qr(&self, instance: &str) -> GatewayResponse {
        self.get(&format!("/instance/qr/{instance}")).await
    }

    /// `POST /message/sendText` with `{instanceName, to, message}`
    pub async fn send_text(&self, instance: &str, to: &str, message: &str) -> GatewayResponse {
        let body = json!({ "instanceName": instance, "to": to, "message": message });
        self.post("/message/sendText", Some(&body)).await
    }

    /// `POST /message/sendText` with an extra `buttons` array of `(id, text)` pairs
    pub async fn send_buttons(
        &self,
        instance: &str,
        to: &str,
        message: &str,
        buttons: &[(&str, &str)],
    ) -> GatewayResponse {
        let buttons: Vec<Value> = buttons
            .iter()
            .map(|(id, text)| json!({ "id": id, "text": text }))
            .collect();
        let body = json!({
            "instanceName": instance,
            "to": to,
            "message": message,
            "buttons": buttons,
        });
        self.post("/message/sendText", Some(&body)).await
    }

    /// Multipart `POST /message/sendMedia` with `{instanceName, to, caption}` and the file
    pub async fn send_media(
        &self,
        instance: &str,
        to: &str,
        caption: &str,
        file: MediaFile,
    ) -> GatewayResponse {
        let fields = [("instanceName", instance), ("to", to), ("caption", caption)];
        self.post_multipart("/message/sendMedia", &fields, file)
            .await
    }
}

fn file_part(file: MediaFile) -> Part {
    let MediaFile {
        file_name,
        mime_type,
        bytes,
    } = file;
    // Shared buffer: each fallback rebuilds the part without copying the content
    let content = Bytes::from(bytes);
    let part = || {
        let length = u64::try_from(content.len()).unwrap_or(u64::MAX);
        Part::stream_with_length(Body::from(content.clone()), length).file_name(file_name.clone())
    };

    part().mime_str(&mime_type).unwrap_or_else(|e| {
        warn!(mime_type = %mime_type, "Invalid MIME type ({e}), using {FALLBACK_MIME}");
        part().mime_str(FALLBACK_MIME).unwrap_or_else(|_| part())
    })
}

async fn execute(path: &str, request: RequestBuilder) -> GatewayResponse {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(path, "Gateway unreachable: {e}");
            return GatewayResponse::transport_failure(e);
        }
    };

    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            warn!(path, status, "Failed to read gateway response body: {e}");
            return GatewayResponse {
                status: Some(status),
                body: json!({ "status": false, "error": e.to_string() }),
            };
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(body) => {
            debug!(path, status, "Gateway responded");
            GatewayResponse {
                status: Some(status),
                body,
            }
        }
        Err(_) => {
            debug!(
                path,
                status,
                preview = %truncate_str(&text, BODY_PREVIEW_CHARS),
                "Gateway returned a non-JSON body"
            );
            GatewayResponse::raw_text(status, text)
        }
    }
}
