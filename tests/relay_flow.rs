use async_trait::async_trait;
use evo_relay::bot::transport::{
    Attachment, AttachmentKind, ConversationId, EventPayload, InboundBatch, InboundEvent,
    InboundTransport, TransportError,
};
use evo_relay::bot::{CommandRouter, SessionStore};
use evo_relay::config::Settings;
use evo_relay::gateway::GatewayClient;
use evo_relay::supervisor::EventHandler;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHAT: ConversationId = 42;

/// Transport that records replies and serves fixed download content
#[derive(Default)]
struct RecordingTransport {
    texts: Mutex<Vec<String>>,
    photos: Mutex<Vec<(Vec<u8>, String)>>,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().expect("texts lock").clone()
    }

    fn photo_count(&self) -> usize {
        self.photos.lock().expect("photos lock").len()
    }
}

#[async_trait]
impl InboundTransport for RecordingTransport {
    async fn clear_registration(&self, _drop_pending: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn receive(
        &self,
        _offset: Option<i64>,
        _timeout: Duration,
    ) -> Result<InboundBatch, TransportError> {
        Ok(InboundBatch::default())
    }

    async fn download(&self, _file_ref: &str) -> Result<Vec<u8>, TransportError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    async fn send_text(
        &self,
        _conversation: ConversationId,
        text: &str,
    ) -> Result<(), TransportError> {
        self.texts.lock().expect("texts lock").push(text.to_string());
        Ok(())
    }

    async fn send_photo(
        &self,
        _conversation: ConversationId,
        png: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.photos
            .lock()
            .expect("photos lock")
            .push((png, caption.to_string()));
        Ok(())
    }
}

fn settings(base_url: &str, destination: Option<&str>) -> Settings {
    Settings {
        bot_token: "123:abc".to_string(),
        evo_api_url: base_url.to_string(),
        authentication_api_key: Some("k".to_string()),
        evo_instance_name: "defaultbot".to_string(),
        test_phone_number: destination.map(str::to_string),
        lock_file: None,
        skip_pending_updates: true,
    }
}

fn router(
    server: &MockServer,
    destination: Option<&str>,
) -> (CommandRouter, Arc<RecordingTransport>, SessionStore) {
    let transport = Arc::new(RecordingTransport::default());
    let gateway = Arc::new(GatewayClient::new(server.base_url(), Some("k".to_string())));
    let sessions = SessionStore::new(Duration::from_secs(60), 100);
    let router = CommandRouter::new(
        transport.clone(),
        gateway,
        sessions.clone(),
        Arc::new(settings(&server.base_url(), destination)),
        "relay_bot".to_string(),
    );
    (router, transport, sessions)
}

fn text(body: &str) -> InboundEvent {
    InboundEvent {
        conversation: CHAT,
        payload: EventPayload::Text(body.to_string()),
    }
}

fn photo() -> InboundEvent {
    InboundEvent {
        conversation: CHAT,
        payload: EventPayload::Attachment(Attachment {
            kind: AttachmentKind::Photo,
            file_ref: "photo-1".to_string(),
            file_name: None,
            mime_type: None,
            file_size: Some(4),
        }),
    }
}

#[tokio::test]
async fn create_instance_relays_gateway_body_verbatim() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/instance/create")
            .header("apikey", "k")
            .json_body(json!({ "instanceName": "foo" }));
        then.status(201)
            .json_body(json!({ "instance": { "instanceName": "foo", "status": "created" } }));
    });

    let (router, transport, _) = router(&server, None);
    router.handle(text("/create_instance foo")).await;

    mock.assert();
    assert_eq!(
        transport.texts(),
        vec![r#"📌 Result:
{"instance":{"instanceName":"foo","status":"created"}}"#
            .to_string()]
    );
}

#[tokio::test]
async fn create_instance_without_name_shows_usage() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/instance/create");
        then.status(201).json_body(json!({}));
    });

    let (router, transport, _) = router(&server, None);
    router.handle(text("/create_instance")).await;

    mock.assert_calls(0);
    assert_eq!(
        transport.texts(),
        vec!["⚠ Usage: /create_instance <instance_name>".to_string()]
    );
}

#[tokio::test]
async fn missing_qr_is_reported_without_photo() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/instance/qr/defaultbot");
        then.status(200).json_body(json!({ "qr": null }));
    });

    let (router, transport, _) = router(&server, None);
    router.handle(text("/qrcode")).await;

    assert_eq!(transport.photo_count(), 0);
    let texts = transport.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].contains("QR not available yet"));
}

#[tokio::test]
async fn available_qr_is_sent_as_png() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/instance/qr/defaultbot");
        then.status(200).json_body(json!({ "qr": "2@pairing-code" }));
    });

    let (router, transport, _) = router(&server, None);
    router.handle(text("/qrcode")).await;

    let photos = transport.photos.lock().expect("photos lock");
    assert_eq!(photos.len(), 1);
    assert!(photos[0].0.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn armed_image_is_forwarded_once() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/message/sendMedia")
            .body_includes("Sent via bot (image.jpg)")
            .body_includes("image/jpeg")
            .body_includes("5511999999999");
        then.status(200).json_body(json!({ "status": "PENDING" }));
    });

    let (router, transport, sessions) = router(&server, Some("5511999999999"));
    router.handle(text("/send_image")).await;
    router.handle(photo()).await;
    // Expectation is single-shot: the second photo is unsolicited
    router.handle(photo()).await;

    mock.assert_calls(1);
    assert_eq!(sessions.pending(CHAT).await, None);
    let texts = transport.texts();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[1], r#"📨 Result: {"status":"PENDING"}"#);
}

#[tokio::test]
async fn mismatched_upload_clears_expectation() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/message/sendMedia");
        then.status(200).json_body(json!({ "status": true }));
    });

    let (router, transport, sessions) = router(&server, Some("5511999999999"));
    router.handle(text("/send_doc")).await;
    router.handle(photo()).await;

    mock.assert_calls(0);
    assert_eq!(sessions.pending(CHAT).await, None);
    let texts = transport.texts();
    assert!(texts[1].starts_with("❌ Unexpected file type"));
}

#[tokio::test]
async fn upload_commands_need_a_destination() {
    let server = MockServer::start();
    let (router, transport, sessions) = router(&server, None);

    router.handle(text("/send_audio")).await;

    assert_eq!(sessions.pending(CHAT).await, None);
    assert_eq!(
        transport.texts(),
        vec!["⚠ TEST_PHONE_NUMBER is not configured".to_string()]
    );
}

#[tokio::test]
async fn unknown_command_gets_a_hint_and_plain_text_is_ignored() {
    let server = MockServer::start();
    let (router, transport, _) = router(&server, None);

    router.handle(text("hello there")).await;
    router.handle(text("/frobnicate")).await;

    assert_eq!(
        transport.texts(),
        vec!["⚠ Unknown command. Use /help to list commands.".to_string()]
    );
}

#[tokio::test]
async fn status_reports_unreachable_gateway() {
    let transport = Arc::new(RecordingTransport::default());
    let gateway = Arc::new(GatewayClient::new("http://127.0.0.1:1", None));
    let router = CommandRouter::new(
        transport.clone(),
        gateway,
        SessionStore::new(Duration::from_secs(60), 100),
        Arc::new(settings("http://127.0.0.1:1", None)),
        "relay_bot".to_string(),
    );

    router.handle(text("/status")).await;

    let texts = transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("❌ Error: "));
}
