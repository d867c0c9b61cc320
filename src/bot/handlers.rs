use crate::bot::media::{MediaRelay, RelayOutcome};
use crate::bot::messaging::send_reply;
use crate::bot::state::{SessionStore, UploadKind};
use crate::bot::transport::{
    Attachment, ConversationId, EventPayload, InboundEvent, InboundTransport,
};
use crate::config::Settings;
use crate::gateway::{GatewayClient, GatewayOutcome, GatewayResponse};
use crate::qr;
use crate::supervisor::EventHandler;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use teloxide::utils::command::{BotCommands, ParseError};
use tracing::{debug, error, info, warn};

/// Message sent to the test destination by `/send`
const TEST_MESSAGE: &str = "Test message via Evolution API";
/// Prompt sent with `/buttons`
const BUTTONS_PROMPT: &str = "Choose an option:";
/// Buttons sent with `/buttons`
const BUTTONS: &[(&str, &str)] = &[("yes", "Yes 👍"), ("no", "No 👎")];

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    /// Show help
    #[command(description = "Show this help.")]
    Start,
    /// Show help
    #[command(description = "Show this help.")]
    Help,
    /// Show non-secret settings
    #[command(description = "Show bot settings (secrets hidden).")]
    Env,
    /// Gateway health
    #[command(description = "Check the gateway.")]
    Status,
    /// List gateway instances
    #[command(description = "List instances.")]
    Instances,
    /// Create a gateway instance
    #[command(
        description = "Create an instance: /create_instance <name>",
        parse_with = instance_name_arg
    )]
    CreateInstance(String),
    /// Connect the default instance
    #[command(description = "Start/connect the instance.")]
    Connect,
    /// Restart the default instance
    #[command(description = "Restart the instance.")]
    Restart,
    /// Pairing QR of the default instance
    #[command(description = "Generate the instance QR code.")]
    Qrcode,
    /// Send a test text message
    #[command(description = "Send a test text message.")]
    Send,
    /// Arm an image upload
    #[command(description = "Send an image (upload it after the command).")]
    SendImage,
    /// Arm an audio upload
    #[command(description = "Send audio (upload it after the command).")]
    SendAudio,
    /// Arm a document upload
    #[command(description = "Send a document (upload it after the command).")]
    SendDoc,
    /// Send interactive buttons
    #[command(description = "Send interactive buttons.")]
    Buttons,
}

fn instance_name_arg(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

/// Instance names end up in URL paths
fn is_valid_instance_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c: char| c == '/' || c.is_whitespace())
}

/// Dispatches inbound events to gateway calls and relays the results.
///
/// Every path ends with a reply (or a logged delivery failure); nothing
/// propagates back to the supervisor.
pub struct CommandRouter {
    transport: Arc<dyn InboundTransport>,
    gateway: Arc<GatewayClient>,
    sessions: SessionStore,
    media: MediaRelay,
    settings: Arc<Settings>,
    bot_name: String,
}

impl CommandRouter {
    /// Creates a router; `bot_name` lets `/command@bot_name` forms parse.
    #[must_use]
    pub fn new(
        transport: Arc<dyn InboundTransport>,
        gateway: Arc<GatewayClient>,
        sessions: SessionStore,
        settings: Arc<Settings>,
        bot_name: String,
    ) -> Self {
        let media = MediaRelay::new(
            Arc::clone(&transport),
            Arc::clone(&gateway),
            sessions.clone(),
            settings.evo_instance_name.clone(),
            settings.test_phone_number.clone(),
        );
        Self {
            transport,
            gateway,
            sessions,
            media,
            settings,
            bot_name,
        }
    }

    async fn reply(&self, conversation: ConversationId, text: &str) {
        if let Err(e) = send_reply(self.transport.as_ref(), conversation, text).await {
            error!(conversation, "Failed to deliver reply: {e}");
        }
    }

    async fn handle_text(&self, conversation: ConversationId, text: &str) {
        if !text.starts_with('/') {
            debug!(conversation, "Ignoring plain text message");
            return;
        }

        match Command::parse(text, &self.bot_name) {
            Ok(command) => {
                info!(conversation, ?command, "Handling command");
                if let Err(e) = self.execute(conversation, command).await {
                    error!(conversation, "Command error: {e}");
                    self.reply(conversation, &format!("❌ Error: {e}")).await;
                }
            }
            Err(ParseError::WrongBotName(name)) => {
                debug!(conversation, name, "Command addressed to another bot");
            }
            Err(e) => {
                debug!(conversation, "Unrecognized command: {e}");
                self.reply(conversation, "⚠ Unknown command. Use /help to list commands.")
                    .await;
            }
        }
    }

    async fn execute(&self, conversation: ConversationId, command: Command) -> Result<()> {
        let instance = self.settings.evo_instance_name.as_str();
        match command {
            Command::Start | Command::Help => {
                self.reply(conversation, &Command::descriptions().to_string())
                    .await;
            }
            Command::Env => self.reply(conversation, &self.env_summary()).await,
            Command::Status => {
                let response = self.gateway.health().await;
                self.reply(conversation, &format_status(&response)).await;
            }
            Command::Instances => {
                let response = self.gateway.fetch_instances().await;
                self.reply(conversation, &format_instances(&response)).await;
            }
            Command::CreateInstance(name) => {
                if !is_valid_instance_name(&name) {
                    self.reply(conversation, "⚠ Usage: /create_instance <instance_name>")
                        .await;
                    return Ok(());
                }
                let response = self.gateway.create_instance(&name).await;
                self.reply(conversation, &format!("📌 Result:\n{}", response.body_text()))
                    .await;
            }
            Command::Connect => {
                let response = self.gateway.connect(instance).await;
                self.reply(conversation, &format!("🔄 Connect -> {}", response.body_text()))
                    .await;
            }
            Command::Restart => {
                let response = self.gateway.restart(instance).await;
                self.reply(conversation, &format!("🔁 Restart -> {}", response.body_text()))
                    .await;
            }
            Command::Qrcode => self.send_qr(conversation, instance).await?,
            Command::Send => {
                let Some(to) = self.destination(conversation).await else {
                    return Ok(());
                };
                let response = self.gateway.send_text(instance, to, TEST_MESSAGE).await;
                self.reply(conversation, &format!("📨 Result: {}", response.body_text()))
                    .await;
            }
            Command::Buttons => {
                let Some(to) = self.destination(conversation).await else {
                    return Ok(());
                };
                let response = self
                    .gateway
                    .send_buttons(instance, to, BUTTONS_PROMPT, BUTTONS)
                    .await;
                self.reply(conversation, &format!("📨 Result: {}", response.body_text()))
                    .await;
            }
            Command::SendImage => self.arm(conversation, UploadKind::Image).await,
            Command::SendAudio => self.arm(conversation, UploadKind::Audio).await,
            Command::SendDoc => self.arm(conversation, UploadKind::Document).await,
        }
        Ok(())
    }

    /// Destination for outgoing messages, warning the user when unset.
    async fn destination(&self, conversation: ConversationId) -> Option<&str> {
        let destination = self.settings.destination();
        if destination.is_none() {
            self.reply(conversation, "⚠ TEST_PHONE_NUMBER is not configured")
                .await;
        }
        destination
    }

    async fn arm(&self, conversation: ConversationId, kind: UploadKind) {
        if self.destination(conversation).await.is_none() {
            return;
        }
        self.sessions.set_expectation(conversation, kind).await;
        let prompt = match kind {
            UploadKind::Image => "📸 Send the image now (as a photo).",
            UploadKind::Audio => "🎤 Send the audio now (voice note or audio file).",
            UploadKind::Document => "📄 Send the document now (as a file).",
        };
        self.reply(conversation, prompt).await;
    }

    async fn send_qr(&self, conversation: ConversationId, instance: &str) -> Result<()> {
        self.reply(conversation, "⏳ Generating QR...").await;
        let response = self.gateway.qr(instance).await;

        match qr_payload(&response) {
            QrPayload::Ready(code) => {
                let png = qr::render_png(code)?;
                crate::utils::retry_telegram_operation(|| {
                    self.transport
                        .send_photo(conversation, png.clone(), "📲 Scan to connect!")
                })
                .await?;
            }
            QrPayload::NotReady => {
                self.reply(
                    conversation,
                    "❌ QR not available yet. The instance may be disconnected or still loading.",
                )
                .await;
            }
            QrPayload::Error => {
                self.reply(
                    conversation,
                    &format!("❌ Error fetching QR: {}", response.body_text()),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn handle_attachment(&self, conversation: ConversationId, attachment: &Attachment) {
        let text = match self.media.relay(conversation, attachment).await {
            RelayOutcome::Ignored => {
                debug!(conversation, "Ignoring unsolicited attachment");
                return;
            }
            RelayOutcome::Mismatch { expected, received } => format!(
                "❌ Unexpected file type: waiting for {}, got {}. Run the command again and send the right type.",
                expected.label(),
                received.label()
            ),
            RelayOutcome::Delivered(response) => format!("📨 Result: {}", response.body_text()),
            RelayOutcome::Failed(e) => format!("❌ Error processing file: {e}"),
        };
        self.reply(conversation, &text).await;
    }

    fn env_summary(&self) -> String {
        let settings = &self.settings;
        format!(
            "EVO_API_URL = {}\nEVO_INSTANCE_NAME = {}\nAUTHENTICATION_API_KEY = {}\nTEST_PHONE_NUMBER = {}",
            settings.evo_api_url,
            settings.evo_instance_name,
            if settings.authentication_api_key.is_some() {
                "SET"
            } else {
                "NOT SET"
            },
            settings.destination().unwrap_or("NOT SET"),
        )
    }
}

#[async_trait]
impl EventHandler for CommandRouter {
    async fn handle(&self, event: InboundEvent) {
        match event.payload {
            EventPayload::Text(ref text) => self.handle_text(event.conversation, text).await,
            EventPayload::Attachment(ref attachment) => {
                self.handle_attachment(event.conversation, attachment).await;
            }
        }
    }
}

fn format_status(response: &GatewayResponse) -> String {
    match response.outcome() {
        GatewayOutcome::Success => format!("✅ Gateway online!\n{}", response.body_text()),
        GatewayOutcome::Unreachable(cause) => format!("❌ Error: {cause}"),
        GatewayOutcome::Rejected(status) => {
            warn!(status, "Gateway health check rejected");
            format!("⚠ Response: {}", response.body_text())
        }
    }
}

fn format_instances(response: &GatewayResponse) -> String {
    let instances = response
        .is_success()
        .then(|| response.body.get("instances").and_then(Value::as_array))
        .flatten();

    match instances {
        Some(list) if list.is_empty() => "📭 No instances created.".to_string(),
        Some(list) => {
            let lines: Vec<String> = list
                .iter()
                .map(|item| match item {
                    Value::String(name) => format!("➡️ {name}"),
                    other => format!("➡️ {other}"),
                })
                .collect();
            format!("📌 Instances:\n{}", lines.join("\n"))
        }
        None => format!("❌ Error listing instances: {}", response.body_text()),
    }
}

enum QrPayload<'a> {
    Ready(&'a str),
    NotReady,
    Error,
}

fn qr_payload(response: &GatewayResponse) -> QrPayload<'_> {
    match (response.outcome(), response.body.get("qr")) {
        (GatewayOutcome::Success, Some(Value::String(code))) if !code.is_empty() => {
            QrPayload::Ready(code)
        }
        (GatewayOutcome::Success, None | Some(Value::Null | Value::String(_)))
        | (GatewayOutcome::Rejected(404), _) => QrPayload::NotReady,
        _ => QrPayload::Error,
    }
}
