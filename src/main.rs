use dotenvy::dotenv;
use evo_relay::bot::{CommandRouter, SessionStore, TelegramTransport};
use evo_relay::config::{
    Settings, EXPECTATION_IDLE_TTL_SECS, EXPECTATION_MAX_CONVERSATIONS, LOCK_RETRY_INTERVAL_SECS,
};
use evo_relay::gateway::GatewayClient;
use evo_relay::supervisor::{PollingSupervisor, SupervisorOptions};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting secrets from log output
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
    apikey: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            apikey: Regex::new(r#"(?i)("?apikey"?\s*[:=]\s*"?)[^"\s,}&]+"#)?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        let output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        let output = self
            .token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        self.apikey.replace_all(&output, "${1}[MASKED]").to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Evolution API relay bot...");

    let settings = init_settings();
    if settings.authentication_api_key.is_none() {
        warn!("AUTHENTICATION_API_KEY is not set; gateway requests will be unauthenticated");
    }
    if settings.test_phone_number.is_none() {
        warn!("TEST_PHONE_NUMBER is not set; send and upload commands are disabled");
    }

    let options = SupervisorOptions::from_settings(&settings);
    let telegram = TelegramTransport::new(settings.bot_token.clone(), options.poll_timeout);
    let bot_name = match telegram.bot_username().await {
        Ok(name) => {
            info!(bot = %name, "Authorized on Telegram");
            name
        }
        Err(e) => {
            warn!("Could not fetch bot username, /command@bot forms will be ignored: {e}");
            String::new()
        }
    };
    let transport = Arc::new(telegram);

    let gateway = Arc::new(GatewayClient::new(
        settings.evo_api_url.clone(),
        settings.authentication_api_key.clone(),
    ));
    info!(url = %gateway.base_url(), instance = %settings.evo_instance_name, "Gateway client initialized.");

    let sessions = SessionStore::new(
        Duration::from_secs(EXPECTATION_IDLE_TTL_SECS),
        EXPECTATION_MAX_CONVERSATIONS,
    );
    let router = Arc::new(CommandRouter::new(
        transport.clone(),
        gateway,
        sessions,
        settings.clone(),
        bot_name,
    ));

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let mut supervisor = PollingSupervisor::new(transport, router, options);
    if let Err(e) = supervisor
        .run(
            &settings.lock_path(),
            Duration::from_secs(LOCK_RETRY_INTERVAL_SECS),
            cancel,
        )
        .await
    {
        error!("Cannot take the single-instance lock: {e}");
        std::process::exit(1);
    }

    info!("Bye.");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Cancels `token` on Ctrl+C or, on Unix, SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown signal received");
        token.cancel();
    });
}
