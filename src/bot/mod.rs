/// Command parsing and dispatch
pub mod handlers;
/// Attachment forwarding to the gateway
pub mod media;
/// Reply delivery helpers
pub mod messaging;
/// Per-conversation upload expectations
pub mod state;
/// Telegram transport implementation
pub mod telegram;
/// Transport-neutral event types
pub mod transport;

pub use handlers::CommandRouter;
pub use state::SessionStore;
pub use telegram::TelegramTransport;
