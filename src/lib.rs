//! Telegram to WhatsApp-gateway relay bot.
//!
//! Receives Telegram updates by long polling, turns operator commands into
//! Evolution API calls and forwards uploaded media to a fixed destination.

/// Telegram side: transport, command routing and media relay
pub mod bot;
/// Settings and tunables
pub mod config;
/// Evolution API HTTP client
pub mod gateway;
/// QR code rendering
pub mod qr;
/// Long-poll supervisor
pub mod supervisor;
/// Shared helpers
pub mod utils;
