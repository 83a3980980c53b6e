pub mod discord;
pub mod stoat;

/// A message observed on either platform, reduced to what the relay needs
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct InboundMessage {
    /// Platform-specific channel ID as string
    pub channel_id: String,
    /// Platform-specific author ID as string
    pub author_id: String,
    /// Display name of the author
    pub author_name: String,
    /// Avatar URL, if the author has one
    pub avatar_url: Option<String>,
    /// The message text
    pub body: String,
    /// Whether the author is a bot/automation account
    pub is_bot: bool,
    /// Discord webhook the message was posted through, if any
    pub webhook_id: Option<u64>,
}
