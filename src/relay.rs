use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::platform::InboundMessage;

/// Send half of one platform, as seen from the other side of the bridge.
/// Implementations post into their platform's paired channel under the
/// given display identity.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send_as(
        &self,
        author_name: &str,
        avatar_url: Option<&str>,
        body: &str,
    ) -> Result<()>;
}

/// Screening result for an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Forward,
    /// Not the channel this bridge is paired with.
    WrongChannel,
    /// Sent through the bridge's own provisioned webhook.
    OwnWebhook,
    /// Authored by the bridge's own bot account.
    OwnAccount,
}

/// Bridge context: paired channel ids, the bridge's own identities on both
/// platforms, and a send handle into each side. Built once at startup,
/// shared read-only by both event streams.
pub struct Relay {
    discord_channel: String,
    stoat_channel: String,
    /// Id of the webhook provisioned in the Discord channel. Messages the
    /// bridge posts there arrive back on the gateway attributed to this
    /// webhook, not to the bot account, so the loop filter keys on it.
    webhook_id: u64,
    discord_bot_id: String,
    stoat_bot_id: String,
    to_discord: Arc<dyn OutboundSink>,
    to_stoat: Arc<dyn OutboundSink>,
}

impl Relay {
    pub fn new(
        discord_channel: u64,
        webhook_id: u64,
        discord_bot_id: u64,
        stoat_channel: String,
        stoat_bot_id: String,
        to_discord: Arc<dyn OutboundSink>,
        to_stoat: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            discord_channel: discord_channel.to_string(),
            stoat_channel,
            webhook_id,
            discord_bot_id: discord_bot_id.to_string(),
            stoat_bot_id,
            to_discord,
            to_stoat,
        }
    }

    /// Handle one message observed in the Discord channel.
    /// Forwards it into the Stoat channel unless screening discards it.
    pub async fn on_discord_message(&self, msg: InboundMessage) {
        match self.screen_discord(&msg) {
            Verdict::Forward => {}
            verdict => {
                debug!("Discord: event discarded ({:?})", verdict);
                return;
            }
        }

        info!("Discord -> Stoat: forwarding message from {}", msg.author_name);
        if let Err(e) = self
            .to_stoat
            .send_as(&msg.author_name, msg.avatar_url.as_deref(), &msg.body)
            .await
        {
            // Log and drop; the message is lost but the bridge keeps running.
            error!("Discord -> Stoat: failed to forward: {:#}", e);
        }
    }

    /// Handle one message observed in the Stoat channel.
    pub async fn on_stoat_message(&self, msg: InboundMessage) {
        match self.screen_stoat(&msg) {
            Verdict::Forward => {}
            verdict => {
                debug!("Stoat: event discarded ({:?})", verdict);
                return;
            }
        }

        info!("Stoat -> Discord: forwarding message from {}", msg.author_name);
        if let Err(e) = self
            .to_discord
            .send_as(&msg.author_name, msg.avatar_url.as_deref(), &msg.body)
            .await
        {
            error!("Stoat -> Discord: failed to forward: {:#}", e);
        }
    }

    /// Messages the bridge itself posted into Discord come back through the
    /// provisioned webhook, so the filter compares webhook ids rather than
    /// relying on the generic bot flag. Other bots' and other webhooks'
    /// messages are forwarded like any human message.
    fn screen_discord(&self, msg: &InboundMessage) -> Verdict {
        if msg.channel_id != self.discord_channel {
            return Verdict::WrongChannel;
        }
        if msg.webhook_id == Some(self.webhook_id) {
            return Verdict::OwnWebhook;
        }
        if msg.author_id == self.discord_bot_id {
            return Verdict::OwnAccount;
        }
        Verdict::Forward
    }

    /// Masqueraded messages on Stoat are still authored by the bot account
    /// that sent them, so comparing author ids catches the bridge's own
    /// forwards.
    fn screen_stoat(&self, msg: &InboundMessage) -> Verdict {
        if msg.channel_id != self.stoat_channel {
            return Verdict::WrongChannel;
        }
        if msg.author_id == self.stoat_bot_id {
            return Verdict::OwnAccount;
        }
        Verdict::Forward
    }
}
