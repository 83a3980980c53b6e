use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    ChannelId, Client, Context, CreateWebhook, EventHandler, ExecuteWebhook, GatewayIntents,
    Http, Message, Ready, Webhook,
};
use tracing::info;

use crate::platform::InboundMessage;
use crate::relay::{OutboundSink, Relay};

/// Gateway intents the bridge needs: channel messages and their content.
fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
}

/// Authenticate against the Discord REST API and return the HTTP handle
/// plus the bot's own user id.
pub async fn login(token: &str) -> Result<(Arc<Http>, u64)> {
    let http = Arc::new(Http::new(token));
    let me = http
        .get_current_user()
        .await
        .context("Discord login failed (check DISCORD_BOT_TOKEN)")?;
    info!("Discord: connected as {}", me.name);
    Ok((http, me.id.get()))
}

/// Find the bridge webhook in `channel`, creating it only if absent, so a
/// restart reuses the handle instead of piling up duplicates. Requires the
/// Manage Webhooks permission; failure here is fatal for the process.
pub async fn ensure_webhook(http: &Arc<Http>, channel: ChannelId, name: &str) -> Result<Webhook> {
    let existing = channel
        .webhooks(http)
        .await
        .with_context(|| format!("failed to list webhooks in Discord channel {channel}"))?;

    if let Some(webhook) = select_named(existing.into_iter().map(|w| (w.name.clone(), w)), name) {
        info!("Discord: reusing webhook {:?} ({})", name, webhook.id);
        return Ok(webhook);
    }

    let webhook = channel
        .create_webhook(http, CreateWebhook::new(name))
        .await
        .with_context(|| format!("failed to create webhook {name:?} in channel {channel}"))?;
    info!("Discord: created webhook {:?} ({})", name, webhook.id);
    Ok(webhook)
}

/// First handle whose name matches `wanted`.
fn select_named<H>(handles: impl IntoIterator<Item = (Option<String>, H)>, wanted: &str) -> Option<H> {
    handles
        .into_iter()
        .find(|(name, _)| name.as_deref() == Some(wanted))
        .map(|(_, handle)| handle)
}

/// Posts into the Discord channel through the provisioned webhook, with the
/// original author's name and avatar overriding the displayed identity.
pub struct DiscordSender {
    http: Arc<Http>,
    webhook: Webhook,
}

impl DiscordSender {
    pub fn new(http: Arc<Http>, webhook: Webhook) -> Self {
        Self { http, webhook }
    }
}

#[async_trait]
impl OutboundSink for DiscordSender {
    async fn send_as(
        &self,
        author_name: &str,
        avatar_url: Option<&str>,
        body: &str,
    ) -> Result<()> {
        let mut builder = ExecuteWebhook::new().content(body).username(author_name);
        if let Some(url) = avatar_url {
            builder = builder.avatar_url(url);
        }
        self.webhook
            .execute(&self.http, true, builder)
            .await
            .context("webhook execution failed")?;
        Ok(())
    }
}

/// Gateway event handler feeding Discord messages into the relay.
struct BridgeHandler {
    relay: Arc<Relay>,
}

#[async_trait]
impl EventHandler for BridgeHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Discord: gateway ready as {}", ready.user.name);
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let author_name = msg
            .author
            .global_name
            .as_deref()
            .unwrap_or(&msg.author.name)
            .to_string();
        let inbound = InboundMessage {
            channel_id: msg.channel_id.to_string(),
            author_id: msg.author.id.to_string(),
            author_name,
            avatar_url: Some(msg.author.face()),
            body: msg.content,
            is_bot: msg.author.bot,
            webhook_id: msg.webhook_id.map(|id| id.get()),
        };
        self.relay.on_discord_message(inbound).await;
    }
}

/// Connect to the gateway and dispatch events until the connection dies.
pub async fn run(token: &str, relay: Arc<Relay>) -> Result<()> {
    let mut client = Client::builder(token, intents())
        .event_handler(BridgeHandler { relay })
        .await
        .context("failed to build Discord client")?;
    client
        .start()
        .await
        .context("Discord gateway connection failed")?;
    Ok(())
}
