mod config;
mod platform;
mod relay;

use std::sync::Arc;

use anyhow::Result;
use serenity::all::ChannelId;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::{discord, stoat};
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stoat_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from the environment; fail fast before any
    // network connection is attempted.
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Discord channel: {}", config.discord_channel);
    info!("  Stoat channel: {}", config.stoat_channel);

    // Authenticate both sides.
    let (discord_http, discord_bot_id) = discord::login(&config.discord_token).await?;
    let stoat_client = Arc::new(stoat::StoatClient::new(&config)?);
    let stoat_me = stoat_client.fetch_self().await?;
    info!("Stoat: connected as {}", stoat_me.username);

    // Provision the webhook before subscribing to anything, so every
    // message the bridge will ever post is attributable to this handle.
    let webhook = discord::ensure_webhook(
        &discord_http,
        ChannelId::new(config.discord_channel),
        config::WEBHOOK_NAME,
    )
    .await?;
    let webhook_id = webhook.id.get();

    let relay = Arc::new(Relay::new(
        config.discord_channel,
        webhook_id,
        discord_bot_id,
        config.stoat_channel.clone(),
        stoat_me.id.clone(),
        Arc::new(discord::DiscordSender::new(discord_http.clone(), webhook)),
        Arc::new(stoat::StoatSender::new(
            stoat_client.clone(),
            config.stoat_channel.clone(),
        )),
    ));

    info!("Starting bridge...");
    tokio::try_join!(
        discord::run(&config.discord_token, relay.clone()),
        stoat::run(
            &config.stoat_ws_url,
            &config.stoat_token,
            stoat_client,
            relay
        ),
    )?;

    Ok(())
}
