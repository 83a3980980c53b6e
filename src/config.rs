use anyhow::{bail, Context, Result};

/// Display name of the webhook the bridge provisions in the Discord channel.
/// Reused across restarts, so changing it strands the old webhook.
pub const WEBHOOK_NAME: &str = "Stoat Bridge";

const DEFAULT_STOAT_API_URL: &str = "https://api.stoat.chat";
const DEFAULT_STOAT_WS_URL: &str = "wss://events.stoat.chat";
const DEFAULT_STOAT_CDN_URL: &str = "https://cdn.stoat.chat";

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub discord_channel: u64,
    pub stoat_token: String,
    pub stoat_channel: String,
    /// Stoat REST base URL; override for self-hosted instances.
    pub stoat_api_url: String,
    /// Stoat event socket URL.
    pub stoat_ws_url: String,
    /// Base URL for Stoat file attachments (avatars).
    pub stoat_cdn_url: String,
}

impl Config {
    /// Load and validate configuration from the process environment.
    /// Any missing or malformed required variable is a startup failure.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = require(&get, "DISCORD_BOT_TOKEN")?;
        let discord_channel = require(&get, "DISCORD_CHANNEL_ID")?
            .parse::<u64>()
            .context("DISCORD_CHANNEL_ID must be a numeric Discord channel id")?;
        if discord_channel == 0 {
            bail!("DISCORD_CHANNEL_ID must be non-zero");
        }

        let stoat_token = require(&get, "STOAT_BOT_TOKEN")?;
        let stoat_channel = require(&get, "STOAT_CHANNEL_ID")?;
        if !looks_like_ulid(&stoat_channel) {
            bail!(
                "STOAT_CHANNEL_ID must be a 26-character ULID, got {:?}",
                stoat_channel
            );
        }

        Ok(Self {
            discord_token,
            discord_channel,
            stoat_token,
            stoat_channel,
            stoat_api_url: optional(&get, "STOAT_API_URL", DEFAULT_STOAT_API_URL),
            stoat_ws_url: optional(&get, "STOAT_WS_URL", DEFAULT_STOAT_WS_URL),
            stoat_cdn_url: optional(&get, "STOAT_CDN_URL", DEFAULT_STOAT_CDN_URL),
        })
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    let value = get(name).with_context(|| format!("{name} is not set"))?;
    if value.trim().is_empty() {
        bail!("{name} is set but empty");
    }
    Ok(value)
}

fn optional(get: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    get(name)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Stoat channel ids are ULIDs: 26 ASCII alphanumeric characters.
fn looks_like_ulid(s: &str) -> bool {
    s.len() == 26 && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DISCORD_BOT_TOKEN", "discord-token"),
            ("DISCORD_CHANNEL_ID", "123456789012345678"),
            ("STOAT_BOT_TOKEN", "stoat-token"),
            ("STOAT_CHANNEL_ID", "01JAYCE5W10VGJ8MHZYGJQRNPG"),
        ]
    }

    #[test]
    fn test_loads_valid_config() {
        let config = Config::from_lookup(env(&valid_pairs())).unwrap();
        assert_eq!(config.discord_channel, 123456789012345678);
        assert_eq!(config.stoat_channel, "01JAYCE5W10VGJ8MHZYGJQRNPG");
        assert_eq!(config.stoat_api_url, DEFAULT_STOAT_API_URL);
        assert_eq!(config.stoat_ws_url, DEFAULT_STOAT_WS_URL);
    }

    #[test]
    fn test_missing_variable_fails() {
        let mut pairs = valid_pairs();
        pairs.retain(|(k, _)| *k != "DISCORD_CHANNEL_ID");
        let err = Config::from_lookup(env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("DISCORD_CHANNEL_ID"));
    }

    #[test]
    fn test_empty_variable_fails() {
        let pairs: Vec<(&str, &str)> = valid_pairs()
            .into_iter()
            .map(|(k, v)| if k == "STOAT_BOT_TOKEN" { (k, "") } else { (k, v) })
            .collect();
        let err = Config::from_lookup(env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("STOAT_BOT_TOKEN"));
    }

    #[test]
    fn test_non_numeric_discord_channel_fails() {
        let mut pairs = valid_pairs();
        pairs.retain(|(k, _)| *k != "DISCORD_CHANNEL_ID");
        pairs.push(("DISCORD_CHANNEL_ID", "general"));
        assert!(Config::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn test_malformed_stoat_channel_fails() {
        let mut pairs = valid_pairs();
        pairs.retain(|(k, _)| *k != "STOAT_CHANNEL_ID");
        pairs.push(("STOAT_CHANNEL_ID", "not-a-ulid"));
        assert!(Config::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn test_endpoint_overrides() {
        let mut pairs = valid_pairs();
        pairs.push(("STOAT_API_URL", "http://localhost:8000"));
        pairs.push(("STOAT_WS_URL", "ws://localhost:9000"));
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.stoat_api_url, "http://localhost:8000");
        assert_eq!(config.stoat_ws_url, "ws://localhost:9000");
        assert_eq!(config.stoat_cdn_url, DEFAULT_STOAT_CDN_URL);
    }
}
