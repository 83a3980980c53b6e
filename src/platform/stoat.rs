use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::platform::InboundMessage;
use crate::relay::{OutboundSink, Relay};

/// Keepalive cadence on the event socket.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// How long the socket may go without a Pong before it counts as dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(90);

/// Display identity override attached to an outgoing message.
#[derive(Debug, Clone, Serialize)]
pub struct Masquerade {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    masquerade: Masquerade,
}

/// File attachment reference; only the id matters for building CDN URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct StoatFile {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoatUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<StoatFile>,
    /// Present iff the account is a bot.
    #[serde(default)]
    pub bot: Option<serde_json::Value>,
}

impl StoatUser {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    pub fn avatar_url(&self, cdn_url: &str) -> Option<String> {
        self.avatar
            .as_ref()
            .map(|file| format!("{}/avatars/{}", cdn_url, file.id))
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }
}

/// One message as delivered on the event socket.
#[derive(Debug, Deserialize)]
struct StoatMessage {
    channel: String,
    author: String,
    #[serde(default)]
    content: Option<String>,
    /// Join/leave notices and other platform-generated messages.
    #[serde(default)]
    system: Option<serde_json::Value>,
}

/// Frames the bridge cares about; everything else falls into `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    Authenticated,
    Ready,
    Pong,
    Message(StoatMessage),
    Error {
        #[serde(default)]
        error: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Thin client over the Stoat REST API, plus a user cache: the event socket
/// delivers author ids only, so display fields are resolved per author and
/// remembered for the process lifetime.
pub struct StoatClient {
    http: reqwest::Client,
    api_url: String,
    cdn_url: String,
    token: String,
    users: Mutex<HashMap<String, StoatUser>>,
}

impl StoatClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: config.stoat_api_url.clone(),
            cdn_url: config.stoat_cdn_url.clone(),
            token: config.stoat_token.clone(),
            users: Mutex::new(HashMap::new()),
        })
    }

    /// Startup login check; also yields the bot's own user id, which the
    /// relay needs for its self-authorship filter.
    pub async fn fetch_self(&self) -> Result<StoatUser> {
        self.get_json("/users/@me")
            .await
            .context("Stoat login failed (check STOAT_BOT_TOKEN)")
    }

    /// Resolve a user, consulting the in-process cache first.
    pub async fn fetch_user(&self, id: &str) -> Result<StoatUser> {
        if let Some(user) = self.users.lock().await.get(id) {
            return Ok(user.clone());
        }
        let user: StoatUser = self
            .get_json(&format!("/users/{id}"))
            .await
            .with_context(|| format!("failed to fetch Stoat user {id}"))?;
        self.users
            .lock()
            .await
            .insert(id.to_string(), user.clone());
        Ok(user)
    }

    /// Post a message into `channel` under the masqueraded identity.
    pub async fn send_message(
        &self,
        channel: &str,
        content: &str,
        masquerade: Masquerade,
    ) -> Result<()> {
        self.http
            .post(format!("{}/channels/{}/messages", self.api_url, channel))
            .header("x-bot-token", &self.token)
            .json(&SendMessageBody {
                content,
                masquerade,
            })
            .send()
            .await
            .with_context(|| format!("failed to reach Stoat channel {channel}"))?
            .error_for_status()
            .context("Stoat rejected the message")?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .header("x-bot-token", &self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    fn avatar_url(&self, user: &StoatUser) -> Option<String> {
        user.avatar_url(&self.cdn_url)
    }
}

/// Sends bridged messages into the paired Stoat channel.
pub struct StoatSender {
    client: Arc<StoatClient>,
    channel: String,
}

impl StoatSender {
    pub fn new(client: Arc<StoatClient>, channel: String) -> Self {
        Self { client, channel }
    }
}

#[async_trait]
impl OutboundSink for StoatSender {
    async fn send_as(
        &self,
        author_name: &str,
        avatar_url: Option<&str>,
        body: &str,
    ) -> Result<()> {
        self.client
            .send_message(
                &self.channel,
                body,
                Masquerade {
                    name: author_name.to_string(),
                    avatar: avatar_url.map(str::to_string),
                },
            )
            .await
    }
}

/// Connect to the Stoat event socket, authenticate, and feed message events
/// into the relay until the connection dies. A dead or silent socket is an
/// error; the process exits and leaves restarting to its supervisor.
pub async fn run(
    ws_url: &str,
    token: &str,
    client: Arc<StoatClient>,
    relay: Arc<Relay>,
) -> Result<()> {
    let (socket, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("failed to connect to Stoat event socket at {ws_url}"))?;
    let (mut write, mut read) = socket.split();

    let auth = serde_json::json!({ "type": "Authenticate", "token": token });
    write
        .send(WsMessage::text(auth.to_string()))
        .await
        .context("failed to send Stoat authenticate frame")?;

    let mut ping = tokio::time::interval(PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    bail!("Stoat event socket stopped answering pings");
                }
                let frame = serde_json::json!({ "type": "Ping", "data": 0 });
                write
                    .send(WsMessage::text(frame.to_string()))
                    .await
                    .context("failed to send keepalive ping")?;
            }
            frame = read.next() => {
                let Some(frame) = frame else {
                    bail!("Stoat event socket closed");
                };
                match frame.context("Stoat event socket error")? {
                    WsMessage::Text(text) => {
                        handle_frame(text.as_str(), &client, &relay, &mut last_pong).await?;
                    }
                    WsMessage::Close(reason) => {
                        bail!("Stoat event socket closed: {reason:?}");
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_frame(
    raw: &str,
    client: &StoatClient,
    relay: &Relay,
    last_pong: &mut Instant,
) -> Result<()> {
    let event = match serde_json::from_str::<ServerEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!("Stoat: undecodable frame ({e}), skipping");
            return Ok(());
        }
    };

    match event {
        ServerEvent::Authenticated => info!("Stoat: event socket authenticated"),
        ServerEvent::Ready => info!("Stoat: event socket ready"),
        ServerEvent::Pong => *last_pong = Instant::now(),
        ServerEvent::Error { error } => bail!("Stoat event socket reported an error: {error}"),
        ServerEvent::Message(msg) => {
            if let Some(inbound) = to_inbound(msg, client).await {
                relay.on_stoat_message(inbound).await;
            }
        }
        ServerEvent::Other => {}
    }
    Ok(())
}

/// Resolve a raw message event into the relay's inbound shape. System
/// messages and messages with no text body are skipped; an author that
/// cannot be resolved loses the message (logged, not fatal).
async fn to_inbound(msg: StoatMessage, client: &StoatClient) -> Option<InboundMessage> {
    if msg.system.is_some() {
        return None;
    }
    let body = match msg.content {
        Some(content) if !content.is_empty() => content,
        _ => return None,
    };

    let user = match client.fetch_user(&msg.author).await {
        Ok(user) => user,
        Err(e) => {
            error!("Stoat: failed to resolve author {}: {:#}", msg.author, e);
            return None;
        }
    };
    if user.id != msg.author {
        warn!("Stoat: user lookup for {} returned {}", msg.author, user.id);
    }

    Some(InboundMessage {
        channel_id: msg.channel,
        author_id: msg.author,
        author_name: user.display_name().to_string(),
        avatar_url: client.avatar_url(&user),
        body,
        is_bot: user.is_bot(),
        webhook_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_message_event() {
        let raw = r#"{
            "type": "Message",
            "_id": "01JMSG000000000000000000AA",
            "channel": "01JCHAN00000000000000000BB",
            "author": "01JUSER00000000000000000CC",
            "content": "hello"
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.channel, "01JCHAN00000000000000000BB");
                assert_eq!(msg.author, "01JUSER00000000000000000CC");
                assert_eq!(msg.content.as_deref(), Some("hello"));
                assert!(msg.system.is_none());
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_system_message() {
        let raw = r#"{
            "type": "Message",
            "_id": "01JMSG000000000000000000AA",
            "channel": "01JCHAN00000000000000000BB",
            "author": "00000000000000000000000000",
            "system": { "type": "user_joined", "id": "01JUSER00000000000000000CC" }
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Message(msg) => assert!(msg.system.is_some()),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_pong_and_lifecycle_frames() {
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(r#"{"type":"Pong","data":0}"#).unwrap(),
            ServerEvent::Pong
        ));
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(r#"{"type":"Authenticated"}"#).unwrap(),
            ServerEvent::Authenticated
        ));
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(r#"{"type":"Ready","users":[],"channels":[]}"#)
                .unwrap(),
            ServerEvent::Ready
        ));
    }

    #[test]
    fn test_unknown_frame_falls_through_to_other() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"ChannelStartTyping","id":"x"}"#).unwrap();
        assert!(matches!(event, ServerEvent::Other));
    }

    #[test]
    fn test_send_body_serializes_masquerade() {
        let body = SendMessageBody {
            content: "hello",
            masquerade: Masquerade {
                name: "Ann".to_string(),
                avatar: Some("https://x/ann.png".to_string()),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["masquerade"]["name"], "Ann");
        assert_eq!(json["masquerade"]["avatar"], "https://x/ann.png");
    }

    #[test]
    fn test_send_body_omits_missing_avatar() {
        let body = SendMessageBody {
            content: "hi",
            masquerade: Masquerade {
                name: "Ann".to_string(),
                avatar: None,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["masquerade"].get("avatar").is_none());
    }

    fn user(display_name: Option<&str>, avatar: Option<&str>) -> StoatUser {
        StoatUser {
            id: "01JUSER00000000000000000CC".to_string(),
            username: "ann".to_string(),
            display_name: display_name.map(str::to_string),
            avatar: avatar.map(|id| StoatFile { id: id.to_string() }),
            bot: None,
        }
    }

    #[test]
    fn test_display_name_prefers_display_name_over_username() {
        assert_eq!(user(Some("Ann"), None).display_name(), "Ann");
        assert_eq!(user(None, None).display_name(), "ann");
    }

    #[test]
    fn test_avatar_url_built_from_cdn_base() {
        let u = user(None, Some("FILE123"));
        assert_eq!(
            u.avatar_url("https://cdn.stoat.chat").as_deref(),
            Some("https://cdn.stoat.chat/avatars/FILE123")
        );
        assert_eq!(user(None, None).avatar_url("https://cdn.stoat.chat"), None);
    }

    #[test]
    fn test_bot_field_detection() {
        let mut u = user(None, None);
        assert!(!u.is_bot());
        u.bot = Some(serde_json::json!({ "owner": "01JOWNER0000000000000000DD" }));
        assert!(u.is_bot());
    }
}
