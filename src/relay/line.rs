//! LINE Messaging API: webhook parsing, signature checks and reply delivery.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::relay::message::OutboundMessage;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// LINE accepts at most this many messages per reply or push call.
const MAX_MESSAGES_PER_REQUEST: usize = 5;

/// A webhook delivery: one or more events for this bot.
#[derive(Debug, Deserialize)]
pub struct WebhookBatch {
    #[serde(default)]
    pub destination: String,
    pub events: Vec<serde_json::Value>,
}

/// A text message event we can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub reply_token: String,
    pub chat_id: String,
    pub text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    reply_token: Option<String>,
    source: Option<Source>,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Source {
    user_id: Option<String>,
    group_id: Option<String>,
    room_id: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl InboundEvent {
    /// Extract a text message event. Anything else yields `None`.
    ///
    /// The chat is the group, else the room, else the user; `destination` is
    /// the fallback for sourceless events.
    pub fn from_value(value: &serde_json::Value, destination: &str) -> Option<Self> {
        let raw: RawEvent = serde_json::from_value(value.clone()).ok()?;
        if raw.kind != "message" {
            return None;
        }

        let message = raw.message.filter(|m| m.kind == "text")?;
        let text = message.text?;
        let reply_token = raw.reply_token.filter(|t| !t.is_empty())?;

        let chat_id = raw
            .source
            .and_then(|s| s.group_id.or(s.room_id).or(s.user_id))
            .unwrap_or_else(|| destination.to_string());
        if chat_id.is_empty() {
            return None;
        }

        Some(Self { reply_token, chat_id, text })
    }
}

/// Check `X-Line-Signature`: base64 HMAC-SHA256 of the raw body keyed by the channel secret.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature LINE would send for `body`.
///
/// Used to sign test and replayed webhook payloads. HMAC takes keys of any
/// length, so the empty string (which never verifies) is unreachable in practice.
pub fn sign(channel_secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Delivers replies to a chat.
#[async_trait]
pub trait Replier: Send + Sync {
    async fn reply(&self, reply_token: &str, chat_id: &str, messages: &[OutboundMessage]) -> Result<(), String>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage<'a> {
    Text {
        text: &'a str,
    },
    Image {
        #[serde(rename = "originalContentUrl")]
        original_content_url: &'a str,
        #[serde(rename = "previewImageUrl")]
        preview_image_url: &'a str,
    },
}

impl<'a> From<&'a OutboundMessage> for WireMessage<'a> {
    fn from(msg: &'a OutboundMessage) -> Self {
        match msg {
            OutboundMessage::Text(text) => WireMessage::Text { text },
            OutboundMessage::Image { url } => WireMessage::Image {
                original_content_url: url,
                preview_image_url: url,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct WebhookEndpointResponse {
    endpoint: String,
}

/// LINE API client.
pub struct LineClient {
    channel_token: String,
    base_url: String,
    http: reqwest::Client,
}

impl LineClient {
    /// `base_url` is the bot API root, e.g. `https://api.line.me/v2/bot`.
    pub fn new(channel_token: String, base_url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self { channel_token, base_url, http }
    }

    /// The webhook URL registered for this channel.
    pub async fn webhook_endpoint(&self) -> Result<String, String> {
        let response = self
            .http
            .get(format!("{}/channel/webhook/endpoint", self.base_url))
            .bearer_auth(&self.channel_token)
            .send()
            .await
            .map_err(|e| format!("Failed to get webhook endpoint: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Webhook endpoint lookup failed {status}: {body}"));
        }

        response
            .json::<WebhookEndpointResponse>()
            .await
            .map(|r| r.endpoint)
            .map_err(|e| format!("Failed to parse webhook endpoint: {e}"))
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), String> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.channel_token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("Failed to send {path}: {e}");
                warn!("{}", msg);
                msg
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("LINE {path} failed {status}: {body}");
            warn!("{}", msg);
            return Err(msg);
        }
        Ok(())
    }
}

#[async_trait]
impl Replier for LineClient {
    /// The first batch answers the reply token; overflow is pushed to the chat.
    async fn reply(&self, reply_token: &str, chat_id: &str, messages: &[OutboundMessage]) -> Result<(), String> {
        let mut batches = messages.chunks(MAX_MESSAGES_PER_REQUEST);

        let Some(first) = batches.next() else {
            return Ok(());
        };
        info!("💬 Replying to {} with {} message(s)", chat_id, messages.len());
        self.post(
            "message/reply",
            &ReplyRequest {
                reply_token,
                messages: first.iter().map(WireMessage::from).collect(),
            },
        )
        .await?;

        for batch in batches {
            self.post(
                "message/push",
                &PushRequest {
                    to: chat_id,
                    messages: batch.iter().map(WireMessage::from).collect(),
                },
            )
            .await?;
        }
        Ok(())
    }
}

/// `scheme://host[:port]` of a URL, used as the public base for artifact links.
pub fn public_base(url: &str) -> Option<String> {
    let url = reqwest::Url::parse(url).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}
