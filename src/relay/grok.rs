//! xAI Grok client: chat completions and hosted image generation.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::relay::message::Turn;
use crate::relay::upstream::UpstreamError;

const CHAT_MODEL: &str = "grok-3-beta";
const IMAGE_MODEL: &str = "grok-2-image-1212";

pub struct GrokClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'static str,
    messages: &'a [Turn],
}

/// A chat-completions response, kept in the provider's wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    n: u32,
    model: &'static str,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

impl GrokClient {
    /// `base_url` is the API root, e.g. `https://api.x.ai/v1`.
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self { api_key, base_url, http }
    }

    /// Chat completion over the given turns, returned whole.
    pub async fn completion(&self, turns: &[Turn]) -> Result<ChatCompletion, UpstreamError> {
        let request = ChatRequest {
            model: CHAT_MODEL,
            messages: turns,
        };
        self.post("chat/completions", &request).await
    }

    /// Chat completion over the given turns. Returns the first choice's content.
    pub async fn chat(&self, turns: &[Turn]) -> Result<String, UpstreamError> {
        self.completion(turns)
            .await?
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(UpstreamError::Empty("no choices returned"))
    }

    /// Turn a natural-language request into an image-generation prompt.
    pub async fn image_prompt(&self, request: &str) -> Result<String, UpstreamError> {
        let instruction = format!(
            "You only output a prompt for image generation. This is my message: {request}. Only output the prompt."
        );
        let prompt = self.chat(&[Turn::user(instruction)]).await?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(UpstreamError::Empty("blank image prompt"));
        }
        Ok(prompt.to_string())
    }

    /// Generate one image and return its hosted URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError> {
        let request = ImageRequest {
            prompt,
            n: 1,
            model: IMAGE_MODEL,
            response_format: "url",
        };
        let response: ImageResponse = self.post("images/generations", &request).await?;

        response
            .data
            .into_iter()
            .find_map(|d| d.url.filter(|u| !u.is_empty()))
            .ok_or(UpstreamError::Empty("no image url returned"))
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, UpstreamError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(UpstreamError::from_reqwest)?;
        debug!("Grok {} response status: {}", path, status);

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}
