//! The seam between the dispatcher and the generation providers.

use async_trait::async_trait;
use tracing::info;

use crate::relay::artifacts::ArtifactCache;
use crate::relay::gemini::GeminiClient;
use crate::relay::grok::{ChatCompletion, GrokClient};
use crate::relay::message::Turn;

/// How an image request is fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    /// One multimodal call; the image comes back inline and is cached locally.
    Inline,
    /// Derive a prompt with the chat model, then ask the image API for a hosted URL.
    Hosted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Text,
    Image(ImageStrategy),
}

/// Where a generated image can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Key into the local artifact cache.
    Artifact(String),
    /// URL hosted by the provider.
    Hosted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    Image(ImageRef),
}

#[derive(Debug)]
pub enum UpstreamError {
    Http(String),
    Timeout,
    Status { status: u16, body: String },
    Parse(String),
    Provider(String),
    Empty(&'static str),
}

impl UpstreamError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_decode() {
            UpstreamError::Parse(e.to_string())
        } else {
            UpstreamError::Http(e.to_string())
        }
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Http(e) => write!(f, "HTTP error: {e}"),
            UpstreamError::Timeout => write!(f, "request timed out"),
            UpstreamError::Status { status, body } => write!(f, "API error {status}: {body}"),
            UpstreamError::Parse(e) => write!(f, "Parse error: {e}"),
            UpstreamError::Provider(e) => write!(f, "Provider error: {e}"),
            UpstreamError::Empty(what) => write!(f, "Empty response: {what}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Run `message` as the final user turn after `history`.
    ///
    /// Image modes ignore `history`.
    async fn complete(&self, history: &[Turn], message: &str, mode: Mode) -> Result<Completion, UpstreamError>;

    /// Raw chat completion over caller-supplied turns, sent as-is.
    async fn chat_completion(&self, turns: &[Turn]) -> Result<ChatCompletion, UpstreamError>;

    /// Web-grounded completion. Citations, if any, are appended as a source list.
    async fn search(&self, message: &str, location: &str) -> Result<String, UpstreamError>;
}

/// Production upstream: Grok for chat and hosted images, Gemini for inline images and search.
pub struct Providers {
    grok: GrokClient,
    gemini: GeminiClient,
    artifacts: ArtifactCache,
}

impl Providers {
    pub fn new(grok: GrokClient, gemini: GeminiClient, artifacts: ArtifactCache) -> Self {
        Self { grok, gemini, artifacts }
    }
}

#[async_trait]
impl Upstream for Providers {
    async fn complete(&self, history: &[Turn], message: &str, mode: Mode) -> Result<Completion, UpstreamError> {
        match mode {
            Mode::Text => {
                let mut turns = history.to_vec();
                turns.push(Turn::user(message));
                self.grok.chat(&turns).await.map(Completion::Text)
            }
            Mode::Image(ImageStrategy::Inline) => {
                let image = self.gemini.generate_image(message).await?;
                let key = self.artifacts.put_typed(image.data, &image.mime_type);
                Ok(Completion::Image(ImageRef::Artifact(key)))
            }
            Mode::Image(ImageStrategy::Hosted) => {
                let prompt = self.grok.image_prompt(message).await?;
                info!("🎨 Derived image prompt: {}", prompt);
                let url = self.grok.generate_image(&prompt).await?;
                Ok(Completion::Image(ImageRef::Hosted(url)))
            }
        }
    }

    async fn chat_completion(&self, turns: &[Turn]) -> Result<ChatCompletion, UpstreamError> {
        self.grok.completion(turns).await
    }

    async fn search(&self, message: &str, location: &str) -> Result<String, UpstreamError> {
        self.gemini.search(message, location).await
    }
}
