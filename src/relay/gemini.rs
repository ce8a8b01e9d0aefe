//! Gemini API client: inline image generation and search-grounded answers.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::relay::upstream::UpstreamError;

const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const SEARCH_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "groundingMetadata")]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GroundingMetadata {
    #[serde(rename = "groundingChunks", default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize, Debug)]
struct WebSource {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

/// A decoded inline image.
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// A web source backing a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

impl GeminiClient {
    /// `base_url` is the API root, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self { api_key, base_url, client }
    }

    /// Generate an image from a text prompt.
    pub async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, UpstreamError> {
        info!("🎨 Generating image: {}", prompt);

        let request = GenerateRequest {
            contents: vec![text_content(prompt.to_string())],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            }),
            tools: Vec::new(),
        };

        let candidates = self.generate(IMAGE_MODEL, &request).await?;
        let parts = candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts);

        // Find the image part
        for part in parts {
            if let Some(inline_data) = part.inline_data {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(&inline_data.data)
                    .map_err(|e| UpstreamError::Parse(format!("Failed to decode base64: {e}")))?;

                info!("🎨 Image generated: {} bytes", data.len());

                return Ok(GeneratedImage {
                    data,
                    mime_type: image_mime(inline_data.mime_type),
                });
            }
        }

        Err(UpstreamError::Empty("no image in response"))
    }

    /// Answer with Google Search grounding, appending the cited sources.
    pub async fn search(&self, message: &str, location: &str) -> Result<String, UpstreamError> {
        info!("🔎 Grounded search: {}", message);

        let request = GenerateRequest {
            contents: vec![text_content(format!("{message}\nLocation: {location}"))],
            generation_config: None,
            tools: vec![Tool { google_search: GoogleSearch {} }],
        };

        let candidate = self
            .generate(SEARCH_MODEL, &request)
            .await?
            .into_iter()
            .next()
            .ok_or(UpstreamError::Empty("no candidates found in response"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let citations: Vec<Citation> = candidate
            .grounding_metadata
            .map(|m| m.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .map(|web| Citation { title: web.title, uri: web.uri })
            .collect();

        if text.is_empty() && citations.is_empty() {
            return Err(UpstreamError::Empty("candidate has no text"));
        }

        Ok(with_sources(&text, &citations))
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<Vec<Candidate>, UpstreamError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(request)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(UpstreamError::from_reqwest)?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(format!("Failed to parse response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(UpstreamError::Provider(error.message));
        }

        match parsed.candidates {
            Some(candidates) if !candidates.is_empty() => Ok(candidates),
            _ => Err(UpstreamError::Empty("no candidates in response")),
        }
    }
}

fn text_content(text: String) -> Content {
    Content {
        parts: vec![Part { text }],
    }
}

/// The reported mime type if it is a usable `image/*` header value, else PNG.
fn image_mime(reported: Option<String>) -> String {
    match reported {
        Some(mime)
            if mime.starts_with("image/") && reqwest::header::HeaderValue::from_str(&mime).is_ok() =>
        {
            mime
        }
        Some(mime) => {
            warn!("Ignoring unexpected image mime type {:?}", mime);
            "image/png".to_string()
        }
        None => "image/png".to_string(),
    }
}

/// Append a numbered source list to `text`. No-op without citations.
pub fn with_sources(text: &str, citations: &[Citation]) -> String {
    if citations.is_empty() {
        return text.to_string();
    }

    let mut result = format!("{text}\n[Sources]\n");
    for (idx, citation) in citations.iter().enumerate() {
        result.push_str(&format!("Source[{}][{}]: {}\n", idx, citation.title, citation.uri));
    }
    result
}
