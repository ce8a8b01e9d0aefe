//! Relay module - bridges LINE chats to the Grok and Gemini APIs.

pub mod artifacts;
pub mod command;
pub mod dispatcher;
pub mod gemini;
pub mod grok;
pub mod history;
pub mod line;
pub mod message;
pub mod sweeper;
pub mod upstream;


pub use artifacts::{Artifact, ArtifactCache};
pub use dispatcher::{Dispatcher, FALLBACK_REPLY};
pub use gemini::GeminiClient;
pub use grok::{ChatCompletion, GrokClient};
pub use history::ConversationCache;
pub use line::{InboundEvent, LineClient, Replier, WebhookBatch};
pub use message::{OutboundMessage, Role, Turn};
pub use sweeper::CacheSweeper;
pub use upstream::{Completion, ImageRef, ImageStrategy, Mode, Providers, Upstream, UpstreamError};
