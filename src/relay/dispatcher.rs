//! Routes inbound chat events to the upstream providers and builds replies.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::relay::command::{self, Command};
use crate::relay::history::ConversationCache;
use crate::relay::line::{InboundEvent, Replier, WebhookBatch};
use crate::relay::message::{MAX_MESSAGE_CHARS, OutboundMessage, Turn, split_message};
use crate::relay::upstream::{Completion, ImageRef, ImageStrategy, Mode, Upstream};

/// Sent in place of a chat answer when the upstream call fails.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process your request.";

pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    replier: Arc<dyn Replier>,
    history: ConversationCache,
    /// `scheme://host` where `/img/{key}` is reachable.
    public_base: String,
}

impl Dispatcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        replier: Arc<dyn Replier>,
        history: ConversationCache,
        public_base: String,
    ) -> Self {
        Self {
            upstream,
            replier,
            history,
            public_base,
        }
    }

    /// Process a webhook batch in order, replying to each event as it completes.
    ///
    /// A failing event never stops the ones after it.
    pub async fn handle_batch(&self, batch: &WebhookBatch) {
        for value in &batch.events {
            let Some(event) = InboundEvent::from_value(value, &batch.destination) else {
                debug!("Ignoring non-text event");
                continue;
            };

            let replies = self.handle(&event).await;
            if replies.is_empty() {
                continue;
            }

            if let Err(e) = self.replier.reply(&event.reply_token, &event.chat_id, &replies).await {
                warn!("Failed to deliver reply to {}: {e}", event.chat_id);
            }
        }
    }

    /// Replies for one event. Empty when the event is not a command.
    pub async fn handle(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        match command::parse(&event.text) {
            Some(Command::Chat(message)) => self.chat(&event.chat_id, &message).await,
            Some(Command::Image { strategy, prompt }) => self.image(&event.chat_id, strategy, &prompt).await,
            None => Vec::new(),
        }
    }

    async fn chat(&self, chat_id: &str, message: &str) -> Vec<OutboundMessage> {
        let preview: String = message.chars().take(100).collect();
        info!("💬 Chat from {}: \"{}\"", chat_id, preview);

        let history = self.history.get(chat_id).unwrap_or_default();
        let reply = match self.upstream.complete(&history, message, Mode::Text).await {
            Ok(Completion::Text(answer)) => {
                self.history
                    .append(chat_id, [Turn::user(message), Turn::assistant(answer.clone())]);
                answer
            }
            Ok(other) => {
                warn!("Chat completion for {} returned {:?}", chat_id, other);
                FALLBACK_REPLY.to_string()
            }
            Err(e) => {
                warn!("Chat completion failed for {}: {e}", chat_id);
                FALLBACK_REPLY.to_string()
            }
        };

        split_message(&reply, MAX_MESSAGE_CHARS)
            .into_iter()
            .map(OutboundMessage::Text)
            .collect()
    }

    /// Best effort: a failed generation is logged and the user gets no reply.
    async fn image(&self, chat_id: &str, strategy: ImageStrategy, prompt: &str) -> Vec<OutboundMessage> {
        info!("🎨 Image request from {} ({:?}): \"{}\"", chat_id, strategy, prompt);

        match self.upstream.complete(&[], prompt, Mode::Image(strategy)).await {
            Ok(Completion::Image(image)) => vec![OutboundMessage::Image {
                url: self.image_url(&image),
            }],
            Ok(other) => {
                warn!("Image generation for {} returned {:?}", chat_id, other);
                Vec::new()
            }
            Err(e) => {
                warn!("Image generation failed for {}: {e}", chat_id);
                Vec::new()
            }
        }
    }

    pub fn image_url(&self, image: &ImageRef) -> String {
        match image {
            ImageRef::Artifact(key) => format!("{}/img/{}", self.public_base, key),
            ImageRef::Hosted(url) => url.clone(),
        }
    }
}
