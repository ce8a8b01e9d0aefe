//! Background purge of expired cache entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use crate::relay::artifacts::ArtifactCache;
use crate::relay::history::ConversationCache;

/// Periodically purges both caches until dropped.
///
/// Expired entries are already invisible to readers; this only reclaims memory.
pub struct CacheSweeper {
    cancel: Arc<Notify>,
}

impl CacheSweeper {
    /// Spawn the sweep task. Must be called inside a tokio runtime.
    pub fn start(every: Duration, history: ConversationCache, artifacts: ArtifactCache) -> Self {
        let cancel = Arc::new(Notify::new());
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_clone.notified() => break,
                    _ = ticker.tick() => {
                        let chats = history.purge_expired();
                        let images = artifacts.purge_expired();
                        if chats + images > 0 {
                            info!("🧹 Swept {} chat histories, {} artifacts", chats, images);
                        }
                    }
                }
            }
        });

        Self { cancel }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.cancel.notify_one();
    }
}
