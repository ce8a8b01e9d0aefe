//! Short-lived store for generated images, served back over `/img/{key}`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// A stored blob and its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub data: Arc<Vec<u8>>,
    pub content_type: String,
}

struct ArtifactEntry {
    artifact: Artifact,
    created: Instant,
}

/// Thread-safe artifact cache keyed by random UUID.
#[derive(Clone)]
pub struct ArtifactCache {
    entries: Arc<DashMap<String, ArtifactEntry>>,
    ttl: Duration,
}

impl ArtifactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Store a PNG and return its key.
    pub fn put(&self, data: Vec<u8>) -> String {
        self.put_typed(data, "image/png")
    }

    /// Store a blob with an explicit content type and return its key.
    ///
    /// Keys are a fresh v4 UUID plus an extension matching the content type.
    pub fn put_typed(&self, data: Vec<u8>, content_type: &str) -> String {
        self.put_at(data, content_type, Instant::now())
    }

    /// Look up a blob. Unknown and expired keys both return `None`.
    pub fn get(&self, key: &str) -> Option<Artifact> {
        self.get_at(key, Instant::now())
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &ArtifactEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created) >= self.ttl
    }

    fn put_at(&self, data: Vec<u8>, content_type: &str, now: Instant) -> String {
        let key = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        info!("🖼️ Stored artifact {} ({} bytes, {})", key, data.len(), content_type);
        self.entries.insert(
            key.clone(),
            ArtifactEntry {
                artifact: Artifact {
                    data: Arc::new(data),
                    content_type: content_type.to_string(),
                },
                created: now,
            },
        );
        key
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Artifact> {
        let entry = self.entries.get(key)?;
        if self.is_expired(&entry, now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| self.is_expired(e, now));
            debug!("Artifact {} expired", key);
            return None;
        }
        Some(entry.artifact.clone())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e, now));
        before.saturating_sub(self.entries.len())
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}
