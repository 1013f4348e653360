//! Time-bounded answer cache.

use super::Answer;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// `qa:<podcast id>:<sha256 of the normalized question>`.
pub fn cache_key(podcast_id: i64, question: &str) -> String {
    let normalized = question.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("qa:{}:{}", podcast_id, hex::encode(digest))
}

struct Entry {
    expires_at: Instant,
    answer: Answer,
}

/// In-process cache whose entries expire a fixed time after insertion.
pub struct AnswerCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl AnswerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Answer> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.answer.clone()),
            Some(_) => {
                debug!("Cache entry {} expired", key);
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, answer: Answer) {
        let mut entries = self.lock();
        entries.insert(
            key,
            Entry {
                expires_at: Instant::now() + self.ttl,
                answer,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Entries are inserted whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
