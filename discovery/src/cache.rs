//! Time-windowed holding area for posts a search term already selected.
//!
//! A post added to the cache is handed back on every run of the owning term
//! until it is older than the TTL, so the same post is never counted as a
//! fresh selection twice inside the window.

use sourcebot_core::Post;
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    post: Post,
    inserted_at: Instant,
}

/// Insertion-ordered set of posts with an age limit. Not shared between
/// threads; each search term owns exactly one.
#[derive(Debug, Clone)]
pub struct PostCache {
    ttl: Duration,
    entries: Vec<CacheEntry>,
    ids: HashSet<u64>,
}

impl Default for PostCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PostCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops every entry older than the TTL. Returns how many were removed.
    pub fn validate(&mut self) -> usize {
        self.validate_at(Instant::now())
    }

    pub fn validate_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        let ids = &mut self.ids;

        self.entries.retain(|entry| {
            let live = now.saturating_duration_since(entry.inserted_at) <= ttl;
            if !live {
                ids.remove(&entry.post.id);
            }
            live
        });

        before - self.entries.len()
    }

    /// Inserts `post` unless a post with the same id is already cached.
    /// Returns `false` for a duplicate.
    pub fn add(&mut self, post: Post) -> bool {
        self.add_at(post, Instant::now())
    }

    pub fn add_at(&mut self, post: Post, now: Instant) -> bool {
        if !self.ids.insert(post.id) {
            return false;
        }
        self.entries.push(CacheEntry {
            post,
            inserted_at: now,
        });
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live posts, oldest insertion first.
    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.live_at(Instant::now())
    }

    pub fn live_at(&self, now: Instant) -> impl Iterator<Item = &Post> {
        let ttl = self.ttl;
        self.entries
            .iter()
            .filter(move |entry| now.saturating_duration_since(entry.inserted_at) <= ttl)
            .map(|entry| &entry.post)
    }
}

impl<'a> IntoIterator for &'a PostCache {
    type Item = &'a Post;
    type IntoIter = Box<dyn Iterator<Item = &'a Post> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
