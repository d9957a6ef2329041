#![allow(dead_code)]

use async_trait::async_trait;
use background_service::Collaborators;
use discovery::TermOptions;
use sourcebot_core::{
    BlogInfo, BlogSettings, BlogStore, CoreError, DatabaseError, Post, PostHistory, PostSource,
    PostType, Publisher, SearchRule, StatRecord, StatsSink,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const NOW_ISH: i64 = 1_460_000_000;

/// In-memory stand-in for the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    blogs: Mutex<Vec<BlogInfo>>,
    settings: Mutex<HashMap<String, BlogSettings>>,
    rules: Mutex<HashMap<String, Vec<SearchRule>>>,
    blog_blacklist: Mutex<HashMap<String, HashSet<String>>>,
    posted: Mutex<HashMap<String, HashSet<u64>>>,
    pub stats: Mutex<Vec<StatRecord>>,
    pub list_calls: AtomicUsize,
    pub fail_listing: AtomicBool,
}

impl MemoryStore {
    pub fn add_blog(&self, url: &str, active: bool, adm_active: bool) {
        self.blogs.lock().unwrap().push(BlogInfo {
            url: url.to_string(),
            active,
            adm_active,
        });
        self.settings.lock().unwrap().insert(
            url.to_string(),
            BlogSettings {
                post_types: PostType::ALL.to_vec(),
                sample_size: 5,
            },
        );
    }

    pub fn remove_blog(&self, url: &str) {
        self.blogs.lock().unwrap().retain(|b| b.url != url);
    }

    pub fn add_rule(&self, blog: &str, term_type: &str, term: &str) {
        let mut rules = self.rules.lock().unwrap();
        let list = rules.entry(blog.to_string()).or_default();
        let id = list.len() as i64 + 1;
        list.push(SearchRule {
            id,
            term_type: term_type.to_string(),
            term: term.to_string(),
            post_types: None,
            sample_size: 0,
            required_tags: None,
        });
    }

    pub fn blacklist_blog(&self, blog: &str, name: &str) {
        self.blog_blacklist
            .lock()
            .unwrap()
            .entry(blog.to_string())
            .or_default()
            .insert(name.to_string());
    }

    pub fn posted(&self, blog: &str) -> HashSet<u64> {
        self.posted
            .lock()
            .unwrap()
            .get(blog)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlogStore for MemoryStore {
    async fn list_blogs(&self) -> Result<Vec<BlogInfo>, CoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DatabaseError::DatabaseLocked.into());
        }
        Ok(self.blogs.lock().unwrap().clone())
    }

    async fn blog_settings(&self, blog: &str) -> Result<BlogSettings, CoreError> {
        self.settings
            .lock()
            .unwrap()
            .get(blog)
            .cloned()
            .ok_or_else(|| {
                DatabaseError::UnknownBlog {
                    blog: blog.to_string(),
                }
                .into()
            })
    }

    async fn post_blacklist(&self, blog: &str) -> Result<HashSet<u64>, CoreError> {
        Ok(self.posted(blog))
    }

    async fn blog_blacklist(&self, blog: &str) -> Result<HashSet<String>, CoreError> {
        Ok(self
            .blog_blacklist
            .lock()
            .unwrap()
            .get(blog)
            .cloned()
            .unwrap_or_default())
    }

    async fn tag_blacklist(&self, _blog: &str) -> Result<HashSet<String>, CoreError> {
        Ok(HashSet::new())
    }

    async fn search_rules(&self, blog: &str) -> Result<Vec<SearchRule>, CoreError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(blog)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StatsSink for MemoryStore {
    async fn record_stat(&self, record: &StatRecord) -> Result<(), CoreError> {
        self.stats.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl PostHistory for MemoryStore {
    async fn mark_posted(&self, blog: &str, post_id: u64) -> Result<(), CoreError> {
        self.posted
            .lock()
            .unwrap()
            .entry(blog.to_string())
            .or_default()
            .insert(post_id);
        Ok(())
    }
}

/// Serves queued pages per tag; an exhausted queue answers with an empty page.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<String, VecDeque<Vec<Post>>>>,
    calls: Mutex<Vec<String>>,
    cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl ScriptedSource {
    pub fn push_page(&self, tag: &str, posts: Vec<Post>) {
        self.pages
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(posts);
    }

    /// Cancels `token` the first time any page is requested.
    pub fn cancel_on_call(&self, token: CancellationToken) {
        *self.cancel_on_call.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostSource for ScriptedSource {
    async fn tagged(&self, tag: &str, _before: i64) -> Result<Vec<Post>, CoreError> {
        self.calls.lock().unwrap().push(tag.to_string());
        if let Some(token) = self.cancel_on_call.lock().unwrap().take() {
            token.cancel();
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get_mut(tag)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, u64, String)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, blog: &str, post: &Post, label: &str) -> Result<(), CoreError> {
        self.published
            .lock()
            .unwrap()
            .push((blog.to_string(), post.id, label.to_string()));
        Ok(())
    }
}

pub fn post(id: u64, blog: &str) -> Post {
    Post {
        id,
        blog_name: blog.to_string(),
        timestamp: NOW_ISH - id as i64,
        kind: PostType::Photo,
        tags: vec!["cats".to_string()],
        post_url: None,
        reblog_key: None,
    }
}

pub fn posts(ids: &[u64]) -> Vec<Post> {
    ids.iter().map(|id| post(*id, &format!("blog{}", id))).collect()
}

/// Collaborators publishing through [`background_service::LogPublisher`].
pub fn logging_deps(store: &Arc<MemoryStore>, source: &Arc<ScriptedSource>) -> Collaborators {
    Collaborators::from_backend(store.clone(), source.clone(), TermOptions::default())
}

pub fn recording_deps(
    store: &Arc<MemoryStore>,
    source: &Arc<ScriptedSource>,
    publisher: &Arc<RecordingPublisher>,
) -> Collaborators {
    Collaborators {
        store: store.clone(),
        stats: store.clone(),
        source: source.clone(),
        publisher: publisher.clone(),
        options: TermOptions::default(),
    }
}
