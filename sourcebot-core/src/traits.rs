use crate::types::{BlogInfo, BlogSettings, Post, SearchRule, StatRecord};
use crate::CoreError;
use async_trait::async_trait;
use std::collections::HashSet;

/// Paged access to the tag search endpoint.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Returns the page of posts tagged `tag` created strictly before
    /// `before` (seconds since epoch), newest first. An empty page means
    /// the tag is exhausted.
    async fn tagged(&self, tag: &str, before: i64) -> Result<Vec<Post>, CoreError>;
}

/// Read side of the persisted blog configuration.
#[async_trait]
pub trait BlogStore: Send + Sync {
    /// All registered blogs in a stable order.
    async fn list_blogs(&self) -> Result<Vec<BlogInfo>, CoreError>;

    async fn blog_settings(&self, blog: &str) -> Result<BlogSettings, CoreError>;

    /// Ids of posts already published for `blog`. Only ever grows.
    async fn post_blacklist(&self, blog: &str) -> Result<HashSet<u64>, CoreError>;

    async fn blog_blacklist(&self, blog: &str) -> Result<HashSet<String>, CoreError>;

    async fn tag_blacklist(&self, blog: &str) -> Result<HashSet<String>, CoreError>;

    /// Active search rules for `blog`, in configured order.
    async fn search_rules(&self, blog: &str) -> Result<Vec<SearchRule>, CoreError>;
}

/// Append-only statistics log.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn record_stat(&self, record: &StatRecord) -> Result<(), CoreError>;
}

/// Downstream consumer of selections.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Called exactly once per selected post.
    async fn publish(&self, blog: &str, post: &Post, label: &str) -> Result<(), CoreError>;
}

/// Write side of the post-history blacklist.
#[async_trait]
pub trait PostHistory: Send + Sync {
    async fn mark_posted(&self, blog: &str, post_id: u64) -> Result<(), CoreError>;
}
