use async_trait::async_trait;
use sourcebot_core::{CoreError, Post, PostHistory, Publisher};
use std::sync::Arc;
use tracing::info;

/// Records each selection in the post history and logs it.
pub struct LogPublisher {
    history: Arc<dyn PostHistory>,
}

impl LogPublisher {
    pub fn new(history: Arc<dyn PostHistory>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, blog: &str, post: &Post, label: &str) -> Result<(), CoreError> {
        self.history.mark_posted(blog, post.id).await?;
        info!(
            "Selected {} post {} from {} for {} ({})",
            post.kind,
            post.id,
            post.blog_name,
            blog,
            label
        );
        Ok(())
    }
}
