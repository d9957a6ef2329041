use sourcebot_core::{BlogSettings, BlogStore, CoreError, ErrorExt, StatRecord, StatsSink};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-account state shared by every search term of one blog.
pub struct BlogContext {
    name: String,
    settings: BlogSettings,
    post_blacklist: HashSet<u64>,
    stats: Arc<dyn StatsSink>,
}

impl BlogContext {
    pub fn new(name: impl Into<String>, stats: Arc<dyn StatsSink>) -> Self {
        Self {
            name: name.into(),
            settings: BlogSettings::default(),
            post_blacklist: HashSet::new(),
            stats,
        }
    }

    pub fn with_settings(mut self, settings: BlogSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_post_blacklist(mut self, post_blacklist: HashSet<u64>) -> Self {
        self.post_blacklist = post_blacklist;
        self
    }

    /// Reloads defaults and the post history from the store.
    pub async fn refresh(&mut self, store: &dyn BlogStore) -> Result<(), CoreError> {
        self.settings = store.blog_settings(&self.name).await?;
        self.post_blacklist = store.post_blacklist(&self.name).await?;
        debug!(
            "Refreshed blog {}: {} known posts, default sample size {}",
            self.name,
            self.post_blacklist.len(),
            self.settings.sample_size
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BlogSettings {
        &self.settings
    }

    pub fn post_blacklist(&self) -> &HashSet<u64> {
        &self.post_blacklist
    }

    /// Appends one statistics record. A failing sink only costs the record.
    pub async fn add_stat(
        &self,
        term_type: &str,
        term: &str,
        duration_ms: u64,
        searched: usize,
        selected: usize,
    ) {
        let record = StatRecord {
            blog: self.name.clone(),
            term_type: term_type.to_string(),
            term: term.to_string(),
            duration_ms,
            searched,
            selected,
        };

        if let Err(e) = self.stats.record_stat(&record).await {
            e.log_warn();
            warn!("Dropped stat record for {} {}:{}", self.name, term_type, term);
        }
    }
}
