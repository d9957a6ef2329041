use crate::blog::BlogContext;
use crate::cache::{PostCache, DEFAULT_TTL};
use crate::rule::{Blacklists, InclusionRule};
use chrono::Utc;
use sourcebot_core::{
    CoreError, ErrorExt, Post, PostSource, RetryDecision, RetryPolicy, SearchRule,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Selected posts mapped to the label of the term that produced them.
pub type MatchResult = HashMap<Post, String>;

pub const TAG_TERM_TYPE: &str = "tag";

#[derive(Debug, Clone)]
pub struct TermOptions {
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for TermOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            retry: RetryPolicy::Unbounded,
        }
    }
}

/// A configured discovery query. New query kinds become new variants.
pub enum SearchTerm {
    Tag(TagTerm),
}

impl SearchTerm {
    /// Builds the term for a stored rule, or `None` for a term type this
    /// build does not know.
    pub fn from_rule(
        rule: &SearchRule,
        source: Arc<dyn PostSource>,
        options: &TermOptions,
    ) -> Option<Self> {
        match rule.term_type.as_str() {
            TAG_TERM_TYPE => Some(SearchTerm::Tag(TagTerm::new(&rule.term, source, options))),
            other => {
                warn!("Skipping rule {} with unknown term type '{}'", rule.id, other);
                None
            }
        }
    }

    pub fn term_type(&self) -> &'static str {
        match self {
            SearchTerm::Tag(_) => TAG_TERM_TYPE,
        }
    }

    pub fn term(&self) -> &str {
        match self {
            SearchTerm::Tag(tag) => tag.term(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            SearchTerm::Tag(tag) => tag.label(),
        }
    }

    pub fn cache(&self) -> &PostCache {
        match self {
            SearchTerm::Tag(tag) => &tag.cache,
        }
    }

    pub async fn search(
        &mut self,
        blog: &BlogContext,
        blacklists: &Blacklists,
        rule: &InclusionRule,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, CoreError> {
        match self {
            SearchTerm::Tag(tag) => tag.search(blog, blacklists, rule, cancel).await,
        }
    }
}

/// Walks the tag search endpoint backwards in time until enough new posts
/// pass the inclusion rule or the tag runs dry.
pub struct TagTerm {
    term: String,
    source: Arc<dyn PostSource>,
    cache: PostCache,
    last_count: usize,
    retry: RetryPolicy,
}

impl TagTerm {
    pub fn new(term: &str, source: Arc<dyn PostSource>, options: &TermOptions) -> Self {
        Self {
            term: term.to_string(),
            source,
            cache: PostCache::new(options.cache_ttl),
            last_count: 0,
            retry: options.retry.clone(),
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn label(&self) -> String {
        format!("{}:{}", TAG_TERM_TYPE, self.term)
    }

    pub fn last_count(&self) -> usize {
        self.last_count
    }

    pub fn cache(&self) -> &PostCache {
        &self.cache
    }

    /// The tag actually sent to the endpoint. A comma-joined term only
    /// queries its first entry, kept byte for byte.
    pub fn query_tag(&self) -> &str {
        self.term.split(',').next().unwrap_or_default()
    }

    pub async fn search(
        &mut self,
        blog: &BlogContext,
        blacklists: &Blacklists,
        rule: &InclusionRule,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, CoreError> {
        let started = Instant::now();
        let settings = blog.settings();
        let target = rule.target(self.last_count, settings.sample_size);
        let accepted_types = rule.accepted_types(&settings.post_types);
        let label = self.label();

        self.cache.validate();
        let mut out: MatchResult = self
            .cache
            .iter()
            .map(|post| (post.clone(), label.clone()))
            .collect();

        let query = self.query_tag().to_string();
        let mut cursor = Utc::now().timestamp();
        let mut searched = 0usize;
        let mut failures = 0u32;

        while out.len() < target {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Search for tag {} cancelled with {} posts selected", self.term, out.len());
                    return Ok(out);
                }
                page = self.source.tagged(&query, cursor) => page,
            };

            let page = match fetched {
                Ok(page) => {
                    failures = 0;
                    page
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        code = %e.error_code(),
                        "Failed to fetch tag {} before {} (attempt {}): {}",
                        query,
                        cursor,
                        failures,
                        e
                    );
                    match self.retry.decide(failures, &e) {
                        RetryDecision::RetryNow => {
                            tokio::task::yield_now().await;
                            continue;
                        }
                        RetryDecision::RetryAfter(delay) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return Ok(out),
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                        RetryDecision::GiveUp => {
                            warn!(
                                "Giving up on tag {} after {} failed attempts",
                                query, failures
                            );
                            break;
                        }
                    }
                }
            };

            if page.is_empty() {
                debug!("Tag {} exhausted before {}", query, cursor);
                break;
            }

            let previous = cursor;
            for post in page {
                searched += 1;
                cursor = post.timestamp;

                let verdict = rule.evaluate(&post, accepted_types, blacklists, blog.post_blacklist());
                if !verdict.is_accepted() {
                    debug!("Rejected post {} for tag {}: {:?}", post.id, query, verdict);
                    continue;
                }

                if self.cache.add(post.clone()) {
                    out.insert(post, label.clone());
                }
            }

            if cursor >= previous {
                warn!(
                    "Tag {} returned a page that did not move back from {}, stopping",
                    query, previous
                );
                break;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let percent = if searched == 0 {
            0.0
        } else {
            out.len() as f64 / searched as f64 * 100.0
        };
        info!(
            "Searched tag {}, selected {} posts out of {} searched ({:.2}%), took {} ms",
            self.term,
            out.len(),
            searched,
            percent,
            elapsed_ms
        );

        blog.add_stat(TAG_TERM_TYPE, &self.term, elapsed_ms, searched, out.len())
            .await;
        self.last_count = out.len();

        Ok(out)
    }
}
