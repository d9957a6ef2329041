use chrono::{DateTime, Utc};
use discovery::{Blacklists, BlogContext, InclusionRule, SearchTerm, TermOptions};
use sourcebot_core::{BlogStore, CoreError, PostHistory, PostSource, Publisher, StatsSink};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything a worker talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BlogStore>,
    pub stats: Arc<dyn StatsSink>,
    pub source: Arc<dyn PostSource>,
    pub publisher: Arc<dyn Publisher>,
    pub options: TermOptions,
}

impl Collaborators {
    /// Wires a single backend that serves as store, stats sink and post
    /// history, publishing through [`crate::LogPublisher`].
    pub fn from_backend<B>(backend: Arc<B>, source: Arc<dyn PostSource>, options: TermOptions) -> Self
    where
        B: BlogStore + StatsSink + PostHistory + 'static,
    {
        Self {
            store: backend.clone(),
            stats: backend.clone(),
            source,
            publisher: Arc::new(crate::LogPublisher::new(backend)),
            options,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub terms_run: usize,
    pub selected: usize,
    pub published: usize,
    pub cancelled: bool,
}

type TermKey = (String, String);

/// Runs every search rule of one blog, one term at a time.
pub struct BlogWorker {
    context: BlogContext,
    terms: HashMap<TermKey, SearchTerm>,
    deps: Collaborators,
    last_run: Option<DateTime<Utc>>,
}

impl BlogWorker {
    pub fn new(blog: &str, deps: Collaborators) -> Self {
        Self {
            context: BlogContext::new(blog, deps.stats.clone()),
            terms: HashMap::new(),
            deps,
            last_run: None,
        }
    }

    pub fn blog(&self) -> &str {
        self.context.name()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, CoreError> {
        let started = Instant::now();
        let store = self.deps.store.clone();
        let blog = self.context.name().to_string();

        self.context.refresh(store.as_ref()).await?;
        let blacklists = Blacklists {
            blogs: store.blog_blacklist(&blog).await?,
            tags: store.tag_blacklist(&blog).await?,
        };
        let rules = store.search_rules(&blog).await?;

        let mut summary = RunSummary::default();
        let mut published = HashSet::new();

        for rule in &rules {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let key = (rule.term_type.clone(), rule.term.clone());
            if !self.terms.contains_key(&key) {
                match SearchTerm::from_rule(rule, self.deps.source.clone(), &self.deps.options) {
                    Some(term) => {
                        self.terms.insert(key.clone(), term);
                    }
                    None => continue,
                }
            }
            let Some(term) = self.terms.get_mut(&key) else {
                continue;
            };

            let inclusion = InclusionRule::from(rule);
            let matches = term
                .search(&self.context, &blacklists, &inclusion, cancel)
                .await?;
            summary.terms_run += 1;

            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.selected += matches.len();

            for (post, label) in matches {
                // Cache hits from an earlier run were already handed off.
                if self.context.post_blacklist().contains(&post.id) || !published.insert(post.id) {
                    continue;
                }
                self.deps.publisher.publish(&blog, &post, &label).await?;
                summary.published += 1;
            }
        }

        self.last_run = Some(Utc::now());
        debug!(
            "Blog {} ran {} terms in {} ms",
            blog,
            summary.terms_run,
            started.elapsed().as_millis()
        );
        if summary.published > 0 {
            info!("Blog {} published {} new posts", blog, summary.published);
        }

        Ok(summary)
    }
}
