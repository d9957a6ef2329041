use crate::worker::{BlogWorker, Collaborators};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sourcebot_core::{BlogInfo, CoreError, ErrorExt, SchedulerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "blog", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Listing,
    RunningBlog(String),
    Stopped,
}

pub type WorkerMap = Arc<RwLock<HashMap<String, Arc<Mutex<BlogWorker>>>>>;

/// State shared between the scheduler loop and the admin path.
#[derive(Clone)]
pub struct SchedulerContext {
    cancel: CancellationToken,
    workers: WorkerMap,
    state: Arc<watch::Sender<SchedulerState>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlogStatus {
    pub blog: String,
    pub running: bool,
    pub terms: Option<usize>,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SchedulerState,
    pub blogs: Vec<BlogStatus>,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl SchedulerContext {
    pub fn new(cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            cancel,
            workers: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(state),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Asks the scheduler and the active worker to wind down.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    pub fn workers(&self) -> &WorkerMap {
        &self.workers
    }

    /// Point-in-time view of every known blog. A worker that is busy is
    /// reported as running without its details.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let workers = self.workers.read().await;
        let mut blogs: Vec<BlogStatus> = workers
            .iter()
            .map(|(blog, worker)| match worker.try_lock() {
                Ok(worker) => BlogStatus {
                    blog: blog.clone(),
                    running: false,
                    terms: Some(worker.term_count()),
                    last_run: worker.last_run(),
                },
                Err(_) => BlogStatus {
                    blog: blog.clone(),
                    running: true,
                    terms: None,
                    last_run: None,
                },
            })
            .collect();
        blogs.sort_by(|a, b| a.blog.cmp(&b.blog));

        StatusSnapshot {
            state: self.state(),
            blogs,
        }
    }
}

/// Cycles through the active blogs, running one worker at a time.
pub struct Scheduler {
    ctx: SchedulerContext,
    deps: Collaborators,
    refresh_interval: Duration,
    idle_delay: Duration,
    blogs: Vec<BlogInfo>,
    last_listed: Option<Instant>,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext, deps: Collaborators, config: &SchedulerConfig) -> Self {
        Self {
            ctx,
            deps,
            refresh_interval: config.refresh_interval(),
            idle_delay: config.idle_delay(),
            blogs: Vec::new(),
            last_listed: None,
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    /// Runs passes until stopped.
    pub async fn run(&mut self) {
        info!("Scheduler started");

        while !self.ctx.is_stopped() {
            let ran = match self.run_pass().await {
                Ok(ran) => ran,
                Err(e) => {
                    e.log_error();
                    warn!("Scheduler pass ended early");
                    0
                }
            };

            if ran == 0 {
                tokio::select! {
                    _ = self.ctx.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.idle_delay) => {}
                }
            }
        }

        self.ctx.set_state(SchedulerState::Stopped);
        info!("Scheduler stopped");
    }

    /// One pass over the blog listing. Returns how many workers ran.
    pub async fn run_pass(&mut self) -> Result<usize, CoreError> {
        self.ctx.set_state(SchedulerState::Listing);
        let listed = self.refresh_listing().await;
        if let Err(e) = listed {
            self.ctx.set_state(SchedulerState::Idle);
            return Err(e);
        }

        let mut ran = 0;
        for info in self.blogs.clone() {
            if self.ctx.is_stopped() {
                break;
            }
            if !info.is_runnable() {
                debug!("Skipping inactive blog {}", info.url);
                continue;
            }

            let worker = self.worker_for(&info.url).await;
            self.ctx.set_state(SchedulerState::RunningBlog(info.url.clone()));
            debug!("Running worker for {}", info.url);

            let outcome = worker.lock().await.run(&self.ctx.cancel).await;
            match outcome {
                Ok(summary) if summary.cancelled => {
                    info!("Worker for {} interrupted", info.url);
                }
                Ok(_) => {}
                Err(e) => {
                    e.log_error();
                    warn!("Worker for {} failed: {}", info.url, e.user_friendly_message());
                }
            }
            ran += 1;
        }

        if self.ctx.is_stopped() {
            self.ctx.set_state(SchedulerState::Stopped);
        } else {
            self.ctx.set_state(SchedulerState::Idle);
        }
        Ok(ran)
    }

    async fn refresh_listing(&mut self) -> Result<(), CoreError> {
        let interval = self.refresh_interval;
        if self.last_listed.is_some_and(|at| at.elapsed() <= interval) {
            return Ok(());
        }

        self.blogs = self.deps.store.list_blogs().await?;
        self.last_listed = Some(Instant::now());
        info!("Loaded {} blogs", self.blogs.len());

        // A blog missing from the listing was removed; a later re-add
        // starts from a fresh worker.
        let mut workers = self.ctx.workers.write().await;
        workers.retain(|blog, _| self.blogs.iter().any(|info| &info.url == blog));
        Ok(())
    }

    async fn worker_for(&self, blog: &str) -> Arc<Mutex<BlogWorker>> {
        if let Some(worker) = self.ctx.workers.read().await.get(blog) {
            return worker.clone();
        }

        let mut workers = self.ctx.workers.write().await;
        workers
            .entry(blog.to_string())
            .or_insert_with(|| {
                debug!("Creating worker for {}", blog);
                Arc::new(Mutex::new(BlogWorker::new(blog, self.deps.clone())))
            })
            .clone()
    }
}
