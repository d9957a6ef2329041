mod common;

use background_service::{Scheduler, SchedulerContext, SchedulerState};
use common::*;
use sourcebot_core::SchedulerConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn config() -> SchedulerConfig {
    SchedulerConfig {
        refresh_interval_secs: 60,
        idle_delay_ms: 50,
        cache_ttl_secs: 7200,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<ScriptedSource>,
    publisher: Arc<RecordingPublisher>,
    scheduler: Scheduler,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(ScriptedSource::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = Scheduler::new(
        SchedulerContext::default(),
        recording_deps(&store, &source, &publisher),
        &config(),
    );
    Harness {
        store,
        source,
        publisher,
        scheduler,
    }
}

#[tokio::test]
async fn test_pass_runs_runnable_blogs_in_listing_order() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);
    h.store.add_blog("beta", true, false);
    h.store.add_blog("gamma", true, true);
    h.store.add_blog("delta", false, true);
    for blog in ["alpha", "beta", "gamma", "delta"] {
        h.store.add_rule(blog, "tag", blog);
    }
    h.source.push_page("alpha", posts(&[1]));
    h.source.push_page("gamma", posts(&[2]));

    let ran = h.scheduler.run_pass().await.unwrap();
    assert_eq!(ran, 2);

    let calls = h.source.calls();
    assert_eq!(calls, vec!["alpha", "alpha", "gamma", "gamma"]);

    let published = h.publisher.published.lock().unwrap().clone();
    assert_eq!(
        published,
        vec![
            ("alpha".to_string(), 1, "tag:alpha".to_string()),
            ("gamma".to_string(), 2, "tag:gamma".to_string()),
        ]
    );

    let workers = h.scheduler.context().workers().read().await;
    assert_eq!(workers.len(), 2);
    assert!(workers.contains_key("alpha"));
    assert!(!workers.contains_key("beta"));
    assert_eq!(h.scheduler.context().state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_listing_is_refreshed_after_interval() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);

    assert_eq!(h.scheduler.run_pass().await.unwrap(), 1);
    h.store.add_blog("beta", true, true);
    assert_eq!(h.scheduler.run_pass().await.unwrap(), 1);
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(h.scheduler.run_pass().await.unwrap(), 2);
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_workers_persist_across_passes() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);
    h.store.add_rule("alpha", "tag", "cats");
    h.source.push_page("cats", posts(&[1, 2]));

    h.scheduler.run_pass().await.unwrap();
    let first = h.scheduler.context().workers().read().await["alpha"].clone();

    h.scheduler.run_pass().await.unwrap();
    let second = h.scheduler.context().workers().read().await["alpha"].clone();

    assert!(Arc::ptr_eq(&first, &second));
    // The second pass was served from the term's cache.
    assert_eq!(h.source.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_removed_blog_gets_fresh_worker() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);
    h.scheduler.run_pass().await.unwrap();
    let original = h.scheduler.context().workers().read().await["alpha"].clone();

    h.store.remove_blog("alpha");
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(h.scheduler.run_pass().await.unwrap(), 0);
    assert!(h.scheduler.context().workers().read().await.is_empty());

    h.store.add_blog("alpha", true, true);
    tokio::time::advance(Duration::from_secs(61)).await;
    h.scheduler.run_pass().await.unwrap();
    let recreated = h.scheduler.context().workers().read().await["alpha"].clone();
    assert!(!Arc::ptr_eq(&original, &recreated));
}

#[tokio::test]
async fn test_listing_failure_ends_pass() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);
    h.store.fail_listing.store(true, Ordering::SeqCst);

    assert!(h.scheduler.run_pass().await.is_err());
    assert!(h.source.calls().is_empty());
    assert_eq!(h.scheduler.context().state(), SchedulerState::Idle);
}

#[tokio::test]
async fn test_stop_during_worker_skips_remaining_blogs() {
    let mut h = harness();
    h.store.add_blog("alpha", true, true);
    h.store.add_blog("gamma", true, true);
    h.store.add_rule("alpha", "tag", "cats");
    h.store.add_rule("gamma", "tag", "dogs");
    h.source.push_page("cats", posts(&[1]));
    h.source
        .cancel_on_call(h.scheduler.context().cancel_token().clone());

    let ran = h.scheduler.run_pass().await.unwrap();

    assert_eq!(ran, 1);
    assert_eq!(h.source.calls(), vec!["cats"]);
    assert!(h.store.stats.lock().unwrap().is_empty());
    assert_eq!(h.scheduler.context().state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let h = harness();
    h.store.add_blog("alpha", false, true);
    let ctx = h.scheduler.context().clone();
    let mut states = ctx.subscribe();
    let mut scheduler = h.scheduler;

    let handle = tokio::spawn(async move { scheduler.run().await });

    tokio::time::sleep(Duration::from_millis(120)).await;
    ctx.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(ctx.state(), SchedulerState::Stopped);
    assert_eq!(*states.borrow_and_update(), SchedulerState::Stopped);
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_snapshot_reports_known_blogs() {
    let mut h = harness();
    h.store.add_blog("beta", true, true);
    h.store.add_blog("alpha", true, true);
    h.store.add_rule("alpha", "tag", "cats");

    h.scheduler.run_pass().await.unwrap();
    let snapshot = h.scheduler.context().snapshot().await;

    assert_eq!(snapshot.state, SchedulerState::Idle);
    let names: Vec<&str> = snapshot.blogs.iter().map(|b| b.blog.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(snapshot.blogs[0].terms, Some(1));
    assert_eq!(snapshot.blogs[1].terms, Some(0));
    assert!(snapshot.blogs.iter().all(|b| !b.running && b.last_run.is_some()));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"]["state"], "idle");
}
