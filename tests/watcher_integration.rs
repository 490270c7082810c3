//! Watcher integration tests.
//!
//! Exercises the full discovery pipeline against real local Git
//! repositories created with git2: seeding, classification, ordered
//! dispatch, cleanup, and the fatal startup path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use git2::{Repository, Signature, Time};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

use tagwatch::{
    BuildOrchestrator, RepoHandle, SharedLedger, TagLedger, TagState, TagWatcher, WatcherState,
    WorkflowError, WorkflowRunner,
};

/// Workflow runner that records the dispatch order of tags it sees.
struct RecordingRunner {
    seen: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl RecordingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self { seen: Mutex::new(Vec::new()), delay: None })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { seen: Mutex::new(Vec::new()), delay: Some(delay) })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl WorkflowRunner for RecordingRunner {
    async fn run(&self, workspace: &Path, tag: &str, _commit: &str) -> Result<(), WorkflowError> {
        assert!(workspace.exists());
        self.seen.lock().push(tag.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Commit with a fixed timestamp and tag the commit.
fn commit_and_tag(repo: &Repository, tag: &str, epoch_secs: i64) {
    let sig = Signature::new("tester", "tester@example.com", &Time::new(epoch_secs, 0)).unwrap();

    let tree_id = {
        let mut index = repo.index().unwrap();
        index.write_tree().unwrap()
    };
    let tree = repo.find_tree(tree_id).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    let commit_id = repo.commit(Some("HEAD"), &sig, &sig, tag, &tree, &parents).unwrap();

    let object = repo.find_object(commit_id, None).unwrap();
    repo.tag_lightweight(tag, &object, false).unwrap();
}

fn days_ago(days: i64) -> i64 {
    Utc::now().timestamp() - days * 24 * 60 * 60
}

struct Fixture {
    _dir: TempDir,
    origin: PathBuf,
    clone_path: PathBuf,
    workspace_root: PathBuf,
}

fn fixture(tags: &[(&str, i64)]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("origin");
    let repo = Repository::init(&origin).unwrap();
    for (tag, secs) in tags {
        commit_and_tag(&repo, tag, *secs);
    }

    let clone_path = dir.path().join("clone");
    let workspace_root = dir.path().join("workspaces");
    std::fs::create_dir_all(&workspace_root).unwrap();

    Fixture { _dir: dir, origin, clone_path, workspace_root }
}

struct SpawnedWatcher {
    ledger: SharedLedger,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<WatcherState>,
    handle: tokio::task::JoinHandle<Result<(), tagwatch::WatcherError>>,
}

fn spawn_watcher(
    fixture: &Fixture,
    runner: Arc<dyn WorkflowRunner>,
    concurrency: usize,
) -> SpawnedWatcher {
    let repo = RepoHandle::new(
        fixture.origin.to_string_lossy(),
        &fixture.clone_path,
        tagwatch::AuthConfig::default(),
    );
    let ledger = TagLedger::shared();
    let orchestrator = Arc::new(BuildOrchestrator::new(
        &fixture.clone_path,
        &fixture.workspace_root,
        runner,
        Duration::from_secs(30),
        Arc::clone(&ledger),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = TagWatcher::new(
        repo,
        Arc::clone(&ledger),
        orchestrator,
        Duration::from_millis(100),
        chrono::Duration::days(30),
        concurrency,
        shutdown_rx,
    );

    let state = watcher.state_watch();
    SpawnedWatcher { ledger, shutdown: shutdown_tx, state, handle: tokio::spawn(watcher.run()) }
}

/// Poll until `pred` holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(pred: F, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    pred()
}

fn all_terminal(ledger: &SharedLedger, names: &[&str]) -> bool {
    let ledger = ledger.lock();
    names.iter().all(|n| ledger.state_of(n).is_some_and(TagState::is_terminal))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_end_to_end_seed_classify_dispatch() {
    // Three tags inside the retention window; dispatch must be oldest
    // first, and only the version tags get built.
    let fixture = fixture(&[
        ("v2.0.0", days_ago(3)),
        ("foo", days_ago(2)),
        ("v1.0.0", days_ago(1)),
    ]);
    let runner = RecordingRunner::new();
    let watcher = spawn_watcher(&fixture, runner.clone(), 1);
    let SpawnedWatcher { ledger, shutdown, handle, .. } = watcher;

    assert!(
        wait_until(
            || all_terminal(&ledger, &["v1.0.0", "foo", "v2.0.0"]),
            Duration::from_secs(30)
        )
        .await,
        "all seeded tags should reach a terminal state"
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runner.seen(), vec!["v2.0.0".to_string(), "v1.0.0".to_string()]);
    {
        let ledger = ledger.lock();
        assert_eq!(ledger.state_of("v2.0.0"), Some(TagState::Accepted));
        assert_eq!(ledger.state_of("v1.0.0"), Some(TagState::Accepted));
        assert_eq!(ledger.state_of("foo"), Some(TagState::Rejected));
    }

    // Cleanup invariant: no workspaces left behind.
    assert_eq!(std::fs::read_dir(&fixture.workspace_root).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tags_outside_retention_window_are_not_seeded() {
    let fixture = fixture(&[("v0.1.0", days_ago(45)), ("v1.0.0", days_ago(1))]);
    let runner = RecordingRunner::new();
    let SpawnedWatcher { ledger, shutdown, handle, .. } =
        spawn_watcher(&fixture, runner.clone(), 1);

    assert!(
        wait_until(|| all_terminal(&ledger, &["v1.0.0"]), Duration::from_secs(30)).await
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runner.seen(), vec!["v1.0.0".to_string()]);
    assert!(!ledger.lock().has("v0.1.0"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovers_tag_created_after_startup() {
    let fixture = fixture(&[("v1.0.0", days_ago(2))]);
    let runner = RecordingRunner::new();
    let SpawnedWatcher { ledger, shutdown, handle, .. } =
        spawn_watcher(&fixture, runner.clone(), 1);

    assert!(wait_until(|| all_terminal(&ledger, &["v1.0.0"]), Duration::from_secs(30)).await);

    // A new tag appears on the origin while the watcher is running.
    let origin = Repository::open(&fixture.origin).unwrap();
    commit_and_tag(&origin, "v1.1.0", days_ago(0));

    assert!(
        wait_until(|| all_terminal(&ledger, &["v1.1.0"]), Duration::from_secs(30)).await,
        "new tag should be discovered by a later poll"
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runner.seen(), vec!["v1.0.0".to_string(), "v1.1.0".to_string()]);
    assert_eq!(ledger.lock().state_of("v1.1.0"), Some(TagState::Accepted));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_long_build_is_not_dispatched_twice() {
    // Build takes much longer than the poll interval; overlapping polls
    // must not re-dispatch the tag.
    let fixture = fixture(&[("v1.0.0", days_ago(1))]);
    let runner = RecordingRunner::slow(Duration::from_millis(800));
    let SpawnedWatcher { ledger, shutdown, handle, .. } =
        spawn_watcher(&fixture, runner.clone(), 1);

    assert!(wait_until(|| all_terminal(&ledger, &["v1.0.0"]), Duration::from_secs(30)).await);
    // Let several more poll cycles run.
    tokio::time::sleep(Duration::from_millis(500)).await;

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runner.seen(), vec!["v1.0.0".to_string()], "dispatched exactly once");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initial_clone_failure_is_fatal_and_skips_seeding() {
    let dir = TempDir::new().unwrap();
    let fixture = Fixture {
        origin: dir.path().join("no-such-origin"),
        clone_path: dir.path().join("clone"),
        workspace_root: dir.path().join("workspaces"),
        _dir: dir,
    };
    std::fs::create_dir_all(&fixture.workspace_root).unwrap();

    let runner = RecordingRunner::new();
    let SpawnedWatcher { ledger, shutdown: _shutdown, state, handle } =
        spawn_watcher(&fixture, runner.clone(), 1);

    let result = handle.await.unwrap();
    assert!(result.is_err(), "clone failure must terminate the watcher");
    assert_eq!(*state.borrow(), WatcherState::Fatal);
    assert!(ledger.lock().is_empty(), "no seeding happens on the fatal path");
    assert!(runner.seen().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watcher_starts_idle() {
    let fixture = fixture(&[("v1.0.0", days_ago(1))]);
    let runner = RecordingRunner::new();

    let repo = RepoHandle::new(
        fixture.origin.to_string_lossy(),
        &fixture.clone_path,
        tagwatch::AuthConfig::default(),
    );
    let ledger = TagLedger::shared();
    let orchestrator = Arc::new(BuildOrchestrator::new(
        &fixture.clone_path,
        &fixture.workspace_root,
        runner,
        Duration::from_secs(30),
        Arc::clone(&ledger),
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = TagWatcher::new(
        repo,
        ledger,
        orchestrator,
        Duration::from_millis(100),
        chrono::Duration::days(30),
        1,
        shutdown_rx,
    );

    // No work has happened yet, so the state channel must read Idle.
    assert_eq!(*watcher.state_watch().borrow(), WatcherState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_shutdown_sender_stops_the_watcher() {
    // An embedder that drops the shutdown sender without ever sending
    // counts as a shutdown request; the loop must exit instead of
    // spinning without its sleep.
    let fixture = fixture(&[("v1.0.0", days_ago(1))]);
    let runner = RecordingRunner::new();
    let SpawnedWatcher { ledger, shutdown, handle, .. } =
        spawn_watcher(&fixture, runner.clone(), 1);

    assert!(wait_until(|| all_terminal(&ledger, &["v1.0.0"]), Duration::from_secs(30)).await);

    drop(shutdown);
    let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
    result
        .expect("watcher must exit after the shutdown sender is dropped")
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_dispatch_of_remaining_tags() {
    // With concurrency 1 and a slow build, shutdown arriving while the
    // first tag builds must leave the second tag undispatched.
    let fixture = fixture(&[("v1.0.0", days_ago(2)), ("v2.0.0", days_ago(1))]);
    let runner = RecordingRunner::slow(Duration::from_millis(800));
    let SpawnedWatcher { ledger, shutdown, handle, .. } =
        spawn_watcher(&fixture, runner.clone(), 1);

    assert!(
        wait_until(|| runner.seen().len() == 1, Duration::from_secs(30)).await,
        "first build should start"
    );
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runner.seen(), vec!["v1.0.0".to_string()], "second tag never dispatched");
    assert_eq!(ledger.lock().state_of("v2.0.0"), Some(TagState::Pending));
}
