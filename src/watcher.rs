//! The tag watcher loop.
//!
//! A long-lived reconciliation loop: fetch a snapshot of the remote's tags,
//! diff it against the ledger, classify each new tag, and hand accepted
//! tags to the build orchestrator in ascending commit-timestamp order.
//!
//! Failure containment is the whole point of the loop structure: a
//! transient `RemoteUnavailable` logs a warning and waits for the next
//! tick, while `RepositoryCorrupt`/`CloneFailed` are the only two
//! conditions that terminate the watcher.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::build::BuildOrchestrator;
use crate::ledger::{SharedLedger, TagState};
use crate::repo::{RepoHandle, SnapshotError, TagRecord};
use crate::version::{classify, Classification};

/// Where the watcher is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Seeded and waiting for the first/next poll tick.
    Idle,
    /// Snapshot fetch in progress.
    Fetching,
    /// Computing `snapshot - ledger`.
    Diffing,
    /// Classifying and handing off new tags.
    Dispatching,
    /// Waiting out the poll interval.
    Sleeping,
    /// Unrecoverable; the loop has returned an error.
    Fatal,
}

/// Errors that terminate the watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The local clone is unusable (corrupt clone or failed initial clone).
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// The polling loop reconciling remote tags against the ledger.
pub struct TagWatcher {
    repo: RepoHandle,
    ledger: SharedLedger,
    orchestrator: Arc<BuildOrchestrator>,
    poll_interval: Duration,
    retention: chrono::Duration,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<WatcherState>,
}

impl TagWatcher {
    /// Create a watcher. Nothing runs until [`TagWatcher::run`].
    #[must_use]
    pub fn new(
        repo: RepoHandle,
        ledger: SharedLedger,
        orchestrator: Arc<BuildOrchestrator>,
        poll_interval: Duration,
        retention: chrono::Duration,
        concurrency: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Idle);
        Self {
            repo,
            ledger,
            orchestrator,
            poll_interval,
            retention,
            concurrency,
            shutdown,
            state,
        }
    }

    /// Subscribe to loop state changes.
    ///
    /// The watcher starts `Idle`; `Fatal` is only ever observed after
    /// [`TagWatcher::run`] has returned an error. Subscribe before
    /// calling `run`, which consumes the watcher.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    /// A flipped channel or a dropped sender both count as a shutdown
    /// request; without the latter an embedder that drops the sender
    /// would leave the loop polling without any sleep.
    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Seed the ledger, then poll until shutdown or a fatal error.
    ///
    /// On shutdown, in-flight builds are awaited to completion (their
    /// workspace cleanup included) before this returns.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut builds: JoinSet<()> = JoinSet::new();

        // Startup: seed the ledger from the first snapshot, then classify
        // and dispatch the seeded tags once.
        let seeded = match self.seed().await {
            Ok(Some(seeded)) => seeded,
            Ok(None) => return Ok(()), // shutdown during seeding
            Err(e) => {
                self.set_state(WatcherState::Fatal);
                tracing::error!(error = %e, "Watcher cannot start");
                return Err(e);
            }
        };
        self.dispatch(seeded, &semaphore, &mut builds).await;
        self.set_state(WatcherState::Idle);
        tracing::info!("Watching for tag creation");

        loop {
            self.set_state(WatcherState::Sleeping);
            let closed = tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => false,
                res = self.shutdown.changed() => res.is_err(),
            };
            if closed || *self.shutdown.borrow() {
                break;
            }

            self.set_state(WatcherState::Idle);
            if let Err(e) = self.poll_once(&semaphore, &mut builds).await {
                self.set_state(WatcherState::Fatal);
                drain(&mut builds).await;
                return Err(e);
            }

            // Reap builds that finished since the last tick.
            while builds.try_join_next().is_some() {}
        }

        tracing::info!("Shutdown requested, waiting for in-flight builds");
        drain(&mut builds).await;
        Ok(())
    }

    /// One reconciliation pass: fetch, diff, dispatch.
    async fn poll_once(
        &mut self,
        semaphore: &Arc<Semaphore>,
        builds: &mut JoinSet<()>,
    ) -> Result<(), WatcherError> {
        self.set_state(WatcherState::Fetching);
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "Fetch failed, retrying next tick");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Fetch failed fatally");
                return Err(e.into());
            }
        };

        self.set_state(WatcherState::Diffing);
        let discovered = {
            let ledger = self.ledger.lock();
            new_tags(&snapshot, |name| ledger.has(name))
        };

        if !discovered.is_empty() {
            tracing::info!(count = discovered.len(), "New tags discovered");
        }
        self.dispatch(discovered, semaphore, builds).await;
        Ok(())
    }

    /// Fetch the first snapshot and seed the ledger.
    ///
    /// Retries transient fetch failures on the poll interval; fatal
    /// snapshot errors propagate so the watcher never enters its loop with
    /// a broken clone. Returns None when shutdown interrupts seeding.
    async fn seed(&mut self) -> Result<Option<Vec<TagRecord>>, WatcherError> {
        let snapshot = loop {
            self.set_state(WatcherState::Fetching);
            match self.fetch_snapshot().await {
                Ok(snapshot) => break snapshot,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(error = %e, "Initial fetch failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            let closed = tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => false,
                res = self.shutdown.changed() => res.is_err(),
            };
            if closed || *self.shutdown.borrow() {
                return Ok(None);
            }
        };

        let now = Utc::now();
        let seeded_names = self.ledger.lock().seed(&snapshot, self.retention, now);
        let seeded = snapshot
            .into_iter()
            .filter(|tag| seeded_names.iter().any(|name| name == &tag.name))
            .collect();
        Ok(Some(seeded))
    }

    async fn fetch_snapshot(&self) -> Result<Vec<TagRecord>, SnapshotError> {
        let repo = self.repo.clone();
        // Blocking git I/O runs off the scheduler thread so a slow remote
        // never delays timers or shutdown handling.
        tokio::task::spawn_blocking(move || repo.snapshot())
            .await
            .map_err(|e| SnapshotError::RepositoryCorrupt(format!("snapshot task failed: {e}")))?
    }

    /// Classify tags and hand accepted ones to the orchestrator.
    ///
    /// Tags arrive in ascending commit-timestamp order and permits are
    /// acquired before spawning, so dispatch order is preserved even when
    /// concurrency > 1. The ledger entry for each tag exists before any
    /// build starts. Shutdown stops dispatch of not-yet-started tags;
    /// only builds already in flight are allowed to finish.
    async fn dispatch(
        &mut self,
        tags: Vec<TagRecord>,
        semaphore: &Arc<Semaphore>,
        builds: &mut JoinSet<()>,
    ) {
        self.set_state(WatcherState::Dispatching);
        let now = Utc::now();

        for tag in tags {
            if self.shutdown_requested() {
                tracing::info!("Shutdown requested, remaining tags stay pending");
                break;
            }

            // Entry creation strictly precedes the build; a second poll
            // cycle overlapping a long build sees the tag as known.
            self.ledger.lock().insert_pending(&tag.name, now);

            match classify(&tag.name) {
                Classification::Rejected => {
                    tracing::info!(tag = %tag.name, "Tag rejected: not a version tag");
                    self.ledger.lock().record_attempt(&tag.name, TagState::Rejected);
                }
                Classification::Accepted => {
                    tracing::info!(tag = %tag.name, commit = %tag.commit, "Version tag accepted");
                    // Waiting on a permit can outlive a Ctrl+C; the
                    // shutdown arm wins and the tag stays Pending.
                    let permit = tokio::select! {
                        permit = Arc::clone(semaphore).acquire_owned() => {
                            let Ok(permit) = permit else { break };
                            permit
                        }
                        _ = self.shutdown.changed() => break,
                    };
                    let orchestrator = Arc::clone(&self.orchestrator);
                    builds.spawn(async move {
                        let _permit = permit;
                        orchestrator.build(&tag).await;
                    });
                }
            }
        }
    }
}

/// Compute the discovery diff: snapshot tags not yet known, in ascending
/// commit-timestamp order.
fn new_tags<F: Fn(&str) -> bool>(snapshot: &[TagRecord], known: F) -> Vec<TagRecord> {
    let mut tags: Vec<TagRecord> =
        snapshot.iter().filter(|tag| !known(&tag.name)).cloned().collect();
    tags.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    tags
}

async fn drain(builds: &mut JoinSet<()>) {
    while builds.join_next().await.is_some() {}
}
