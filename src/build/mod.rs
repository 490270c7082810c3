//! Build orchestration.
//!
//! For each accepted tag the orchestrator materializes an isolated checkout
//! of the repository, invokes the workflow runner under a timeout, tears the
//! workspace down on every exit path, and records the outcome in the ledger.
//! No error escapes [`BuildOrchestrator::build`] - everything becomes a
//! [`BuildOutcome`] so one bad build can never crash the watcher loop.

mod workflow;

pub use workflow::{
    runner_for, AutoWorkflow, DockerWorkflow, MakeWorkflow, ScriptWorkflow, WorkflowError,
    WorkflowRunner, BUILD_SCRIPT,
};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::ledger::{SharedLedger, TagState};
use crate::repo::{sanitize_dir_name, TagRecord};

#[cfg(feature = "notifications")]
use crate::integrations::DiscordNotifier;

/// Result of one build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Workflow completed successfully.
    Succeeded,
    /// Build failed; the reason says at which step.
    Failed(FailureReason),
}

impl BuildOutcome {
    /// Check if the build succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Why a build failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The isolated checkout could not be created (e.g. tag deleted
    /// between discovery and build). Not retried.
    Checkout,
    /// The workflow exceeded the per-build timeout.
    Timeout,
    /// The workflow itself failed, with its reason.
    Workflow(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkout => write!(f, "checkout-error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Workflow(reason) => write!(f, "{reason}"),
        }
    }
}

/// Drives isolated builds for accepted tags.
pub struct BuildOrchestrator {
    /// Local base clone the per-tag checkouts are cloned from.
    base_clone: PathBuf,
    /// Directory build workspaces are created under.
    workspace_root: PathBuf,
    runner: Arc<dyn WorkflowRunner>,
    timeout: Duration,
    ledger: SharedLedger,
    #[cfg(feature = "notifications")]
    notifier: Option<Arc<DiscordNotifier>>,
}

impl BuildOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        base_clone: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
        runner: Arc<dyn WorkflowRunner>,
        timeout: Duration,
        ledger: SharedLedger,
    ) -> Self {
        Self {
            base_clone: base_clone.into(),
            workspace_root: workspace_root.into(),
            runner,
            timeout,
            ledger,
            #[cfg(feature = "notifications")]
            notifier: None,
        }
    }

    /// Attach a Discord notifier for build outcomes.
    #[cfg(feature = "notifications")]
    #[must_use]
    pub fn with_notifier(mut self, notifier: Option<Arc<DiscordNotifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Build one tag: checkout, run workflow, tear down, record.
    ///
    /// The workspace directory is removed on every exit path, including
    /// checkout failure and timeout, before this returns.
    pub async fn build(&self, tag: &TagRecord) -> BuildOutcome {
        let workspace = self
            .workspace_root
            .join(format!("tagwatch-{}-{}", sanitize_dir_name(&tag.name), Uuid::new_v4()));

        tracing::info!(tag = %tag.name, commit = %tag.commit, workspace = %workspace.display(), "Build started");

        let outcome = self.run_in_workspace(tag, &workspace).await;
        remove_workspace(&workspace).await;

        let state = if outcome.is_success() { TagState::Accepted } else { TagState::Failed };
        self.ledger.lock().record_attempt(&tag.name, state);

        match &outcome {
            BuildOutcome::Succeeded => {
                tracing::info!(tag = %tag.name, "Build succeeded");
            }
            BuildOutcome::Failed(reason) => {
                tracing::warn!(tag = %tag.name, reason = %reason, "Build failed");
            }
        }

        #[cfg(feature = "notifications")]
        if let Some(notifier) = &self.notifier {
            notifier.notify_build_outcome(&tag.name, &outcome).await;
        }

        outcome
    }

    async fn run_in_workspace(&self, tag: &TagRecord, workspace: &Path) -> BuildOutcome {
        // Blocking git work happens off the scheduler thread.
        let base = self.base_clone.clone();
        let dest = workspace.to_path_buf();
        let commit = tag.commit.clone();
        let checkout =
            tokio::task::spawn_blocking(move || checkout_at_commit(&base, &dest, &commit)).await;

        match checkout {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(tag = %tag.name, error = %e, "Checkout failed");
                return BuildOutcome::Failed(FailureReason::Checkout);
            }
            Err(e) => {
                tracing::error!(tag = %tag.name, error = %e, "Checkout task panicked");
                return BuildOutcome::Failed(FailureReason::Checkout);
            }
        }

        let run = self.runner.run(workspace, &tag.name, &tag.commit);
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(())) => BuildOutcome::Succeeded,
            Ok(Err(e)) => BuildOutcome::Failed(FailureReason::Workflow(e.to_string())),
            Err(_) => {
                tracing::warn!(tag = %tag.name, timeout = ?self.timeout, "Build timed out");
                BuildOutcome::Failed(FailureReason::Timeout)
            }
        }
    }
}

/// Clone the base repository into `dest` detached at `commit`.
fn checkout_at_commit(base: &Path, dest: &Path, commit: &str) -> Result<(), git2::Error> {
    let base_url = base.to_string_lossy();
    let repo = git2::Repository::clone(&base_url, dest)?;

    let oid = git2::Oid::from_str(commit)?;
    let object = repo.find_object(oid, None)?;
    repo.checkout_tree(&object, Some(git2::build::CheckoutBuilder::new().force()))?;
    repo.set_head_detached(oid)?;
    Ok(())
}

/// Remove a build workspace, if it exists.
async fn remove_workspace(workspace: &Path) {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(workspace = %workspace.display(), error = %e, "Failed to remove workspace");
        }
    }
}
