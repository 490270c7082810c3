//! Repository snapshot layer.
//!
//! Wraps git2 to provide the watcher's view of the remote: a one-time base
//! clone, a fetch-then-list snapshot of tags with commit timestamps, and
//! credential plumbing for token or SSH key auth.
//!
//! Error taxonomy matters here: [`SnapshotError::RemoteUnavailable`] is
//! transient and the watcher retries on the next tick, while
//! [`SnapshotError::RepositoryCorrupt`] and [`SnapshotError::CloneFailed`]
//! mean the local state is unusable and the process must stop.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{AutotagOption, Cred, ErrorClass, FetchOptions, RemoteCallbacks, Repository};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// A tag as seen in one snapshot of the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Tag name, unique within the repository.
    pub name: String,
    /// Hex id of the commit the tag points at.
    pub commit: String,
    /// Commit timestamp (UTC).
    pub timestamp: DateTime<Utc>,
}

/// Errors from snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The network fetch could not complete (timeout, auth, DNS).
    /// Transient: retried on the next poll tick.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The local clone is unreadable. Fatal for the watcher.
    #[error("local repository corrupt or unreadable: {0}")]
    RepositoryCorrupt(String),

    /// The initial full clone could not complete. Fatal: no snapshot is
    /// possible without a base clone.
    #[error("clone failed: {0}")]
    CloneFailed(String),
}

impl SnapshotError {
    /// Whether the watcher must stop when it sees this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RemoteUnavailable(_))
    }
}

/// Credentials for the remote, if any.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HTTPS token.
    pub token: Option<String>,
    /// SSH private key path.
    pub ssh_key_path: Option<PathBuf>,
}

impl AuthConfig {
    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let token = self.token.clone();
        let ssh_key = self.ssh_key_path.clone();

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            if let Some(token) = &token {
                return Cred::userpass_plaintext("x-access-token", token);
            }
            if let Some(key) = &ssh_key {
                return Cred::ssh_key(username_from_url.unwrap_or("git"), None, key, None);
            }
            Cred::default()
        });
        callbacks
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(self.callbacks());
        opts.download_tags(AutotagOption::All);
        opts
    }
}

/// Handle on the watched repository: remote URL, local clone path, auth.
#[derive(Debug, Clone)]
pub struct RepoHandle {
    url: String,
    local_path: PathBuf,
    auth: AuthConfig,
}

impl RepoHandle {
    /// Create a handle. No I/O happens until the first operation.
    #[must_use]
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>, auth: AuthConfig) -> Self {
        Self { url: url.into(), local_path: local_path.into(), auth }
    }

    /// The local clone path.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// The remote URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ensure a base clone exists at the local path.
    ///
    /// Idempotent: a no-op when the path already holds a clone. Returns
    /// true when a fresh clone was performed. This is also the manual
    /// initialization entry point (`tagwatch init`).
    pub fn clone_and_initialize(&self) -> Result<bool, SnapshotError> {
        if Repository::open(&self.local_path).is_ok() {
            tracing::debug!(path = %self.local_path.display(), "Clone already present");
            return Ok(false);
        }

        tracing::info!(url = %self.url, path = %self.local_path.display(), "Cloning repository");

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(self.auth.fetch_options());
        builder
            .clone(&self.url, &self.local_path)
            .map_err(|e| SnapshotError::CloneFailed(e.message().to_string()))?;

        tracing::info!(path = %self.local_path.display(), "Repository cloned");
        Ok(true)
    }

    /// Take a snapshot of the repository's tags.
    ///
    /// Clones on first use, fetches from `origin` so the snapshot reflects
    /// the remote's current state, then lists tags with their commit
    /// timestamps in ascending timestamp order.
    pub fn snapshot(&self) -> Result<Vec<TagRecord>, SnapshotError> {
        self.clone_and_initialize()?;

        let repo = self.open()?;
        self.fetch(&repo)?;
        let mut tags = list_tags(&repo)?;
        tags.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));

        tracing::debug!(count = tags.len(), "Snapshot complete");
        Ok(tags)
    }

    fn open(&self) -> Result<Repository, SnapshotError> {
        Repository::open(&self.local_path)
            .map_err(|e| SnapshotError::RepositoryCorrupt(e.message().to_string()))
    }

    fn fetch(&self, repo: &Repository) -> Result<(), SnapshotError> {
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| SnapshotError::RepositoryCorrupt(e.message().to_string()))?;

        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"],
                Some(&mut self.auth.fetch_options()),
                None,
            )
            .map_err(|e| match e.class() {
                ErrorClass::Odb | ErrorClass::Object | ErrorClass::Repository
                | ErrorClass::Index => SnapshotError::RepositoryCorrupt(e.message().to_string()),
                _ => SnapshotError::RemoteUnavailable(e.message().to_string()),
            })
    }
}

fn list_tags(repo: &Repository) -> Result<Vec<TagRecord>, SnapshotError> {
    let names = repo
        .tag_names(None)
        .map_err(|e| SnapshotError::RepositoryCorrupt(e.message().to_string()))?;

    let mut tags = Vec::new();
    for name in names.iter().flatten() {
        let reference = format!("refs/tags/{name}");
        let object = repo
            .revparse_single(&reference)
            .map_err(|e| SnapshotError::RepositoryCorrupt(e.message().to_string()))?;
        // Annotated tags peel to their target commit; lightweight tags
        // already are the commit.
        let commit = object
            .peel_to_commit()
            .map_err(|e| SnapshotError::RepositoryCorrupt(e.message().to_string()))?;

        let timestamp = DateTime::from_timestamp(commit.time().seconds(), 0)
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

        tags.push(TagRecord { name: name.to_string(), commit: commit.id().to_string(), timestamp });
    }

    Ok(tags)
}

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9\-_.]").expect("path pattern is valid"));

/// Sanitize a name for use as an on-disk directory component.
///
/// Whitespace and anything outside `[A-Za-z0-9-_.]` becomes `-`.
#[must_use]
pub fn sanitize_dir_name(name: &str) -> String {
    UNSAFE_PATH_CHARS.replace_all(name, "-").into_owned()
}
