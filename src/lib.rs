//! # Tagwatch
//!
//! Git tag watcher and release build daemon.
//!
//! Tagwatch polls a single Git repository for newly created semantic
//! version tags (`v1`, `v2.3`, `v10.2.1`) and runs an isolated build
//! workflow for each one: per-tag checkout into a throwaway workspace, a
//! pluggable build step (shell script, make, or docker), guaranteed
//! teardown, and a ledger that ensures no tag is ever processed twice.
//!
//! ## Quick Start
//!
//! ```bash
//! # Install
//! cargo install tagwatch
//!
//! # Initialize the local clone once
//! tagwatch init --url https://github.com/you/project.git --path ~/watch/project
//!
//! # Watch for new version tags
//! TAGWATCH_REPO_URL=https://github.com/you/project.git \
//! TAGWATCH_LOCAL_PATH=~/watch/project \
//! tagwatch watch
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::future_not_send)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cognitive_complexity)]

pub mod build;
pub mod config;
pub mod integrations;
pub mod ledger;
pub mod repo;
pub mod version;
pub mod watcher;

pub use build::{
    runner_for, BuildOrchestrator, BuildOutcome, FailureReason, WorkflowError, WorkflowRunner,
};
pub use config::{Config, WorkflowKind};
pub use ledger::{LedgerEntry, SharedLedger, TagLedger, TagState};
pub use repo::{sanitize_dir_name, AuthConfig, RepoHandle, SnapshotError, TagRecord};
pub use version::{classify, Classification};
pub use watcher::{TagWatcher, WatcherError, WatcherState};
