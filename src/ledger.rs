//! The tag ledger - authoritative record of observed tags.
//!
//! Every tag the watcher has ever seen gets exactly one entry here. The
//! ledger is seeded once at startup from tags inside the retention window,
//! then grows by discovery only. Entries are never evicted for the lifetime
//! of the process, and a tag in a terminal state is never reprocessed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::repo::TagRecord;

/// Processing state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Discovered, not yet classified or built.
    Pending,
    /// Classified as a version tag and built successfully.
    Accepted,
    /// Did not match the version grammar. Terminal.
    Rejected,
    /// Build attempt failed. Terminal; retry is an operator action.
    Failed,
}

impl TagState {
    /// Check if the state is terminal (never reprocessed by the watcher).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A single observed tag.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Tag name, unique within the ledger.
    pub name: String,
    /// When the watcher first saw this tag.
    pub first_seen: DateTime<Utc>,
    /// Current processing state.
    pub state: TagState,
}

/// In-memory record of which tags have been seen and processed.
///
/// Shared between the watcher (discovery) and build workers (terminal
/// outcomes) as a [`SharedLedger`]; all access goes through the lock.
#[derive(Debug, Default)]
pub struct TagLedger {
    entries: HashMap<String, LedgerEntry>,
}

/// Ledger handle shared between the watcher loop and build workers.
pub type SharedLedger = Arc<Mutex<TagLedger>>;

impl TagLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared handle around an empty ledger.
    #[must_use]
    pub fn shared() -> SharedLedger {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Seed the ledger from a startup snapshot.
    ///
    /// Inserts a Pending entry for every tag whose commit timestamp falls
    /// within `retention` of `now`. Older tags are ignored entirely; they
    /// will never be diffed as "new" because discovery classification only
    /// runs against tags inserted here or discovered later. Returns the
    /// names seeded, in the snapshot's order.
    pub fn seed(
        &mut self,
        snapshot: &[TagRecord],
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let threshold = now - retention;
        let mut seeded = Vec::new();

        for tag in snapshot {
            if tag.timestamp < threshold {
                tracing::debug!(tag = %tag.name, timestamp = %tag.timestamp, "Tag outside retention window, skipping");
                continue;
            }
            if self.insert_pending(&tag.name, now) {
                seeded.push(tag.name.clone());
            }
        }

        tracing::info!(count = seeded.len(), "Ledger seeded");
        seeded
    }

    /// Insert a Pending entry for a newly discovered tag.
    ///
    /// Returns false (and changes nothing) if the tag is already known.
    /// The watcher calls this strictly before handing a tag to a build, so
    /// an overlapping poll cycle can never dispatch the same tag twice.
    pub fn insert_pending(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(
            name.to_string(),
            LedgerEntry { name: name.to_string(), first_seen: now, state: TagState::Pending },
        );
        true
    }

    /// Record a terminal outcome for a tag.
    ///
    /// Idempotent: recording the same terminal state twice is a no-op. A
    /// different terminal state never overwrites an existing one
    /// (first-wins); the conflict is logged at debug and ignored.
    pub fn record_attempt(&mut self, name: &str, outcome: TagState) {
        debug_assert!(outcome.is_terminal(), "record_attempt takes terminal states only");

        match self.entries.get_mut(name) {
            Some(entry) if entry.state == TagState::Pending => {
                entry.state = outcome;
            }
            Some(entry) if entry.state == outcome => {
                // Duplicate recording of the same outcome.
            }
            Some(entry) => {
                tracing::debug!(
                    tag = %name,
                    existing = ?entry.state,
                    attempted = ?outcome,
                    "Ignoring conflicting terminal state"
                );
            }
            None => {
                tracing::debug!(tag = %name, outcome = ?outcome, "Recorded outcome for unknown tag");
                self.entries.insert(
                    name.to_string(),
                    LedgerEntry { name: name.to_string(), first_seen: Utc::now(), state: outcome },
                );
            }
        }
    }

    /// Check whether a tag is known to the ledger.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Look up the state of a tag, if known.
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<TagState> {
        self.entries.get(name).map(|e| e.state)
    }

    /// Number of entries in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ledger has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
