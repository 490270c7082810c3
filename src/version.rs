//! Semantic version tag classification.
//!
//! Decides whether a tag name qualifies for the build pipeline. The accepted
//! grammar is a literal leading `v` followed by one or more dot-separated
//! numeric components (`v1`, `v2.3`, `v10.2.1`, `v1.2.3.4`), arbitrary depth.

use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d+(\.\d+)*$").expect("version pattern is valid"));

/// Outcome of classifying a tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Tag name matches the version grammar and should be built.
    Accepted,
    /// Tag name does not match; logged and skipped, never an error.
    Rejected,
}

impl Classification {
    /// Check if the tag was accepted.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Classify a tag name against the version grammar.
///
/// Pure and total: never errors, no side effects.
#[must_use]
pub fn classify(tag_name: &str) -> Classification {
    if VERSION_PATTERN.is_match(tag_name) {
        Classification::Accepted
    } else {
        Classification::Rejected
    }
}
