//! Shared types persisted in the ledger file and handed to templates.
//!
//! Everything here is serialized either into the ledger JSON or into the
//! render context, so field names are part of the on-disk format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses returned by the storage service for one publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    /// Link that opens the published artifact.
    pub open: String,
}

/// Response of a successful publish call.
///
/// Opaque to this crate except for the open link (used for hrefs and as the
/// replace link) and the replace token (needed to supersede it later).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub links: Links,
    pub replace_token: String,
}

/// One published version of a path: where it lives and what it hashed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub publication: Publication,
    /// SHA-256 over the ordered per-file digests of the artifact set.
    pub digest: String,
}

/// Publish history of a single site path.
///
/// `original` is fixed by the first successful publish and is what every
/// link points at. `current` tracks the most recent replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub original: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Version>,
}

impl PublicationRecord {
    /// The most recent version: `current` if the path was ever replaced.
    pub fn latest(&self) -> &Version {
        self.current.as_ref().unwrap_or(&self.original)
    }

    /// Stable link target for this path.
    pub fn href(&self) -> &str {
        &self.original.publication.links.open
    }
}

/// A link as templates see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub title: String,
}

/// What `publish_artifact` did for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Digest matched the latest version; no service call was made.
    Unchanged,
    /// First publish of the path.
    Original,
    /// New content superseding the latest version.
    Replacement,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Original => write!(f, "publish original"),
            Self::Replacement => write!(f, "publish replacement"),
        }
    }
}

/// Outcome counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub originals: u32,
    pub replacements: u32,
    pub unchanged: u32,
}

impl PublishStats {
    pub fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Unchanged => self.unchanged += 1,
            PublishOutcome::Original => self.originals += 1,
            PublishOutcome::Replacement => self.replacements += 1,
        }
    }

    /// Number of calls that reached the storage service.
    pub fn service_calls(&self) -> u32 {
        self.originals + self.replacements
    }

    pub fn total(&self) -> u32 {
        self.service_calls() + self.unchanged
    }
}

impl fmt::Display for PublishStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.service_calls() == 0 {
            write!(f, "{} unchanged", self.unchanged)
        } else {
            write!(
                f,
                "{} published, {} replaced, {} unchanged ({} total)",
                self.originals,
                self.replacements,
                self.unchanged,
                self.total()
            )
        }
    }
}
