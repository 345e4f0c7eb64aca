//! # Site Ledger
//!
//! An incremental publisher for hierarchical sites. Pages are rendered
//! through named templates and published to a content-addressed storage
//! service; a persistent ledger remembers every address so unchanged pages
//! are never sent again and changed pages go out as replacements of their
//! previous version.
//!
//! # Architecture: Tree → Ledger → Service
//!
//! ```text
//! Site
//! ├── SiteTree    groups and pages (arena, ids)
//! ├── Ledger      path → record, templates, staging dir, Publisher
//! └── ThreadPool  bounded page publishes
//! ```
//!
//! A run builds the tree, calls [`Site::publish`] and then [`Site::save`].
//! Publishing walks the tree depth first. For every page it renders the
//! template into the staging directory and hands the artifact set to
//! [`Ledger::publish_artifact`], which decides between three outcomes:
//!
//! - **Unchanged**: the artifact digest equals the latest recorded one; no
//!   service call.
//! - **Original**: the path has never been published.
//! - **Replacement**: the digest changed; the previous version's link and
//!   replace token go along so the service supersedes it.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`site`] | Orchestration root: owns the ledger, tree and worker pool |
//! | [`tree`] | Group arena: paths, breadcrumbs, depth-first publish |
//! | [`page`] | Page data, links, placeholder and real publishes |
//! | [`ledger`] | Publish decision, path registration, persistence |
//! | [`publisher`] | [`Publisher`] trait for the storage service |
//! | [`digest`] | SHA-256 over artifact sets and ledger bytes |
//! | [`config`] | `site-ledger.toml` loading, merging and validation |
//! | [`naming`] | Param-case slugs and staging file names |
//! | [`types`] | Records persisted in the ledger and links handed to templates |
//!
//! # Design Decisions
//!
//! ## Stable Links
//!
//! A record keeps its `original` version forever and every link points at
//! it. Replacements only move `current`. Pages that link to each other
//! therefore never change because a target was republished, which is what
//! keeps a rerun with no content changes at zero service calls.
//!
//! ## Placeholders for Forward References
//!
//! Breadcrumbs point at index pages that are published last. When a link is
//! needed for a path the ledger has never seen, the page is published once
//! with placeholder content to obtain an address. The real publish later
//! replaces it, and the link stays valid.
//!
//! ## Children Before Index
//!
//! An index page lists its pages and sub-groups by link, so it is rendered
//! only after all of them are published. Pages within one group are
//! independent and run concurrently on a rayon pool sized by
//! `max_concurrent_publishes`; groups are walked sequentially.
//!
//! ## Ledger Persistence
//!
//! The ledger is pretty JSON with sorted keys, so an unchanged ledger
//! serializes to identical bytes and a save can be skipped by digest. The
//! previous file is kept as `<file>.bak`. Long runs force a save every
//! `flush_threshold` publishes to bound what a crash can lose.

pub mod config;
pub mod digest;
pub mod ledger;
pub mod naming;
pub mod page;
pub mod publisher;
pub mod site;
pub mod tree;
pub mod types;

pub use config::LedgerConfig;
pub use ledger::{Ledger, LedgerError};
pub use publisher::{PublishError, PublishOptions, PublishRequest, Publisher};
pub use site::Site;
pub use tree::{GroupId, PageId, SiteError, SiteTree};

#[cfg(test)]
pub(crate) mod test_helpers;
