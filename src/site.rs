//! Orchestration root.
//!
//! A [`Site`] owns the [`Ledger`], the [`SiteTree`] and the worker pool page
//! publishes run on. Build the tree through the factory methods, call
//! [`Site::publish`], then [`Site::save`].
//!
//! ```rust,ignore
//! let mut site = Site::init(config, client)?;
//! let root = site.root();
//! site.create_index(root, "index", json!({"title": "Vehicle Listings"}))?;
//! let cars = site.create_group(root, None);
//! site.create_index(cars, "index", json!({"title": "Cars"}))?;
//! site.create_page(cars, "page", json!({"title": "2018 Toyota Camry"}), vec![])?;
//!
//! let stats = site.publish()?;
//! site.save(false, true)?;
//! ```

use crate::config::LedgerConfig;
use crate::ledger::Ledger;
use crate::publisher::Publisher;
use crate::tree::{GroupId, PageId, SiteError, SiteTree};
use crate::types::PublishStats;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_json::Value;
use std::path::PathBuf;

pub struct Site {
    ledger: Ledger,
    tree: SiteTree,
    pool: ThreadPool,
}

impl Site {
    /// Open the ledger and start the publish pool.
    pub fn init(
        config: LedgerConfig,
        publisher: impl Publisher + Send + 'static,
    ) -> Result<Self, SiteError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_publishes)
            .thread_name(|i| format!("site-publish-{i}"))
            .build()?;
        let ledger = Ledger::open(config, publisher)?;
        Ok(Self {
            ledger,
            tree: SiteTree::new(),
            pool,
        })
    }

    pub fn root(&self) -> GroupId {
        self.tree.root()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn tree(&self) -> &SiteTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SiteTree {
        &mut self.tree
    }

    pub fn create_group(&mut self, parent: GroupId, segment: Option<&str>) -> GroupId {
        self.tree.create_group(parent, segment)
    }

    pub fn create_index(
        &mut self,
        group: GroupId,
        template: &str,
        data: Value,
    ) -> Result<PageId, SiteError> {
        self.tree.create_index(group, template, data)
    }

    pub fn create_page(
        &mut self,
        group: GroupId,
        template: &str,
        data: Value,
        files: Vec<PathBuf>,
    ) -> Result<PageId, SiteError> {
        self.tree.create_page(group, template, data, files)
    }

    /// Publish the whole tree and return the run's outcome counts.
    pub fn publish(&mut self) -> Result<PublishStats, SiteError> {
        let root = self.tree.root();
        self.tree.publish(root, &self.ledger, &self.pool)?;
        let stats = self.ledger.stats();
        tracing::info!("{}", stats);
        Ok(stats)
    }

    /// Persist the ledger; with `clean`, remove the staging directory.
    pub fn save(&self, force: bool, clean: bool) -> Result<(), SiteError> {
        Ok(self.ledger.flush(force, clean)?)
    }
}
