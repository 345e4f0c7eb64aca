//! Page group tree.
//!
//! Groups and pages live in a flat arena ([`SiteTree`]) and refer to each
//! other by [`GroupId`] / [`PageId`]. Parent links are plain ids, so walking
//! up for paths and breadcrumbs is an index lookup and there is no shared
//! ownership between nodes. The ledger is never stored in the tree; every
//! operation that needs it takes `&Ledger`.
//!
//! # Paths
//!
//! A group's path is the chain of its ancestors' segments (the root has
//! none). A group without an explicit segment takes the param-cased title
//! of its index page. A page's path is its group's path plus its own
//! segment; an index page shares its group's path.
//!
//! ```text
//! root                      /
//! ├── index "Home"          /
//! └── cars                  /cars
//!     ├── index "Cars"      /cars
//!     └── "2018 Toyota Camry"  /cars/2018-toyota-camry
//! ```
//!
//! # Publish order
//!
//! [`SiteTree::publish`] is depth first with children before the enclosing
//! index: child groups (sequentially), then this group's pages (concurrently,
//! bounded by the pool size), then the index page, which is rendered with the
//! links of everything published before it.

use crate::config::ConfigError;
use crate::ledger::{Ledger, LedgerError};
use crate::naming::param_case;
use crate::page::Page;
use crate::types::Link;
use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Page data is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Page title '{0}' does not produce a path segment")]
    EmptySegment(String),
    #[error("Page path {0} is not a single lowercase slug")]
    InvalidSegment(String),
    #[error("Group {0:?} has no path segment and no titled index page")]
    UnnamedGroup(GroupId),
    #[error("Failed to render {path}: {source}")]
    Render {
        path: String,
        source: minijinja::Error,
    },
    #[error("Cannot write staging file {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot build publish pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl SiteError {
    /// Whether a failure of one page may be logged and skipped.
    ///
    /// Everything else means the tree was built wrong or the ledger cannot
    /// be persisted, and aborts the traversal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_transient(),
            Self::Render { .. } | Self::Staging { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub(crate) usize);

/// Namespace node: an optional index page plus child pages and groups.
#[derive(Debug, Default)]
pub struct Group {
    segment: String,
    index: Option<PageId>,
    pages: Vec<PageId>,
    groups: Vec<GroupId>,
    parent: Option<GroupId>,
    breadcrumbs: Option<Vec<Link>>,
}

impl Group {
    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn index(&self) -> Option<PageId> {
        self.index
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }
}

/// Arena holding every group and page of a site.
#[derive(Debug)]
pub struct SiteTree {
    groups: Vec<Group>,
    pages: Vec<Page>,
}

impl Default for SiteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteTree {
    /// A tree with only the (unnamed) root group.
    pub fn new() -> Self {
        Self {
            groups: vec![Group::default()],
            pages: Vec::new(),
        }
    }

    pub fn root(&self) -> GroupId {
        GroupId(0)
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn page(&self, id: PageId) -> &Page {
        &self.pages[id.0]
    }

    pub fn page_mut(&mut self, id: PageId) -> &mut Page {
        &mut self.pages[id.0]
    }

    /// Add a child group. Without a segment, it is named after its index page.
    pub fn create_group(&mut self, parent: GroupId, segment: Option<&str>) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(Group {
            segment: segment.unwrap_or_default().to_string(),
            parent: Some(parent),
            ..Default::default()
        });
        self.groups[parent.0].groups.push(id);
        id
    }

    /// Set the group's index page, naming the group after it if unnamed.
    pub fn create_index(
        &mut self,
        group: GroupId,
        template: &str,
        data: Value,
    ) -> Result<PageId, SiteError> {
        let page = Page::new_index(group, template, data)?;
        let id = PageId(self.pages.len());
        let node = &mut self.groups[group.0];
        if node.segment.is_empty() {
            node.segment = param_case(page.title());
        }
        node.index = Some(id);
        self.pages.push(page);
        Ok(id)
    }

    /// Add a content page to a group.
    pub fn create_page(
        &mut self,
        group: GroupId,
        template: &str,
        data: Value,
        files: Vec<PathBuf>,
    ) -> Result<PageId, SiteError> {
        let page = Page::new(group, template, data, files)?;
        let id = PageId(self.pages.len());
        self.pages.push(page);
        self.groups[group.0].pages.push(id);
        Ok(id)
    }

    /// Segments from the root down to `group`; the root contributes none.
    pub fn path_segments(&self, group: GroupId) -> Result<Vec<String>, SiteError> {
        let mut segments = Vec::new();
        let mut current = group;
        while let Some(parent) = self.groups[current.0].parent {
            let segment = &self.groups[current.0].segment;
            if segment.is_empty() {
                return Err(SiteError::UnnamedGroup(current));
            }
            segments.push(segment.clone());
            current = parent;
        }
        segments.reverse();
        Ok(segments)
    }

    /// `/`-joined path of a group.
    pub fn group_path(&self, group: GroupId) -> Result<String, SiteError> {
        Ok(format!("/{}", self.path_segments(group)?.join("/")))
    }

    /// Breadcrumb chain ending at this group's index page.
    ///
    /// Empty when the group has no index. The root's entry is titled
    /// "Home". Resolving a link may placeholder-publish an index page that
    /// has not been published yet. A crumb whose placeholder publish fails
    /// recoverably is logged and left out; only complete chains are memoized.
    pub fn breadcrumbs(&mut self, group: GroupId, ledger: &Ledger) -> Result<Vec<Link>, SiteError> {
        Ok(self.resolve_breadcrumbs(group, ledger)?.0)
    }

    /// Breadcrumbs plus whether every crumb resolved.
    fn resolve_breadcrumbs(
        &mut self,
        group: GroupId,
        ledger: &Ledger,
    ) -> Result<(Vec<Link>, bool), SiteError> {
        if let Some(cached) = &self.groups[group.0].breadcrumbs {
            return Ok((cached.clone(), true));
        }
        let Some(index) = self.groups[group.0].index else {
            return Ok((Vec::new(), true));
        };

        let parent = self.groups[group.0].parent;
        let (mut crumbs, mut complete) = match parent {
            Some(parent) => self.resolve_breadcrumbs(parent, ledger)?,
            None => (Vec::new(), true),
        };
        match self.recover(index, self.link(index, ledger))? {
            Some(mut link) => {
                if parent.is_none() {
                    link.title = "Home".to_string();
                }
                crumbs.push(link);
            }
            None => complete = false,
        }

        if complete {
            self.groups[group.0].breadcrumbs = Some(crumbs.clone());
        }
        Ok((crumbs, complete))
    }

    /// Publish a group and everything below it.
    pub fn publish(
        &mut self,
        group: GroupId,
        ledger: &Ledger,
        pool: &ThreadPool,
    ) -> Result<(), SiteError> {
        let mut page_groups = Vec::new();
        for child in self.groups[group.0].groups.clone() {
            self.publish(child, ledger, pool)?;
            if let Some(index) = self.groups[child.0].index
                && let Some(link) = self.recover(index, self.link(index, ledger))?
            {
                page_groups.push(link);
            }
        }

        let breadcrumbs = self.breadcrumbs(group, ledger)?;
        let mut context = Map::new();
        context.insert("breadcrumbs".into(), serde_json::to_value(&breadcrumbs)?);

        let page_ids = self.groups[group.0].pages.clone();
        let results: Vec<(PageId, Result<Map<String, Value>, SiteError>)> = {
            let tree = &*self;
            let context = &context;
            pool.install(|| {
                page_ids
                    .par_iter()
                    .map(|&id| (id, tree.publish_page(id, ledger, context)))
                    .collect()
            })
        };

        let mut pages = Vec::new();
        let mut fatal = None;
        for (id, result) in results {
            match result {
                Ok(data) => {
                    self.pages[id.0].mark_published(data);
                    match self.recover(id, self.link(id, ledger)) {
                        Ok(Some(link)) => pages.push(link),
                        Ok(None) => {}
                        Err(err) => {
                            fatal.get_or_insert(err);
                        }
                    }
                }
                Err(err) => {
                    if let Err(err) = self.recover(id, Err::<(), _>(err)) {
                        fatal.get_or_insert(err);
                    }
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        if let Some(index) = self.groups[group.0].index {
            context.insert("pages".into(), serde_json::to_value(&pages)?);
            context.insert("page_groups".into(), serde_json::to_value(&page_groups)?);
            if let Some(data) = self.recover(index, self.publish_page(index, ledger, &context))? {
                self.pages[index.0].mark_published(data);
            }
        }

        Ok(())
    }

    /// Log and swallow a recoverable page failure; pass fatal ones through.
    fn recover<T>(&self, page: PageId, result: Result<T, SiteError>) -> Result<Option<T>, SiteError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_recoverable() => {
                let path = self.page_path(page).unwrap_or_default();
                tracing::error!(path = %path, error = %err, "Page publish failed, skipping");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl From<serde_json::Error> for SiteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ledger(LedgerError::Serialize(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::test_helpers::*;
    use serde_json::json;
    use std::sync::Arc;

    fn pool(threads: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    // =========================================================================
    // Construction and paths
    // =========================================================================

    #[test]
    fn root_has_empty_path() {
        let tree = SiteTree::new();
        assert!(tree.path_segments(tree.root()).unwrap().is_empty());
        assert_eq!(tree.group_path(tree.root()).unwrap(), "/");
    }

    #[test]
    fn group_named_after_index_title() {
        let mut tree = SiteTree::new();
        let cars = tree.create_group(tree.root(), None);
        tree.create_index(cars, "index", json!({"title": "Used Cars"}))
            .unwrap();
        assert_eq!(tree.group(cars).segment(), "used-cars");
        assert_eq!(tree.group_path(cars).unwrap(), "/used-cars");
    }

    #[test]
    fn explicit_group_segment_kept() {
        let mut tree = SiteTree::new();
        let cars = tree.create_group(tree.root(), Some("autos"));
        tree.create_index(cars, "index", json!({"title": "Cars"}))
            .unwrap();
        assert_eq!(tree.group_path(cars).unwrap(), "/autos");
    }

    #[test]
    fn nested_group_path() {
        let mut tree = SiteTree::new();
        let cars = tree.create_group(tree.root(), Some("cars"));
        let new = tree.create_group(cars, Some("new-cars"));
        assert_eq!(
            tree.path_segments(new).unwrap(),
            vec!["cars".to_string(), "new-cars".to_string()]
        );
    }

    #[test]
    fn unnamed_group_fails() {
        let mut tree = SiteTree::new();
        let anon = tree.create_group(tree.root(), None);
        let child = tree.create_group(anon, Some("child"));
        assert!(matches!(
            tree.path_segments(child),
            Err(SiteError::UnnamedGroup(id)) if id == anon
        ));
    }

    #[test]
    fn children_recorded_in_declaration_order() {
        let mut tree = SiteTree::new();
        let root = tree.root();
        let a = tree.create_group(root, Some("a"));
        let b = tree.create_group(root, Some("b"));
        let p1 = tree
            .create_page(root, "page", json!({"title": "One"}), vec![])
            .unwrap();
        let p2 = tree
            .create_page(root, "page", json!({"title": "Two"}), vec![])
            .unwrap();
        assert_eq!(tree.group(root).groups(), &[a, b]);
        assert_eq!(tree.group(root).pages(), &[p1, p2]);
        assert_eq!(tree.group(a).segment(), "a");
    }

    #[test]
    fn page_without_title_rejected() {
        let mut tree = SiteTree::new();
        let root = tree.root();
        let result = tree.create_page(root, "page", json!({"content": "x"}), vec![]);
        assert!(matches!(result, Err(SiteError::MissingField("title"))));
        assert!(tree.group(root).pages().is_empty());
    }

    #[test]
    fn construction_errors_are_not_recoverable() {
        assert!(!SiteError::MissingField("title").is_recoverable());
        assert!(!SiteError::UnnamedGroup(GroupId(3)).is_recoverable());
        assert!(!SiteError::Ledger(LedgerError::PathConflict("/a".into())).is_recoverable());
    }

    // =========================================================================
    // Breadcrumbs
    // =========================================================================

    #[test]
    fn breadcrumbs_empty_without_index() {
        let tmp = setup_workspace();
        let ledger = Ledger::open(test_config(tmp.path()), MockPublisher::new()).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        assert!(tree.breadcrumbs(root, &ledger).unwrap().is_empty());
    }

    #[test]
    fn breadcrumbs_start_at_home() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_index(root, "index", json!({"title": "Vehicle Listings"}))
            .unwrap();
        let cars = tree.create_group(root, None);
        tree.create_index(cars, "index", json!({"title": "Cars"}))
            .unwrap();

        let crumbs = tree.breadcrumbs(cars, &ledger).unwrap();
        let titles: Vec<&str> = crumbs.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Home", "Cars"]);
        assert_eq!(crumbs[0].href, ledger.record("/").unwrap().href());
        assert_eq!(crumbs[1].href, ledger.record("/cars").unwrap().href());
    }

    #[test]
    fn failed_crumb_left_out_and_not_memoized() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        publisher.fail_on("index.md");
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_index(root, "index", json!({"title": "Home"}))
            .unwrap();
        let cars = tree.create_group(root, None);
        tree.create_index(cars, "index", json!({"title": "Cars"}))
            .unwrap();

        let crumbs = tree.breadcrumbs(cars, &ledger).unwrap();
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].title, "Cars");

        // the root crumb is retried on the next lookup
        let calls = publisher.calls().len();
        tree.breadcrumbs(cars, &ledger).unwrap();
        assert_eq!(publisher.calls().len(), calls + 1);
    }

    #[test]
    fn breadcrumbs_memoized() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_index(root, "index", json!({"title": "Home"}))
            .unwrap();

        let first = tree.breadcrumbs(root, &ledger).unwrap();
        let calls = publisher.calls().len();
        let second = tree.breadcrumbs(root, &ledger).unwrap();
        assert_eq!(first, second);
        assert_eq!(publisher.calls().len(), calls);
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    #[test]
    fn pages_publish_before_index() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_index(root, "index", json!({"title": "Home"}))
            .unwrap();
        tree.create_page(root, "page", json!({"title": "A"}), vec![])
            .unwrap();
        tree.create_page(root, "page", json!({"title": "B"}), vec![])
            .unwrap();

        tree.publish(root, &ledger, &pool(4)).unwrap();

        let order: Vec<String> = publisher
            .recorded()
            .iter()
            .map(|c| c.request.options.index_file_name.clone())
            .collect();
        // the index is placeholder-published first for its own breadcrumb,
        // and its real content goes out last
        assert_eq!(order.first().map(String::as_str), Some("index.md"));
        assert_eq!(order.last().map(String::as_str), Some("index.md"));
        let last_real = publisher.recorded().last().unwrap().body.clone();
        assert!(last_real.contains("[A]"));
        assert!(last_real.contains("[B]"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn index_lists_pages_in_declaration_order() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        let index = tree
            .create_index(root, "index", json!({"title": "Home"}))
            .unwrap();
        for title in ["Zeta", "Alpha", "Mid"] {
            tree.create_page(root, "page", json!({"title": title}), vec![])
                .unwrap();
        }

        tree.publish(root, &ledger, &pool(3)).unwrap();

        let pages = tree.page(index).data()["pages"].as_array().unwrap().clone();
        let titles: Vec<&str> = pages.iter().map(|p| p["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn failing_page_skipped_siblings_published() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        publisher.fail_on("index-bad.md");
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        let index = tree
            .create_index(root, "index", json!({"title": "Home"}))
            .unwrap();
        let good = tree
            .create_page(root, "page", json!({"title": "Good"}), vec![])
            .unwrap();
        let bad = tree
            .create_page(root, "page", json!({"title": "Bad"}), vec![])
            .unwrap();

        tree.publish(root, &ledger, &pool(2)).unwrap();

        assert!(tree.page(good).is_published());
        assert!(!tree.page(bad).is_published());
        assert!(ledger.record("/bad").is_none());
        assert!(ledger.record("/good").is_some());
        let pages = tree.page(index).data()["pages"].as_array().unwrap().clone();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0]["title"], "Good");
    }

    #[test]
    fn failing_index_placeholder_does_not_stop_pages() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        publisher.fail_on("index.md");
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_index(root, "index", json!({"title": "Home"}))
            .unwrap();
        let page = tree
            .create_page(root, "page", json!({"title": "A"}), vec![])
            .unwrap();

        tree.publish(root, &ledger, &pool(2)).unwrap();

        assert!(tree.page(page).is_published());
        assert!(ledger.record("/a").is_some());
        assert!(ledger.record("/").is_none());
    }

    #[test]
    fn failed_threshold_save_aborts_traversal() {
        let tmp = setup_workspace();
        let config = LedgerConfig {
            flush_threshold: 1,
            ..test_config(tmp.path())
        };
        let site_path = config.site_path.clone();
        let ledger = Ledger::open(config, MockPublisher::new()).unwrap();
        // a directory where the ledger file should go makes every write fail
        std::fs::create_dir_all(&site_path).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_page(root, "page", json!({"title": "A"}), vec![])
            .unwrap();

        let err = tree.publish(root, &ledger, &pool(2)).unwrap_err();

        assert!(!err.is_recoverable());
        assert!(matches!(
            err,
            SiteError::Ledger(LedgerError::Persistence { ref path, .. }) if *path == site_path
        ));
    }

    #[test]
    fn duplicate_paths_abort_with_conflict() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::new());
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_page(root, "page", json!({"title": "Same"}), vec![])
            .unwrap();
        tree.create_page(root, "page", json!({"title": "Same"}), vec![])
            .unwrap();

        let err = tree.publish(root, &ledger, &pool(1)).unwrap_err();

        assert!(matches!(
            err,
            SiteError::Ledger(LedgerError::PathConflict(ref p)) if p == "/same"
        ));
        // the second page never reached the service
        assert_eq!(publisher.calls().len(), 1);
    }

    #[test]
    fn unknown_template_aborts() {
        let tmp = setup_workspace();
        let ledger = Ledger::open(test_config(tmp.path()), MockPublisher::new()).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        tree.create_page(root, "nope", json!({"title": "X"}), vec![])
            .unwrap();

        let err = tree.publish(root, &ledger, &pool(1)).unwrap_err();
        assert!(matches!(
            err,
            SiteError::Ledger(LedgerError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn concurrency_bounded_by_pool() {
        let tmp = setup_workspace();
        let publisher = Arc::new(MockPublisher::with_delay(std::time::Duration::from_millis(5)));
        let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
        let mut tree = SiteTree::new();
        let root = tree.root();
        for n in 0..50 {
            tree.create_page(root, "page", json!({"title": format!("Page {n}")}), vec![])
                .unwrap();
        }

        tree.publish(root, &ledger, &pool(20)).unwrap();

        assert_eq!(publisher.calls().len(), 50);
        assert!(publisher.max_in_flight() <= 20);
        assert!(publisher.max_in_flight() >= 1);
    }
}
