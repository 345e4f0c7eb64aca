//! Renderable pages.
//!
//! A [`Page`] is a template name plus a JSON data object, optional auxiliary
//! files, and the group it belongs to. Content pages get their path segment
//! from `data.path` or the param-cased `data.title`; index pages have no
//! segment and take their group's path.
//!
//! Publishing a page claims its path in the ledger, renders its template
//! with its data merged with the parent-supplied context, writes the result
//! to the staging directory and hands the artifact set to
//! [`Ledger::publish_artifact`]. The publish step only reads the tree, so a
//! group's pages can be published from several threads; the caller applies
//! the returned data afterwards.

use crate::ledger::Ledger;
use crate::naming::{param_case, staging_file_name};
use crate::tree::{GroupId, PageId, SiteError, SiteTree};
use crate::types::{Link, PublicationRecord};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

/// Body written for a placeholder publish.
const PLACEHOLDER: &str = "# placeholder";

#[derive(Debug, Clone)]
pub struct Page {
    template: String,
    title: String,
    segment: Option<String>,
    data: Map<String, Value>,
    files: Vec<PathBuf>,
    group: GroupId,
    published: bool,
}

impl Page {
    pub(crate) fn new(
        group: GroupId,
        template: &str,
        data: Value,
        files: Vec<PathBuf>,
    ) -> Result<Self, SiteError> {
        let mut page = Self::build(group, template, data, files)?;
        let segment = match page.data.get("path") {
            // explicit segments must already be slugs, so two pages in one
            // group never share a staging file
            Some(Value::String(path)) if !path.is_empty() && param_case(path) == *path => {
                path.clone()
            }
            Some(other) => return Err(SiteError::InvalidSegment(other.to_string())),
            None => param_case(&page.title),
        };
        if segment.is_empty() {
            return Err(SiteError::EmptySegment(page.title));
        }
        page.segment = Some(segment);
        Ok(page)
    }

    pub(crate) fn new_index(group: GroupId, template: &str, data: Value) -> Result<Self, SiteError> {
        Self::build(group, template, data, Vec::new())
    }

    fn build(
        group: GroupId,
        template: &str,
        data: Value,
        files: Vec<PathBuf>,
    ) -> Result<Self, SiteError> {
        let Value::Object(data) = data else {
            return Err(SiteError::MissingField("title"));
        };
        let title = data
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(SiteError::MissingField("title"))?;
        Ok(Self {
            template: template.to_string(),
            title,
            segment: None,
            data,
            files,
            group,
            published: false,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Own path segment; `None` for index pages.
    pub fn segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    /// Page data. After publishing it includes the merged context.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Attach an auxiliary file (image, attachment) to the artifact set.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    pub(crate) fn mark_published(&mut self, data: Map<String, Value>) {
        self.data = data;
        self.published = true;
    }
}

impl SiteTree {
    /// Site path of a page: its group's path, plus its segment unless it is an index.
    pub fn page_path(&self, id: PageId) -> Result<String, SiteError> {
        let page = self.page(id);
        let mut segments = self.path_segments(page.group())?;
        if let Some(segment) = page.segment() {
            segments.push(segment.to_string());
        }
        Ok(format!("/{}", segments.join("/")))
    }

    /// Stable link to a page.
    ///
    /// A page the ledger has never seen is published once with placeholder
    /// content so it has an address. The placeholder does not claim the
    /// path, so the page's real publish later supersedes it.
    pub fn link(&self, id: PageId, ledger: &Ledger) -> Result<Link, SiteError> {
        let path = self.page_path(id)?;
        let record = match ledger.record(&path) {
            Some(record) => record,
            None => {
                tracing::debug!(path = %path, "Publishing placeholder");
                publish_placeholder(&path, ledger)?
            }
        };
        Ok(Link {
            href: record.href().to_string(),
            title: self.page(id).title().to_string(),
        })
    }

    /// Render and publish one page with `context` merged over its data.
    ///
    /// Returns the merged data for the caller to store on the page.
    pub(crate) fn publish_page(
        &self,
        id: PageId,
        ledger: &Ledger,
        context: &Map<String, Value>,
    ) -> Result<Map<String, Value>, SiteError> {
        let page = self.page(id);
        let path = self.page_path(id)?;
        ledger.register_path(&path)?;

        let mut data = page.data().clone();
        for (key, value) in context {
            data.insert(key.clone(), value.clone());
        }

        let rendered = ledger
            .template(page.template())?
            .render(&data)
            .map_err(|source| SiteError::Render {
                path: path.clone(),
                source,
            })?;

        let file_name = staging_file_name(&path);
        let staged = stage(ledger, &file_name, &rendered)?;

        let mut files: Vec<PathBuf> = page
            .files()
            .iter()
            .cloned()
            .chain(std::iter::once(staged))
            .filter(|file| !file.as_os_str().is_empty())
            .collect();
        files.sort();

        ledger.publish_artifact(&path, &ledger.config().content_type, &files, &file_name)?;
        Ok(data)
    }
}

fn publish_placeholder(path: &str, ledger: &Ledger) -> Result<PublicationRecord, SiteError> {
    let file_name = staging_file_name(path);
    let staged = stage(ledger, &file_name, PLACEHOLDER)?;
    Ok(ledger.publish_artifact(path, &ledger.config().content_type, &[staged], &file_name)?)
}

fn stage(ledger: &Ledger, file_name: &str, body: &str) -> Result<PathBuf, SiteError> {
    let staged = ledger.staging_dir().join(file_name);
    fs::write(&staged, body).map_err(|source| SiteError::Staging {
        path: staged.clone(),
        source,
    })?;
    Ok(staged)
}
