//! Shared test utilities for the site-ledger test suite.
//!
//! Provides a recording [`MockPublisher`], a workspace with stock templates,
//! and a config pointing every path into that workspace.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_workspace();
//! let publisher = Arc::new(MockPublisher::new());
//! let ledger = Ledger::open(test_config(tmp.path()), Arc::clone(&publisher)).unwrap();
//!
//! // ... publish ...
//! assert_eq!(publisher.calls().len(), 1);
//! ```

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use crate::config::LedgerConfig;
use crate::publisher::{PublishError, PublishRequest, Publisher};
use crate::types::{Links, Publication};

// =========================================================================
// Mock publisher
// =========================================================================

/// A publish call as the service saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: PublishRequest,
    /// Contents of the index file at call time.
    pub body: String,
}

/// In-memory storage service.
///
/// Hands out `mock://<n>` links and `token-<n>` replace tokens, records every
/// call, and tracks how many calls were in flight at once.
#[derive(Debug, Default)]
pub struct MockPublisher {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `delay` so concurrent calls overlap.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail every call whose index file name equals `index_file_name`.
    pub fn fail_on(&self, index_file_name: &str) {
        self.failing
            .lock()
            .unwrap()
            .push(index_file_name.to_string());
    }

    pub fn calls(&self) -> Vec<PublishRequest> {
        self.recorded().into_iter().map(|c| c.request).collect()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Publisher for MockPublisher {
    fn publish(&self, request: &PublishRequest) -> Result<Publication, PublishError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let index_file_name = &request.options.index_file_name;
        let body = request
            .files
            .iter()
            .find(|f| f.file_name().is_some_and(|n| n == index_file_name.as_str()))
            .and_then(|f| fs::read_to_string(f).ok())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(RecordedCall {
            request: request.clone(),
            body,
        });
        let fail = self.failing.lock().unwrap().contains(index_file_name);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if fail {
            return Err(PublishError::Service(format!(
                "mock failure for {index_file_name}"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Publication {
            links: Links {
                open: format!("mock://{id}"),
            },
            replace_token: format!("token-{id}"),
        })
    }
}

// =========================================================================
// Workspace setup
// =========================================================================

pub const PAGE_TEMPLATE: &str = "# {{ title }}

{{ content }}

{% for crumb in breadcrumbs %}[{{ crumb.title }}]({{ crumb.href }}) {% endfor %}
";

pub const INDEX_TEMPLATE: &str = "# {{ title }}

{% for crumb in breadcrumbs %}[{{ crumb.title }}]({{ crumb.href }}) {% endfor %}
{% for group in page_groups %}
- [{{ group.title }}]({{ group.href }})
{% endfor %}
{% for page in pages %}
- [{{ page.title }}]({{ page.href }})
{% endfor %}
";

/// Temp directory with `templates/page.jinja` and `templates/index.jinja`.
pub fn setup_workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let templates = tmp.path().join("templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(templates.join("page.jinja"), PAGE_TEMPLATE).unwrap();
    fs::write(templates.join("index.jinja"), INDEX_TEMPLATE).unwrap();
    tmp
}

/// Config with ledger file, templates and staging dir all under `dir`.
pub fn test_config(dir: &Path) -> LedgerConfig {
    LedgerConfig {
        site_path: dir.join("site.json"),
        template_path: dir.join("templates"),
        publish_path: Some(dir.join("staging")),
        ..LedgerConfig::default()
    }
}
