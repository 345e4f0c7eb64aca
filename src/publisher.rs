//! Storage service seam.
//!
//! The [`Publisher`] trait is the only way rendered artifacts leave the
//! process. The service content-addresses what it receives, handles
//! encryption and ownership, and answers with a [`Publication`]. Supplying
//! `replace_link` and `replace_token` in the options asks it to supersede
//! that earlier publication instead of creating an unrelated one.
//!
//! No production implementation lives in this crate: callers wire in their
//! own client. Tests use the recording mock in `test_helpers`.

use crate::types::Publication;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Storage service error: {0}")]
    Service(String),
}

/// Options passed with every publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub agree_charges: bool,
    pub assert_ownership: bool,
    /// Name of the file the service should treat as the entry point.
    pub index_file_name: String,
    pub identity: Option<String>,
    pub secret: Option<String>,
    pub quiet: bool,
    /// Open link of the publication being superseded.
    pub replace_link: Option<String>,
    /// Token proving the caller may supersede `replace_link`.
    pub replace_token: Option<String>,
}

impl PublishOptions {
    pub fn is_replacement(&self) -> bool {
        self.replace_link.is_some()
    }
}

/// A single publish call.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub content_type: String,
    /// Artifact files in digest order.
    pub files: Vec<PathBuf>,
    pub options: PublishOptions,
}

/// Client for the content-addressed storage service.
///
/// Implementations must be `Sync`: pages of one group are published from
/// several worker threads at once.
pub trait Publisher: Sync {
    fn publish(&self, request: &PublishRequest) -> Result<Publication, PublishError>;
}

impl<P: Publisher + Send> Publisher for std::sync::Arc<P> {
    fn publish(&self, request: &PublishRequest) -> Result<Publication, PublishError> {
        (**self).publish(request)
    }
}
