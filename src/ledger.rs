//! Persistent publish ledger.
//!
//! The ledger maps every site path to its [`PublicationRecord`] and is the
//! single place where the publish/skip/replace decision is made. It also
//! owns the staging directory, the compiled templates and the storage
//! client, so every page publish funnels through [`Ledger::publish_artifact`].
//!
//! # Decision
//!
//! For each publish request the ledger hashes the artifact set (see
//! [`digest`](crate::digest)) and compares it with the latest known version
//! of the path:
//!
//! | Ledger state            | Digest   | Action                                  |
//! |-------------------------|----------|-----------------------------------------|
//! | no record               | any      | new publish, record `original`          |
//! | record                  | same     | nothing, no service call                |
//! | record                  | differs  | replacement publish, record `current`   |
//!
//! Replacements carry the previous version's open link and replace token,
//! so the service supersedes it. `original` never changes, which keeps
//! every link handed out to templates stable across runs.
//!
//! # Persistence
//!
//! The mapping is written as pretty JSON with sorted keys, so saving
//! unchanged data produces identical bytes. A non-forced save compares the
//! serialized digest with the digest of the file as loaded (or last
//! written) and skips the write when they match; otherwise the existing file
//! is moved to `<file>.bak` first. An earlier form of this check compared
//! against a digest field that was never assigned, so every save rewrote
//! the file; here the baseline is captured at load. Long runs force a save every
//! `flush_threshold` publishes. Rename-then-write is not atomic; a crash in
//! between leaves only the `.bak`, and the worst outcome is republishing
//! pages whose addresses were lost from the ledger.
//!
//! # Concurrency
//!
//! All mutable state sits behind one mutex. The lock is never held across a
//! storage service call.

use crate::config::LedgerConfig;
use crate::digest::{hash_artifact_set, hash_bytes};
use crate::publisher::{PublishError, PublishOptions, PublishRequest, Publisher};
use crate::types::{PublicationRecord, PublishOutcome, PublishStats, Version};
use minijinja::{Environment, Template};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions stripped from template file names to form the template name.
const TEMPLATE_EXTENSIONS: &[&str] = &["jinja", "j2", "hbs", "tmpl"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cannot read ledger file {}: {source}", .path.display())]
    ReadLedger { path: PathBuf, source: io::Error },
    #[error("Malformed ledger file {}: {source}", .path.display())]
    MalformedLedger {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Cannot create staging directory {}: {source}", .path.display())]
    Staging { path: PathBuf, source: io::Error },
    #[error("Cannot read template directory {}: {source}", .path.display())]
    TemplateDir {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("Cannot read template {}: {source}", .path.display())]
    TemplateRead { path: PathBuf, source: io::Error },
    #[error("Template '{name}' failed to compile: {source}")]
    TemplateCompile {
        name: String,
        source: minijinja::Error,
    },
    #[error("Invalid template: {0}")]
    TemplateNotFound(String),
    #[error("Path conflict: {0}")]
    PathConflict(String),
    #[error("Cannot hash artifacts for {path}: {source}")]
    Digest { path: String, source: io::Error },
    #[error("Publish failed for {path}: {source}")]
    Publish { path: String, source: PublishError },
    #[error("Cannot serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Cannot write {}: {source}", .path.display())]
    Persistence { path: PathBuf, source: io::Error },
}

impl LedgerError {
    /// Failures scoped to one artifact that a later run may succeed on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Publish { .. } | Self::Digest { .. })
    }
}

/// Mutable state guarded by the ledger's mutex.
#[derive(Debug, Default)]
struct LedgerState {
    site: BTreeMap<String, PublicationRecord>,
    /// Paths registered by real (non-placeholder) publishes in this run.
    paths: HashSet<String>,
    /// Service publishes since the last threshold flush.
    published_count: usize,
    /// Digest of the ledger file as loaded or last written.
    site_digest: Option<String>,
    stats: PublishStats,
}

/// Path → publication mapping plus everything needed to publish into it.
pub struct Ledger {
    config: LedgerConfig,
    staging_dir: PathBuf,
    templates: Environment<'static>,
    publisher: Box<dyn Publisher + Send>,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Load the ledger file, prepare the staging directory, compile templates.
    pub fn open(
        config: LedgerConfig,
        publisher: impl Publisher + Send + 'static,
    ) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();

        if config.site_path.exists() {
            let data =
                fs::read_to_string(&config.site_path).map_err(|source| LedgerError::ReadLedger {
                    path: config.site_path.clone(),
                    source,
                })?;
            state.site_digest = Some(hash_bytes(data.as_bytes()));
            state.site =
                serde_json::from_str(&data).map_err(|source| LedgerError::MalformedLedger {
                    path: config.site_path.clone(),
                    source,
                })?;
            tracing::debug!(
                path = %config.site_path.display(),
                records = state.site.len(),
                "Loaded ledger"
            );
        }

        let staging_dir = config.staging_dir();
        fs::create_dir_all(&staging_dir).map_err(|source| LedgerError::Staging {
            path: staging_dir.clone(),
            source,
        })?;

        let templates = load_templates(&config.template_path)?;

        Ok(Self {
            config,
            staging_dir,
            templates,
            publisher: Box::new(publisher),
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Directory rendered artifacts are written to before publishing.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Look up a compiled template by name.
    pub fn template(&self, name: &str) -> Result<Template<'_, '_>, LedgerError> {
        self.templates
            .get_template(name)
            .map_err(|_| LedgerError::TemplateNotFound(name.to_string()))
    }

    /// Current record for a site path, if it was ever published.
    pub fn record(&self, path: &str) -> Option<PublicationRecord> {
        self.state().site.get(path).cloned()
    }

    /// Snapshot of every record, keyed by path.
    pub fn records(&self) -> BTreeMap<String, PublicationRecord> {
        self.state().site.clone()
    }

    /// Outcome counts since the ledger was opened.
    pub fn stats(&self) -> PublishStats {
        self.state().stats
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.state().paths.contains(path)
    }

    /// Claim a site path for this run. Each path may be claimed once.
    pub fn register_path(&self, path: &str) -> Result<(), LedgerError> {
        if self.state().paths.insert(path.to_string()) {
            Ok(())
        } else {
            Err(LedgerError::PathConflict(path.to_string()))
        }
    }

    /// Publish an artifact set under `path` unless its digest is unchanged.
    ///
    /// Returns the path's record after the decision. Storage failures leave
    /// the ledger untouched for the path and surface as
    /// [`LedgerError::Publish`].
    pub fn publish_artifact(
        &self,
        path: &str,
        content_type: &str,
        files: &[PathBuf],
        index_file_name: &str,
    ) -> Result<PublicationRecord, LedgerError> {
        let digest = hash_artifact_set(files).map_err(|source| LedgerError::Digest {
            path: path.to_string(),
            source,
        })?;

        let mut options = self.base_options(index_file_name);
        let existing = self.record(path);
        let outcome = match &existing {
            Some(record) if record.latest().digest == digest => {
                tracing::info!(path = %path, "unchanged");
                self.state().stats.record(PublishOutcome::Unchanged);
                return Ok(record.clone());
            }
            Some(record) => {
                let previous = &record.latest().publication;
                options.replace_link = Some(previous.links.open.clone());
                options.replace_token = Some(previous.replace_token.clone());
                PublishOutcome::Replacement
            }
            None => PublishOutcome::Original,
        };
        tracing::info!(path = %path, files = files.len(), "{}", outcome);

        let request = PublishRequest {
            content_type: content_type.to_string(),
            files: files.to_vec(),
            options,
        };
        let publication =
            self.publisher
                .publish(&request)
                .map_err(|source| LedgerError::Publish {
                    path: path.to_string(),
                    source,
                })?;
        let version = Version {
            publication,
            digest,
        };

        let mut state = self.state();
        let record = match state.site.get_mut(path) {
            Some(record) => {
                record.current = Some(version);
                record.clone()
            }
            None => {
                let record = PublicationRecord {
                    original: version,
                    current: None,
                };
                state.site.insert(path.to_string(), record.clone());
                record
            }
        };
        state.stats.record(outcome);

        state.published_count += 1;
        if state.published_count >= self.config.flush_threshold {
            self.write_ledger(&mut state, true)?;
            state.published_count = 0;
        }

        Ok(record)
    }

    /// Save the ledger file; with `clean`, delete the staging directory afterwards.
    pub fn flush(&self, force: bool, clean: bool) -> Result<(), LedgerError> {
        {
            let mut state = self.state();
            self.write_ledger(&mut state, force)?;
        }
        if clean && self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)
                .map_err(persistence(self.staging_dir.clone()))?;
            tracing::debug!(path = %self.staging_dir.display(), "Removed staging directory");
        }
        Ok(())
    }

    /// Serialize and write the mapping. Returns whether a write happened.
    fn write_ledger(&self, state: &mut LedgerState, force: bool) -> Result<bool, LedgerError> {
        let site_path = &self.config.site_path;
        let json = serde_json::to_string_pretty(&state.site)?;
        let digest = hash_bytes(json.as_bytes());

        if !force && site_path.exists() {
            if state.site_digest.as_deref() == Some(digest.as_str()) {
                tracing::debug!(path = %site_path.display(), "Ledger unchanged, skipping save");
                return Ok(false);
            }
            let backup = backup_path(site_path);
            fs::rename(site_path, &backup).map_err(persistence(backup.clone()))?;
        } else if let Some(parent) = site_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(persistence(parent.to_path_buf()))?;
        }

        fs::write(site_path, &json).map_err(persistence(site_path.clone()))?;
        state.site_digest = Some(digest);
        tracing::debug!(
            path = %site_path.display(),
            force,
            records = state.site.len(),
            "Saved ledger"
        );
        Ok(true)
    }

    fn base_options(&self, index_file_name: &str) -> PublishOptions {
        PublishOptions {
            agree_charges: true,
            assert_ownership: true,
            index_file_name: index_file_name.to_string(),
            identity: self.config.identity.clone(),
            secret: self.config.secret.clone(),
            quiet: true,
            replace_link: None,
            replace_token: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn persistence(path: PathBuf) -> impl FnOnce(io::Error) -> LedgerError {
    move |source| LedgerError::Persistence { path, source }
}

/// `<file>.bak` next to the ledger file.
pub fn backup_path(site_path: &Path) -> PathBuf {
    let mut name = site_path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Template name for a file name: one recognized extension stripped.
fn template_name(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && TEMPLATE_EXTENSIONS.contains(&ext) => stem,
        _ => file_name,
    }
}

/// Compile every regular, non-hidden file directly inside `dir`.
fn load_templates(dir: &Path) -> Result<Environment<'static>, LedgerError> {
    let mut env = Environment::new();

    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(|source| LedgerError::TemplateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if file_name.starts_with('.') {
            continue;
        }
        let name = template_name(&file_name).to_string();
        let source =
            fs::read_to_string(entry.path()).map_err(|source| LedgerError::TemplateRead {
                path: entry.path().to_path_buf(),
                source,
            })?;
        env.add_template_owned(name.clone(), source)
            .map_err(|source| LedgerError::TemplateCompile {
                name: name.clone(),
                source,
            })?;
        tracing::debug!(template = %name, "Compiled template");
    }

    Ok(env)
}
