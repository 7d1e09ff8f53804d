use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::filter::{extension_of, is_excluded, is_indexable_image, ExclusionSet};
use super::hasher::content_hash;
use crate::color::DEFAULT_TAG_COLOR;
use crate::error::{Error, Result};
use crate::logging::tilde;
use crate::state::data::{TagId, UpsertStatus};
use crate::state::Library;

/// Result of a discovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// New File rows inserted
    pub indexed: usize,
    /// Image paths that were already in the index
    pub known: usize,
    /// New paths whose content was already indexed elsewhere
    pub duplicates: usize,
    /// Images that could not be hashed or stored
    pub failed: usize,
    /// Excluded or hidden directories skipped with their subtree
    pub skipped_dirs: usize,
    /// Previously indexed files removed because their directory is now excluded
    pub purged: usize,
    /// The walk stopped early on a cancellation request
    pub cancelled: bool,
    /// The walk stopped early because the deadline passed
    pub timed_out: bool,
}

impl DiscoveryReport {
    pub fn completed(&self) -> bool {
        !self.cancelled && !self.timed_out
    }
}

/// Walks a directory tree and indexes the images it finds.
///
/// The walk is sequential. Cancellation and the optional deadline are polled
/// between directory entries; rows written before the stop are kept.
#[derive(Debug)]
pub struct DiscoveryEngine<'a> {
    library: &'a Library,
    exclusions: &'a ExclusionSet,
    purge_excluded: bool,
    utc_offset: FixedOffset,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    pinned_now: Option<DateTime<Utc>>,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(library: &'a Library, exclusions: &'a ExclusionSet) -> Self {
        Self {
            library,
            exclusions,
            purge_excluded: true,
            utc_offset: Utc.fix(),
            cancel: CancellationToken::new(),
            deadline: None,
            pinned_now: None,
        }
    }

    /// Whether rows already indexed under a newly excluded directory are
    /// removed when the walk reaches it (on by default)
    pub fn purge_excluded(mut self, purge: bool) -> Self {
        self.purge_excluded = purge;
        self
    }

    /// Zone used to name the date-bucket tag
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stop walking once this much time has passed since the walk started
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Use a fixed timestamp for every file instead of the wall clock
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.pinned_now = Some(now);
        self
    }

    /// Index every allowlisted image below `root`.
    ///
    /// Errors on individual files are logged and counted; only setup failures
    /// (unreadable root, broken store) are returned.
    pub fn discover(&self, root: &Path) -> Result<DiscoveryReport> {
        let started = Instant::now();
        let metadata = std::fs::metadata(root).map_err(|e| Error::io(root, e))?;
        if !metadata.is_dir() {
            return Err(Error::io(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }
        self.library.prepare_discovery()?;

        let mut report = DiscoveryReport::default();
        if let Some(pattern) = self.exclusions.matching_pattern(&root.to_string_lossy()) {
            // Every directory below would match too; indexing only the loose
            // files at the top would leave a half-purged tree.
            warn!(
                "Discovery root {} matches excluded pattern {:?}, nothing to do",
                tilde(root),
                pattern
            );
            report.skipped_dirs = 1;
            return Ok(report);
        }

        info!("Discovery started in {}", tilde(root));
        let mut tags = TagIds::default();
        let mut walker = WalkDir::new(root).follow_links(false).into_iter();

        while let Some(entry) = walker.next() {
            if self.cancel.is_cancelled() {
                warn!("Discovery cancelled after {} new files", report.indexed);
                report.cancelled = true;
                break;
            }
            if self.deadline.is_some_and(|limit| started.elapsed() >= limit) {
                warn!("Discovery deadline reached after {} new files", report.indexed);
                report.timed_out = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(Error::io(root, err.into()));
                }
                Err(err) => {
                    warn!("Error walking {}: {}", err.path().map(tilde).unwrap_or_default(), err);
                    report.failed += 1;
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                if entry.depth() > 0 && is_excluded(path, self.exclusions) {
                    walker.skip_current_dir();
                    report.skipped_dirs += 1;
                    debug!("Skipping hidden/excluded directory {}", tilde(path));
                    if self.purge_excluded {
                        match self.library.remove_by_path_prefix(path) {
                            Ok(removed) => report.purged += removed,
                            Err(e) => warn!("Failed to purge {}: {}", tilde(path), e),
                        }
                    }
                }
                continue;
            }

            if entry.file_type().is_file() && is_indexable_image(path) {
                self.index_file(path, &mut tags, &mut report);
            }
        }

        info!(
            "Discovery finished in {:.2}s: {} new, {} known, {} duplicates, {} failed",
            started.elapsed().as_secs_f64(),
            report.indexed,
            report.known,
            report.duplicates,
            report.failed
        );
        Ok(report)
    }

    fn index_file(&self, path: &Path, tags: &mut TagIds, report: &mut DiscoveryReport) {
        let hash = match content_hash(path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Skipping {}: {}", tilde(path), e);
                report.failed += 1;
                return;
            }
        };

        let now = self.pinned_now.unwrap_or_else(Utc::now);
        let outcome = match self.library.upsert_file(path, &hash, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to index {}: {}", tilde(path), e);
                report.failed += 1;
                return;
            }
        };

        match outcome.status {
            UpsertStatus::KnownPath => report.known += 1,
            UpsertStatus::DuplicateContent => {
                debug!("{} duplicates file #{}", tilde(path), outcome.file_id);
                report.duplicates += 1;
                return;
            }
            UpsertStatus::Created => {
                report.indexed += 1;
                if report.indexed % 100 == 0 {
                    debug!("Indexed {} files...", report.indexed);
                }
            }
        }

        // Attaching is idempotent, so a known path picks up tags an earlier
        // run stored the row for but never attached.
        let mut names = Vec::with_capacity(2);
        if let Some(ext) = extension_of(path) {
            names.push(ext.to_ascii_uppercase());
        }
        names.push(date_tag_name(outcome.date_added, self.utc_offset));

        for name in names {
            let attached = tags
                .resolve(self.library, &name)
                .and_then(|tag_id| self.library.attach_tag(outcome.file_id, tag_id));
            match attached {
                Ok(true) if outcome.status == UpsertStatus::KnownPath => {
                    debug!("Restored missing {:?} tag on {}", name, tilde(path));
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to tag {} with {:?}: {}", tilde(path), name, e),
            }
        }
    }
}

/// Name of the date-bucket tag for files indexed at `now`, e.g. `2024-05-01`
pub fn date_tag_name(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

/// Tag ids resolved during one walk, so each automatic tag is looked up once
#[derive(Default)]
struct TagIds(HashMap<String, TagId>);

impl TagIds {
    fn resolve(&mut self, library: &Library, name: &str) -> Result<TagId> {
        if let Some(id) = self.0.get(name) {
            return Ok(*id);
        }
        let id = library.ensure_tag(name, DEFAULT_TAG_COLOR)?;
        self.0.insert(name.to_string(), id);
        Ok(id)
    }
}

/// Run discovery on the blocking pool so the caller's task is not held up
pub async fn discover_in_background(
    library: Arc<Library>,
    root: PathBuf,
    exclusions: ExclusionSet,
    utc_offset: FixedOffset,
    cancel: CancellationToken,
) -> Result<DiscoveryReport> {
    tokio::task::spawn_blocking(move || {
        DiscoveryEngine::new(&library, &exclusions)
            .with_utc_offset(utc_offset)
            .with_cancellation(cancel)
            .discover(&root)
    })
    .await?
}
