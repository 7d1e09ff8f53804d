//! Per-user application context
//!
//! A `Session` owns everything the presentation layer used to reach through
//! globals: the index, the thumbnail pipeline and its cache, the options,
//! the infinite-scroll cursor and the set of selected files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::color::TagColor;
use crate::error::{Error, Result};
use crate::scan::{discover_in_background, DiscoveryReport};
use crate::state::{FileId, Library, Options, PageCursor, QueryLayer, TagId};
use crate::thumb::{Thumbnail, ThumbnailCache, ThumbnailPipeline};

#[derive(Debug)]
pub struct Session {
    library: Arc<Library>,
    thumbnails: Arc<ThumbnailPipeline>,
    options: Options,
    cursor: PageCursor,
    selection: BTreeSet<FileId>,
}

impl Session {
    /// Open the index at `database_path` and load its options, writing the
    /// defaults on first boot
    pub fn open(database_path: impl Into<PathBuf>) -> Result<Self> {
        let library = Library::open(database_path)?;
        let options = match library.load_options()? {
            Some(options) => options,
            None => {
                info!("First boot, writing default options");
                let mut options = Options {
                    database_path: library.path().to_path_buf(),
                    ..Options::default()
                };
                library.save_options(&mut options)?;
                options
            }
        };
        Ok(Self::new(Arc::new(library), options))
    }

    pub fn new(library: Arc<Library>, options: Options) -> Self {
        let cache = ThumbnailCache::new(options.thumbnail_cache_capacity);
        Self {
            library,
            thumbnails: Arc::new(ThumbnailPipeline::new(cache)),
            options,
            cursor: PageCursor::new(),
            selection: BTreeSet::new(),
        }
    }

    /// Swap the pipeline, e.g. for one with a fixed worker count
    pub fn with_pipeline(mut self, pipeline: ThumbnailPipeline) -> Self {
        self.thumbnails = Arc::new(pipeline);
        self
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailPipeline> {
        &self.thumbnails
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Persist changed options
    pub fn update_options(&mut self, update: impl FnOnce(&mut Options)) -> Result<()> {
        update(&mut self.options);
        self.library.save_options(&mut self.options)
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Index `root` with the configured exclusions, off the caller's task.
    /// The page cursor restarts afterwards so new files show up first.
    pub async fn discover(
        &mut self,
        root: &Path,
        cancel: CancellationToken,
    ) -> Result<DiscoveryReport> {
        let report = discover_in_background(
            Arc::clone(&self.library),
            root.to_path_buf(),
            self.options.excluded_dirs.clone(),
            self.options.utc_offset(),
            cancel,
        )
        .await?;
        self.cursor.reset();
        Ok(report)
    }

    // ── Thumbnails ───────────────────────────────────────────────

    /// Thumbnail at the configured size; a placeholder for files that cannot
    /// be decoded
    pub async fn thumbnail(&self, path: &Path, cancel: &CancellationToken) -> Result<Thumbnail> {
        self.thumbnails
            .get_thumbnail_or_placeholder(path, self.options.thumbnail_size, cancel)
            .await
    }

    // ── Queries ──────────────────────────────────────────────────

    fn query(&self) -> QueryLayer<'_> {
        QueryLayer::from_options(&self.library, &self.options)
    }

    /// Next page of the infinite-scroll view
    pub fn next_page(&mut self) -> Result<Vec<PathBuf>> {
        let query = QueryLayer::from_options(&self.library, &self.options);
        query.next_page(&mut self.cursor)
    }

    /// Jump back to the top of the view
    pub fn reset_pages(&mut self) {
        self.cursor.reset();
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn search(&self, keyword: &str) -> Result<Vec<PathBuf>> {
        self.query().search(keyword)
    }

    // ── Tags ─────────────────────────────────────────────────────

    /// Tag id for `name`, creating it with `color_hex` (`#RRGGBB`) if absent
    pub fn ensure_tag(&self, name: &str, color_hex: &str) -> Result<TagId> {
        let color: TagColor = color_hex.parse()?;
        self.library.ensure_tag(name, color)
    }

    pub fn attach_tag(&self, file_id: FileId, tag_id: TagId) -> Result<bool> {
        self.library.attach_tag(file_id, tag_id)
    }

    pub fn detach_tag(&self, file_id: FileId, tag_id: TagId) -> Result<bool> {
        self.library.detach_tag(file_id, tag_id)
    }

    // ── Selection ────────────────────────────────────────────────

    /// Add the indexed file at `path` to the selection
    pub fn select(&mut self, path: &Path) -> Result<FileId> {
        let file_id = self.library.file_id_by_path(path)?.ok_or_else(|| {
            Error::InvalidArgument(format!("{} is not indexed", path.display()))
        })?;
        self.selection.insert(file_id);
        Ok(file_id)
    }

    pub fn deselect(&mut self, file_id: FileId) -> bool {
        self.selection.remove(&file_id)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> impl Iterator<Item = FileId> + '_ {
        self.selection.iter().copied()
    }

    /// Attach `tag_id` to every selected file. Returns how many gained it.
    pub fn tag_selected(&self, tag_id: TagId) -> Result<usize> {
        let mut attached = 0;
        for &file_id in &self.selection {
            if self.library.attach_tag(file_id, tag_id)? {
                attached += 1;
            }
        }
        Ok(attached)
    }

    /// Detach `tag_id` from every selected file. Returns how many lost it.
    pub fn untag_selected(&self, tag_id: TagId) -> Result<usize> {
        let mut detached = 0;
        for &file_id in &self.selection {
            if self.library.detach_tag(file_id, tag_id)? {
                detached += 1;
            }
        }
        Ok(detached)
    }
}
