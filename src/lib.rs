//! Image indexer: discovers the images on a local filesystem, deduplicates
//! them by content, tags them, and serves square thumbnails from a bounded
//! worker pool.

pub mod color;
pub mod error;
pub mod logging;
pub mod scan;
pub mod session;
pub mod state;
pub mod thumb;

pub use color::TagColor;
pub use error::{Error, Result};
pub use scan::{DiscoveryEngine, DiscoveryReport, ExclusionSet};
pub use session::Session;
pub use state::{Library, Options, PageCursor, QueryLayer};
pub use thumb::{ThumbnailCache, ThumbnailPipeline};
