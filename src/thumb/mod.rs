/// Thumbnail generation
///
/// - Per-extension decoders and output encodings (formats.rs)
/// - Embedded previews of camera RAW files (embedded.rs)
/// - Bounded in-memory cache (cache.rs)
/// - Worker-pool bounded pipeline tying them together (pipeline.rs)

pub mod cache;
pub mod embedded;
pub mod formats;
pub mod pipeline;

pub use cache::{CacheKey, CacheStats, Thumbnail, ThumbnailCache};
pub use formats::{codec_for, Codec, Decoder, Output, JPEG_QUALITY};
pub use pipeline::{square_thumbnail, PipelineStats, ThumbnailPipeline, MAX_THUMBNAIL_SIZE};
