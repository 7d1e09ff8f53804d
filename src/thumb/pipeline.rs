use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{CacheKey, CacheStats, Thumbnail, ThumbnailCache};
use super::formats::{codec_for, Output};
use crate::error::{Error, Result};
use crate::logging::tilde;

/// Fill of the placeholder shown for files without a thumbnail
const PLACEHOLDER_GREY: Rgb<u8> = Rgb([0x37, 0x3c, 0x40]);

/// Largest thumbnail edge a caller may ask for, in pixels
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

/// Worker pool occupancy, for tests and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub workers: usize,
    /// Decode/encode jobs running right now
    pub active: usize,
    /// Highest `active` ever observed
    pub peak: usize,
    pub cache: CacheStats,
}

/// Turns image paths into small square thumbnails.
///
/// At most `workers` decode/encode jobs run at once; further requests wait
/// for a slot. Results are cached per (path, size).
pub struct ThumbnailPipeline {
    cache: ThumbnailCache,
    permits: Arc<Semaphore>,
    workers: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ThumbnailPipeline {
    /// One worker per available core
    pub fn new(cache: ThumbnailCache) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_workers(cache, workers)
    }

    pub fn with_workers(cache: ThumbnailCache, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            cache,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    /// Encoded `target_size`×`target_size` thumbnail of `path`.
    ///
    /// `cancel` is honoured while waiting for a worker slot and just before
    /// decoding starts; once a job runs it completes and is cached.
    pub async fn get_thumbnail(
        &self,
        path: &Path,
        target_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail> {
        if target_size == 0 {
            return Err(Error::InvalidArgument("thumbnail size must be positive".into()));
        }
        if target_size > MAX_THUMBNAIL_SIZE {
            return Err(Error::InvalidArgument(format!(
                "thumbnail size {target_size} exceeds the {MAX_THUMBNAIL_SIZE}px limit"
            )));
        }

        let key = CacheKey::new(path, target_size);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        if self.permits.available_permits() == 0 {
            debug!("All {} thumbnail workers busy, waiting", self.workers);
        }
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        // Another request may have rendered it while this one waited
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let source = path.to_path_buf();
        let busy = BusyGuard::enter(&self.active, &self.peak);
        let rendered = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _busy = busy;
            render(&source, target_size)
        })
        .await??;

        let thumbnail: Thumbnail = Arc::from(rendered);
        self.cache.insert(key, Arc::clone(&thumbnail));
        Ok(thumbnail)
    }

    /// Like [`Self::get_thumbnail`], but unreadable, corrupt and unsupported
    /// files yield [`Self::placeholder`] instead of an error
    pub async fn get_thumbnail_or_placeholder(
        &self,
        path: &Path,
        target_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail> {
        match self.get_thumbnail(path, target_size, cancel).await {
            Err(err) if err.wants_placeholder() => {
                warn!("No thumbnail for {}: {}", tilde(path), err);
                Self::placeholder(target_size)
            }
            other => other,
        }
    }

    /// Plain grey PNG square
    pub fn placeholder(size: u32) -> Result<Thumbnail> {
        let size = size.clamp(1, MAX_THUMBNAIL_SIZE);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, PLACEHOLDER_GREY));
        let encoded = Output::Png.encode(&img, Path::new("placeholder"))?;
        Ok(Arc::from(encoded))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            workers: self.workers,
            active: self.active.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            cache: self.cache.stats(),
        }
    }
}

impl fmt::Debug for ThumbnailPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailPipeline")
            .field("workers", &self.workers)
            .field("permits_available", &self.permits.available_permits())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Decode, crop, scale and encode one file. Runs on the blocking pool.
fn render(path: &Path, target_size: u32) -> Result<Vec<u8>> {
    let codec = codec_for(path)?;
    let img = codec.decode(path)?;
    let thumbnail = square_thumbnail(&img, target_size)
        .ok_or_else(|| Error::decode(path, "image has no pixels"))?;
    codec.output.encode(&thumbnail, path)
}

/// Scale the largest centred square of `img` to `size`×`size` (bilinear)
pub fn square_thumbnail(img: &DynamicImage, size: u32) -> Option<DynamicImage> {
    let (width, height) = (img.width(), img.height());
    let side = width.min(height);
    if side == 0 {
        return None;
    }
    let x = (width - side) / 2;
    let y = (height - side) / 2;

    Some(
        img.crop_imm(x, y, side, side)
            .resize_exact(size, size, FilterType::Triangle),
    )
}

/// Counts a running job for [`PipelineStats`]
struct BusyGuard {
    active: Arc<AtomicUsize>,
}

impl BusyGuard {
    fn enter(active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use std::path::PathBuf;

    fn pipeline(workers: usize) -> ThumbnailPipeline {
        ThumbnailPipeline::with_workers(ThumbnailCache::new(128), workers)
    }

    /// 300×100 image: red, green and blue thirds
    fn write_stripes(path: &Path) {
        RgbImage::from_fn(300, 100, |x, _| match x / 100 {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_square_crop_is_centred() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(300, 100, |x, _| {
            if (100..200).contains(&x) {
                Rgb([0, 255, 0])
            } else {
                Rgb([255, 0, 0])
            }
        }));
        let thumb = square_thumbnail(&img, 10).unwrap();
        assert_eq!(thumb.dimensions(), (10, 10));
        assert_eq!(thumb.to_rgb8().get_pixel(5, 5).0, [0, 255, 0]);
        assert!(square_thumbnail(&DynamicImage::new_rgb8(0, 5), 10).is_none());
    }

    #[tokio::test]
    async fn test_png_thumbnail_is_square_and_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripes.png");
        write_stripes(&path);

        let bytes = pipeline(2)
            .get_thumbnail(&path, 64, &CancellationToken::new())
            .await
            .unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        assert_eq!(decoded.dimensions(), (64, 64));
        assert_eq!(decoded.to_rgb8().get_pixel(32, 32).0, [0, 255, 0]);
    }

    #[tokio::test]
    async fn test_jpeg_source_yields_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripes.jpg");
        write_stripes(&path);

        let bytes = pipeline(2)
            .get_thumbnail(&path, 32, &CancellationToken::new())
            .await
            .unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (32, 32));
    }

    #[tokio::test]
    async fn test_thumbnails_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripes.jpg");
        write_stripes(&path);
        let cancel = CancellationToken::new();

        let first = pipeline(2);
        let miss = first.get_thumbnail(&path, 48, &cancel).await.unwrap();
        let hit = first.get_thumbnail(&path, 48, &cancel).await.unwrap();
        let fresh = pipeline(1).get_thumbnail(&path, 48, &cancel).await.unwrap();

        assert_eq!(miss, hit);
        assert_eq!(miss, fresh);
        let stats = first.stats().cache;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrency_is_bounded_by_workers() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..50)
            .map(|i| {
                let path = dir.path().join(format!("img-{i:02}.png"));
                RgbImage::from_pixel(120, 80, Rgb([i as u8, 100, 200]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect();

        let pipeline = Arc::new(pipeline(4));
        let cancel = CancellationToken::new();
        let tasks: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let pipeline = Arc::clone(&pipeline);
                let cancel = cancel.clone();
                tokio::spawn(async move { pipeline.get_thumbnail(&path, 32, &cancel).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = pipeline.stats();
        assert!(stats.peak >= 1);
        assert!(stats.peak <= 4, "peak was {}", stats.peak);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.cache.entries, 50);
    }

    #[tokio::test]
    async fn test_unsupported_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.avi");
        let broken = dir.path().join("broken.png");
        std::fs::write(&clip, b"RIFF").unwrap();
        std::fs::write(&broken, b"definitely not a png").unwrap();
        let pipeline = pipeline(2);
        let cancel = CancellationToken::new();

        let err = pipeline.get_thumbnail(&clip, 32, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
        let err = pipeline.get_thumbnail(&broken, 32, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));

        // Failures are not cached and substitute a placeholder on request
        assert!(pipeline.cache().is_empty());
        let placeholder = pipeline
            .get_thumbnail_or_placeholder(&broken, 32, &cancel)
            .await
            .unwrap();
        assert_eq!(placeholder, ThumbnailPipeline::placeholder(32).unwrap());
    }

    #[tokio::test]
    async fn test_placeholder_is_grey_square() {
        let bytes = ThumbnailPipeline::placeholder(16).unwrap();
        let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (16, 16));
        assert_eq!(*img.get_pixel(0, 0), PLACEHOLDER_GREY);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripes.png");
        write_stripes(&path);
        let pipeline = pipeline(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.get_thumbnail(&path, 32, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_waiting_request_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripes.png");
        write_stripes(&path);
        let pipeline = Arc::new(pipeline(1));
        let held = Arc::clone(&pipeline.permits).acquire_owned().await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.get_thumbnail(&path, 32, &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        drop(held);
    }

    #[tokio::test]
    async fn test_zero_size_is_rejected() {
        let err = pipeline(1)
            .get_thumbnail(Path::new("/a.png"), 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])).save(&path).unwrap();
        let pipeline = pipeline(1);
        let cancel = CancellationToken::new();

        let err = pipeline
            .get_thumbnail(&path, MAX_THUMBNAIL_SIZE + 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        // Not a decode failure, so no placeholder either
        assert!(pipeline
            .get_thumbnail_or_placeholder(&path, u32::MAX, &cancel)
            .await
            .is_err());
        assert_eq!(pipeline.stats().peak, 0);
        assert_eq!(pipeline.stats().cache.misses, 0);
    }
}
