/// Preview extraction for camera RAW files
///
/// RAW containers (DNG, CR2, NEF, ...) carry one or more JPEG previews next
/// to the sensor data. Reading the preview is much faster than demosaicing,
/// and plenty for a thumbnail.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::{Error, Result};

const JPEG_START: [u8; 2] = [0xFF, 0xD8];
const JPEG_END: [u8; 2] = [0xFF, 0xD9];

/// How many start markers a prefix scan considers before giving up
const MAX_CANDIDATES: usize = 6;

/// Search tiers: (bytes read from the head of the file, minimum preview size).
/// Most cameras put a usable preview in the first few hundred KiB.
const TIERS: &[(usize, usize)] = &[
    (256 * 1024, 50_000),
    (512 * 1024, 30_000),
    (5 * 1024 * 1024, 10_000),
];

/// Decode the embedded JPEG preview of a RAW file.
///
/// Tries the prefix tiers first, then scans the whole file and takes the
/// largest preview that decodes.
pub fn decode_embedded_preview(path: &Path) -> Result<DynamicImage> {
    for (tier, &(max_bytes, min_size)) in TIERS.iter().enumerate() {
        let head = read_head(path, max_bytes)?;
        if let Some(jpeg) = first_jpeg(&head, min_size) {
            if let Ok(img) = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
                debug!("Embedded preview found in tier {} ({}KB)", tier + 1, jpeg.len() / 1024);
                return Ok(img);
            }
        }
        if head.len() < max_bytes {
            // The file was read whole; larger tiers would see the same bytes
            break;
        }
    }

    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut data))
        .map_err(|e| Error::io(path, e))?;

    let mut previews = all_jpegs(&data);
    previews.sort_by_key(|jpeg| std::cmp::Reverse(jpeg.len()));

    for jpeg in previews {
        if let Ok(img) = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
            debug!("Embedded preview found in full scan ({}KB)", jpeg.len() / 1024);
            return Ok(img);
        }
    }

    Err(Error::decode(path, "no decodable embedded preview"))
}

fn read_head(path: &Path, max_bytes: usize) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut data = Vec::with_capacity(max_bytes.min(1024 * 1024));
    file.take(max_bytes as u64)
        .read_to_end(&mut data)
        .map_err(|e| Error::io(path, e))?;
    Ok(data)
}

/// Start offsets of every `FF D8` marker
fn starts(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    data.windows(2)
        .enumerate()
        .filter(|(_, window)| *window == JPEG_START)
        .map(|(i, _)| i)
}

/// The JPEG beginning at `start`, up to and including its `FF D9` marker
fn jpeg_at(data: &[u8], start: usize) -> Option<&[u8]> {
    data[start..]
        .windows(2)
        .position(|window| window == JPEG_END)
        .map(|end| &data[start..start + end + 2])
}

/// First of the leading candidates larger than `min_size`
fn first_jpeg(data: &[u8], min_size: usize) -> Option<&[u8]> {
    starts(data)
        .take(MAX_CANDIDATES)
        .filter_map(|start| jpeg_at(data, start))
        .find(|jpeg| jpeg.len() > min_size)
}

fn all_jpegs(data: &[u8]) -> Vec<&[u8]> {
    starts(data).filter_map(|start| jpeg_at(data, start)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, RgbImage};

    fn small_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
        let mut out = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 80))
            .unwrap();
        out
    }

    /// A fake RAW container: a TIFF-ish header, the preview, trailing sensor bytes
    fn fake_raw(preview: &[u8]) -> Vec<u8> {
        let mut data = b"II*\0\x08\0\0\0".to_vec();
        data.extend(std::iter::repeat(0x11).take(4096));
        data.extend_from_slice(preview);
        data.extend(std::iter::repeat(0x22).take(4096));
        data
    }

    #[test]
    fn test_finds_preview_inside_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.dng");
        std::fs::write(&path, fake_raw(&small_jpeg(40, 30))).unwrap();

        let img = decode_embedded_preview(&path).unwrap();
        assert_eq!((img.width(), img.height()), (40, 30));
    }

    #[test]
    fn test_largest_preview_wins_in_full_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.raw");
        let mut data = fake_raw(&small_jpeg(8, 8));
        data.extend_from_slice(&small_jpeg(64, 48));
        std::fs::write(&path, data).unwrap();

        let img = decode_embedded_preview(&path).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_no_preview_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.dng");
        std::fs::write(&path, vec![0x33u8; 2048]).unwrap();

        let err = decode_embedded_preview(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_jpeg_slicing_includes_end_marker() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x00];
        let jpeg = jpeg_at(&data, 1).unwrap();
        assert_eq!(jpeg, &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert!(first_jpeg(&data, 10).is_none());
        assert_eq!(all_jpegs(&data).len(), 1);
    }
}
