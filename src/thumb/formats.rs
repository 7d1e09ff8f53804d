/// Extension -> codec registry for the thumbnail pipeline
///
/// Every displayable extension has one entry saying how to decode it and how
/// its thumbnail is encoded. Lookups are by lowercase extension.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageError, ImageFormat, RgbaImage};
use resvg::{tiny_skia, usvg};

use super::embedded::decode_embedded_preview;
use crate::error::{Error, Result};
use crate::scan::extension_of;

/// Quality of lossy thumbnails
pub const JPEG_QUALITY: u8 = 85;

/// How a source is turned into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Decoded by the `image` crate with an explicit container format
    Raster(ImageFormat),
    /// Rasterised by resvg at its intrinsic size
    Svg,
    /// Largest embedded JPEG preview of a camera RAW file
    EmbeddedPreview,
    /// Known extension without a decoder in this build
    Unavailable,
}

/// Encoding of the produced thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Png,
    Jpeg { quality: u8 },
}

#[derive(Debug)]
pub struct Codec {
    pub extension: &'static str,
    pub decoder: Decoder,
    pub output: Output,
}

const LOSSY: Output = Output::Jpeg {
    quality: JPEG_QUALITY,
};

const fn codec(extension: &'static str, decoder: Decoder, output: Output) -> Codec {
    Codec {
        extension,
        decoder,
        output,
    }
}

pub static REGISTRY: &[Codec] = &[
    codec("png", Decoder::Raster(ImageFormat::Png), Output::Png),
    codec("gif", Decoder::Raster(ImageFormat::Gif), Output::Png),
    codec("jpg", Decoder::Raster(ImageFormat::Jpeg), LOSSY),
    codec("jpeg", Decoder::Raster(ImageFormat::Jpeg), LOSSY),
    codec("bmp", Decoder::Raster(ImageFormat::Bmp), LOSSY),
    codec("tif", Decoder::Raster(ImageFormat::Tiff), LOSSY),
    codec("tiff", Decoder::Raster(ImageFormat::Tiff), LOSSY),
    codec("webp", Decoder::Raster(ImageFormat::WebP), LOSSY),
    codec("avif", Decoder::Raster(ImageFormat::Avif), LOSSY),
    codec("qoi", Decoder::Raster(ImageFormat::Qoi), LOSSY),
    codec("ico", Decoder::Raster(ImageFormat::Ico), LOSSY),
    codec("svg", Decoder::Svg, LOSSY),
    codec("raw", Decoder::EmbeddedPreview, LOSSY),
    codec("dng", Decoder::EmbeddedPreview, LOSSY),
    // HEIC needs libheif, which is not linked
    codec("heic", Decoder::Unavailable, LOSSY),
];

/// Registry entry for `path`, or `UnsupportedFormat` when its extension has none
pub fn codec_for(path: &Path) -> Result<&'static Codec> {
    let extension = extension_of(path).unwrap_or_default();
    REGISTRY
        .iter()
        .find(|codec| codec.extension == extension)
        .ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        })
}

impl Codec {
    pub fn decode(&self, path: &Path) -> Result<DynamicImage> {
        match self.decoder {
            Decoder::Raster(format) => decode_raster(path, format, self.extension),
            Decoder::Svg => decode_svg(path),
            Decoder::EmbeddedPreview => decode_embedded_preview(path),
            Decoder::Unavailable => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: self.extension.to_string(),
            }),
        }
    }
}

impl Output {
    /// Encode `img`; `path` only names the source in errors
    pub fn encode(&self, img: &DynamicImage, path: &Path) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let written = match *self {
            Output::Png => img.write_with_encoder(PngEncoder::new(&mut out)),
            // JPEG has no alpha channel
            Output::Jpeg { quality } => img
                .to_rgb8()
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality)),
        };
        written.map_err(|source| Error::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(out)
    }
}

fn decode_raster(path: &Path, format: ImageFormat, extension: &str) -> Result<DynamicImage> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    image::load(BufReader::new(file), format).map_err(|err| match err {
        ImageError::IoError(e) => Error::io(path, e),
        // The format is known but this build of `image` cannot decode it
        ImageError::Unsupported(_) => Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        },
        other => Error::decode(path, other),
    })
}

fn decode_svg(path: &Path) -> Result<DynamicImage> {
    let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
        .map_err(|e| Error::decode(path, e))?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| Error::decode(path, "svg has an empty canvas"))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // tiny-skia stores premultiplied alpha
    let pixels: Vec<u8> = pixmap
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let c = pixel.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();

    RgbaImage::from_raw(size.width(), size.height(), pixels)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| Error::decode(path, "svg raster size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_lookup_is_case_insensitive() {
        let codec = codec_for(Path::new("/a/IMG_0001.JPG")).unwrap();
        assert_eq!(codec.extension, "jpg");
        assert_eq!(codec.output, Output::Jpeg { quality: 85 });
    }

    #[test]
    fn test_png_and_gif_stay_lossless() {
        for name in ["a.png", "b.gif"] {
            assert_eq!(codec_for(Path::new(name)).unwrap().output, Output::Png);
        }
        for name in ["a.webp", "b.bmp", "c.svg", "d.dng"] {
            assert!(matches!(
                codec_for(Path::new(name)).unwrap().output,
                Output::Jpeg { .. }
            ));
        }
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        for name in ["clip.avi", "notes.txt", "README"] {
            let err = codec_for(Path::new(name)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[test]
    fn test_heic_is_unsupported_not_decode_error() {
        let codec = codec_for(Path::new("photo.heic")).unwrap();
        let err = codec.decode(Path::new("photo.heic")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_decode_generated_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.png");
        RgbImage::from_fn(30, 20, |x, _| Rgb([x as u8 * 8, 0, 0]))
            .save(&path)
            .unwrap();

        let img = codec_for(&path).unwrap().decode(&path).unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = codec_for(&path).unwrap().decode(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err}");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = Path::new("/no/such/cat.png");
        let err = codec_for(path).unwrap().decode(path).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_svg_is_rasterised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flag.svg");
        std::fs::write(
            &path,
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="10"><rect width="20" height="10" fill="#ff0000"/></svg>"##,
        )
        .unwrap();

        let img = codec_for(&path).unwrap().decode(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (20, 10));
        assert_eq!(img.get_pixel(5, 5).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_encoders_emit_their_container() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let png = Output::Png.encode(&img, Path::new("a.png")).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        let jpeg = LOSSY.encode(&img, Path::new("a.jpg")).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
    }
}
