//! Image decode/encode behind a backend trait.
//!
//! The pipeline never touches pixels directly: it asks an [`ImageCodec`]
//! to decode a source into a size-limited [`Bitmap`] and later to encode
//! that bitmap into the staging directory. The trait keeps the rest of the
//! crate backend-agnostic and lets tests substitute a recording mock.
//!
//! [`RasterCodec`] is the production implementation — pure Rust on the
//! `image` crate:
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::image_dimensions` |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` |
//! | Scale | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG | `codecs::jpeg::JpegEncoder` (RGB) |
//! | Encode → PNG | `codecs::png::PngEncoder` (RGBA) |

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("failed to encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

/// A decoded image held in memory between the load and save stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pixels: RgbaImage,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// An all-transparent bitmap of the given size. Tests and mock
    /// backends use this; production bitmaps come from decoding.
    pub fn blank(width: u32, height: u32) -> Bitmap {
        Bitmap {
            pixels: RgbaImage::new(width.max(1), height.max(1)),
        }
    }
}

/// Encoding target for generated renditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg { quality: u8 },
    Png,
}

/// The external image codec collaborator.
pub trait ImageCodec {
    /// Pixel dimensions without a full decode.
    fn identify(&self, path: &Path) -> Result<(u32, u32), CodecError>;

    /// Decode, optionally bounding the longer edge to `max_edge` (aspect
    /// ratio preserved).
    fn decode(&self, path: &Path, max_edge: Option<u32>) -> Result<Bitmap, CodecError>;

    /// Encode a bitmap to a file in the given format.
    fn encode(&self, bitmap: &Bitmap, path: &Path, format: EncodeFormat)
    -> Result<(), CodecError>;
}

/// Scale dimensions to fit a longer-edge bound, preserving aspect ratio.
/// Dimensions already within the bound are returned unchanged.
pub fn fit_within(dims: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (w, h) = dims;
    let longer = w.max(h);
    if longer <= max_edge || longer == 0 || max_edge == 0 {
        return (w, h);
    }
    if w >= h {
        let scaled = (h as f64 * max_edge as f64 / w as f64).round() as u32;
        (max_edge, scaled.max(1))
    } else {
        let scaled = (w as f64 * max_edge as f64 / h as f64).round() as u32;
        (scaled.max(1), max_edge)
    }
}

/// Pure-Rust codec on the `image` crate.
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for RasterCodec {
    fn identify(&self, path: &Path) -> Result<(u32, u32), CodecError> {
        image::image_dimensions(path).map_err(|e| CodecError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, path: &Path, max_edge: Option<u32>) -> Result<Bitmap, CodecError> {
        let img = ImageReader::open(path)
            .map_err(CodecError::Io)?
            .decode()
            .map_err(|e| CodecError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let dims = (img.width(), img.height());
        let img = match max_edge {
            Some(max) => {
                let (w, h) = fit_within(dims, max);
                if (w, h) != dims {
                    img.resize_exact(w, h, FilterType::Lanczos3)
                } else {
                    img
                }
            }
            None => img,
        };
        Ok(Bitmap {
            pixels: img.into_rgba8(),
        })
    }

    fn encode(
        &self,
        bitmap: &Bitmap,
        path: &Path,
        format: EncodeFormat,
    ) -> Result<(), CodecError> {
        let file = File::create(path).map_err(CodecError::Io)?;
        let writer = BufWriter::new(file);
        let encode_err = |e: image::ImageError| CodecError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        match format {
            EncodeFormat::Jpeg { quality } => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgba8(bitmap.pixels.clone()).into_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
                encoder.encode_image(&rgb).map_err(encode_err)?;
            }
            EncodeFormat::Png => {
                let encoder = PngEncoder::new(writer);
                encoder
                    .write_image(
                        bitmap.pixels.as_raw(),
                        bitmap.width(),
                        bitmap.height(),
                        ExtendedColorType::Rgba8,
                    )
                    .map_err(encode_err)?;
            }
        }
        Ok(())
    }
}
