// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng), output naming and atomic writes.

use crate::engine::common::run_with_panic_policy;
use crate::engine::decoder::DecodedImage;
use crate::error::ResizerError;
use crate::ops::OutputFormat;
use image::{DynamicImage, ImageFormat, RgbImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// Always use ResizerError so encode failures stay classified as write errors
type EncoderResult<T> = std::result::Result<T, ResizerError>;

/// Basename used when the source has no resolvable filesystem path.
pub const GENERIC_BASENAME: &str = "modified";

/// A resized image written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub mime_type: &'static str,
}

/// Encode to JPEG using mozjpeg.
///
/// Expects an opaque image; alpha, if any, is dropped by the RGB conversion.
/// Callers that need transparency flattened onto white use
/// [`composite_on_white`] first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let quality = quality.min(100);

        // Zero-copy if already RGB8
        let rgb: Cow<'_, RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(ResizerError::encode_failed(
                "jpeg",
                "invalid image dimensions: width or height is zero",
            ));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ResizerError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ResizerError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ResizerError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Encode to PNG using the image crate, then recompress losslessly with oxipng.
pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ResizerError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let options = oxipng::Options::from_preset(2);
        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ResizerError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Flatten an image onto an opaque white canvas of the same size (source-over).
pub fn composite_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    out
}

/// Whether the image must be flattened onto white before encoding to `format`.
///
/// A JPEG target cannot hold alpha. A source whose MIME type differs from the
/// target's may have carried transparency, so it is flattened rather than
/// letting transparent pixels turn black.
pub fn needs_white_background(format: OutputFormat, original_mime: Option<&str>) -> bool {
    !format.supports_alpha() && !format.matches_mime(original_mime)
}

/// Encode a decoded image in `format`.
pub fn encode(
    image: &DecodedImage,
    format: OutputFormat,
    quality: u8,
    original_mime: Option<&str>,
) -> EncoderResult<Vec<u8>> {
    match format {
        OutputFormat::Jpeg => {
            if needs_white_background(format, original_mime) && image.has_alpha() {
                tracing::debug!("compositing onto white background before JPEG encode");
                let flattened = DynamicImage::ImageRgb8(composite_on_white(image.as_image()));
                encode_jpeg(&flattened, quality)
            } else {
                encode_jpeg(image.as_image(), quality)
            }
        }
        OutputFormat::Png => encode_png(image.as_image()),
    }
}

/// Pick the output file name.
///
/// - no resolvable source path: `modified<ext>`
/// - source already in the target format: the source basename unchanged
/// - otherwise: the source stem with the target extension
pub fn output_file_name(
    original_mime: Option<&str>,
    original_real_path: Option<&Path>,
    format: OutputFormat,
) -> String {
    let Some(basename) = original_real_path
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
    else {
        return format!("{GENERIC_BASENAME}{}", format.extension());
    };

    if format.matches_mime(original_mime) {
        return basename;
    }

    let stem = original_real_path
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or(basename);
    format!("{stem}{}", format.extension())
}

/// Atomically write `data` to `dir/file_name`.
///
/// Writes to a temp file in the same directory (so rename never crosses
/// filesystems), syncs, then renames over the target. A failed write leaves
/// no partial file behind.
pub fn write_output_file(dir: &Path, file_name: &str, data: &[u8]) -> EncoderResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| ResizerError::file_write_failed(dir.display().to_string(), e))?;

    let output_path = dir.join(file_name);
    let mut temp_file = NamedTempFile::new_in(dir)
        .map_err(|e| ResizerError::file_write_failed(dir.display().to_string(), e))?;

    let temp_path = temp_file.path().to_path_buf();
    temp_file
        .write_all(data)
        .map_err(|e| ResizerError::file_write_failed(temp_path.display().to_string(), e))?;
    temp_file
        .as_file_mut()
        .sync_all()
        .map_err(|e| ResizerError::file_write_failed(temp_path.display().to_string(), e))?;

    // tempfile removes the temp file if the rename fails
    temp_file.persist(&output_path).map_err(|e| {
        ResizerError::file_write_failed(output_path.display().to_string(), e.error)
    })?;

    Ok(output_path)
}
