// src/engine/decoder.rs
//
// Decoder operations: header probe, sampled decode (mozjpeg, png rows, libwebp scaling), etc.

use crate::config::{MAX_DIMENSION, MAX_PIXELS};
use crate::engine::common::run_with_panic_policy;
use crate::engine::pipeline::{ProbedDimensions, MAX_DCT_SAMPLE_SIZE};
use crate::error::ResizerError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use libwebp_sys::{
    VP8StatusCode, WebPDecode, WebPDecoderConfig, WebPFreeDecBuffer, WEBP_CSP_MODE,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

// Always use ResizerError so codec failures keep their classification
type DecoderResult<T> = std::result::Result<T, ResizerError>;

/// A decoded pixel buffer.
///
/// Owns the pixels exclusively; dropping it releases them. The orchestrator
/// hands it from decoder to scaler to encoder by value so at most one
/// full-size buffer is alive per stage.
#[derive(Debug)]
pub struct DecodedImage {
    pixels: DynamicImage,
    sample_size: u32,
}

impl DecodedImage {
    pub fn new(pixels: DynamicImage, sample_size: u32) -> Self {
        Self {
            pixels,
            sample_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    pub fn has_alpha(&self) -> bool {
        self.pixels.color().has_alpha()
    }

    /// Decode-time reduction this buffer was produced with.
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn into_inner(self) -> DynamicImage {
        self.pixels
    }

    /// Release the pixel buffer now.
    pub fn release(self) {
        tracing::trace!(
            width = self.width(),
            height = self.height(),
            "releasing decoded buffer"
        );
    }
}

/// Safety limits applied to every decoded buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_dimension: u32,
    pub max_pixels: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            max_pixels: MAX_PIXELS,
        }
    }
}

impl DecodeLimits {
    /// Check if decoded dimensions are within safe limits.
    pub fn check(&self, width: u32, height: u32) -> DecoderResult<()> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ResizerError::dimension_exceeds_limit(
                width.max(height),
                self.max_dimension,
            ));
        }
        let pixels = width as u64 * height as u64;
        if pixels > self.max_pixels {
            return Err(ResizerError::pixel_count_exceeds_limit(
                pixels,
                self.max_pixels,
            ));
        }
        Ok(())
    }
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Read dimensions from the image header only.
///
/// Never allocates pixel data. Returns zero dimensions when the bytes are not
/// a decodable image.
pub fn probe(bytes: &[u8]) -> ProbedDimensions {
    let dims = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())
        .and_then(|reader| reader.into_dimensions().map_err(|e| e.to_string()));
    match dims {
        Ok((width, height)) => ProbedDimensions { width, height },
        Err(reason) => {
            tracing::debug!(%reason, "bounds probe failed");
            ProbedDimensions::default()
        }
    }
}

/// mozjpeg scale numerator (out of 8) for a power-of-two sample size.
fn dct_scale_numerator(sample_size: u32) -> u8 {
    (MAX_DCT_SAMPLE_SIZE / sample_size.clamp(1, MAX_DCT_SAMPLE_SIZE)) as u8
}

/// Size libjpeg produces when decoding `dim` at `numerator/8`.
fn dct_scaled_dim(dim: u32, numerator: u8) -> u32 {
    (dim as u64 * numerator as u64).div_ceil(MAX_DCT_SAMPLE_SIZE as u64) as u32
}

/// Decode at `1/sample_size` of the original resolution where the codec can.
///
/// JPEG uses libjpeg's DCT scaling (capped at 1/8), non-interlaced PNG keeps
/// every Nth row and column as rows stream out of the decoder, and WebP uses
/// libwebp's decode-time scaling. The sampled buffer is the only one
/// allocated, so an oversized source never exists in memory at full size.
/// Interlaced PNG and the remaining codecs decode at full size; `limits`
/// bounds what any codec may allocate.
pub fn decode(
    bytes: &[u8],
    sample_size: u32,
    limits: &DecodeLimits,
) -> DecoderResult<DecodedImage> {
    let sample_size = sample_size.max(1);
    let probed = probe(bytes);

    let (image, effective_sample) = match detect_format(bytes) {
        Some(ImageFormat::Jpeg) => match decode_jpeg_mozjpeg(bytes, sample_size, limits) {
            Ok(img) => (img, sample_size.min(MAX_DCT_SAMPLE_SIZE)),
            Err(err) => {
                // CMYK and a few exotic JPEGs are rejected by libjpeg's RGB path
                tracing::warn!(
                    %err,
                    "mozjpeg decode failed, retrying at full size with image crate"
                );
                limits.check(probed.width, probed.height)?;
                (decode_with_image_crate(bytes)?, 1)
            }
        },
        Some(ImageFormat::Png) => decode_png(bytes, sample_size, limits)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes, sample_size, limits)?,
        Some(_) => {
            limits.check(probed.width, probed.height)?;
            (decode_with_image_crate(bytes)?, 1)
        }
        None => return Err(ResizerError::unsupported_format("unrecognized image data")),
    };

    limits.check(image.width(), image.height())?;
    Ok(DecodedImage::new(image, effective_sample))
}

/// Dimension after keeping every `sample_size`-th pixel.
pub fn sampled_dim(dim: u32, sample_size: u32) -> u32 {
    dim.div_ceil(sample_size.max(1))
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo) with DCT downscaling.
pub fn decode_jpeg_mozjpeg(
    data: &[u8],
    sample_size: u32,
    limits: &DecodeLimits,
) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ResizerError::decode_failed("mozjpeg: missing JPEG EOI marker"));
        }

        let mut decompress = Decompress::new_mem(data).map_err(|e| {
            ResizerError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let numerator = dct_scale_numerator(sample_size);
        let expected = (
            dct_scaled_dim(decompress.width() as u32, numerator),
            dct_scaled_dim(decompress.height() as u32, numerator),
        );
        // Refuse before libjpeg allocates anything
        limits.check(expected.0, expected.1)?;
        decompress.scale(numerator);

        let mut decompress = decompress.rgb().map_err(|e| {
            ResizerError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width() as u32;
        let height = decompress.height() as u32;
        limits.check(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            ResizerError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;

        let rgb_image = RgbImage::from_raw(width, height, pixels.into_flattened())
            .ok_or_else(|| {
                ResizerError::decode_failed("mozjpeg: failed to create image from raw data")
            })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Decode with the image crate under the panic policy.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| ResizerError::decode_failed(format!("decode failed: {e}")))
    })
}

fn decode_png(
    data: &[u8],
    sample_size: u32,
    limits: &DecodeLimits,
) -> DecoderResult<(DynamicImage, u32)> {
    if sample_size > 1 {
        if let Some(img) = decode_png_sampled(data, sample_size, limits)? {
            return Ok((img, sample_size));
        }
        tracing::debug!("interlaced png, decoding at full size");
    }
    let probed = probe(data);
    limits.check(probed.width, probed.height)?;
    Ok((decode_png_zune(data)?, 1))
}

/// Decode PNG keeping every `sample_size`-th row and column.
///
/// Rows are filtered one at a time, so memory is one source row plus the
/// sampled output. Returns `Ok(None)` for interlaced files: their rows arrive
/// in Adam7 pass order and cannot be sampled on the fly.
pub fn decode_png_sampled(
    data: &[u8],
    sample_size: u32,
    limits: &DecodeLimits,
) -> DecoderResult<Option<DynamicImage>> {
    run_with_panic_policy("decode:png-sampled", || {
        let mut decoder = png::Decoder::new(Cursor::new(data));
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder
            .read_info()
            .map_err(|e| ResizerError::decode_failed(format!("png: header: {e}")))?;

        let info = reader.info();
        if info.interlaced {
            return Ok(None);
        }
        let width = sampled_dim(info.width, sample_size);
        let height = sampled_dim(info.height, sample_size);
        limits.check(width, height)?;

        let (color, depth) = reader.output_color_type();
        if depth != png::BitDepth::Eight {
            return Err(ResizerError::decode_failed(format!(
                "png: unexpected output depth {depth:?}"
            )));
        }
        let channels = color.samples();
        let step = sample_size as usize;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * channels);

        let mut row_index = 0usize;
        while let Some(row) = reader
            .next_row()
            .map_err(|e| ResizerError::decode_failed(format!("png: row {row_index}: {e}")))?
        {
            if row_index % step == 0 {
                for pixel in row.data().chunks_exact(channels).step_by(step) {
                    pixels.extend_from_slice(pixel);
                }
            }
            row_index += 1;
        }

        let img = match color {
            png::ColorType::Rgb => {
                RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
            }
            png::ColorType::Rgba => {
                RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8)
            }
            png::ColorType::Grayscale => {
                GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
            }
            png::ColorType::GrayscaleAlpha => {
                GrayAlphaImage::from_raw(width, height, pixels).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(ResizerError::decode_failed(format!(
                    "png: unsupported output color {other:?}"
                )))
            }
        };
        img.map(Some)
            .ok_or_else(|| ResizerError::decode_failed("png: image data ended early"))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| ResizerError::decode_failed(format!("png: decode failed: {e:?}")))?;

        let (width, height) = decoder
            .info()
            .map(|info| (info.width as u32, info.height as u32))
            .ok_or_else(|| ResizerError::decode_failed("png: missing header info"))?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(ResizerError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| ResizerError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ResizerError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| ResizerError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| ResizerError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| ResizerError::decode_failed("png: failed to build LumaA image"))?,
            other => {
                return Err(ResizerError::decode_failed(format!(
                    "png: unsupported colorspace {:?}",
                    other
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP is rejected: only still images are resized.
///
/// With `sample_size > 1` libwebp scales while decoding, so the full-size
/// frame is never materialized.
pub fn decode_webp_libwebp(
    data: &[u8],
    sample_size: u32,
    limits: &DecodeLimits,
) -> DecoderResult<(DynamicImage, u32)> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            ResizerError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return Err(ResizerError::unsupported_format("animated webp"));
        }

        if sample_size <= 1 {
            limits.check(features.width(), features.height())?;
            let decoded = WebPDecoder::new(data)
                .decode()
                .ok_or_else(|| ResizerError::decode_failed("webp: decode failed"))?;
            return Ok((decoded.to_image(), 1));
        }

        let width = sampled_dim(features.width(), sample_size);
        let height = sampled_dim(features.height(), sample_size);
        limits.check(width, height)?;
        let img = decode_webp_scaled(data, width, height, features.has_alpha())?;
        Ok((img, sample_size))
    })
}

/// Decoder config whose output buffer is freed on drop.
struct WebPDecodeSession(WebPDecoderConfig);

impl Drop for WebPDecodeSession {
    fn drop(&mut self) {
        // SAFETY: output was initialised by WebPInitDecoderConfig; freeing an
        // unused or libwebp-owned buffer is valid.
        unsafe { WebPFreeDecBuffer(&mut self.0.output) };
    }
}

fn decode_webp_scaled(
    data: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
) -> DecoderResult<DynamicImage> {
    let config = WebPDecoderConfig::new()
        .map_err(|()| ResizerError::decode_failed("webp: decoder config init failed"))?;
    let mut session = WebPDecodeSession(config);
    let (mode, channels) = if has_alpha {
        (WEBP_CSP_MODE::MODE_RGBA, 4usize)
    } else {
        (WEBP_CSP_MODE::MODE_RGB, 3usize)
    };
    session.0.output.colorspace = mode;
    session.0.options.use_scaling = 1;
    session.0.options.scaled_width = width as i32;
    session.0.options.scaled_height = height as i32;

    // SAFETY: data outlives the call and the config was initialised above.
    let status = unsafe { WebPDecode(data.as_ptr(), data.len(), &mut session.0) };
    if status != VP8StatusCode::VP8_STATUS_OK {
        return Err(ResizerError::decode_failed(format!(
            "webp: scaled decode failed: {status:?}"
        )));
    }

    // SAFETY: an RGB(A) colorspace was requested, so the RGBA union arm is live.
    let out = unsafe { session.0.output.u.RGBA };
    let row_len = width as usize * channels;
    let stride = out.stride as usize;
    let required = stride * (height as usize).saturating_sub(1) + row_len;
    if out.rgba.is_null() || stride < row_len || out.size < required {
        return Err(ResizerError::decode_failed("webp: unexpected output buffer"));
    }
    // SAFETY: bounds checked against the buffer size libwebp reported.
    let buffer = unsafe { std::slice::from_raw_parts(out.rgba, out.size) };
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in buffer.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    let img = if has_alpha {
        RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8)
    } else {
        RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
    };
    img.ok_or_else(|| ResizerError::decode_failed("webp: failed to build image"))
}
