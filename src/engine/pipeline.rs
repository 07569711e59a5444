// src/engine/pipeline.rs
//
// Pipeline math and scaling: dimension planning, decode sample size, precise resize

use crate::engine::decoder::DecodedImage;
use crate::error::ResizerError;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};

type PipelineResult<T> = std::result::Result<T, ResizerError>;

/// Largest decode-time reduction the JPEG DCT scaler supports (1/8).
pub const MAX_DCT_SAMPLE_SIZE: u32 = 8;

/// Dimensions read from an image header without decoding pixels.
/// Zero on either axis means the source was not readable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbedDimensions {
    pub width: u32,
    pub height: u32,
}

impl ProbedDimensions {
    pub fn is_readable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Final output size. Both axes are always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedDimensions {
    pub width: u32,
    pub height: u32,
}

/// Calculate output dimensions that fit inside the requested box while
/// keeping the original aspect ratio.
///
/// A `None` (or zero) request leaves that axis free. The box is a maximum,
/// never a canvas: the result is not letterboxed.
pub fn plan_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: Option<u32>,
    target_h: Option<u32>,
) -> PlannedDimensions {
    let orig_w = orig_w.max(1);
    let orig_h = orig_h.max(1);
    let (width, height) = match (target_w.filter(|w| *w > 0), target_h.filter(|h| *h > 0)) {
        (None, None) => (orig_w, orig_h),
        (Some(w), None) => {
            let ratio = w as f64 / orig_w as f64;
            (w, (ratio * orig_h as f64).round() as u32)
        }
        (None, Some(h)) => {
            let ratio = h as f64 / orig_h as f64;
            ((ratio * orig_w as f64).round() as u32, h)
        }
        (Some(w), Some(h)) => {
            // Compare orig_w/orig_h against w/h without floating point.
            let orig_cross = orig_w as u64 * h as u64;
            let target_cross = w as u64 * orig_h as u64;
            if orig_cross > target_cross {
                // Relatively wider than the box: width is the limit
                (w, (w as u64 * orig_h as u64 / orig_w as u64) as u32)
            } else if orig_cross < target_cross {
                ((h as u64 * orig_w as u64 / orig_h as u64) as u32, h)
            } else {
                (w, h)
            }
        }
    };

    PlannedDimensions {
        width: width.max(1),
        height: height.max(1),
    }
}

/// Choose a decode-time downsample factor.
///
/// Returns the largest power of two such that decoding at `1/factor` still
/// yields a buffer covering `planned` on the constraining axis.
pub fn calculate_sample_size(
    orig_w: u32,
    orig_h: u32,
    planned: PlannedDimensions,
) -> u32 {
    if orig_w == 0 || orig_h == 0 {
        return 1;
    }
    let orig_cross = orig_w as u64 * planned.height as u64;
    let target_cross = planned.width as u64 * orig_h as u64;
    let ratio = if orig_cross > target_cross {
        orig_w / planned.width
    } else {
        orig_h / planned.height
    };

    if ratio <= 1 {
        1
    } else {
        // Round down to a power of two
        1 << (31 - ratio.leading_zeros())
    }
}

/// Scale a sampled decode to the exact planned size.
///
/// The input buffer is consumed: once the scaled buffer exists the sampled
/// one is dropped. When the sizes already match the input is returned as-is.
pub fn scale_to(image: DecodedImage, planned: PlannedDimensions) -> PipelineResult<DecodedImage> {
    if image.dimensions() == (planned.width, planned.height) {
        return Ok(image);
    }
    let sample_size = image.sample_size();
    let src_dims = image.dimensions();
    let scaled = fast_resize_owned(image.into_inner(), planned.width, planned.height)
        .map_err(ResizeError::into_resizer_error)?;
    tracing::debug!(
        from = ?src_dims,
        to = ?(planned.width, planned.height),
        "scaled sampled decode"
    );
    Ok(DecodedImage::new(scaled, sample_size))
}

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    pub fn into_resizer_error(self) -> ResizerError {
        ResizerError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

/// Fast resize with owned DynamicImage (zero-copy for RGB/RGBA)
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    // Take ownership of the pixel buffer; the DynamicImage is gone after this match
    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other if other.color().has_alpha() => (PixelType::U8x4, other.to_rgba8().into_raw()),
        other => (PixelType::U8x3, other.to_rgb8().into_raw()),
    };

    fast_resize_internal(
        src_width,
        src_height,
        src_pixels,
        pixel_type,
        dst_width,
        dst_height,
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

fn resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear))
}

fn fast_resize_internal(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "source buffer too short. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => resize_with_source_image(src_image, pixel_type, dst_width, dst_height),
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let mut aligned = fir::images::Image::new(src_width, src_height, pixel_type);
            aligned
                .buffer_mut()
                .copy_from_slice(&src_pixels[..required_bytes]);
            resize_with_source_image(aligned, pixel_type, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary_result {
        Ok(img) => Ok(img),
        Err(err) => {
            tracing::warn!(%err, "fast_image_resize failed, using image crate resize");
            resize_with_image_crate_fallback(
                src_pixels,
                src_width,
                src_height,
                pixel_type,
                dst_width,
                dst_height,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn resize_with_image_crate_fallback(
    src_pixels: Vec<u8>,
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Triangle;
    match pixel_type {
        PixelType::U8x3 => {
            let rgb = RgbImage::from_raw(src_width, src_height, src_pixels)
                .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgb8(image::imageops::resize(
                &rgb, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels)
                .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgba8(image::imageops::resize(
                &rgba, dst_width, dst_height, filter,
            )))
        }
        _ => Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    }
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    // Premultiply so transparent pixels do not bleed their color into neighbours
    let premultiply = pixel_type == PixelType::U8x4;
    let mul_div = MulDiv::default();
    if premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &resize_options())
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(dst_width, dst_height, dst_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "failed to create rgb image from resized data".to_string()),
        PixelType::U8x4 => RgbaImage::from_raw(dst_width, dst_height, dst_pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| "failed to create rgba image from resized data".to_string()),
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, LumaA};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn planned(width: u32, height: u32) -> PlannedDimensions {
        PlannedDimensions { width, height }
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn test_none_returns_original() {
            assert_eq!(plan_dimensions(1000, 500, None, None), planned(1000, 500));
        }

        #[test]
        fn test_zero_means_unspecified() {
            assert_eq!(plan_dimensions(1000, 500, Some(0), Some(0)), planned(1000, 500));
            assert_eq!(plan_dimensions(1000, 500, Some(500), Some(0)), planned(500, 250));
        }

        #[test]
        fn test_width_only_maintains_aspect_ratio() {
            assert_eq!(plan_dimensions(1000, 500, Some(500), None), planned(500, 250));
        }

        #[test]
        fn test_height_only_maintains_aspect_ratio() {
            assert_eq!(plan_dimensions(1000, 500, None, Some(250)), planned(500, 250));
        }

        #[test]
        fn test_single_axis_rounds() {
            // 101:51 -> 50:25.247 -> 25
            assert_eq!(plan_dimensions(101, 51, Some(50), None), planned(50, 25));
            // 3:2 -> 5:3.33 -> 3 ; 2:3 -> 3.33:5 -> 3
            assert_eq!(plan_dimensions(3, 2, Some(5), None), planned(5, 3));
            // 200:300 at height 100 -> 66.67 -> 67
            assert_eq!(plan_dimensions(200, 300, None, Some(100)), planned(67, 100));
        }

        #[test]
        fn test_box_wider_source_shrinks_height() {
            assert_eq!(plan_dimensions(1000, 500, Some(400), Some(400)), planned(400, 200));
        }

        #[test]
        fn test_box_taller_source_shrinks_width() {
            assert_eq!(plan_dimensions(500, 1000, Some(400), Some(400)), planned(200, 400));
        }

        #[test]
        fn test_box_truncates_like_integer_division() {
            // 400 * 300 / 1000 = 120 exactly; 400 * 333 / 1000 = 133.2 -> 133
            assert_eq!(plan_dimensions(1000, 333, Some(400), Some(400)), planned(400, 133));
        }

        #[test]
        fn test_box_same_ratio_uses_request() {
            assert_eq!(plan_dimensions(1600, 900, Some(320), Some(180)), planned(320, 180));
        }

        #[test]
        fn test_box_allows_upscale() {
            assert_eq!(plan_dimensions(100, 50, Some(400), Some(400)), planned(400, 200));
        }

        #[test]
        fn test_extreme_ratio_never_zero() {
            assert_eq!(plan_dimensions(10_000, 1, Some(100), Some(100)), planned(100, 1));
            assert_eq!(plan_dimensions(1, 10_000, Some(100), None), planned(100, 10_000 * 100));
        }
    }

    mod sample_size_tests {
        use super::*;

        #[test]
        fn test_no_reduction_when_target_is_larger() {
            assert_eq!(calculate_sample_size(800, 600, planned(1600, 1200)), 1);
            assert_eq!(calculate_sample_size(800, 600, planned(800, 600)), 1);
        }

        #[test]
        fn test_rounds_down_to_power_of_two() {
            // 4000/500 = 8
            assert_eq!(calculate_sample_size(4000, 3000, planned(500, 375)), 8);
            // 4000/700 = 5 -> 4
            assert_eq!(calculate_sample_size(4000, 3000, planned(700, 525)), 4);
            // 4000/1500 = 2
            assert_eq!(calculate_sample_size(4000, 3000, planned(1500, 1125)), 2);
        }

        #[test]
        fn test_uses_constraining_axis() {
            // Tall source into a wider box: height decides, 6000/500 = 12 -> 8
            assert_eq!(calculate_sample_size(3000, 6000, planned(400, 500)), 8);
        }

        #[test]
        fn test_large_reduction_beyond_dct_range() {
            assert_eq!(calculate_sample_size(12_000, 9_000, planned(100, 75)), 64);
        }

        #[test]
        fn test_sampled_buffer_covers_target() {
            let cases = [
                (4000, 3000, 640, 480),
                (5472, 3648, 300, 200),
                (999, 999, 10, 10),
            ];
            for (w, h, pw, ph) in cases {
                let s = calculate_sample_size(w, h, planned(pw, ph));
                assert!(w / s >= pw && h / s >= ph, "{w}x{h} / {s} vs {pw}x{ph}");
            }
        }
    }

    mod scale_tests {
        use super::*;

        #[test]
        fn test_scale_downscale() {
            let img = DecodedImage::new(create_test_image(100, 80), 1);
            let out = scale_to(img, planned(50, 40)).unwrap();
            assert_eq!(out.dimensions(), (50, 40));
        }

        #[test]
        fn test_scale_same_size_returns_input() {
            let img = DecodedImage::new(create_test_image(30, 20), 2);
            let out = scale_to(img, planned(30, 20)).unwrap();
            assert_eq!(out.dimensions(), (30, 20));
            assert_eq!(out.sample_size(), 2);
        }

        #[test]
        fn test_scale_keeps_alpha_channel() {
            let rgba = RgbaImage::from_pixel(40, 40, image::Rgba([10, 20, 30, 0]));
            let img = DecodedImage::new(DynamicImage::ImageRgba8(rgba), 1);
            let out = scale_to(img, planned(10, 10)).unwrap();
            assert!(out.has_alpha());
            assert_eq!(out.as_image().get_pixel(5, 5).0[3], 0);
        }

        #[test]
        fn test_scale_converts_luma_alpha_to_rgba() {
            let la = image::GrayAlphaImage::from_pixel(8, 8, LumaA([200, 128]));
            let img = DecodedImage::new(DynamicImage::ImageLumaA8(la), 1);
            let out = scale_to(img, planned(4, 4)).unwrap();
            assert!(matches!(out.as_image(), DynamicImage::ImageRgba8(_)));
        }

        #[test]
        fn test_fast_resize_invalid_dimensions() {
            let err = fast_resize_owned(create_test_image(1, 1), 0, 10).unwrap_err();
            assert_eq!(err.source_dims, (1, 1));
            assert_eq!(err.target_dims, (0, 10));
            assert!(err.reason.contains("invalid dimensions"));
        }

        #[test]
        fn test_image_crate_fallback_resizes_rgb() {
            let pixels = vec![128u8; 4 * 4 * 3];
            let out =
                resize_with_image_crate_fallback(pixels, 4, 4, PixelType::U8x3, 2, 2).unwrap();
            assert_eq!(out.dimensions(), (2, 2));
        }
    }
}
