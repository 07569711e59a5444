// src/config.rs
//
// Per-resizer configuration: where files go and how much a single request may decode.

use crate::engine::decoder::DecodeLimits;
use std::path::{Path, PathBuf};

/// Maximum allowed image dimension (width or height) of a decoded buffer.
/// Checked after decode-time sampling, so oversized originals that sample
/// down below the limit are still accepted.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height) of a decoded buffer.
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

/// Maximum encoded source size read into memory.
pub const MAX_SOURCE_BYTES: u64 = 256 * 1024 * 1024;

const DEFAULT_DIR_NAME: &str = "image-resizer";

#[derive(Clone, Debug)]
pub struct ResizerConfig {
    /// Directory receiving resized outputs.
    pub output_dir: PathBuf,
    /// Directory receiving materialized source copies. `None` = `output_dir`.
    pub scratch_dir: Option<PathBuf>,
    pub max_source_bytes: u64,
    pub max_pixels: u64,
    pub max_dimension: u32,
}

impl Default for ResizerConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join(DEFAULT_DIR_NAME),
            scratch_dir: None,
            max_source_bytes: MAX_SOURCE_BYTES,
            max_pixels: MAX_PIXELS,
            max_dimension: MAX_DIMENSION,
        }
    }
}

impl ResizerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_max_source_bytes(mut self, max: u64) -> Self {
        self.max_source_bytes = max;
        self
    }

    pub fn with_max_pixels(mut self, max: u64) -> Self {
        self.max_pixels = max;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch_dir.as_deref().unwrap_or(&self.output_dir)
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_dimension: self.max_dimension,
            max_pixels: self.max_pixels,
        }
    }
}
