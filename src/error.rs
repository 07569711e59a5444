// src/error.rs
//
// Unified error handling for image-resizer
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - ArgumentError: malformed request, reported synchronously
// - ReadError: every decode tier exhausted
// - WriteError: encode or file write failed after a successful decode
// - MetadataError: EXIF read/write failure, always recovered locally
// - InternalBug: library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Which stage of a resize request an error belongs to.
///
/// Only `ArgumentError`, `ReadError` and `WriteError` ever reach the caller.
/// Codec and I/O failures inside a decode tier are classified as `ReadError`
/// but are swallowed by the orchestrator until both tiers are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing request fields
    ArgumentError,
    /// Source could not be read or decoded
    ReadError,
    /// Output could not be encoded or written
    WriteError,
    /// Orientation metadata could not be read or written
    MetadataError,
    /// Library bugs (should not happen)
    InternalBug,
}

/// image-resizer error types
#[derive(Debug, Error)]
pub enum ResizerError {
    // Request Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Missing required field: {name}")]
    MissingArgument { name: Cow<'static, str> },

    // Source Errors
    #[error("Source not found: {locator}")]
    SourceNotFound { locator: Cow<'static, str> },

    #[error("Failed to read '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy source to a local file: {source}")]
    MaterializeFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Source is {len} bytes, above the {max} byte limit")]
    SourceTooLarge { len: u64, max: u64 },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    #[error("Error reading image")]
    ImageReadFailed,

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Metadata Errors
    #[error("EXIF metadata error: {message}")]
    Metadata { message: Cow<'static, str> },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl Clone for ResizerError {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::MissingArgument { name } => Self::MissingArgument { name: name.clone() },
            Self::SourceNotFound { locator } => Self::SourceNotFound {
                locator: locator.clone(),
            },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::MaterializeFailed { source } => Self::MaterializeFailed {
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::SourceTooLarge { len, max } => Self::SourceTooLarge {
                len: *len,
                max: *max,
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::ImageReadFailed => Self::ImageReadFailed,
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::FileWriteFailed { path, source } => Self::FileWriteFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Metadata { message } => Self::Metadata {
                message: message.clone(),
            },
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl ResizerError {
    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_argument(name: impl Into<Cow<'static, str>>) -> Self {
        Self::MissingArgument { name: name.into() }
    }

    pub fn source_not_found(locator: impl Into<Cow<'static, str>>) -> Self {
        Self::SourceNotFound {
            locator: locator.into(),
        }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn materialize_failed(source: std::io::Error) -> Self {
        Self::MaterializeFailed { source }
    }

    pub fn source_too_large(len: u64, max: u64) -> Self {
        Self::SourceTooLarge { len, max }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn image_read_failed() -> Self {
        Self::ImageReadFailed
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn metadata(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } | Self::MissingArgument { .. } => {
                ErrorCategory::ArgumentError
            }

            // Everything that can go wrong while acquiring and decoding a source.
            // Inside a tier these only signal "this tier failed".
            Self::SourceNotFound { .. }
            | Self::FileReadFailed { .. }
            | Self::MaterializeFailed { .. }
            | Self::SourceTooLarge { .. }
            | Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::ResizeFailed { .. }
            | Self::ImageReadFailed => ErrorCategory::ReadError,

            Self::EncodeFailed { .. } | Self::FileWriteFailed { .. } => ErrorCategory::WriteError,

            Self::Metadata { .. } => ErrorCategory::MetadataError,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }

    /// Message handed to the completion callback.
    ///
    /// The prefix names the failing stage so callers can tell argument, read
    /// and write failures apart without matching on variants.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::ArgumentError => format!("Error parsing arguments: {self}"),
            ErrorCategory::ReadError => "Error reading image".to_string(),
            ErrorCategory::WriteError => format!("Error outputting image: {self}"),
            ErrorCategory::MetadataError | ErrorCategory::InternalBug => {
                format!("Error resizing image: {self}")
            }
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ResizerError>;
