// src/ops.rs
//
// Resize request model.
// A request is validated once, then passed by reference through every stage.

use crate::error::ResizerError;
use serde::Deserialize;
use serde_json::Value;

/// Default encoder quality when the request does not carry one.
pub const DEFAULT_QUALITY: u8 = 85;

/// Output format for encoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn from_str(format: &str) -> Result<Self, String> {
        match format.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(format!("unsupported format: {other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    /// Canonical MIME type of the encoded output.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Canonical extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
        }
    }

    /// Whether `mime` names this format. MIME types compare case-insensitively.
    pub fn matches_mime(self, mime: Option<&str>) -> bool {
        mime.is_some_and(|mime| mime.eq_ignore_ascii_case(self.mime_type()))
    }

    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png)
    }

    /// Only JPEG output carries EXIF in this pipeline.
    pub fn carries_exif(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = String;

    fn try_from(format: String) -> Result<Self, Self::Error> {
        Self::from_str(&format)
    }
}

/// An accepted resize request. Immutable once built.
///
/// `width`/`height` of 0 mean "unconstrained" on that axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResizeRequest {
    pub locator: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub format: OutputFormat,
}

impl ResizeRequest {
    pub fn new(locator: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            locator: locator.into(),
            width,
            height,
            quality: DEFAULT_QUALITY,
            format: OutputFormat::default(),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Requested width, `None` when unconstrained.
    pub fn target_width(&self) -> Option<u32> {
        (self.width > 0).then_some(self.width)
    }

    /// Requested height, `None` when unconstrained.
    pub fn target_height(&self) -> Option<u32> {
        (self.height > 0).then_some(self.height)
    }

    /// Parse request arguments.
    ///
    /// Accepts either the request object itself or an argument array whose
    /// first element is the request object.
    pub fn from_json(args: &Value) -> Result<Self, ResizerError> {
        let object = match args {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| ResizerError::missing_argument("args[0]"))?,
            other => other,
        };
        let fields = object.as_object().ok_or_else(|| {
            ResizerError::invalid_argument("args", object.to_string(), "expected a JSON object")
        })?;

        let locator = match fields.get("uri") {
            Some(Value::String(uri)) if !uri.is_empty() => uri.clone(),
            Some(Value::String(_)) => {
                return Err(ResizerError::invalid_argument(
                    "uri",
                    "\"\"",
                    "must not be empty",
                ))
            }
            Some(other) => {
                return Err(ResizerError::invalid_argument(
                    "uri",
                    other.to_string(),
                    "expected a string",
                ))
            }
            None => return Err(ResizerError::missing_argument("uri")),
        };

        let width = required_dimension(fields.get("width"), "width")?;
        let height = required_dimension(fields.get("height"), "height")?;

        let quality = match fields.get("quality") {
            None | Some(Value::Null) => DEFAULT_QUALITY,
            Some(value) => {
                let q = value.as_i64().ok_or_else(|| {
                    ResizerError::invalid_argument(
                        "quality",
                        value.to_string(),
                        "expected an integer",
                    )
                })?;
                u8::try_from(q)
                    .ok()
                    .filter(|q| *q <= 100)
                    .ok_or_else(|| {
                        ResizerError::invalid_argument(
                            "quality",
                            q.to_string(),
                            "must be within 0..=100",
                        )
                    })?
            }
        };

        let format = match fields.get("format") {
            None | Some(Value::Null) => OutputFormat::default(),
            Some(value) => OutputFormat::deserialize(value).map_err(|e| {
                ResizerError::invalid_argument("format", value.to_string(), e.to_string())
            })?,
        };

        Ok(Self {
            locator,
            width,
            height,
            quality,
            format,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ResizerError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ResizerError::invalid_argument("args", raw.to_string(), e.to_string()))?;
        Self::from_json(&value)
    }
}

fn required_dimension(value: Option<&Value>, name: &'static str) -> Result<u32, ResizerError> {
    let value = value.ok_or_else(|| ResizerError::missing_argument(name))?;
    let n = value.as_i64().ok_or_else(|| {
        ResizerError::invalid_argument(name, value.to_string(), "expected an integer")
    })?;
    u32::try_from(n).map_err(|_| {
        ResizerError::invalid_argument(name, n.to_string(), "must be zero or positive")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;

    #[test]
    fn parses_full_request() {
        let req = ResizeRequest::from_json(&json!({
            "uri": "file:///sdcard/DCIM/photo.jpg",
            "width": 800,
            "height": 600,
            "quality": 70,
            "format": "png"
        }))
        .unwrap();
        assert_eq!(req.locator, "file:///sdcard/DCIM/photo.jpg");
        assert_eq!((req.width, req.height), (800, 600));
        assert_eq!(req.quality, 70);
        assert_eq!(req.format, OutputFormat::Png);
    }

    #[test]
    fn quality_and_format_default() {
        let req =
            ResizeRequest::from_json(&json!([{ "uri": "a.png", "width": 10, "height": 0 }]))
                .unwrap();
        assert_eq!(req.quality, DEFAULT_QUALITY);
        assert_eq!(req.format, OutputFormat::Jpeg);
        assert_eq!(req.target_width(), Some(10));
        assert_eq!(req.target_height(), None);
    }

    #[test]
    fn missing_required_fields_are_argument_errors() {
        for args in [
            json!({ "width": 1, "height": 1 }),
            json!({ "uri": "a.jpg", "height": 1 }),
            json!({ "uri": "a.jpg", "width": 1 }),
            json!([]),
        ] {
            let err = ResizeRequest::from_json(&args).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::ArgumentError, "{args}");
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = ResizeRequest::from_json(&json!({ "uri": "a.jpg", "width": -5, "height": 1 }))
            .unwrap_err();
        assert!(err.to_string().contains("width"));

        let err = ResizeRequest::from_json(
            &json!({ "uri": "a.jpg", "width": 1, "height": 1, "quality": 101 }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("quality"));

        let err = ResizeRequest::from_json(
            &json!({ "uri": "a.jpg", "width": 1, "height": 1, "format": "gif" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported format"));
    }

    #[test]
    fn rejects_non_integer_dimension() {
        let err =
            ResizeRequest::from_json(&json!({ "uri": "a.jpg", "width": "wide", "height": 1 }))
                .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ArgumentError);
    }

    #[test]
    fn malformed_json_string() {
        let err = ResizeRequest::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ArgumentError);
    }

    #[test]
    fn format_field_is_case_insensitive_and_typed() {
        let req = ResizeRequest::from_json(
            &json!({ "uri": "a.jpg", "width": 1, "height": 1, "format": "PNG" }),
        )
        .unwrap();
        assert_eq!(req.format, OutputFormat::Png);

        let err = ResizeRequest::from_json(
            &json!({ "uri": "a.jpg", "width": 1, "height": 1, "format": 3 }),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ArgumentError);
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn output_format_properties() {
        assert_eq!(OutputFormat::from_str("JPG"), Ok(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::Jpeg.extension(), ".jpg");
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
        assert!(!OutputFormat::Jpeg.supports_alpha());
        assert!(OutputFormat::Png.supports_alpha());
        assert!(OutputFormat::Jpeg.matches_mime(Some("IMAGE/JPEG")));
        assert!(!OutputFormat::Jpeg.matches_mime(Some("image/png")));
        assert!(!OutputFormat::Png.matches_mime(None));
        assert!(OutputFormat::Jpeg.carries_exif());
    }
}
