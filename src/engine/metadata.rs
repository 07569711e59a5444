// src/engine/metadata.rs
//
// Orientation metadata: read EXIF from a JPEG source, write it back into the JPEG output.

use crate::engine::encoder::write_output_file;
use crate::error::ResizerError;
use crate::ops::OutputFormat;
use img_parts::{jpeg::Jpeg, Bytes, ImageEXIF};
use std::io::Cursor;
use std::path::Path;

type MetadataResult<T> = std::result::Result<T, ResizerError>;

/// MIME type of the only source family that carries orientation tags here.
pub const JPEG_MIME: &str = "image/jpeg";

/// EXIF carried from source to output.
///
/// `exif` is the raw TIFF-structured EXIF payload, copied byte for byte so
/// every tag (not only orientation) survives the resize.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrientationMetadata {
    pub orientation: Option<u16>,
    pub exif: Vec<u8>,
}

/// Read orientation metadata from encoded source bytes.
///
/// Only attempted for `image/jpeg`. Any parse failure is logged and yields
/// `None`; the resize continues without metadata.
pub fn read_orientation(bytes: &[u8], mime_type: Option<&str>) -> Option<OrientationMetadata> {
    if !mime_type.is_some_and(|mime| mime.eq_ignore_ascii_case(JPEG_MIME)) {
        return None;
    }
    match parse_exif(bytes) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::warn!(%err, "failed to read orientation metadata");
            None
        }
    }
}

fn parse_exif(bytes: &[u8]) -> MetadataResult<Option<OrientationMetadata>> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(ResizerError::metadata(format!("exif parse failed: {e}"))),
    };

    let orientation = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(|value| value as u16)
        .filter(|value| (1..=8).contains(value));

    Ok(Some(OrientationMetadata {
        orientation,
        exif: exif.buf().to_vec(),
    }))
}

/// Embed EXIF into an encoded JPEG, replacing any existing EXIF segment.
pub fn embed_exif_jpeg(jpeg_data: Vec<u8>, exif: &[u8]) -> MetadataResult<Vec<u8>> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg_data))
        .map_err(|e| ResizerError::metadata(format!("failed to parse JPEG for EXIF: {e}")))?;

    jpeg.set_exif(Some(Bytes::copy_from_slice(exif)));

    let mut output = Vec::new();
    jpeg.encoder()
        .write_to(&mut output)
        .map_err(|e| ResizerError::metadata(format!("failed to write JPEG with EXIF: {e}")))?;
    Ok(output)
}

/// Rewrite the JPEG at `path` with `metadata` embedded.
pub fn write_orientation(metadata: &OrientationMetadata, path: &Path) -> MetadataResult<()> {
    let data = std::fs::read(path)
        .map_err(|e| ResizerError::metadata(format!("failed to reopen output: {e}")))?;
    let updated = embed_exif_jpeg(data, &metadata.exif)?;

    let dir = path
        .parent()
        .ok_or_else(|| ResizerError::metadata("output path has no parent directory"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| ResizerError::metadata("output path has no file name"))?
        .to_string_lossy();
    write_output_file(dir, &file_name, &updated)
        .map_err(|e| ResizerError::metadata(format!("failed to rewrite output: {e}")))?;
    Ok(())
}

/// Write metadata into the output when the format carries it. Never fails.
pub fn restore_orientation(
    metadata: Option<&OrientationMetadata>,
    format: OutputFormat,
    path: &Path,
) {
    let Some(metadata) = metadata else {
        return;
    };
    if !format.carries_exif() {
        return;
    }
    match write_orientation(metadata, path) {
        Ok(()) => tracing::debug!(
            orientation = ?metadata.orientation,
            path = %path.display(),
            "restored orientation metadata"
        ),
        Err(err) => tracing::warn!(
            %err,
            path = %path.display(),
            "failed to restore orientation metadata"
        ),
    }
}
