// src/engine/io.rs
//
// I/O operations: content resolution, source bytes, and stream materialization

use crate::error::ResizerError;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

type IoResult<T> = std::result::Result<T, ResizerError>;

const FILE_SCHEME: &str = "file://";

/// Resolves content locators to bytes and metadata.
///
/// A locator may be a plain path, a `file://` URI, or anything a host
/// platform can open (content providers, remote stores). Implementations are
/// shared across worker threads.
pub trait ContentResolver: Send + Sync {
    /// Open a fresh byte stream for `locator`. Every call starts from the beginning.
    fn open_input_stream(&self, locator: &str) -> IoResult<Box<dyn Read + Send>>;

    /// MIME type of the content, if known.
    fn mime_type_of(&self, locator: &str) -> Option<String>;

    /// Local filesystem path backing the content, if any.
    fn real_path_of(&self, locator: &str) -> Option<PathBuf>;
}

/// Resolver for plain paths and `file://` URIs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSystemResolver;

impl FileSystemResolver {
    /// Map a locator onto a local path. Other URI schemes are not resolvable.
    pub fn locator_path(locator: &str) -> Option<PathBuf> {
        if let Some(rest) = locator.strip_prefix(FILE_SCHEME) {
            // Drop cache-buster queries from previously returned output URLs
            let path = rest.split_once('?').map_or(rest, |(path, _)| path);
            return (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if locator.contains("://") {
            return None;
        }
        Some(PathBuf::from(locator))
    }
}

impl ContentResolver for FileSystemResolver {
    fn open_input_stream(&self, locator: &str) -> IoResult<Box<dyn Read + Send>> {
        let path = Self::locator_path(locator)
            .ok_or_else(|| ResizerError::source_not_found(locator.to_string()))?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ResizerError::source_not_found(locator.to_string()))
            }
            Err(e) => Err(ResizerError::file_read_failed(path.display().to_string(), e)),
        }
    }

    fn mime_type_of(&self, locator: &str) -> Option<String> {
        let path = Self::locator_path(locator)?;
        mime_from_extension(&path)
            .map(str::to_string)
            .or_else(|| sniff_mime(&path))
    }

    fn real_path_of(&self, locator: &str) -> Option<PathBuf> {
        Self::locator_path(locator).filter(|path| path.is_file())
    }
}

/// MIME type for well-known image extensions.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => return None,
    };
    Some(mime)
}

/// Sniff the MIME type from magic bytes.
fn sniff_mime(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) if kind.matcher_type() == infer::MatcherType::Image => {
            Some(kind.mime_type().to_string())
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "mime sniff failed");
            None
        }
    }
}

/// Encoded source bytes, either mapped from a local file or held in memory.
#[derive(Debug)]
pub enum Source {
    /// Memory-mapped file (zero-copy access)
    Mapped(Mmap),
    /// In-memory data read from a stream
    Memory(Vec<u8>),
}

impl Source {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Mapped(mmap) => mmap.as_ref(),
            Source::Memory(data) => data.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read a stream fully into memory, refusing more than `max_bytes`.
pub fn read_bounded(reader: &mut dyn Read, max_bytes: u64, label: &str) -> IoResult<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| ResizerError::file_read_failed(label.to_string(), e))?;
    if data.len() as u64 > max_bytes {
        return Err(ResizerError::source_too_large(data.len() as u64, max_bytes));
    }
    Ok(data)
}

/// A local copy of a source stream. Deleted on `discard` or drop.
#[derive(Debug)]
pub struct MaterializedFile {
    path: TempPath,
}

impl MaterializedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map the copy into memory.
    ///
    /// The returned mapping must be dropped before the file is discarded.
    pub fn map(&self) -> IoResult<Source> {
        let path_str = self.path.display().to_string();
        let file = File::open(&self.path)
            .map_err(|e| ResizerError::file_read_failed(path_str.clone(), e))?;
        let len = file
            .metadata()
            .map_err(|e| ResizerError::file_read_failed(path_str.clone(), e))?
            .len();
        if len == 0 {
            // Zero-length files cannot be mapped
            return Ok(Source::Memory(Vec::new()));
        }
        // SAFETY: the file is a private temp file created by this process and
        // nothing else writes to it while the mapping is alive.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| ResizerError::file_read_failed(path_str, e))?;
        Ok(Source::Mapped(mmap))
    }

    /// Delete the copy. Failures are logged, never returned.
    pub fn discard(self) {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => tracing::trace!(path = %shown, "discarded materialized copy"),
            Err(e) => {
                tracing::warn!(path = %shown, error = %e, "failed to delete materialized copy")
            }
        }
    }
}

/// Copy a stream into a fresh temp file in `dir`.
///
/// The name is `IMG_<yyyyMMdd_HHmmss>_<random>.tmp`; the random part keeps
/// concurrent requests from colliding within the same second. The file is
/// flushed and closed before returning.
pub fn materialize(
    reader: &mut dyn Read,
    dir: &Path,
    max_bytes: u64,
) -> IoResult<MaterializedFile> {
    std::fs::create_dir_all(dir).map_err(ResizerError::materialize_failed)?;

    let prefix = format!("IMG_{}_", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(ResizerError::materialize_failed)?;

    let copied = std::io::copy(&mut reader.take(max_bytes.saturating_add(1)), &mut file)
        .map_err(ResizerError::materialize_failed)?;
    if copied > max_bytes {
        return Err(ResizerError::source_too_large(copied, max_bytes));
    }
    file.flush().map_err(ResizerError::materialize_failed)?;

    let path = file.into_temp_path();
    tracing::debug!(path = %path.display(), bytes = copied, "materialized source");
    Ok(MaterializedFile { path })
}
