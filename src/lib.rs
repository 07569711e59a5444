// lib.rs
//
// image-resizer: fit an image inside a bounding box and write it as a new file
//
// Design goals:
// - Never decode a huge photo at full resolution when a sampled decode will do
// - Survive content sources that only work when copied locally first
// - Carry EXIF orientation from source to output
// - Never block the caller: one request, one background worker

// jemalloc is not supported on Windows/MSVC
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod config;
pub mod engine;
pub mod error;
pub mod ops;

pub use config::ResizerConfig;
pub use engine::{dispatch_resize, ContentResolver, FileSystemResolver, Resizer, ResizeOutcome};
pub use error::{ErrorCategory, ResizerError};
pub use ops::{OutputFormat, ResizeRequest};
