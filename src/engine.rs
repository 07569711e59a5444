// src/engine.rs
//
// The resize engine. A request flows through:
// 1. Source acquisition (materialized copy first, direct stream as fallback)
// 2. Header probe, dimension planning, sampled decode, precise scale
// 3. Encode, atomic write, EXIF restore
//
// This file is a facade over the modules in engine/

pub use crate::config::{MAX_DIMENSION, MAX_PIXELS};

mod common;
pub mod decoder;
pub mod encoder;
pub mod io;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod tasks;

pub use common::run_with_panic_policy;
pub use decoder::{decode, detect_format, probe, DecodeLimits, DecodedImage};
pub use encoder::{
    composite_on_white, encode, encode_jpeg, encode_png, output_file_name, write_output_file,
    OutputArtifact,
};
pub use io::{materialize, ContentResolver, FileSystemResolver, MaterializedFile, Source};
pub use metadata::{read_orientation, restore_orientation, write_orientation, OrientationMetadata};
pub use orchestrator::{response_url, Resizer, Tier, TierEvent, TierState};
pub use pipeline::{
    calculate_sample_size, plan_dimensions, scale_to, PlannedDimensions, ProbedDimensions,
};
pub use tasks::{dispatch_resize, ResizeOutcome, ResizeTask};
