// src/engine/orchestrator.rs
//
// Resize orchestration: two-tier source acquisition, encode, write, metadata restore.

use crate::config::ResizerConfig;
use crate::engine::common::run_with_panic_policy;
use crate::engine::decoder::{decode, probe, DecodedImage};
use crate::engine::encoder::{encode, output_file_name, write_output_file, OutputArtifact};
use crate::engine::io::{materialize, read_bounded, ContentResolver, FileSystemResolver};
use crate::engine::metadata::{read_orientation, restore_orientation, OrientationMetadata};
use crate::engine::pipeline::{calculate_sample_size, plan_dimensions, scale_to};
use crate::error::{ErrorCategory, ResizerError};
use crate::ops::ResizeRequest;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type OrchestratorResult<T> = std::result::Result<T, ResizerError>;

/// Source acquisition strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Copy the stream to a local file first, then decode the copy.
    Materialized,
    /// Decode straight from the resolver's stream.
    Direct,
}

/// Progress of the two-tier acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierState {
    NotStarted,
    Tier1Active,
    Tier2Active,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierEvent {
    Begin,
    /// The active tier produced a scaled image.
    Produced,
    /// The active tier gave up.
    Exhausted,
}

impl TierState {
    /// Apply an event. Events that do not apply to the current state leave it unchanged.
    pub fn advance(self, event: TierEvent) -> Self {
        match (self, event) {
            (Self::NotStarted, TierEvent::Begin) => Self::Tier1Active,
            (Self::Tier1Active | Self::Tier2Active, TierEvent::Produced) => Self::Succeeded,
            (Self::Tier1Active, TierEvent::Exhausted) => Self::Tier2Active,
            (Self::Tier2Active, TierEvent::Exhausted) => Self::Failed,
            (state, _) => state,
        }
    }

    pub fn active_tier(self) -> Option<Tier> {
        match self {
            Self::Tier1Active => Some(Tier::Materialized),
            Self::Tier2Active => Some(Tier::Direct),
            Self::NotStarted | Self::Succeeded | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// What a successful tier hands to the writer.
#[derive(Debug)]
struct Acquired {
    image: DecodedImage,
    metadata: Option<OrientationMetadata>,
}

/// Runs resize requests against a content resolver.
///
/// Holds no per-request state; one instance may serve concurrent requests.
#[derive(Clone)]
pub struct Resizer {
    config: ResizerConfig,
    resolver: Arc<dyn ContentResolver>,
}

impl std::fmt::Debug for Resizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Resizer {
    /// Resizer over the local filesystem.
    pub fn new(config: ResizerConfig) -> Self {
        Self::with_resolver(config, Arc::new(FileSystemResolver))
    }

    pub fn with_resolver(config: ResizerConfig, resolver: Arc<dyn ContentResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &ResizerConfig {
        &self.config
    }

    /// Resize and return the `file://<path>?<token>` response string.
    pub fn resize(&self, request: &ResizeRequest) -> OrchestratorResult<String> {
        let artifact = self.run(request)?;
        Ok(response_url(&artifact.path))
    }

    /// Resize one request and write the result.
    pub fn run(&self, request: &ResizeRequest) -> OrchestratorResult<OutputArtifact> {
        let original_mime = self.resolver.mime_type_of(&request.locator);
        debug!(
            locator = %request.locator,
            width = request.width,
            height = request.height,
            quality = request.quality,
            format = request.format.as_str(),
            mime = ?original_mime,
            "resize request"
        );

        let acquired = self.acquire(request, original_mime.as_deref())?;
        let artifact = self.emit(request, acquired, original_mime.as_deref())?;
        info!(path = %artifact.path.display(), "resized image written");
        Ok(artifact)
    }

    fn acquire(
        &self,
        request: &ResizeRequest,
        original_mime: Option<&str>,
    ) -> OrchestratorResult<Acquired> {
        let mut state = TierState::NotStarted.advance(TierEvent::Begin);
        let mut acquired = None;

        while let Some(tier) = state.active_tier() {
            let attempt = run_with_panic_policy("acquire", || match tier {
                Tier::Materialized => self.acquire_materialized(request, original_mime),
                Tier::Direct => self.acquire_direct(request, original_mime),
            });
            match attempt {
                Ok(found) => {
                    debug!(?tier, dims = ?found.image.dimensions(), "tier produced image");
                    acquired = Some(found);
                    state = state.advance(TierEvent::Produced);
                }
                Err(err) => {
                    warn!(?tier, %err, "tier failed");
                    state = state.advance(TierEvent::Exhausted);
                }
            }
        }

        acquired.ok_or_else(ResizerError::image_read_failed)
    }

    /// Tier 1: materialize, read metadata from the copy, decode the copy.
    fn acquire_materialized(
        &self,
        request: &ResizeRequest,
        original_mime: Option<&str>,
    ) -> OrchestratorResult<Acquired> {
        let copy = {
            let mut stream = self.resolver.open_input_stream(&request.locator)?;
            materialize(
                &mut stream,
                self.config.scratch_dir(),
                self.config.max_source_bytes,
            )?
        };

        let result = copy.map().and_then(|source| {
            let bytes = source.as_bytes();
            let metadata = read_orientation(bytes, original_mime);
            let image = self.decode_planned(bytes, request)?;
            Ok(Acquired { image, metadata })
        });
        // The mapping is gone by now; delete the copy whatever happened
        copy.discard();
        result
    }

    /// Tier 2: read the stream into memory and decode it directly.
    fn acquire_direct(
        &self,
        request: &ResizeRequest,
        original_mime: Option<&str>,
    ) -> OrchestratorResult<Acquired> {
        let bytes = {
            let mut stream = self.resolver.open_input_stream(&request.locator)?;
            read_bounded(&mut stream, self.config.max_source_bytes, &request.locator)?
        };
        let metadata = read_orientation(&bytes, original_mime);
        let image = self.decode_planned(&bytes, request)?;
        Ok(Acquired { image, metadata })
    }

    /// Probe, plan, sampled decode, precise scale.
    fn decode_planned(
        &self,
        bytes: &[u8],
        request: &ResizeRequest,
    ) -> OrchestratorResult<DecodedImage> {
        let probed = probe(bytes);
        if !probed.is_readable() {
            return Err(ResizerError::decode_failed("could not read image bounds"));
        }

        let planned = plan_dimensions(
            probed.width,
            probed.height,
            request.target_width(),
            request.target_height(),
        );
        let limits = self.config.decode_limits();
        // The scaled buffer is allocated at the planned size, so it is bounded too
        limits.check(planned.width, planned.height)?;
        let sample_size = calculate_sample_size(probed.width, probed.height, planned);
        debug!(
            original = ?(probed.width, probed.height),
            planned = ?(planned.width, planned.height),
            sample_size,
            "planned resize"
        );

        let sampled = decode(bytes, sample_size, &limits)?;
        scale_to(sampled, planned)
    }

    /// Encode, write, restore metadata.
    fn emit(
        &self,
        request: &ResizeRequest,
        acquired: Acquired,
        original_mime: Option<&str>,
    ) -> OrchestratorResult<OutputArtifact> {
        let Acquired { image, metadata } = acquired;
        let format = request.format;

        let encoded = encode(&image, format, request.quality, original_mime);
        // Release pixels whether or not encoding worked
        image.release();
        let encoded = encoded.map_err(|err| match err.category() {
            ErrorCategory::WriteError => err,
            _ => ResizerError::encode_failed(format.as_str(), err.to_string()),
        })?;

        let real_path = self.resolver.real_path_of(&request.locator);
        let file_name = output_file_name(original_mime, real_path.as_deref(), format);
        let path = write_output_file(&self.config.output_dir, &file_name, &encoded)?;
        drop(encoded);

        restore_orientation(metadata.as_ref(), format, &path);

        Ok(OutputArtifact {
            path,
            mime_type: format.mime_type(),
        })
    }
}

static LAST_CACHE_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp, strictly increasing across calls in this process.
pub fn next_cache_token() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let previous = LAST_CACHE_TOKEN
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

/// `file://<absolute path>?<cache token>`
pub fn response_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}?{}", absolute.display(), next_cache_token())
}
