//! Scrollcast: record a scrolling page into an animated GIF
//!
//! A run captures frames from an [`ExternalView`] (a headless browser page,
//! or [`MockView`] in tests), holds still before and after an optional click,
//! then scrolls the page with a cyclic scroll/pause rhythm until it reaches
//! the bottom or the time budget runs out. Frames stream into a single GIF
//! encoder session; the finished artifact can be re-encoded under lossless,
//! lossy and ultra-lossy profiles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐ raster ┌──────────────┐ RGBA ┌────────────────┐
//! │ ExternalView        │───────►│ PixelDecoder │─────►│ EncoderSession │
//! └──────────▲──────────┘        └──────────────┘      └───────┬────────┘
//!            │ scroll_by                                       │ chunks
//! ┌──────────┴──────────┐                              ┌───────▼────────┐
//! │ FrameRecorder       │                              │ BufferAssembler│
//! │ ScrollChoreographer │                              └───────┬────────┘
//! └─────────────────────┘                                      │ Artifact
//!                                                      ┌───────▼────────┐
//!                                                      │ PostCompressor │
//!                                                      └────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scrollcast::{MockView, RecordingConfig, RecordingPipeline};
//!
//! # async fn run() -> scrollcast::CastResult<()> {
//! let config = RecordingConfig::new(1366, 768).with_compression(true, false, false);
//! let mut view = MockView::new(1366, 768, 4000);
//! let output = RecordingPipeline::new().run(&mut view, &config).await?;
//! assert!(output.original.has_gif_header());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod artifact;
mod browser;
mod choreography;
mod clock;
mod compress;
mod config;
mod decode;
mod encoder;
mod logging;
mod pipeline;
mod recorder;
mod result;
mod retry;
mod rng;
mod sink;
mod view;

pub use artifact::{Artifact, ArtifactKind, GIF_CONTENT_TYPE};
pub use browser::BrowserConfig;
#[cfg(feature = "browser")]
pub use browser::BrowserView;
pub use choreography::{
    active_step_range, ease_out_cubic, is_paused, next_delta, settle_delay, ChoreographyOutcome,
    ChoreographyParams, ScrollChoreographer, ScrollState, StopReason,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use compress::{
    CompressionProfile, GifsicleTranscoder, NativeTranscoder, PostCompressor, Transcoder,
    MAX_OPTIMIZATION,
};
pub use config::{LogConfig, PacingCurve, RecordingConfig, RhythmConfig};
pub use decode::{decode_raster, rgba_len, Frame, PixelDecoder, DEFAULT_DECODE_TIMEOUT};
pub use encoder::{BufferAssembler, EncoderConfig, EncoderSession};
pub use logging::init_logging;
pub use pipeline::{ProfileFailure, RecordingOutput, RecordingPipeline};
pub use recorder::{capture_into, hold_frame_count, FrameRecorder};
pub use result::{CastError, CastResult, Phase};
pub use retry::{retry_with_backoff, BackoffPolicy, RetryExhausted};
pub use rng::DeterministicRng;
pub use sink::{ArtifactSink, DirectorySink, MemorySink};
pub use view::{ExternalView, MockView, ScrollExtent, ViewAction, ViewCall};
