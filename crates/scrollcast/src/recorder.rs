//! Capture step and hold recording.

use crate::clock::Clock;
use crate::decode::PixelDecoder;
use crate::encoder::EncoderSession;
use crate::result::CastResult;
use crate::view::ExternalView;
use std::time::Duration;
use tracing::{debug, info};

/// Number of frames a hold of `duration_ms` produces at `frame_rate`
///
/// `floor(duration_ms / 1000 * frame_rate)`, computed in integers. The
/// product saturates, so absurd holds clamp instead of overflowing.
#[must_use]
pub const fn hold_frame_count(duration_ms: u64, frame_rate: u32) -> u64 {
    duration_ms.saturating_mul(frame_rate as u64) / 1000
}

/// Capture, decode and append one frame
///
/// Fully serialized: the frame is appended before this returns, so the next
/// capture always observes a later state.
pub async fn capture_into(
    view: &mut dyn ExternalView,
    decoder: &PixelDecoder,
    session: &mut EncoderSession,
) -> CastResult<()> {
    let raster = view.capture_frame().await?;
    let frame = decoder.decode(raster).await?;
    let (width, height) = (session.config().width, session.config().height);
    let frame = frame.fit_to(width, height)?;
    session.add_frame(frame).await
}

/// Records motionless frames at a fixed cadence
pub struct FrameRecorder<'a> {
    decoder: PixelDecoder,
    clock: &'a dyn Clock,
}

impl std::fmt::Debug for FrameRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecorder")
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

impl<'a> FrameRecorder<'a> {
    /// Create a recorder pacing its captures with `clock`
    #[must_use]
    pub fn new(decoder: PixelDecoder, clock: &'a dyn Clock) -> Self {
        Self { decoder, clock }
    }

    /// Capture `floor(duration_ms / 1000 * frame_rate)` frames without scrolling
    ///
    /// Waits one frame interval between captures. Returns the number of
    /// frames appended; the first failure aborts the hold.
    pub async fn record(
        &self,
        view: &mut dyn ExternalView,
        session: &mut EncoderSession,
        duration_ms: u64,
        frame_rate: u32,
    ) -> CastResult<u64> {
        if frame_rate == 0 {
            return Ok(0);
        }
        let frames = hold_frame_count(duration_ms, frame_rate);
        if frames == 0 {
            debug!(duration_ms, frame_rate, "hold too short for a frame");
            return Ok(0);
        }

        let interval = Duration::from_secs_f64(1.0 / f64::from(frame_rate));
        for index in 0..frames {
            if index > 0 {
                self.clock.sleep(interval).await;
            }
            capture_into(view, &self.decoder, session).await?;
        }

        info!(frames, duration_ms, "hold recorded");
        Ok(frames)
    }
}
