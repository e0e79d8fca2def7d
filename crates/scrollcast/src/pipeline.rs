//! End-to-end recording run.
//!
//! A run opens one encoder session, records the hold before the action, the
//! optional action and the hold after it, then scrolls the page under the
//! choreography until the distance or the time budget runs out. The closed
//! session becomes the original artifact; every requested compression profile
//! then derives its own artifact from it.
//!
//! Capture, decode, scroll and encoder failures abort the run and are tagged
//! with the phase they happened in. Compression failures only cost the
//! profile that failed.

use crate::artifact::{Artifact, ArtifactKind};
use crate::choreography::{ChoreographyParams, ScrollChoreographer, StopReason};
use crate::clock::{Clock, SystemClock};
use crate::compress::{CompressionProfile, PostCompressor};
use crate::config::RecordingConfig;
use crate::decode::PixelDecoder;
use crate::encoder::{EncoderConfig, EncoderSession};
use crate::recorder::FrameRecorder;
use crate::result::{CastError, CastResult, Phase};
use crate::rng::DeterministicRng;
use crate::sink::ArtifactSink;
use crate::view::{ExternalView, ViewAction};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// A derived profile that could not be produced
#[derive(Debug)]
pub struct ProfileFailure {
    /// Profile that failed
    pub profile: CompressionProfile,
    /// Why it failed
    pub error: CastError,
}

impl fmt::Display for ProfileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.profile.name(), self.error)
    }
}

/// Everything one run produced
#[derive(Debug)]
pub struct RecordingOutput {
    /// Identifier attached to the run's log span
    pub run_id: Uuid,
    /// Artifact straight from the encoder session
    pub original: Artifact,
    /// Successfully derived artifacts, in profile order
    pub derived: Vec<Artifact>,
    /// Profiles that failed
    pub failures: Vec<ProfileFailure>,
    /// Frames encoded into the original
    pub frames: usize,
    /// Why the choreography stopped
    pub stop_reason: StopReason,
}

impl RecordingOutput {
    /// Original followed by the derived artifacts
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.original).chain(self.derived.iter())
    }

    /// Artifact of the given kind
    #[must_use]
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts().find(|a| a.kind() == kind)
    }

    /// Whether every requested profile succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Hand every produced artifact to `sink`
    ///
    /// Returns `(name, location)` pairs in delivery order.
    pub async fn deliver(&self, sink: &mut dyn ArtifactSink) -> CastResult<Vec<(String, String)>> {
        let mut delivered = Vec::with_capacity(1 + self.derived.len());
        for artifact in self.artifacts() {
            let name = artifact.kind().name();
            let location = sink.store(name, artifact).await?;
            delivered.push((name.to_string(), location));
        }
        for failure in &self.failures {
            warn!(run_id = %self.run_id, %failure, "profile not delivered");
        }
        Ok(delivered)
    }
}

/// Runs recordings against a view
pub struct RecordingPipeline {
    clock: Arc<dyn Clock>,
    compressor: PostCompressor,
    stop: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for RecordingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingPipeline")
            .field("compressor", &self.compressor)
            .field("cancellable", &self.stop.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RecordingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPipeline {
    /// Pipeline on real time with the native transcoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            compressor: PostCompressor::default(),
            stop: None,
        }
    }

    /// Use `clock` for capture cadence, settle delays and retry backoff
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.compressor = self.compressor.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Replace the post compressor
    #[must_use]
    pub fn with_compressor(mut self, compressor: PostCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    /// Stop the choreography early once `flag` is raised
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Record `view` under `config`
    ///
    /// # Errors
    ///
    /// Returns [`CastError::InvalidConfig`] for a rejected configuration and
    /// a [`CastError::Phase`] for any fatal failure during the run.
    pub async fn run(
        &self,
        view: &mut dyn ExternalView,
        config: &RecordingConfig,
    ) -> CastResult<RecordingOutput> {
        config.validate()?;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "recording",
            %run_id,
            width = config.viewport_width,
            height = config.viewport_height,
            fps = config.frame_rate
        );
        self.record(view, config, run_id).instrument(span).await
    }

    async fn record(
        &self,
        view: &mut dyn ExternalView,
        config: &RecordingConfig,
        run_id: Uuid,
    ) -> CastResult<RecordingOutput> {
        let fps = config.frame_rate;
        let encoder_config = EncoderConfig::new(config.viewport_width, config.viewport_height)
            .with_frame_rate(fps)
            .with_quality(config.quality);
        let mut session =
            EncoderSession::open(encoder_config).map_err(|e| e.in_phase(Phase::Open))?;

        let decoder = PixelDecoder::new(config.decode_timeout());
        let recorder = FrameRecorder::new(decoder, self.clock.as_ref());

        recorder
            .record(view, &mut session, config.recording_time_before_action, fps)
            .await
            .map_err(|e| e.in_phase(Phase::HoldBefore))?;

        if let Some(selector) = &config.click_selector {
            let action = ViewAction::Click {
                selector: selector.clone(),
            };
            view.trigger_action(&action)
                .await
                .map_err(|e| e.in_phase(Phase::Action))?;
            info!(selector = %selector, "action triggered");
            recorder
                .record(view, &mut session, config.recording_time_after_click, fps)
                .await
                .map_err(|e| e.in_phase(Phase::HoldAfter))?;
        }

        let extent = view
            .scroll_extent()
            .await
            .map_err(|e| e.in_phase(Phase::Choreography))?;
        let params = ChoreographyParams {
            initial_position: u64::from(config.viewport_height),
            page_height: u64::from(extent.document_height),
            elapsed_so_far_ms: config.held_ms() as f64,
            time_budget_ms: config.gif_time as f64,
            frame_rate: fps,
        };
        let mut choreographer = ScrollChoreographer::new(
            config.effective_rhythm(),
            decoder,
            self.clock.as_ref(),
            DeterministicRng::from_seed_or_entropy(config.seed),
        );
        if let Some(flag) = &self.stop {
            choreographer = choreographer.with_stop_flag(Arc::clone(flag));
        }
        let outcome = choreographer
            .run(view, &mut session, params)
            .await
            .map_err(|e| e.in_phase(Phase::Choreography))?;

        session.close().map_err(|e| e.in_phase(Phase::Assemble))?;
        let frames = session.frames_added();
        let original = session
            .assemble()
            .await
            .map_err(|e| e.in_phase(Phase::Assemble))?;
        info!(
            frames,
            bytes = original.len(),
            stop_reason = ?outcome.reason,
            "original artifact assembled"
        );

        let (derived, failures) = self
            .compress_all(&original, &config.requested_profiles())
            .await;

        Ok(RecordingOutput {
            run_id,
            original,
            derived,
            failures,
            frames,
            stop_reason: outcome.reason,
        })
    }

    /// Derive one artifact per profile; a failing profile does not affect the others
    pub async fn compress_all(
        &self,
        original: &Artifact,
        profiles: &[CompressionProfile],
    ) -> (Vec<Artifact>, Vec<ProfileFailure>) {
        let mut derived = Vec::with_capacity(profiles.len());
        let mut failures = Vec::new();
        for profile in profiles {
            match self.compressor.compress(original, profile).await {
                Ok(artifact) => derived.push(artifact),
                Err(error) => {
                    warn!(profile = %profile, %error, "post compression failed");
                    failures.push(ProfileFailure {
                        profile: *profile,
                        error,
                    });
                }
            }
        }
        (derived, failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::compress::Transcoder;
    use crate::retry::BackoffPolicy;
    use crate::sink::MemorySink;
    use crate::view::{MockView, ViewCall};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Fails every lossy request, echoes everything else
    struct NoLossy;

    #[async_trait]
    impl Transcoder for NoLossy {
        async fn transcode(&self, input: &[u8], profile: &CompressionProfile) -> CastResult<Vec<u8>> {
            match profile {
                CompressionProfile::Lossy { .. } => Err(CastError::encode("lossy backend down")),
                _ => Ok(input.to_vec()),
            }
        }
    }

    fn small_config() -> RecordingConfig {
        RecordingConfig::new(16, 12)
            .with_frame_rate(10)
            .with_hold_before(300)
            .with_gif_time(1000)
            .with_seed(7)
    }

    fn pipeline(clock: &FakeClock) -> RecordingPipeline {
        RecordingPipeline::new().with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_run_produces_original() {
        let clock = FakeClock::new();
        let mut view = MockView::new(16, 12, 400);
        let output = pipeline(&clock).run(&mut view, &small_config()).await.unwrap();

        assert!(output.original.has_gif_header());
        assert_eq!(output.original.dimensions(), Some((16, 12)));
        assert!(output.derived.is_empty());
        assert!(output.is_complete());
        // 3 held frames plus one per choreography iteration
        assert!(output.frames >= 3);
        assert_eq!(output.frames, view.capture_count());
    }

    #[tokio::test]
    async fn test_hold_budget_counts_against_gif_time() {
        let clock = FakeClock::new();
        // A tall page so only the time budget can stop the run
        let mut view = MockView::new(16, 12, 100_000);
        let output = pipeline(&clock).run(&mut view, &small_config()).await.unwrap();

        assert_eq!(output.stop_reason, StopReason::TimeBudgetExhausted);
        // (1000 - 300) / 100 choreography iterations after 3 held frames
        assert_eq!(output.frames, 3 + 7);
    }

    #[tokio::test]
    async fn test_click_runs_between_holds() {
        let clock = FakeClock::new();
        let mut view = MockView::new(16, 12, 400);
        let config = small_config().with_click("#accept", 200);
        pipeline(&clock).run(&mut view, &config).await.unwrap();

        let calls = view.calls();
        let action_at = calls
            .iter()
            .position(|c| matches!(c, ViewCall::Action(_)))
            .unwrap();
        let first_scroll = calls
            .iter()
            .position(|c| matches!(c, ViewCall::Scroll(_)))
            .unwrap();
        let captures_before = calls[..action_at]
            .iter()
            .filter(|c| **c == ViewCall::Capture)
            .count();
        let captures_between = calls[action_at..first_scroll]
            .iter()
            .filter(|c| **c == ViewCall::Capture)
            .count();
        assert_eq!(captures_before, 3);
        // 2 held frames plus the first choreography capture
        assert_eq!(captures_between, 3);
    }

    #[tokio::test]
    async fn test_capture_failure_is_phase_tagged() {
        let clock = FakeClock::new();
        let mut view = MockView::new(16, 12, 400).failing_capture_at(1);
        let err = pipeline(&clock)
            .run(&mut view, &small_config())
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::HoldBefore));
        assert!(err.to_string().contains("hold-before"));
    }

    #[tokio::test]
    async fn test_scroll_failure_is_phase_tagged() {
        let clock = FakeClock::new();
        let mut view = MockView::new(16, 12, 400).failing_scroll_at(0);
        let err = pipeline(&clock)
            .run(&mut view, &small_config())
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Choreography));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_capture() {
        let clock = FakeClock::new();
        let mut view = MockView::new(16, 12, 400);
        let mut config = small_config();
        config.frame_rate = 0;
        let err = pipeline(&clock).run(&mut view, &config).await.unwrap_err();
        assert!(matches!(err, CastError::InvalidConfig { .. }));
        assert!(view.calls().is_empty());
    }

    #[tokio::test]
    async fn test_raised_stop_flag_skips_choreography() {
        let clock = FakeClock::new();
        let flag = Arc::new(AtomicBool::new(false));
        flag.store(true, Ordering::SeqCst);
        let mut view = MockView::new(16, 12, 400);
        let output = pipeline(&clock)
            .with_stop_flag(Arc::clone(&flag))
            .run(&mut view, &small_config())
            .await
            .unwrap();
        assert_eq!(output.stop_reason, StopReason::Cancelled);
        assert_eq!(output.frames, 3);
        assert!(view.scroll_deltas().is_empty());
    }

    #[tokio::test]
    async fn test_failed_profile_is_isolated() {
        let clock = FakeClock::new();
        let compressor = PostCompressor::new(Arc::new(NoLossy))
            .with_clock(Arc::new(clock.clone()))
            .with_policy(BackoffPolicy::new(3, Duration::from_millis(5), 2));
        let mut view = MockView::new(16, 12, 400);
        let config = small_config().with_compression(true, true, true);

        let output = pipeline(&clock)
            .with_compressor(compressor)
            .run(&mut view, &config)
            .await
            .unwrap();

        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].profile.name(), "lossy");
        assert!(!output.is_complete());
        let kinds: Vec<ArtifactKind> = output.derived.iter().map(Artifact::kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::Lossless, ArtifactKind::UltraLossy]);

        let mut sink = MemorySink::new();
        let delivered = output.deliver(&mut sink).await.unwrap();
        let names: Vec<&str> = delivered.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["original", "lossless", "ultra-lossy"]);
        assert_eq!(sink.get("original").unwrap(), &output.original);
    }
}
