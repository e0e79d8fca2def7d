//! Scroll choreography: capture a frame, scroll, settle, repeat.
//!
//! The decision logic is pure. [`ScrollState`] is threaded through
//! [`next_delta`] and [`ScrollState::advance`]; [`ScrollChoreographer::run`]
//! only applies the decided side effects to the view. Iterations follow a
//! cyclic rhythm: `activeScrolls` iterations scroll by a random step in
//! `[minStep, maxStep]`, then `pausedScrolls` iterations hold still.
//!
//! With [`PacingCurve::EaseOut`] the scroll progress narrows the step range:
//! the upper bound becomes `maxStep - (maxStep - minStep) * easeOutCubic(p)`,
//! so steps shrink towards `minStep` as the end of the page approaches.
//! Steps never leave `[minStep, maxStep]`.

use crate::clock::Clock;
use crate::config::{PacingCurve, RhythmConfig};
use crate::decode::PixelDecoder;
use crate::encoder::EncoderSession;
use crate::recorder::capture_into;
use crate::result::{CastError, CastResult};
use crate::rng::DeterministicRng;
use crate::view::ExternalView;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Inputs of one choreography run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChoreographyParams {
    /// Position the scroll distance starts from (usually the viewport height)
    pub initial_position: u64,
    /// Document height the run scrolls towards
    pub page_height: u64,
    /// Elapsed time already spent by earlier phases (ms)
    pub elapsed_so_far_ms: f64,
    /// Total elapsed-time budget (ms)
    pub time_budget_ms: f64,
    /// Frames per second
    pub frame_rate: u32,
}

impl ChoreographyParams {
    /// Milliseconds each iteration adds to the elapsed time
    #[must_use]
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / f64::from(self.frame_rate)
    }

    fn validate(&self) -> CastResult<()> {
        if self.frame_rate == 0 {
            return Err(CastError::invalid_config("frame rate must be positive"));
        }
        if !self.time_budget_ms.is_finite() || !self.elapsed_so_far_ms.is_finite() {
            return Err(CastError::invalid_config("time budget must be finite"));
        }
        Ok(())
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Scrolled position reached the page height
    DistanceExhausted,
    /// Elapsed time reached the budget
    TimeBudgetExhausted,
    /// The stop flag was raised
    Cancelled,
}

/// Mutable state of one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollState {
    /// Distance covered so far, starting at the initial position
    pub scrolled_position: u64,
    /// Page height (never shrinks during a run)
    pub page_height: u64,
    /// Elapsed recording time (ms)
    pub elapsed_time_ms: f64,
    /// Completed iterations
    pub cycle_count: u64,
    start_elapsed_ms: f64,
    frame_interval_ms: f64,
}

impl ScrollState {
    /// Initial state for a run
    #[must_use]
    pub fn new(params: &ChoreographyParams) -> Self {
        Self {
            scrolled_position: params.initial_position,
            page_height: params.page_height,
            elapsed_time_ms: params.elapsed_so_far_ms,
            cycle_count: 0,
            start_elapsed_ms: params.elapsed_so_far_ms,
            frame_interval_ms: params.frame_interval_ms(),
        }
    }

    /// Scroll progress in `[0, 1]`
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.page_height == 0 {
            return 1.0;
        }
        (self.scrolled_position as f64 / self.page_height as f64).clamp(0.0, 1.0)
    }

    /// Whether the run must stop, and why
    #[must_use]
    pub fn termination(&self, time_budget_ms: f64) -> Option<StopReason> {
        if self.scrolled_position >= self.page_height {
            Some(StopReason::DistanceExhausted)
        } else if self.elapsed_time_ms >= time_budget_ms {
            Some(StopReason::TimeBudgetExhausted)
        } else {
            None
        }
    }

    /// Record one finished iteration that scrolled by `delta`
    ///
    /// Elapsed time is recomputed from the iteration count so it never
    /// accumulates rounding error.
    pub fn advance(&mut self, delta: u32) {
        self.cycle_count += 1;
        self.scrolled_position += u64::from(delta);
        self.elapsed_time_ms =
            self.start_elapsed_ms + self.cycle_count as f64 * self.frame_interval_ms;
    }

    /// Grow the page height if the document got taller (lazy-loaded content)
    pub fn observe_document_height(&mut self, document_height: u64) {
        self.page_height = self.page_height.max(document_height);
    }
}

/// Whether `iteration` falls in the paused part of its cycle
#[must_use]
pub fn is_paused(iteration: u64, rhythm: &RhythmConfig) -> bool {
    let cycle = u64::from(rhythm.cycle_len());
    if cycle == 0 {
        return false;
    }
    iteration % cycle >= u64::from(rhythm.active_scrolls)
}

/// Ease-out cubic over `[0, 1]`
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Inclusive step range for the next active iteration
#[must_use]
pub fn active_step_range(state: &ScrollState, rhythm: &RhythmConfig) -> (u32, u32) {
    let (min, max) = (rhythm.min_step, rhythm.max_step.max(rhythm.min_step));
    match rhythm.pacing {
        PacingCurve::Linear => (min, max),
        PacingCurve::EaseOut => {
            let span = f64::from(max - min);
            let shrink = (span * ease_out_cubic(state.progress())).round() as u32;
            (min, max - shrink.min(max - min))
        }
    }
}

/// Scroll delta of the next iteration: 0 when paused, a random step otherwise
pub fn next_delta(state: &ScrollState, rhythm: &RhythmConfig, rng: &mut DeterministicRng) -> u32 {
    if is_paused(state.cycle_count, rhythm) {
        return 0;
    }
    let (low, high) = active_step_range(state, rhythm);
    rng.range_inclusive(u64::from(low), u64::from(high)) as u32
}

/// Random settle delay after an iteration
pub fn settle_delay(rhythm: &RhythmConfig, rng: &mut DeterministicRng) -> Duration {
    Duration::from_millis(rng.range_inclusive(rhythm.settle_min_ms, rhythm.settle_max_ms))
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChoreographyOutcome {
    /// State when the loop exited
    pub state: ScrollState,
    /// Why the loop exited
    pub reason: StopReason,
}

impl ChoreographyOutcome {
    /// Iterations (and frames) completed
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.state.cycle_count
    }
}

/// Drives the capture/scroll/settle loop against a view
pub struct ScrollChoreographer<'a> {
    rhythm: RhythmConfig,
    decoder: PixelDecoder,
    clock: &'a dyn Clock,
    rng: DeterministicRng,
    stop: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for ScrollChoreographer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollChoreographer")
            .field("rhythm", &self.rhythm)
            .field("decoder", &self.decoder)
            .field("rng", &self.rng)
            .finish_non_exhaustive()
    }
}

impl<'a> ScrollChoreographer<'a> {
    /// Create a choreographer
    #[must_use]
    pub fn new(
        rhythm: RhythmConfig,
        decoder: PixelDecoder,
        clock: &'a dyn Clock,
        rng: DeterministicRng,
    ) -> Self {
        Self {
            rhythm,
            decoder,
            clock,
            rng,
            stop: None,
        }
    }

    /// Stop at the top of the next iteration once `flag` is raised
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run until the distance or the time budget is exhausted
    ///
    /// Any capture, decode or scroll failure aborts the run.
    pub async fn run(
        &mut self,
        view: &mut dyn ExternalView,
        session: &mut EncoderSession,
        params: ChoreographyParams,
    ) -> CastResult<ChoreographyOutcome> {
        params.validate()?;
        let mut state = ScrollState::new(&params);

        let reason = loop {
            if self.cancelled() {
                break StopReason::Cancelled;
            }
            if let Some(reason) = state.termination(params.time_budget_ms) {
                break reason;
            }

            capture_into(view, &self.decoder, session).await?;

            let delta = next_delta(&state, &self.rhythm, &mut self.rng);
            if delta > 0 {
                view.scroll_by(delta).await?;
            }
            let extent = view.scroll_extent().await?;
            state.observe_document_height(u64::from(extent.document_height));

            let settle = settle_delay(&self.rhythm, &mut self.rng);
            self.clock.sleep(settle).await;

            state.advance(delta);
            debug!(
                iteration = state.cycle_count,
                delta,
                position = state.scrolled_position,
                page_height = state.page_height,
                elapsed_ms = state.elapsed_time_ms,
                "choreography step"
            );
        };

        info!(
            iterations = state.cycle_count,
            position = state.scrolled_position,
            elapsed_ms = state.elapsed_time_ms,
            ?reason,
            "choreography finished"
        );
        Ok(ChoreographyOutcome { state, reason })
    }
}
