//! Recording configuration consumed by the core.
//!
//! Parsing command lines and validating user input happens upstream; the
//! core only loads the already-validated values (JSON, camelCase keys) and
//! rejects the handful of values it cannot run with.

use crate::compress::CompressionProfile;
use crate::result::{CastError, CastResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the remaining scroll distance shapes the active step size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacingCurve {
    /// Active steps are drawn uniformly from the whole step range
    #[default]
    Linear,
    /// The upper bound of the step range shrinks towards `minStep` with an
    /// ease-out cubic of the scroll progress, so scrolling slows near the end
    EaseOut,
}

/// Cyclic scroll/pause rhythm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RhythmConfig {
    /// Scrolling iterations per cycle
    pub active_scrolls: u32,
    /// Paused iterations per cycle (they follow the active ones)
    pub paused_scrolls: u32,
    /// Smallest active step in pixels
    pub min_step: u32,
    /// Largest active step in pixels
    pub max_step: u32,
    /// Smallest settle delay after a scroll (ms)
    pub settle_min_ms: u64,
    /// Largest settle delay after a scroll (ms)
    pub settle_max_ms: u64,
    /// Effect of scroll progress on the step size
    pub pacing: PacingCurve,
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            active_scrolls: 10,
            paused_scrolls: 7,
            min_step: 27,
            max_step: 44,
            settle_min_ms: 50,
            settle_max_ms: 150,
            pacing: PacingCurve::Linear,
        }
    }
}

impl RhythmConfig {
    /// Length of one scroll/pause cycle
    #[must_use]
    pub const fn cycle_len(&self) -> u32 {
        self.active_scrolls + self.paused_scrolls
    }

    /// Set the active step range in pixels
    #[must_use]
    pub fn with_step_range(mut self, min_step: u32, max_step: u32) -> Self {
        self.min_step = min_step.min(max_step);
        self.max_step = max_step.max(min_step);
        self
    }

    /// Set the scroll/pause cycle
    #[must_use]
    pub const fn with_cycle(mut self, active: u32, paused: u32) -> Self {
        self.active_scrolls = active;
        self.paused_scrolls = paused;
        self
    }

    /// Set the settle delay range in milliseconds
    #[must_use]
    pub fn with_settle_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.settle_min_ms = min_ms.min(max_ms);
        self.settle_max_ms = max_ms.max(min_ms);
        self
    }

    /// Set the pacing curve
    #[must_use]
    pub const fn with_pacing(mut self, pacing: PacingCurve) -> Self {
        self.pacing = pacing;
        self
    }

    /// Derive the active step range from an advisory scroll percentage
    ///
    /// The percentage of the viewport height becomes the largest step; the
    /// smallest keeps the min/max ratio of the current range. A missing or
    /// non-positive percentage leaves the range untouched.
    #[must_use]
    pub fn advised_by(self, scroll_percentage: Option<f64>, viewport_height: u32) -> Self {
        let Some(pct) = scroll_percentage.filter(|p| p.is_finite() && *p > 0.0) else {
            return self;
        };
        let advised_max = (f64::from(viewport_height) * pct.min(100.0) / 100.0).round() as u32;
        if advised_max == 0 {
            return self;
        }
        let ratio = f64::from(self.min_step) / f64::from(self.max_step.max(1));
        let advised_min = ((f64::from(advised_max) * ratio).round() as u32).clamp(1, advised_max);
        self.with_step_range(advised_min, advised_max)
    }

    fn validate(&self) -> CastResult<()> {
        if self.active_scrolls == 0 {
            return Err(CastError::invalid_config(
                "rhythm needs at least one active scroll per cycle",
            ));
        }
        if self.min_step == 0 || self.min_step > self.max_step {
            return Err(CastError::invalid_config(format!(
                "invalid step range {}..={}",
                self.min_step, self.max_step
            )));
        }
        if self.settle_min_ms > self.settle_max_ms {
            return Err(CastError::invalid_config("settle delay range is inverted"));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration for one recording run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Viewport width in pixels (also the GIF width)
    pub viewport_width: u32,
    /// Viewport height in pixels (also the GIF height)
    pub viewport_height: u32,
    /// Frames per second (1-60)
    pub frame_rate: u32,
    /// Hold before the action or before scrolling begins (ms)
    pub recording_time_before_action: u64,
    /// Hold after the action (ms)
    pub recording_time_after_click: u64,
    /// CSS selector clicked between the two holds
    pub click_selector: Option<String>,
    /// Advisory percentage of the viewport height used as the largest step
    pub scroll_percentage: Option<f64>,
    /// Total elapsed-time budget (ms)
    pub gif_time: u64,
    /// Derive a lossy artifact
    pub lossy_compression: bool,
    /// Derive a lossless artifact
    #[serde(rename = "loslessCompression", alias = "losslessCompression")]
    pub lossless_compression: bool,
    /// Derive an ultra-lossy artifact
    pub ultra_lossy_compression: bool,
    /// Loss level of the lossy profile
    pub loss_level: u16,
    /// Loss level of the ultra-lossy profile
    pub ultra_loss_level: u16,
    /// Optimization level for all profiles (1-3)
    pub optimization_level: u8,
    /// Palette quality of the original artifact (1-100)
    pub quality: u8,
    /// Budget for decoding one captured frame (ms)
    pub decode_timeout_ms: u64,
    /// Random seed; wall-clock seeded when absent
    pub seed: Option<u64>,
    /// Scroll/pause rhythm
    pub rhythm: RhythmConfig,
    /// Logging
    pub logging: LogConfig,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1366,
            viewport_height: 768,
            frame_rate: 10,
            recording_time_before_action: 1000,
            recording_time_after_click: 0,
            click_selector: None,
            scroll_percentage: None,
            gif_time: 10_000,
            lossy_compression: false,
            lossless_compression: false,
            ultra_lossy_compression: false,
            loss_level: 80,
            ultra_loss_level: 200,
            optimization_level: 3,
            quality: 80,
            decode_timeout_ms: 30_000,
            seed: None,
            rhythm: RhythmConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl RecordingConfig {
    /// Create a configuration for the given viewport
    #[must_use]
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            viewport_width,
            viewport_height,
            ..Default::default()
        }
    }

    /// Load from a JSON string
    pub fn from_json_str(json: &str) -> CastResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_path(path: &Path) -> CastResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Set frames per second (clamped to 1-60)
    #[must_use]
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.clamp(1, 60);
        self
    }

    /// Set the hold before the action (ms)
    #[must_use]
    pub const fn with_hold_before(mut self, ms: u64) -> Self {
        self.recording_time_before_action = ms;
        self
    }

    /// Set the action and the hold that follows it (ms)
    #[must_use]
    pub fn with_click(mut self, selector: impl Into<String>, hold_after_ms: u64) -> Self {
        self.click_selector = Some(selector.into());
        self.recording_time_after_click = hold_after_ms;
        self
    }

    /// Set the elapsed-time budget (ms)
    #[must_use]
    pub const fn with_gif_time(mut self, ms: u64) -> Self {
        self.gif_time = ms;
        self
    }

    /// Set the random seed
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the rhythm
    #[must_use]
    pub fn with_rhythm(mut self, rhythm: RhythmConfig) -> Self {
        self.rhythm = rhythm;
        self
    }

    /// Set palette quality (1-100)
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Enable or disable the derived artifacts
    #[must_use]
    pub const fn with_compression(mut self, lossy: bool, lossless: bool, ultra_lossy: bool) -> Self {
        self.lossy_compression = lossy;
        self.lossless_compression = lossless;
        self.ultra_lossy_compression = ultra_lossy;
        self
    }

    /// Milliseconds represented by one frame
    #[must_use]
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / f64::from(self.frame_rate.max(1))
    }

    /// Total hold time before scrolling starts
    ///
    /// The after-click hold only counts when a click is configured.
    #[must_use]
    pub const fn held_ms(&self) -> u64 {
        if self.click_selector.is_some() {
            self.recording_time_before_action
                .saturating_add(self.recording_time_after_click)
        } else {
            self.recording_time_before_action
        }
    }

    /// Decode budget as a duration
    #[must_use]
    pub const fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    /// Rhythm with the advisory scroll percentage applied
    #[must_use]
    pub fn effective_rhythm(&self) -> RhythmConfig {
        self.rhythm
            .clone()
            .advised_by(self.scroll_percentage, self.viewport_height)
    }

    /// Derived artifacts requested by the compression flags, in delivery order
    #[must_use]
    pub fn requested_profiles(&self) -> Vec<CompressionProfile> {
        let mut profiles = Vec::new();
        if self.lossy_compression {
            profiles.push(
                CompressionProfile::lossy(self.loss_level).with_optimization(self.optimization_level),
            );
        }
        if self.lossless_compression {
            profiles
                .push(CompressionProfile::lossless().with_optimization(self.optimization_level));
        }
        if self.ultra_lossy_compression {
            profiles.push(
                CompressionProfile::ultra_lossy(self.ultra_loss_level)
                    .with_optimization(self.optimization_level),
            );
        }
        profiles
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> CastResult<()> {
        let max_dim = u32::from(u16::MAX);
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(CastError::invalid_config("viewport must be non-empty"));
        }
        if self.viewport_width > max_dim || self.viewport_height > max_dim {
            return Err(CastError::invalid_config(format!(
                "viewport {}x{} exceeds the GIF canvas limit",
                self.viewport_width, self.viewport_height
            )));
        }
        if !(1..=60).contains(&self.frame_rate) {
            return Err(CastError::invalid_config(format!(
                "frame rate {} outside 1-60",
                self.frame_rate
            )));
        }
        self.rhythm.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod recording_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = RecordingConfig::default();
            assert_eq!(config.viewport_width, 1366);
            assert_eq!(config.viewport_height, 768);
            assert_eq!(config.frame_rate, 10);
            assert_eq!(config.decode_timeout(), Duration::from_secs(30));
            assert!(config.requested_profiles().is_empty());
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_held_ms() {
            let mut config = RecordingConfig::default().with_hold_before(400);
            config.recording_time_after_click = 700;
            assert_eq!(config.held_ms(), 400);
            let clicking = config.with_click("#go", 700);
            assert_eq!(clicking.held_ms(), 1100);

            let huge = clicking
                .with_hold_before(u64::MAX)
                .with_click("#go", u64::MAX);
            assert_eq!(huge.held_ms(), u64::MAX);
        }

        #[test]
        fn test_frame_rate_clamping() {
            assert_eq!(RecordingConfig::default().with_frame_rate(0).frame_rate, 1);
            assert_eq!(RecordingConfig::default().with_frame_rate(240).frame_rate, 60);
        }

        #[test]
        fn test_loads_upstream_keys() {
            let json = r#"{
                "viewportWidth": 800,
                "viewportHeight": 600,
                "frameRate": 12,
                "recordingTimeBeforeAction": 1500,
                "gifTime": 4000,
                "scrollPercentage": 10,
                "lossyCompression": true,
                "loslessCompression": true
            }"#;
            let config = RecordingConfig::from_json_str(json).unwrap();
            assert_eq!(config.viewport_width, 800);
            assert_eq!(config.frame_rate, 12);
            assert_eq!(config.recording_time_before_action, 1500);
            assert_eq!(config.gif_time, 4000);
            assert_eq!(config.scroll_percentage, Some(10.0));
            assert_eq!(config.requested_profiles().len(), 2);
            assert_eq!(config.rhythm, RhythmConfig::default());
        }

        #[test]
        fn test_from_path() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("recording.json");
            std::fs::write(&path, r#"{"frameRate": 5}"#).unwrap();
            let config = RecordingConfig::from_path(&path).unwrap();
            assert_eq!(config.frame_rate, 5);
        }

        #[test]
        fn test_validate_rejects_zero_viewport() {
            let config = RecordingConfig::new(0, 768);
            assert!(matches!(
                config.validate(),
                Err(CastError::InvalidConfig { .. })
            ));
        }

        #[test]
        fn test_validate_rejects_oversized_viewport() {
            let config = RecordingConfig::new(70_000, 768);
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_profile_order() {
            let config = RecordingConfig::default().with_compression(true, true, true);
            let names: Vec<_> = config
                .requested_profiles()
                .iter()
                .map(CompressionProfile::name)
                .collect();
            assert_eq!(names, vec!["lossy", "lossless", "ultra-lossy"]);
        }

        #[test]
        fn test_frame_interval() {
            let config = RecordingConfig::default().with_frame_rate(4);
            assert_eq!(config.frame_interval_ms(), 250.0);
        }
    }

    mod rhythm_tests {
        use super::*;

        #[test]
        fn test_default_cycle() {
            let rhythm = RhythmConfig::default();
            assert_eq!(rhythm.cycle_len(), 17);
            assert_eq!((rhythm.min_step, rhythm.max_step), (27, 44));
        }

        #[test]
        fn test_advised_by_percentage() {
            let rhythm = RhythmConfig::default().advised_by(Some(10.0), 768);
            assert_eq!(rhythm.max_step, 77);
            assert_eq!(rhythm.min_step, 47);
        }

        #[test]
        fn test_advised_by_none_is_identity() {
            let rhythm = RhythmConfig::default().advised_by(None, 768);
            assert_eq!(rhythm, RhythmConfig::default());
            let rhythm = RhythmConfig::default().advised_by(Some(-3.0), 768);
            assert_eq!(rhythm, RhythmConfig::default());
        }

        #[test]
        fn test_step_range_normalised() {
            let rhythm = RhythmConfig::default().with_step_range(50, 10);
            assert!(rhythm.min_step <= rhythm.max_step);
        }

        #[test]
        fn test_validate_requires_active_scrolls() {
            let config = RecordingConfig::default()
                .with_rhythm(RhythmConfig::default().with_cycle(0, 5));
            assert!(config.validate().is_err());
        }
    }
}
