//! Post compression of finished artifacts.
//!
//! A [`PostCompressor`] derives a new artifact from an existing one under a
//! [`CompressionProfile`], retrying a failing (or empty) transcode with
//! exponential backoff. The source artifact is never touched.
//!
//! Two backends implement [`Transcoder`]: [`NativeTranscoder`] re-encodes
//! in-process with the `gif` crate, [`GifsicleTranscoder`] pipes through an
//! external `gifsicle` binary.

mod gifsicle;
mod native;

pub use gifsicle::GifsicleTranscoder;
pub use native::NativeTranscoder;

use crate::artifact::{Artifact, ArtifactKind};
use crate::clock::{Clock, SystemClock};
use crate::result::{CastError, CastResult};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Highest optimization level
pub const MAX_OPTIMIZATION: u8 = 3;

/// Size/quality trade-off of a derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CompressionProfile {
    /// Frame and palette optimization only; pixels are preserved
    Lossless {
        /// Optimization level (1-3)
        optimization: u8,
    },
    /// Lossy quantization
    Lossy {
        /// Loss level (0-200 is the useful range)
        loss: u16,
        /// Optimization level (1-3)
        optimization: u8,
    },
    /// Aggressive lossy quantization with a reduced palette
    UltraLossy {
        /// Loss level (0-200 is the useful range)
        loss: u16,
        /// Optimization level (1-3)
        optimization: u8,
    },
}

impl CompressionProfile {
    /// Lossless profile at the highest optimization level
    #[must_use]
    pub const fn lossless() -> Self {
        Self::Lossless {
            optimization: MAX_OPTIMIZATION,
        }
    }

    /// Lossy profile at the highest optimization level
    #[must_use]
    pub const fn lossy(loss: u16) -> Self {
        Self::Lossy {
            loss,
            optimization: MAX_OPTIMIZATION,
        }
    }

    /// Ultra-lossy profile at the highest optimization level
    #[must_use]
    pub const fn ultra_lossy(loss: u16) -> Self {
        Self::UltraLossy {
            loss,
            optimization: MAX_OPTIMIZATION,
        }
    }

    /// Set the optimization level (clamped to 1-3)
    #[must_use]
    pub fn with_optimization(self, level: u8) -> Self {
        let optimization = level.clamp(1, MAX_OPTIMIZATION);
        match self {
            Self::Lossless { .. } => Self::Lossless { optimization },
            Self::Lossy { loss, .. } => Self::Lossy { loss, optimization },
            Self::UltraLossy { loss, .. } => Self::UltraLossy { loss, optimization },
        }
    }

    /// Optimization level
    #[must_use]
    pub const fn optimization(&self) -> u8 {
        match self {
            Self::Lossless { optimization }
            | Self::Lossy { optimization, .. }
            | Self::UltraLossy { optimization, .. } => *optimization,
        }
    }

    /// Loss level, `None` for lossless
    #[must_use]
    pub const fn loss(&self) -> Option<u16> {
        match self {
            Self::Lossless { .. } => None,
            Self::Lossy { loss, .. } | Self::UltraLossy { loss, .. } => Some(*loss),
        }
    }

    /// Profile name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.artifact_kind().name()
    }

    /// Kind of artifact this profile derives
    #[must_use]
    pub const fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Self::Lossless { .. } => ArtifactKind::Lossless,
            Self::Lossy { .. } => ArtifactKind::Lossy,
            Self::UltraLossy { .. } => ArtifactKind::UltraLossy,
        }
    }
}

impl fmt::Display for CompressionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loss() {
            Some(loss) => write!(f, "{} (loss {loss}, O{})", self.name(), self.optimization()),
            None => write!(f, "{} (O{})", self.name(), self.optimization()),
        }
    }
}

/// Backend that re-encodes a GIF under a profile
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `input`; must not assume it may modify the input
    async fn transcode(&self, input: &[u8], profile: &CompressionProfile) -> CastResult<Vec<u8>>;
}

/// Derives compressed artifacts with bounded retry
pub struct PostCompressor {
    transcoder: Arc<dyn Transcoder>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PostCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostCompressor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for PostCompressor {
    fn default() -> Self {
        Self::new(Arc::new(NativeTranscoder::new()))
    }
}

impl PostCompressor {
    /// Create a compressor with the default policy (3 attempts, 1s/2s backoff)
    #[must_use]
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            policy: BackoffPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the clock used for backoff sleeps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Retry policy
    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Derive a new artifact from `artifact` under `profile`
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Compression`] once every attempt failed or
    /// produced an empty buffer.
    pub async fn compress(
        &self,
        artifact: &Artifact,
        profile: &CompressionProfile,
    ) -> CastResult<Artifact> {
        let transcoder = Arc::clone(&self.transcoder);
        let bytes = retry_with_backoff(&self.policy, self.clock.as_ref(), |_attempt| {
            let transcoder = Arc::clone(&transcoder);
            async move {
                let output = transcoder.transcode(artifact.as_bytes(), profile).await?;
                if output.is_empty() {
                    return Err(CastError::encode("transcoder produced an empty artifact"));
                }
                Ok(output)
            }
        })
        .await
        .map_err(|exhausted| CastError::Compression {
            profile: profile.name().to_string(),
            attempts: exhausted.attempts,
            message: exhausted.last_error.to_string(),
        })?;

        info!(
            profile = %profile,
            original_bytes = artifact.len(),
            derived_bytes = bytes.len(),
            "derived artifact"
        );
        Ok(Artifact::new(profile.artifact_kind(), bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then echoes the input reversed
    struct FlakyTranscoder {
        failures: usize,
        calls: AtomicUsize,
        empty_instead: bool,
    }

    impl FlakyTranscoder {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                empty_instead: false,
            }
        }

        fn empty(failures: usize) -> Self {
            Self {
                empty_instead: true,
                ..Self::new(failures)
            }
        }
    }

    #[async_trait]
    impl Transcoder for FlakyTranscoder {
        async fn transcode(&self, input: &[u8], _profile: &CompressionProfile) -> CastResult<Vec<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.empty_instead {
                    return Ok(Vec::new());
                }
                return Err(CastError::encode(format!("induced failure {call}")));
            }
            Ok(input.iter().rev().copied().collect())
        }
    }

    fn compressor(transcoder: Arc<FlakyTranscoder>, clock: &FakeClock) -> PostCompressor {
        PostCompressor::new(transcoder).with_clock(Arc::new(clock.clone()))
    }

    mod profile_tests {
        use super::*;

        #[test]
        fn test_names_and_kinds() {
            assert_eq!(CompressionProfile::lossless().name(), "lossless");
            assert_eq!(CompressionProfile::lossy(80).artifact_kind(), ArtifactKind::Lossy);
            assert_eq!(CompressionProfile::ultra_lossy(200).loss(), Some(200));
            assert_eq!(CompressionProfile::lossless().loss(), None);
        }

        #[test]
        fn test_optimization_clamped() {
            assert_eq!(CompressionProfile::lossy(80).with_optimization(9).optimization(), 3);
            assert_eq!(CompressionProfile::lossless().with_optimization(0).optimization(), 1);
        }

        #[test]
        fn test_serde_tagging() {
            let json = serde_json::to_string(&CompressionProfile::lossy(80)).unwrap();
            assert!(json.contains("\"kind\":\"lossy\""));
            let back: CompressionProfile = serde_json::from_str(&json).unwrap();
            assert_eq!(back, CompressionProfile::lossy(80));
        }

        #[test]
        fn test_display() {
            assert_eq!(CompressionProfile::lossy(80).to_string(), "lossy (loss 80, O3)");
            assert_eq!(CompressionProfile::lossless().to_string(), "lossless (O3)");
        }
    }

    mod compressor_tests {
        use super::*;

        #[tokio::test]
        async fn test_success_does_not_mutate_input() {
            let clock = FakeClock::new();
            let transcoder = Arc::new(FlakyTranscoder::new(0));
            let original = Artifact::new(ArtifactKind::Original, vec![1, 2, 3, 4]);
            let before = original.as_bytes().to_vec();

            let derived = compressor(transcoder, &clock)
                .compress(&original, &CompressionProfile::lossy(80))
                .await
                .unwrap();

            assert_eq!(original.as_bytes(), before.as_slice());
            assert_eq!(derived.as_bytes(), &[4, 3, 2, 1]);
            assert_eq!(derived.kind(), ArtifactKind::Lossy);
            assert!(clock.sleeps().is_empty());
        }

        #[tokio::test]
        async fn test_recovers_after_two_failures() {
            let clock = FakeClock::new();
            let transcoder = Arc::new(FlakyTranscoder::new(2));
            let original = Artifact::new(ArtifactKind::Original, vec![5, 6]);

            let derived = compressor(Arc::clone(&transcoder), &clock)
                .compress(&original, &CompressionProfile::lossless())
                .await
                .unwrap();

            assert!(!derived.is_empty());
            assert_eq!(transcoder.calls.load(Ordering::SeqCst), 3);
            assert_eq!(
                clock.sleeps(),
                vec![Duration::from_secs(1), Duration::from_secs(2)]
            );
        }

        #[tokio::test]
        async fn test_three_failures_raise_compression_error() {
            let clock = FakeClock::new();
            let transcoder = Arc::new(FlakyTranscoder::new(3));
            let original = Artifact::new(ArtifactKind::Original, vec![5, 6]);

            let err = compressor(Arc::clone(&transcoder), &clock)
                .compress(&original, &CompressionProfile::ultra_lossy(200))
                .await
                .unwrap_err();

            match err {
                CastError::Compression {
                    profile, attempts, ..
                } => {
                    assert_eq!(profile, "ultra-lossy");
                    assert_eq!(attempts, 3);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(transcoder.calls.load(Ordering::SeqCst), 3);
            assert_eq!(original.as_bytes(), &[5, 6]);
        }

        #[tokio::test]
        async fn test_empty_output_counts_as_failure() {
            let clock = FakeClock::new();
            let transcoder = Arc::new(FlakyTranscoder::empty(3));
            let original = Artifact::new(ArtifactKind::Original, vec![5, 6]);

            let err = compressor(transcoder, &clock)
                .compress(&original, &CompressionProfile::lossy(80))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("empty"));
            assert!(!err.is_fatal());
        }
    }
}
